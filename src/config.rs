use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub dispatch_queue_size: usize,
    pub refresh_interval_secs: u64,
    pub offer_limit: usize,
    pub offer_radius_km: f64,
    pub max_offers_per_ride: usize,
    pub dispatch_retry_limit: u32,
    pub fallback_speed_kmh: f64,
    /// Offset of the local clock used for night and peak fare windows.
    pub utc_offset_minutes: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            dispatch_queue_size: 1024,
            refresh_interval_secs: 10,
            offer_limit: 20,
            offer_radius_km: 10.0,
            max_offers_per_ride: 10,
            dispatch_retry_limit: 3,
            fallback_speed_kmh: 25.0,
            utc_offset_minutes: 330,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            dispatch_queue_size: parse_or_default(
                "DISPATCH_QUEUE_SIZE",
                defaults.dispatch_queue_size,
            )?,
            refresh_interval_secs: parse_or_default(
                "REFRESH_INTERVAL_SECS",
                defaults.refresh_interval_secs,
            )?,
            offer_limit: parse_or_default("OFFER_LIMIT", defaults.offer_limit)?,
            offer_radius_km: parse_or_default("OFFER_RADIUS_KM", defaults.offer_radius_km)?,
            max_offers_per_ride: parse_or_default(
                "MAX_OFFERS_PER_RIDE",
                defaults.max_offers_per_ride,
            )?,
            dispatch_retry_limit: parse_or_default(
                "DISPATCH_RETRY_LIMIT",
                defaults.dispatch_retry_limit,
            )?,
            fallback_speed_kmh: parse_or_default(
                "FALLBACK_SPEED_KMH",
                defaults.fallback_speed_kmh,
            )?,
            utc_offset_minutes: parse_or_default(
                "UTC_OFFSET_MINUTES",
                defaults.utc_offset_minutes,
            )?,
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
