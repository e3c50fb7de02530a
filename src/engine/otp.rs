use rand::Rng;
use serde::{Deserialize, Serialize};

pub const OTP_MIN: u16 = 1000;
pub const OTP_MAX: u16 = 9999;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    Pickup,
    Drop,
}

/// Uniform 4-digit code in `OTP_MIN..=OTP_MAX`.
pub fn generate_otp<R: Rng + ?Sized>(rng: &mut R) -> String {
    rng.gen_range(OTP_MIN..=OTP_MAX).to_string()
}

/// Exact match against the stored code. A cleared code never verifies.
pub fn verify_otp(stored: Option<&str>, supplied: &str) -> bool {
    match stored {
        Some(code) => !code.is_empty() && code == supplied.trim(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::{OTP_MAX, OTP_MIN, generate_otp, verify_otp};

    #[test]
    fn generated_codes_are_four_digits_in_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2_000 {
            let code = generate_otp(&mut rng);
            let value: u16 = code.parse().unwrap();
            assert_eq!(code.len(), 4);
            assert!((OTP_MIN..=OTP_MAX).contains(&value));
        }
    }

    #[test]
    fn verification_is_exact() {
        assert!(verify_otp(Some("4821"), "4821"));
        assert!(verify_otp(Some("4821"), " 4821 "));
        assert!(!verify_otp(Some("4821"), "4812"));
        assert!(!verify_otp(Some("4821"), "04821"));
    }

    #[test]
    fn cleared_code_never_verifies() {
        assert!(!verify_otp(None, ""));
        assert!(!verify_otp(None, "1000"));
        assert!(!verify_otp(Some(""), ""));
    }
}
