pub mod bridge;
pub mod controller;
pub mod dispatch;
pub mod fare;
pub mod lifecycle;
pub mod otp;
pub mod queue;
pub mod session;
pub mod tracker;
