pub mod driver;
pub mod fare;
pub mod notification;
pub mod ride;
