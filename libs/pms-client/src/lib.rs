pub mod client;
pub mod error;
pub mod models;
pub mod throttle;

pub use client::PmsClient;
pub use error::PmsError;
pub use throttle::{ClinicThrottle, PmsGateway};
