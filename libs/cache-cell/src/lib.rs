pub mod models;
pub mod services;

pub use models::*;
pub use services::availability::AvailabilityCache;
pub use services::context::BookingContextCache;
pub use services::patient::PatientCache;
pub use services::service_match::ServiceMatchCache;
pub use services::sessions::SessionState;
