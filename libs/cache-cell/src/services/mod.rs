pub mod availability;
pub mod context;
pub mod maintenance;
pub mod patient;
pub mod service_match;
pub mod sessions;
pub mod stats;
