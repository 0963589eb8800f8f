pub mod models;
pub mod services;

pub use models::*;
pub use services::matching::{classify, match_entities, score_candidate, AMBIGUITY_BAND};
