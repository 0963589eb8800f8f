pub mod catalog;
pub mod context;
pub mod store;

pub use context::{Clock, CoreContext};
pub use store::StoreClient;
