pub mod errors;
pub mod value;

pub use value::Value;

// Re-exports
pub use indexmap;
pub use log;
pub use ordered_float;
pub use parking_lot;
pub use serde;
pub use serde_json;
pub use serde_yaml;
pub use thiserror;
pub use tokio;
