pub mod backend;
pub mod core;
pub mod features;
pub mod scraping;
pub mod tools;

// --- Primary core exports ---
pub use self::core::types;
pub use self::core::types::*;
pub use self::core::{Session, SessionOptions};

// --- Flat module paths ---
pub use backend::{CoinBackend, HttpBackend};
pub use features::{balance, observer, preferences, processing, scanner};
pub use tools::{batch, bulk_unlock, prompt, unlock};
