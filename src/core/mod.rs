pub mod config;
pub mod session;
pub mod site;
pub mod types;

pub use config::{EzyConfig, SessionSettings};
pub use session::{Session, SessionError, SessionOptions};
pub use site::{SiteConfig, SiteRegistry};
