//! Common utilities and types shared across satchel

pub mod config;
pub mod error;
pub mod utils;

pub use config::{AccountingMode, CoordinatorConfig};
pub use error::{Error, EventSink, Result};
pub use utils::format_bytes;
