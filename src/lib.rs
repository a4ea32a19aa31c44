pub mod api;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod ml;
pub mod registry;
pub mod runtime;
pub mod types;

pub use error::{ForgeError, Result};
