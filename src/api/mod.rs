//! JSON endpoints (`/train`, `/predict`, `/import-model`,
//! `/export-notebook`) independent of any HTTP server.

pub mod dto;
pub mod service;

pub use dto::{ErrorResponse, InputData, TargetSpec};
pub use service::{ApiRequest, ApiResponse, ApiService};
