//! Persistence and lifecycle of trained models.

pub mod client;
pub mod file_store;
mod locks;
pub mod progress;
pub mod repository;

pub use client::{FineTuneOptions, ModelRegistry, TrainRequest};
pub use file_store::JsonFileRepository;
pub use progress::{ChannelProgressCallback, LogProgressCallback, NoProgress, ProgressCallback, ProgressMessage};
pub use repository::{InMemoryRepository, ModelRepository};
