pub mod traits;
pub mod backend;
pub mod training;
pub mod storage;
pub mod manager;

pub use manager::{AppConfig, ConfigManager, ENV_PREFIX};
pub use backend::{BackendConfig, BackendKind, RemoteConfig, SubprocessConfig};
pub use training::TrainingConfig;
pub use storage::{StorageConfig, StorageKind};
pub use traits::ConfigSection;
