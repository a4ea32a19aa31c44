use super::{
    backend::{BackendConfig, RemoteConfig, SubprocessConfig},
    storage::StorageConfig,
    traits::ConfigSection,
    training::TrainingConfig,
};
use crate::error::ForgeError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Prefix of environment overrides, e.g. `MODELFORGE__BACKEND__KIND=native`
pub const ENV_PREFIX: &str = "MODELFORGE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub subprocess: SubprocessConfig,
    pub remote: RemoteConfig,
    pub training: TrainingConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ForgeError> {
        self.backend.validate()?;
        self.subprocess.validate()?;
        self.remote.validate()?;
        self.training.validate()?;
        self.storage.validate()?;
        Ok(())
    }
}

pub struct ConfigManager {
    config: Arc<RwLock<AppConfig>>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(AppConfig::default())),
        }
    }

    pub fn load_from_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ForgeError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ForgeError::Configuration(format!("Failed to read config: {}", e)))?;

        let config: AppConfig = toml::from_str(&contents)
            .map_err(|e| ForgeError::Configuration(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        Ok(())
    }

    /// Optional TOML file overlaid with `MODELFORGE__SECTION__KEY`
    /// environment variables
    pub fn load_layered(&self, path: Option<&Path>) -> Result<(), ForgeError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ForgeError::Configuration(format!("Failed to load config: {}", e)))?;

        config.validate()?;
        log::debug!("Loaded configuration: {:?}", config);

        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        Ok(())
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ForgeError> {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        let toml_str = toml::to_string_pretty(&*config)
            .map_err(|e| ForgeError::Configuration(format!("Failed to serialize: {}", e)))?;

        std::fs::write(path, toml_str)
            .map_err(|e| ForgeError::Configuration(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    pub fn get(&self) -> AppConfig {
        self.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Applies `f` and keeps the result only if it validates
    pub fn update<F>(&self, f: F) -> Result<(), ForgeError>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        let mut candidate = config.clone();
        f(&mut candidate);
        candidate.validate()?;
        *config = candidate;
        Ok(())
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendKind, StorageKind};

    #[test]
    fn test_defaults_validate() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modelforge.toml");

        let manager = ConfigManager::new();
        manager
            .update(|c| {
                c.backend.kind = BackendKind::Native;
                c.backend.seed = Some(7);
                c.storage.kind = StorageKind::Memory;
            })
            .unwrap();
        manager.save_to_file(&path).unwrap();

        let reloaded = ConfigManager::new();
        reloaded.load_from_file(&path).unwrap();
        let config = reloaded.get();
        assert_eq!(config.backend.kind, BackendKind::Native);
        assert_eq!(config.backend.seed, Some(7));
        assert_eq!(config.storage.kind, StorageKind::Memory);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[training]\ntest_size = 0.3\n").unwrap();

        let manager = ConfigManager::new();
        manager.load_from_file(&path).unwrap();
        let config = manager.get();
        assert_eq!(config.training.test_size, 0.3);
        assert_eq!(config.subprocess.interpreter, "python3");
    }

    #[test]
    fn test_invalid_update_is_discarded() {
        let manager = ConfigManager::new();
        let result = manager.update(|c| c.training.test_size = 1.5);
        assert!(result.is_err());
        assert_eq!(manager.get().training.test_size, 0.2);
    }

    #[test]
    fn test_layered_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layered.toml");
        std::fs::write(&path, "[backend]\nkind = \"subprocess\"\n[subprocess]\ntimeout_secs = 12\n").unwrap();

        let manager = ConfigManager::new();
        manager.load_layered(Some(&path)).unwrap();
        let config = manager.get();
        assert_eq!(config.backend.kind, BackendKind::Subprocess);
        assert_eq!(config.subprocess.timeout_secs, 12);
    }
}
