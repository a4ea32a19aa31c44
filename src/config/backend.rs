use super::traits::ConfigSection;
use crate::error::ForgeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Fixes the RNG used by the simulated backend and hold-out shuffling
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Simulated,
    Native,
    Subprocess,
    Remote,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simulated => "simulated",
            Self::Native => "native",
            Self::Subprocess => "subprocess",
            Self::Remote => "remote",
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self, ForgeError> {
        [Self::Simulated, Self::Native, Self::Subprocess, Self::Remote]
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                ForgeError::Configuration(format!(
                    "Unknown backend '{}' (expected simulated, native, subprocess or remote)",
                    s
                ))
            })
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Simulated,
            seed: None,
        }
    }
}

impl ConfigSection for BackendConfig {
    fn section_name() -> &'static str {
        "backend"
    }

    fn validate(&self) -> Result<(), ForgeError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubprocessConfig {
    pub interpreter: String,
    pub timeout_secs: u64,
    /// Scratch directory for generated scripts; system temp dir when unset
    pub work_dir: Option<PathBuf>,
    pub keep_scripts: bool,
}

impl Default for SubprocessConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            timeout_secs: 300,
            work_dir: None,
            keep_scripts: false,
        }
    }
}

impl ConfigSection for SubprocessConfig {
    fn section_name() -> &'static str {
        "subprocess"
    }

    fn validate(&self) -> Result<(), ForgeError> {
        if self.interpreter.trim().is_empty() {
            return Err(ForgeError::Configuration(
                "Subprocess interpreter must not be empty".to_string()
            ));
        }
        if self.timeout_secs == 0 {
            return Err(ForgeError::Configuration(
                "Subprocess timeout must be positive".to_string()
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub api_key: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8500".to_string(),
            timeout_secs: 120,
            api_key: None,
        }
    }
}

impl ConfigSection for RemoteConfig {
    fn section_name() -> &'static str {
        "remote"
    }

    fn validate(&self) -> Result<(), ForgeError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ForgeError::Configuration(format!(
                "Remote base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.timeout_secs == 0 {
            return Err(ForgeError::Configuration(
                "Remote timeout must be positive".to_string()
            ));
        }
        Ok(())
    }
}
