//! Session configuration
//!
//! One TOML file describes a session: which target to use and where its
//! root is, how to reach a remote host, how to start the dispatcher and
//! which artifacts to synchronize.
//!
//! ```toml
//! schema_version = 1
//!
//! [target]
//! kind = "remote"
//! root = "/var/tmp/rcall/session-1"
//!
//! [target.ssh]
//! host = "build-01.local"
//!
//! [invoke]
//! dispatcher = "./rcall-dispatch"
//!
//! [artifacts]
//! dir = "dist"
//! exclude = ["*.log"]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::sync::{ArtifactSet, SyncError};
use crate::transport::SshConfig;

/// Supported configuration schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Upper bound for `connect_timeout_seconds`
const MAX_CONNECT_TIMEOUT: u32 = 300;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {}: {source}", path.display())]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("unsupported schema_version {0} (expected {expected})", expected = SCHEMA_VERSION)]
    UnsupportedSchema(u32),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Kind of execution target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Local,
    Remote,
}

/// `[target]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub kind: TargetKind,
    /// Session root on the target. Optional for local targets, which then
    /// use a fresh scratch directory.
    #[serde(default)]
    pub root: Option<String>,
    /// Remote host settings, required for remote targets
    #[serde(default)]
    pub ssh: Option<SshConfig>,
}

/// `[invoke]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeConfig {
    /// Dispatcher command, run from the session root
    #[serde(default = "default_dispatcher")]
    pub dispatcher: String,
    /// Run the dispatcher with `sudo -n`
    #[serde(default)]
    pub elevate: bool,
}

fn default_dispatcher() -> String {
    "./rcall-dispatch".to_string()
}

impl Default for InvokeConfig {
    fn default() -> Self {
        Self {
            dispatcher: default_dispatcher(),
            elevate: false,
        }
    }
}

/// `[artifacts]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory to mirror into the session root
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Explicit files, each synchronized under its file name
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// Extra exclusion globs for `dir`
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Ignore file other than `<dir>/.rcallignore`
    #[serde(default)]
    pub ignore_file: Option<PathBuf>,
}

/// Complete session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub target: TargetConfig,
    #[serde(default)]
    pub invoke: InvokeConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    /// Directory relative artifact paths resolve against
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl SessionConfig {
    /// Load and validate a configuration file. Relative artifact paths are
    /// resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ConfigError::UnsupportedSchema(self.schema_version));
        }

        if let Some(root) = &self.target.root {
            if root.contains('\n') {
                return Err(ConfigError::ValidationError(
                    "target.root must not contain a newline".to_string(),
                ));
            }
        }

        if self.target.kind == TargetKind::Remote {
            match self.target.root.as_deref() {
                Some(root) if root.starts_with('/') => {}
                Some(root) => {
                    return Err(ConfigError::ValidationError(format!(
                        "target.root must be an absolute path, got {:?}",
                        root
                    )))
                }
                None => {
                    return Err(ConfigError::ValidationError(
                        "target.root is required for remote targets".to_string(),
                    ))
                }
            }

            let ssh = self.target.ssh.as_ref().ok_or_else(|| {
                ConfigError::ValidationError("[target.ssh] is required for remote targets".to_string())
            })?;
            if ssh.host.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "target.ssh.host must not be empty".to_string(),
                ));
            }
            if ssh.connect_timeout_seconds == 0 || ssh.connect_timeout_seconds > MAX_CONNECT_TIMEOUT {
                return Err(ConfigError::ValidationError(format!(
                    "target.ssh.connect_timeout_seconds must be in (0, {}], got {}",
                    MAX_CONNECT_TIMEOUT, ssh.connect_timeout_seconds
                )));
            }
        }

        if self.invoke.dispatcher.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "invoke.dispatcher must not be empty".to_string(),
            ));
        }

        if self.artifacts.dir.is_some() && !self.artifacts.files.is_empty() {
            return Err(ConfigError::ValidationError(
                "artifacts.dir and artifacts.files are mutually exclusive".to_string(),
            ));
        }

        Ok(())
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// The artifact set this configuration describes.
    pub fn artifact_set(&self) -> Result<ArtifactSet, SyncError> {
        let artifacts = &self.artifacts;
        if let Some(dir) = &artifacts.dir {
            let mut set = ArtifactSet::from_dir(self.resolve(dir))?.with_excludes(&artifacts.exclude)?;
            if let Some(ignore) = &artifacts.ignore_file {
                set = set.with_ignore_file(&self.resolve(ignore))?;
            }
            Ok(set)
        } else {
            Ok(ArtifactSet::from_files(
                artifacts.files.iter().map(|f| self.resolve(f)),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REMOTE: &str = r#"
schema_version = 1

[target]
kind = "remote"
root = "/var/tmp/rcall/session-1"

[target.ssh]
host = "build-01.local"
key_path = "~/.ssh/rcall"

[invoke]
elevate = true

[artifacts]
dir = "dist"
exclude = ["*.log"]
"#;

    #[test]
    fn test_remote_config_with_defaults() {
        let config = SessionConfig::from_toml_str(REMOTE).unwrap();
        assert_eq!(config.target.kind, TargetKind::Remote);
        let ssh = config.target.ssh.as_ref().unwrap();
        assert_eq!(ssh.user, "rcall");
        assert_eq!(ssh.port, 22);
        assert_eq!(ssh.connect_timeout_seconds, 30);
        assert_eq!(ssh.server_alive_interval, 15);
        assert_eq!(ssh.server_alive_count_max, 2);
        assert_eq!(ssh.control_persist_seconds, 60);
        assert_eq!(config.invoke.dispatcher, "./rcall-dispatch");
        assert!(config.invoke.elevate);
        assert_eq!(config.artifacts.exclude, vec!["*.log"]);
    }

    #[test]
    fn test_minimal_local_config() {
        let config = SessionConfig::from_toml_str("[target]\nkind = \"local\"\n").unwrap();
        assert_eq!(config.target.kind, TargetKind::Local);
        assert!(config.target.root.is_none());
        assert_eq!(config.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn test_remote_root_must_be_absolute() {
        let text = REMOTE.replace("/var/tmp/rcall/session-1", "relative/root");
        assert!(matches!(
            SessionConfig::from_toml_str(&text),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_remote_requires_ssh_host() {
        let text = REMOTE.replace("host = \"build-01.local\"", "host = \"\"");
        assert!(matches!(
            SessionConfig::from_toml_str(&text),
            Err(ConfigError::ValidationError(_))
        ));

        let text = "[target]\nkind = \"remote\"\nroot = \"/srv/s\"\n";
        assert!(matches!(
            SessionConfig::from_toml_str(text),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_connect_timeout_bounds() {
        for bad in ["0", "301"] {
            let text = REMOTE.replace(
                "key_path",
                &format!("connect_timeout_seconds = {}\nkey_path", bad),
            );
            assert!(
                matches!(SessionConfig::from_toml_str(&text), Err(ConfigError::ValidationError(_))),
                "timeout {} accepted",
                bad
            );
        }
        let text = REMOTE.replace("key_path", "connect_timeout_seconds = 300\nkey_path");
        assert!(SessionConfig::from_toml_str(&text).is_ok());
    }

    #[test]
    fn test_empty_dispatcher_rejected() {
        let text = REMOTE.replace("elevate = true", "dispatcher = \"\"");
        assert!(matches!(
            SessionConfig::from_toml_str(&text),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_unsupported_schema() {
        let text = REMOTE.replace("schema_version = 1", "schema_version = 2");
        assert!(matches!(
            SessionConfig::from_toml_str(&text),
            Err(ConfigError::UnsupportedSchema(2))
        ));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            SessionConfig::from_toml_str("[target\nkind="),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_load_resolves_artifacts_relative_to_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/app"), "a").unwrap();
        std::fs::write(dir.path().join("dist/run.log"), "l").unwrap();
        let path = dir.path().join("rcall.toml");
        std::fs::write(&path, REMOTE).unwrap();

        let config = SessionConfig::load(&path).unwrap();
        let names: Vec<String> = config
            .artifact_set()
            .unwrap()
            .enumerate()
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["app"]);
    }

    #[test]
    fn test_missing_file() {
        let err = SessionConfig::load(Path::new("/nonexistent/rcall.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError { .. }));
    }
}
