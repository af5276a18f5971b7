//! Configuration for runbookpilot.
//!
//! Configuration sources (highest priority first):
//! 1. `--config <path>` on the command line
//! 2. `RUNBOOKPILOT_CONFIG` environment variable
//! 3. Config file discovered as `.runbookpilot/config.yaml`
//! 4. Defaults (L1, no adapters)
//!
//! Config file discovery:
//! - Searches current directory and parents for .runbookpilot/config.yaml
//! - `${VAR}` placeholders in credential secrets are expanded from the environment

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::adapters::AdapterConfig;
use crate::domain::AutomationLevel;

/// Environment variable overriding config file discovery
pub const CONFIG_ENV_VAR: &str = "RUNBOOKPILOT_CONFIG";

/// Directory searched for `config.yaml`
pub const CONFIG_DIR: &str = ".runbookpilot";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub automation_level: AutomationLevel,

    /// Allow fully automated (L2) runs
    #[serde(default)]
    pub enable_l2: bool,

    #[serde(default)]
    pub adapters: Vec<AdapterConfig>,
}

fn default_version() -> String {
    "1".to_string()
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            version: default_version(),
            automation_level: AutomationLevel::default(),
            enable_l2: false,
            adapters: Vec::new(),
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone, Default)]
pub struct ResolvedConfig {
    pub automation_level: AutomationLevel,
    pub enable_l2: bool,

    /// Adapter configs with secrets expanded
    pub adapters: Vec<AdapterConfig>,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

/// Find config file by searching `start` and its parents
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Expand `${VAR}` placeholders using `lookup`; unset variables become empty
fn expand_vars(value: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                out.push_str(&lookup(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated placeholder, keep verbatim
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn expand_secrets(adapters: &mut [AdapterConfig], lookup: impl Fn(&str) -> Option<String> + Copy) {
    for adapter in adapters {
        if let Some(credentials) = adapter.credentials.as_mut() {
            for value in credentials.secrets.values_mut() {
                *value = expand_vars(value, lookup);
            }
        }
    }
}

fn resolve(config: ConfigFile, config_file: Option<PathBuf>) -> ResolvedConfig {
    let mut adapters = config.adapters;
    expand_secrets(&mut adapters, |name| std::env::var(name).ok());

    ResolvedConfig {
        automation_level: config.automation_level,
        enable_l2: config.enable_l2,
        adapters,
        config_file,
    }
}

/// Load configuration from all sources.
///
/// `explicit` is the `--config` path; a missing explicit or env-var file is
/// an error, a missing discovered file just means defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<ResolvedConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
            _ => {
                let cwd = std::env::current_dir().context("Failed to determine current directory")?;
                find_config_file(&cwd)
            }
        },
    };

    match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading config file");
            let config = load_config_file(&path)?;
            Ok(resolve(config, Some(path)))
        }
        None => {
            debug!("No config file found, using defaults");
            Ok(resolve(ConfigFile::default(), None))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const CONFIG_YAML: &str = r#"
version: "1"
automation_level: 0
adapters:
  - name: vt
    type: virustotal
    config:
      base_url: https://vt.example.test/api/v3/
    credentials:
      kind: api_key
      secrets:
        api_key: "${RUNBOOKPILOT_TEST_VT_KEY}"
    retry:
      max_attempts: 5
  - name: vt-backup
    type: virustotal
    enabled: false
"#;

    fn write_config(root: &Path) -> PathBuf {
        let dir = root.join(CONFIG_DIR);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{}", CONFIG_YAML).unwrap();
        path
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path());

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.version, "1");
        assert_eq!(config.automation_level, AutomationLevel::L0);
        assert!(!config.enable_l2);
        assert_eq!(config.adapters.len(), 2);

        let vt = &config.adapters[0];
        assert_eq!(vt.adapter_type, "virustotal");
        assert_eq!(vt.retry.max_attempts, 5);
        assert_eq!(vt.retry.backoff_ms, 1000);
        assert_eq!(vt.timeout, 30);
        assert!(!config.adapters[1].enabled);
    }

    #[test]
    fn test_find_config_in_parent() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path());
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_config_file(&nested), Some(path));
    }

    #[test]
    fn test_explicit_path_wins() {
        let temp = TempDir::new().unwrap();
        let path = write_config(temp.path());

        let resolved = load_config(Some(&path)).unwrap();
        assert_eq!(resolved.config_file, Some(path));
        assert_eq!(resolved.adapters.len(), 2);
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(load_config(Some(&temp.path().join("nope.yaml"))).is_err());
    }

    #[test]
    fn test_expand_vars() {
        let lookup = |name: &str| (name == "KEY").then(|| "s3cret".to_string());
        assert_eq!(expand_vars("${KEY}", lookup), "s3cret");
        assert_eq!(expand_vars("pre-${KEY}-post", lookup), "pre-s3cret-post");
        assert_eq!(expand_vars("${UNSET}", lookup), "");
        assert_eq!(expand_vars("plain", lookup), "plain");
        assert_eq!(expand_vars("${KEY", lookup), "${KEY");
    }

    #[test]
    fn test_unset_secret_counts_as_missing() {
        let mut config: ConfigFile = serde_yaml::from_str(CONFIG_YAML).unwrap();
        expand_secrets(&mut config.adapters, |_| None);
        let creds = config.adapters[0].credentials.as_ref().unwrap();
        assert_eq!(creds.secret("api_key"), None);
    }
}
