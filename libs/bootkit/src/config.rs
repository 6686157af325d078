//! Layered application configuration.
//!
//! Precedence, lowest first:
//! 1. built-in defaults
//! 2. YAML file (if given)
//! 3. environment variables `BOOTKIT__<SECTION>__<KEY>`
//!
//! Module sections follow `modules.<name>.config`; the `config` value is what the module
//! receives as its mount options.

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::cluster::ClusterSettings;
use crate::logging::LoggingConfig;

/// Prefix of environment overrides; `__` separates nesting levels.
pub const ENV_PREFIX: &str = "BOOTKIT__";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("config file does not exist: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("failed to load configuration: {0}")]
    Load(#[source] Box<figment::Error>),
    #[error("invalid config for module '{module}': {source}")]
    InvalidModuleConfig {
        module: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to render configuration as YAML: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub cluster: ClusterSettings,
    /// Raw per-module sections keyed by module name.
    pub modules: BTreeMap<String, serde_json::Value>,
}

impl AppConfig {
    /// The layered provider chain, without extracting.
    #[must_use]
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load from `path` (required to exist), then apply environment overrides.
    ///
    /// # Errors
    /// `ConfigError::NotFound` if the file is missing, `ConfigError::Load` if a layer
    /// cannot be parsed or does not fit the schema.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Self::extract(&Self::figment(Some(path)))
    }

    /// Like [`load`](Self::load); without a path only defaults and environment apply.
    ///
    /// # Errors
    /// See [`load`](Self::load).
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::extract(&Self::figment(None)),
        }
    }

    fn extract(figment: &Figment) -> Result<Self, ConfigError> {
        figment
            .extract()
            .map_err(|e| ConfigError::Load(Box::new(e)))
    }

    /// Mount options for module `name`: its `config` section, or `null`.
    #[must_use]
    pub fn module_options(&self, name: &str) -> serde_json::Value {
        self.modules
            .get(name)
            .and_then(|section| section.get("config"))
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    }

    /// Typed view of a module's `config` section; `T::default()` when absent.
    ///
    /// # Errors
    /// `ConfigError::InvalidModuleConfig` if the section does not match `T`.
    pub fn module_config<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, ConfigError> {
        let options = self.module_options(name);
        if options.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(options).map_err(|source| ConfigError::InvalidModuleConfig {
            module: name.to_owned(),
            source,
        })
    }

    /// Raise the log level from a `-v` count (1 info, 2 debug, 3+ trace).
    pub fn apply_verbosity(&mut self, verbose: u8) {
        let level = match verbose {
            0 => return,
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        level.clone_into(&mut self.logging.level);
    }

    /// # Errors
    /// `ConfigError::Render` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        serde_saphyr::to_string(self).map_err(|e| ConfigError::Render(e.to_string()))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const YAML: &str = r"
logging:
  level: debug
cluster:
  cpus: 2
  workers:
    auto_restart:
      delay_ms: 250
modules:
  greeter:
    config:
      greeting: hello
      repeat: 3
";

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[derive(Debug, Default, PartialEq, Deserialize)]
    struct GreeterConfig {
        greeting: String,
        repeat: u32,
    }

    #[test]
    fn defaults_without_file() {
        temp_env::with_var_unset("BOOTKIT__CLUSTER__CPUS", || {
            let cfg = AppConfig::load_or_default(None).unwrap();
            assert_eq!(cfg.logging, LoggingConfig::default());
            assert!(cfg.cluster.auto_restart().enabled);
            assert!(cfg.modules.is_empty());
        });
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let err = AppConfig::load_or_default(Some(Path::new("/definitely/not/here.yaml")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn yaml_file_is_merged_over_defaults() {
        let file = write_config(YAML);
        let cfg = temp_env::with_vars_unset(["BOOTKIT__CLUSTER__CPUS", "BOOTKIT__LOGGING__LEVEL"], || {
            AppConfig::load(file.path()).unwrap()
        });

        assert_eq!(cfg.logging.level, "debug");
        assert_eq!(cfg.cluster.cpus, Some(2));
        assert_eq!(cfg.cluster.auto_restart().delay_ms, 250);
        assert!(cfg.cluster.auto_restart().enabled);
        assert_eq!(
            cfg.module_options("greeter"),
            json!({"greeting": "hello", "repeat": 3})
        );

        let typed: GreeterConfig = cfg.module_config("greeter").unwrap();
        assert_eq!(typed.greeting, "hello");
        assert_eq!(typed.repeat, 3);
        assert!(cfg.module_options("missing").is_null());
        assert_eq!(
            cfg.module_config::<GreeterConfig>("missing").unwrap(),
            GreeterConfig::default()
        );
    }

    #[test]
    fn environment_overrides_file() {
        let file = write_config(YAML);
        temp_env::with_vars(
            [
                ("BOOTKIT__CLUSTER__CPUS", Some("6")),
                ("BOOTKIT__LOGGING__JSON", Some("true")),
            ],
            || {
                let cfg = AppConfig::load(file.path()).unwrap();
                assert_eq!(cfg.cluster.cpus, Some(6));
                assert!(cfg.logging.json);
                assert_eq!(cfg.logging.level, "debug");
            },
        );
    }

    #[test]
    fn invalid_module_section_is_reported() {
        let cfg = AppConfig {
            modules: BTreeMap::from([(
                "greeter".to_owned(),
                json!({"config": {"repeat": "lots"}}),
            )]),
            ..AppConfig::default()
        };
        let err = cfg.module_config::<GreeterConfig>("greeter").unwrap_err();
        assert!(err.to_string().contains("greeter"));
    }

    #[test]
    fn verbosity_raises_level() {
        let mut cfg = AppConfig::default();
        cfg.apply_verbosity(0);
        assert_eq!(cfg.logging.level, "info");
        cfg.apply_verbosity(2);
        assert_eq!(cfg.logging.level, "debug");
        cfg.apply_verbosity(5);
        assert_eq!(cfg.logging.level, "trace");
    }

    #[test]
    fn renders_yaml() {
        let yaml = AppConfig::default().to_yaml().unwrap();
        assert!(yaml.contains("delay_ms"));
    }
}
