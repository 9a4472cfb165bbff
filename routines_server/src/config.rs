//! Per-routine settings and the optional TOML config file.
//!
//! ```toml
//! bind_addr = "127.0.0.1:3000"
//! demo = true
//!
//! [ambient]
//! exec_time_secs = 30
//! memory_limit = "128M"
//!
//! [defaults]
//! exec_time_secs = 900
//!
//! [actions.demo_progress_bar]
//! show_start_banner = false
//! ```

use crate::error::ConfigError;
use crate::limits::{AmbientLimits, MemoryLimit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file to load when none is given on
/// the command line.
pub const CONFIG_ENV: &str = "ROUTINES_CONFIG";

/// Limits and banner switches for a routine. `None` inherits from the
/// previous layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutineSettings {
    pub exec_time_secs: Option<u64>,
    pub memory_limit: Option<MemoryLimit>,
    pub show_start_banner: Option<bool>,
    pub show_stop_banner: Option<bool>,
}

impl RoutineSettings {
    /// Every routine starts from these: twelve minutes, 512M, both banners.
    pub const BUILT_IN: Self = Self {
        exec_time_secs: Some(720),
        memory_limit: Some(MemoryLimit::megabytes(512)),
        show_start_banner: Some(true),
        show_stop_banner: Some(true),
    };

    /// Layers `later` on top of `self`. Each field set in `later` wins.
    pub fn merge(self, later: Self) -> Self {
        Self {
            exec_time_secs: later.exec_time_secs.or(self.exec_time_secs),
            memory_limit: later.memory_limit.or(self.memory_limit),
            show_start_banner: later.show_start_banner.or(self.show_start_banner),
            show_stop_banner: later.show_stop_banner.or(self.show_stop_banner),
        }
    }

    pub fn with_exec_time(mut self, secs: u64) -> Self {
        self.exec_time_secs = Some(secs);
        self
    }

    pub fn with_memory_limit(mut self, limit: MemoryLimit) -> Self {
        self.memory_limit = Some(limit);
        self
    }

    pub fn without_start_banner(mut self) -> Self {
        self.show_start_banner = Some(false);
        self
    }

    pub fn without_stop_banner(mut self) -> Self {
        self.show_stop_banner = Some(false);
        self
    }

    /// Fills whatever is still unset from the ambient limits. Banners default
    /// to shown.
    pub fn resolve(&self, ambient: &AmbientLimits) -> ResolvedSettings {
        ResolvedSettings {
            exec_time_secs: self.exec_time_secs.unwrap_or_else(|| ambient.exec_time_secs()),
            memory_limit: self.memory_limit.unwrap_or_else(|| ambient.memory_limit()),
            show_start_banner: self.show_start_banner.unwrap_or(true),
            show_stop_banner: self.show_stop_banner.unwrap_or(true),
        }
    }
}

/// The settings a single run goes with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub exec_time_secs: u64,
    pub memory_limit: MemoryLimit,
    pub show_start_banner: bool,
    pub show_stop_banner: bool,
}

/// Platform ceilings a run inherits before it raises anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AmbientSection {
    pub exec_time_secs: Option<u64>,
    pub memory_limit: Option<MemoryLimit>,
}

/// Contents of a routines config file. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub bind_addr: Option<SocketAddr>,
    pub demo: Option<bool>,
    pub channel_capacity: Option<usize>,
    pub ambient: AmbientSection,
    pub defaults: RoutineSettings,
    pub actions: HashMap<String, RoutineSettings>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads `explicit` if given, else the file named by [`CONFIG_ENV`], else
    /// nothing.
    pub fn discover(explicit: Option<&Path>) -> Result<Option<Self>, ConfigError> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => std::env::var_os(CONFIG_ENV)
                .filter(|value| !value.is_empty())
                .map(PathBuf::from),
        };
        match path {
            Some(path) => {
                tracing::info!("Loading config from {}", path.display());
                Self::load(&path).map(Some)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_merge_is_later_wins_per_field() {
        let global = RoutineSettings::BUILT_IN;
        let action = RoutineSettings::default()
            .with_exec_time(60)
            .without_stop_banner();
        let merged = global.merge(action);
        assert_eq!(merged.exec_time_secs, Some(60));
        assert_eq!(merged.memory_limit, Some(MemoryLimit::megabytes(512)));
        assert_eq!(merged.show_start_banner, Some(true));
        assert_eq!(merged.show_stop_banner, Some(false));
    }

    #[test]
    fn test_unset_fields_inherit_instead_of_overriding() {
        let base = RoutineSettings::default().without_start_banner();
        assert_eq!(base.merge(RoutineSettings::default()), base);
    }

    #[test]
    fn test_explicit_false_and_zero_still_override() {
        let base = RoutineSettings::BUILT_IN;
        let later = RoutineSettings {
            exec_time_secs: Some(0),
            show_start_banner: Some(false),
            ..Default::default()
        };
        let merged = base.merge(later);
        assert_eq!(merged.exec_time_secs, Some(0));
        assert_eq!(merged.show_start_banner, Some(false));
    }

    #[test]
    fn test_resolve_falls_back_to_ambient() {
        let ambient = AmbientLimits::new(45, MemoryLimit::megabytes(256));
        let resolved = RoutineSettings::default().resolve(&ambient);
        assert_eq!(
            resolved,
            ResolvedSettings {
                exec_time_secs: 45,
                memory_limit: MemoryLimit::megabytes(256),
                show_start_banner: true,
                show_stop_banner: true,
            }
        );
    }

    #[test]
    fn test_parses_full_config_file() {
        let config: ConfigFile = toml::from_str(
            r#"
            bind_addr = "0.0.0.0:8080"
            demo = true
            channel_capacity = 16

            [ambient]
            exec_time_secs = 30
            memory_limit = "128M"

            [defaults]
            exec_time_secs = 900

            [actions.reports_rebuild_index]
            memory_limit = "2G"
            show_start_banner = false
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_addr, Some("0.0.0.0:8080".parse().unwrap()));
        assert_eq!(config.demo, Some(true));
        assert_eq!(config.channel_capacity, Some(16));
        assert_eq!(config.ambient.memory_limit, Some(MemoryLimit::megabytes(128)));
        assert_eq!(config.defaults.exec_time_secs, Some(900));
        let action = &config.actions["reports_rebuild_index"];
        assert_eq!(action.memory_limit, Some(MemoryLimit::Bytes(2 * crate::limits::GB)));
        assert_eq!(action.show_start_banner, Some(false));
        assert_eq!(action.show_stop_banner, None);
    }

    #[test]
    fn test_rejects_unknown_keys() {
        assert!(toml::from_str::<ConfigFile>("[defaults]\nexec_time = 3").is_err());
    }

    #[test]
    fn test_load_reports_the_path_on_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[defaults]\nmemory_limit = \"lots\"").unwrap();
        let err = ConfigFile::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));

        let missing = file.path().with_extension("missing");
        assert!(matches!(
            ConfigFile::load(&missing),
            Err(ConfigError::Read { .. })
        ));
    }
}
