use std::env;
use std::fmt;
use std::fs;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::{BaseDirs, ProjectDirs};
use serde::Deserialize;

use vidgrep_ocr::DevicePreference;

use crate::cli::{CliArgs, CliSources};

const DEFAULT_DATABASE: &str = "vidgrep.db";
const DEFAULT_OCR_WORKER: &str = "vidgrep-ocr-worker";
const DEFAULT_OCR_LANGUAGE: &str = "ch";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    backend: Option<String>,
    database: Option<String>,
    stride: Option<u64>,
    confidence_threshold: Option<f32>,
    ocr_device: Option<String>,
    ocr_worker: Option<String>,
    ocr_language: Option<String>,
    recognition_timeout_seconds: Option<u64>,
    decoder_channel_capacity: Option<usize>,
}

/// Fully merged runtime settings: CLI over file config over defaults.
#[derive(Debug)]
pub struct EffectiveSettings {
    pub backend: Option<String>,
    pub database: PathBuf,
    pub stride: NonZeroU64,
    pub confidence_threshold: f32,
    pub ocr_device: DevicePreference,
    pub ocr_worker: PathBuf,
    pub ocr_language: String,
    pub recognition_timeout: Duration,
    pub decoder_channel_capacity: Option<usize>,
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    InvalidValue {
        path: Option<PathBuf>,
        field: &'static str,
        value: String,
    },
    NotFound {
        path: PathBuf,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(
                    f,
                    "failed to read config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::Parse { path, source } => {
                write!(
                    f,
                    "failed to parse config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::InvalidValue { path, field, value } => {
                if let Some(path) = path {
                    write!(
                        f,
                        "invalid value '{}' for '{}' in {}",
                        value,
                        field,
                        path.display()
                    )
                } else {
                    write!(f, "invalid value '{}' for '{}'", value, field)
                }
            }
            ConfigError::NotFound { path } => {
                write!(f, "config file {} does not exist", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
            ConfigError::NotFound { .. } => None,
        }
    }
}

pub fn resolve_settings(
    cli: &CliArgs,
    sources: &CliSources,
) -> Result<EffectiveSettings, ConfigError> {
    let (file, config_path) = load_config(cli.config.as_deref())?;
    merge(cli, sources, file, config_path)
}

/// Locates and parses the TOML config: an explicit `--config` path must
/// exist; otherwise `./vidgrep.toml`, then the per-user config directory,
/// then built-in defaults.
fn load_config(path_override: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = path_override {
        let path = path.to_path_buf();
        if !path.exists() {
            return Err(ConfigError::NotFound { path });
        }
        let config = read_config_file(&path)?;
        return Ok((config, Some(path)));
    }

    if let Some(project_path) = project_config_path() {
        if project_path.exists() {
            let config = read_config_file(&project_path)?;
            return Ok((config, Some(project_path)));
        }
    }

    let Some(default_path) = default_config_path() else {
        return Ok((FileConfig::default(), None));
    };
    if !default_path.exists() {
        return Ok((FileConfig::default(), None));
    }
    let config = read_config_file(&default_path)?;
    Ok((config, Some(default_path)))
}

fn read_config_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn merge(
    cli: &CliArgs,
    sources: &CliSources,
    file: FileConfig,
    config_path: Option<PathBuf>,
) -> Result<EffectiveSettings, ConfigError> {
    let config_dir = config_path
        .as_ref()
        .and_then(|path| path.parent().map(|dir| dir.to_path_buf()));

    let FileConfig {
        backend: file_backend,
        database: file_database,
        stride: file_stride,
        confidence_threshold: file_threshold,
        ocr_device: file_device,
        ocr_worker: file_worker,
        ocr_language: file_language,
        recognition_timeout_seconds: file_timeout,
        decoder_channel_capacity: file_capacity,
    } = file;

    let mut backend = normalize_string(cli.backend.clone());
    if backend.is_none() {
        backend = normalize_string(file_backend);
    }

    // A file-config database path is relative to the config file itself.
    let database = if let Some(path) = cli.database.clone() {
        expand_pathbuf(path)
    } else if let Some(path) = normalize_string(file_database)
        .and_then(|value| resolve_path_from_config(value, config_dir.as_deref()))
    {
        path
    } else {
        PathBuf::from(DEFAULT_DATABASE)
    };

    let mut stride = cli.stride;
    if !sources.stride_from_cli {
        if let Some(value) = file_stride {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    path: config_path,
                    field: "stride",
                    value: value.to_string(),
                });
            }
            stride = value;
        }
    }
    let Some(stride) = NonZeroU64::new(stride) else {
        return Err(ConfigError::InvalidValue {
            path: None,
            field: "stride",
            value: "0".to_string(),
        });
    };

    let mut confidence_threshold = cli.confidence_threshold;
    if sources.confidence_threshold_from_cli && !threshold_in_range(confidence_threshold) {
        return Err(ConfigError::InvalidValue {
            path: None,
            field: "confidence_threshold",
            value: confidence_threshold.to_string(),
        });
    }
    if !sources.confidence_threshold_from_cli {
        if let Some(value) = file_threshold {
            if !threshold_in_range(value) {
                return Err(ConfigError::InvalidValue {
                    path: config_path,
                    field: "confidence_threshold",
                    value: value.to_string(),
                });
            }
            confidence_threshold = value;
        }
    }

    let mut ocr_device = cli.ocr_device.preference();
    if !sources.ocr_device_from_cli {
        if let Some(value) = normalize_string(file_device) {
            ocr_device = parse_ocr_device(&value, config_path.as_ref())?;
        }
    }

    // The worker may be a bare program name resolved through PATH, so only
    // home expansion applies, never the config-relative join.
    let ocr_worker = cli
        .ocr_worker
        .clone()
        .map(expand_pathbuf)
        .or_else(|| normalize_string(file_worker).map(|value| expand_home_path(&value)))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OCR_WORKER));

    let ocr_language = normalize_string(cli.ocr_language.clone())
        .or_else(|| normalize_string(file_language))
        .unwrap_or_else(|| DEFAULT_OCR_LANGUAGE.to_string());

    let mut recognition_timeout_seconds = cli.recognition_timeout;
    if !sources.recognition_timeout_from_cli {
        if let Some(value) = file_timeout {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    path: config_path,
                    field: "recognition_timeout_seconds",
                    value: value.to_string(),
                });
            }
            recognition_timeout_seconds = value;
        }
    }

    let mut decoder_channel_capacity = cli.decoder_channel_capacity;
    if let Some(0) = decoder_channel_capacity {
        return Err(ConfigError::InvalidValue {
            path: None,
            field: "decoder_channel_capacity",
            value: "0".to_string(),
        });
    }
    if decoder_channel_capacity.is_none() {
        if let Some(value) = file_capacity {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    path: config_path,
                    field: "decoder_channel_capacity",
                    value: value.to_string(),
                });
            }
            decoder_channel_capacity = Some(value);
        }
    }

    Ok(EffectiveSettings {
        backend,
        database,
        stride,
        confidence_threshold,
        ocr_device,
        ocr_worker,
        ocr_language,
        recognition_timeout: Duration::from_secs(recognition_timeout_seconds),
        decoder_channel_capacity,
    })
}

fn threshold_in_range(value: f32) -> bool {
    value.is_finite() && (0.0..=1.0).contains(&value)
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("rs", "vidgrep", "vidgrep")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn project_config_path() -> Option<PathBuf> {
    env::current_dir().ok().map(|dir| dir.join("vidgrep.toml"))
}

fn normalize_string(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn expand_pathbuf(path: PathBuf) -> PathBuf {
    match path.to_str() {
        Some(s) => expand_home_path(s),
        None => path,
    }
}

fn resolve_path_from_config(value: String, base: Option<&Path>) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let expanded = expand_home_path(trimmed);
    if expanded.is_absolute() || base.is_none() {
        Some(expanded)
    } else {
        base.map(|dir| dir.join(expanded))
    }
}

fn expand_home_path(value: &str) -> PathBuf {
    if value == "~" {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().to_path_buf();
        }
    } else if let Some(stripped) = value.strip_prefix("~/") {
        if let Some(base) = BaseDirs::new() {
            return base.home_dir().join(stripped);
        }
    }
    PathBuf::from(value)
}

fn parse_ocr_device(
    value: &str,
    path: Option<&PathBuf>,
) -> Result<DevicePreference, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        path: path.cloned(),
        field: "ocr_device",
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn default_cli() -> CliArgs {
        CliArgs::try_parse_from(["vidgrep"]).expect("cli defaults")
    }

    #[test]
    fn defaults_apply_without_any_config() {
        let settings = merge(
            &default_cli(),
            &CliSources::default(),
            FileConfig::default(),
            None,
        )
        .expect("settings");
        assert_eq!(settings.database, PathBuf::from("vidgrep.db"));
        assert_eq!(settings.stride.get(), 120);
        assert_eq!(settings.confidence_threshold, 0.8);
        assert_eq!(settings.ocr_device, DevicePreference::Auto);
        assert_eq!(settings.ocr_worker, PathBuf::from("vidgrep-ocr-worker"));
        assert_eq!(settings.ocr_language, "ch");
        assert_eq!(settings.recognition_timeout, Duration::from_secs(120));
        assert!(settings.backend.is_none());
        assert!(settings.decoder_channel_capacity.is_none());
    }

    #[test]
    fn file_fills_in_when_cli_uses_defaults() {
        let file = FileConfig {
            backend: Some("mock".to_string()),
            stride: Some(48),
            confidence_threshold: Some(0.6),
            ocr_device: Some("cpu".to_string()),
            ocr_language: Some("en".to_string()),
            recognition_timeout_seconds: Some(30),
            decoder_channel_capacity: Some(4),
            ..FileConfig::default()
        };
        let settings = merge(&default_cli(), &CliSources::default(), file, None)
            .expect("settings");
        assert_eq!(settings.backend.as_deref(), Some("mock"));
        assert_eq!(settings.stride.get(), 48);
        assert_eq!(settings.confidence_threshold, 0.6);
        assert_eq!(settings.ocr_device, DevicePreference::Cpu);
        assert_eq!(settings.ocr_language, "en");
        assert_eq!(settings.recognition_timeout, Duration::from_secs(30));
        assert_eq!(settings.decoder_channel_capacity, Some(4));
    }

    #[test]
    fn cli_wins_over_file_when_given() {
        let cli = CliArgs::try_parse_from([
            "vidgrep",
            "--stride",
            "60",
            "--confidence-threshold",
            "0.9",
            "--ocr-device",
            "gpu",
        ])
        .expect("cli");
        let sources = CliSources {
            stride_from_cli: true,
            confidence_threshold_from_cli: true,
            ocr_device_from_cli: true,
            ..CliSources::default()
        };
        let file = FileConfig {
            stride: Some(30),
            confidence_threshold: Some(0.5),
            ocr_device: Some("cpu".to_string()),
            ..FileConfig::default()
        };
        let settings = merge(&cli, &sources, file, None).expect("settings");
        assert_eq!(settings.stride.get(), 60);
        assert_eq!(settings.confidence_threshold, 0.9);
        assert_eq!(settings.ocr_device, DevicePreference::Gpu);
    }

    #[test]
    fn out_of_range_file_threshold_is_rejected() {
        let file = FileConfig {
            confidence_threshold: Some(1.5),
            ..FileConfig::default()
        };
        let err = merge(&default_cli(), &CliSources::default(), file, None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "confidence_threshold",
                ..
            }
        ));
    }

    #[test]
    fn zero_stride_in_file_is_rejected() {
        let file = FileConfig {
            stride: Some(0),
            ..FileConfig::default()
        };
        let err = merge(&default_cli(), &CliSources::default(), file, None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { field: "stride", .. }
        ));
    }

    #[test]
    fn file_database_resolves_relative_to_the_config_file() {
        let file = FileConfig {
            database: Some("data/run.db".to_string()),
            ..FileConfig::default()
        };
        let settings = merge(
            &default_cli(),
            &CliSources::default(),
            file,
            Some(PathBuf::from("/etc/vidgrep/config.toml")),
        )
        .expect("settings");
        assert_eq!(settings.database, PathBuf::from("/etc/vidgrep/data/run.db"));
    }

    #[test]
    fn unknown_ocr_device_in_file_is_rejected() {
        let file = FileConfig {
            ocr_device: Some("tpu".to_string()),
            ..FileConfig::default()
        };
        let err = merge(&default_cli(), &CliSources::default(), file, None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                field: "ocr_device",
                ..
            }
        ));
    }
}
