//! Configuration models for blendrun.
//!
//! The configuration is built once at startup (file, then CLI overrides) and
//! passed explicitly to the batch driver and executor. Nothing reads it from
//! global state.

use super::{Initialize, Mode, Settings};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

/// Default configuration file, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "blendrun.toml";

/// Example configuration printed by `--print-config`.
pub const EXAMPLE_CONFIG: &str = r#"# blendrun configuration file

# Base parameter set: "quality" (Accurate, ~45 min/video) or "fast"
preset = "quality"

[paths]
source_dir = "sources"
output_dir = "results"
checkpoint_dir = "checkpoints"

# Any field here overrides the preset
[settings]
# mode = "Accurate"            # "Fast", "Balanced" or "Accurate"
# window_size = 15             # smoothing window (10-30)
# batch_size = 2               # reduce if out of memory
# tracking_window_size = 1     # Accurate mode only
# minimum_patch_size = 7       # increase for higher resolution
# num_iter = 5                 # quality iterations (3-10)
# guide_weight = 10.0
# initialize = "identity"

[engine]
program = "fastblend"
ffmpeg = "ffmpeg"
ffprobe = "ffprobe"
gpu_id = 0
threads_per_block = 8
"#;

/// Top-level configuration for blendrun.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Parameter preset the `[settings]` table is applied on top of
    #[serde(default)]
    pub preset: Preset,

    /// Input, output and checkpoint locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Per-field overrides of the preset
    #[serde(default)]
    pub settings: SettingsOverrides,

    /// External tools
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Named parameter sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Fast mode, small window, few iterations
    Fast,
    /// Accurate mode with tracking
    #[default]
    Quality,
}

impl Preset {
    /// The full parameter set for this preset.
    pub fn settings(self) -> Settings {
        match self {
            Self::Fast => Settings {
                mode: Mode::Fast,
                window_size: 5,
                batch_size: 2,
                tracking_window_size: 0,
                minimum_patch_size: 5,
                num_iter: 3,
                guide_weight: 10.0,
                initialize: Initialize::Identity,
            },
            Self::Quality => Settings {
                mode: Mode::Accurate,
                window_size: 15,
                batch_size: 2,
                tracking_window_size: 1,
                minimum_patch_size: 7,
                num_iter: 5,
                guide_weight: 10.0,
                initialize: Initialize::Identity,
            },
        }
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "quality" => Ok(Self::Quality),
            other => Err(format!("unknown preset '{other}' (expected fast or quality)")),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory scanned for input videos
    #[serde(default = "default_source_dir")]
    pub source_dir: PathBuf,

    /// Root under which one directory per video is created
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Where job checkpoints are kept
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
}

fn default_source_dir() -> PathBuf {
    PathBuf::from("sources")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("checkpoints")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source_dir: default_source_dir(),
            output_dir: default_output_dir(),
            checkpoint_dir: default_checkpoint_dir(),
        }
    }
}

/// Optional overrides for individual blending parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsOverrides {
    pub mode: Option<Mode>,
    pub window_size: Option<u32>,
    pub batch_size: Option<u32>,
    pub tracking_window_size: Option<u32>,
    pub minimum_patch_size: Option<u32>,
    pub num_iter: Option<u32>,
    pub guide_weight: Option<f64>,
    pub initialize: Option<Initialize>,
}

/// External programs the pipeline shells out to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Blending engine executable
    #[serde(default = "default_program")]
    pub program: PathBuf,

    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: PathBuf,

    #[serde(default = "default_ffprobe")]
    pub ffprobe: PathBuf,

    /// Accelerator device index handed to the engine
    #[serde(default)]
    pub gpu_id: u32,

    #[serde(default = "default_threads_per_block")]
    pub threads_per_block: u32,
}

fn default_program() -> PathBuf {
    PathBuf::from("fastblend")
}

fn default_ffmpeg() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_threads_per_block() -> u32 {
    8
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            gpu_id: 0,
            threads_per_block: default_threads_per_block(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_owned(),
                source,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text, expanding `${VAR}` in paths.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            source: e,
        })?;
        config.expand_paths();
        Ok(config)
    }

    /// Load an explicitly requested file, or the default file if present.
    ///
    /// A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.exists() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Resolve the preset plus overrides into a full parameter set.
    pub fn resolve_settings(&self) -> Settings {
        let base = self.preset.settings();
        let o = &self.settings;
        Settings {
            mode: o.mode.unwrap_or(base.mode),
            window_size: o.window_size.unwrap_or(base.window_size),
            batch_size: o.batch_size.unwrap_or(base.batch_size),
            tracking_window_size: o.tracking_window_size.unwrap_or(base.tracking_window_size),
            minimum_patch_size: o.minimum_patch_size.unwrap_or(base.minimum_patch_size),
            num_iter: o.num_iter.unwrap_or(base.num_iter),
            guide_weight: o.guide_weight.unwrap_or(base.guide_weight),
            initialize: o.initialize.unwrap_or(base.initialize),
        }
    }

    /// Check that the resolved parameters are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve_settings().validate()
    }

    fn expand_paths(&mut self) {
        for path in [
            &mut self.paths.source_dir,
            &mut self.paths.output_dir,
            &mut self.paths.checkpoint_dir,
            &mut self.engine.program,
            &mut self.engine.ffmpeg,
            &mut self.engine.ffprobe,
        ] {
            *path = PathBuf::from(expand_env_vars(&path.to_string_lossy()));
        }
    }
}

impl Settings {
    /// Reject parameter values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("window_size", self.window_size),
            ("batch_size", self.batch_size),
            ("minimum_patch_size", self.minimum_patch_size),
            ("num_iter", self.num_iter),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        if !self.guide_weight.is_finite() || self.guide_weight <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "guide_weight",
                message: format!("must be a positive number, got {}", self.guide_weight),
            });
        }

        Ok(())
    }
}

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is valid"));

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();

    for cap in ENV_VAR_RE.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid setting '{field}': {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_use_quality_preset() {
        let config = Config::default();
        let settings = config.resolve_settings();
        assert_eq!(settings, Preset::Quality.settings());
        assert_eq!(settings.mode, Mode::Accurate);
        assert_eq!(settings.window_size, 15);
        assert_eq!(config.paths.checkpoint_dir, PathBuf::from("checkpoints"));
        assert_eq!(config.engine.threads_per_block, 8);
    }

    #[test]
    fn test_overrides_apply_on_top_of_preset() {
        let config = Config::from_toml(
            r#"
preset = "fast"

[settings]
batch_size = 1
mode = "Balanced"
"#,
        )
        .unwrap();

        let settings = config.resolve_settings();
        assert_eq!(settings.mode, Mode::Balanced);
        assert_eq!(settings.batch_size, 1);
        assert_eq!(settings.window_size, 5);
        assert_eq!(settings.num_iter, 3);
    }

    #[test]
    fn test_example_config_parses() {
        let config = Config::from_toml(EXAMPLE_CONFIG).unwrap();
        assert_eq!(config.preset, Preset::Quality);
        assert_eq!(config.engine.program, PathBuf::from("fastblend"));
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let config = Config::from_toml("[settings]\nwindow_size = 0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "window_size", .. })
        ));

        let config = Config::from_toml("[settings]\nguide_weight = -1.0\n").unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "guide_weight", .. })
        ));
    }

    #[test]
    fn test_unknown_mode_is_parse_error() {
        let result = Config::from_toml("[settings]\nmode = \"Turbo\"\n");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!("FAST".parse::<Preset>().unwrap(), Preset::Fast);
        assert_eq!("quality".parse::<Preset>().unwrap(), Preset::Quality);
        assert!("ultra".parse::<Preset>().is_err());
    }

    #[test]
    fn test_expand_env_vars_leaves_unknown() {
        let s = "${BLENDRUN_SURELY_UNSET_VAR}/clips";
        assert_eq!(expand_env_vars(s), s);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let result = Config::load(Some(Path::new("/nonexistent/blendrun.toml")));
        assert!(matches!(result, Err(ConfigError::FileRead { .. })));
    }
}
