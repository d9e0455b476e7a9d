//! Tool configuration
//!
//! Optional YAML configuration file with per-user defaults, plus the
//! global verbose flag. Command-line flags always win over config
//! values; a missing config file is not an error, a malformed one is.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Deserialize;

use crate::models::{ColorMode, OutputFormat};

// Global verbose flag for controlling debug output
static VERBOSE: AtomicBool = AtomicBool::new(false);

/// Set the global verbose flag. When true, debug messages will be printed.
pub fn set_verbose(verbose: bool) {
    VERBOSE.store(verbose, Ordering::SeqCst);
}

/// Check if verbose mode is enabled.
pub fn is_verbose() -> bool {
    VERBOSE.load(Ordering::SeqCst)
}

/// Print a message to stderr only if verbose mode is enabled.
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if $crate::config::is_verbose() {
            eprintln!($($arg)*);
        }
    };
}

/// Candidate config file names, searched in the working directory and in
/// `$HOME/.config/hdrfuse/`.
const CONFIG_FILENAMES: &[&str] = &["hdrfuse.yml", "hdrfuse.yaml"];

/// Per-user defaults; every field is optional and overridden by flags.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolConfig {
    /// Override the EXIF exposure times (seconds, one per input, in input
    /// order). This is the line the exposure-time fitter prints.
    pub exptimes: Option<Vec<f32>>,

    /// Saturation threshold in (0, 1]
    pub saturation: Option<f32>,

    /// Sensor to XYZ color matrix
    pub sensor2xyz: Option<[[f32; 3]; 3]>,

    /// Output color space
    pub colormode: Option<ColorMode>,

    /// Output format
    pub format: Option<OutputFormat>,

    /// White balance multipliers
    pub wb: Option<[f32; 3]>,

    /// Vignetting correction coefficients (a, b, c)
    pub vcorr: Option<[f32; 3]>,

    /// Brightness scale factor
    pub scale: Option<f32>,
}

/// Load the configuration, optionally from an explicit path.
///
/// Returns the config and the path it came from (None when no file was
/// found and defaults apply).
pub fn load_config(custom_path: Option<&Path>) -> Result<(ToolConfig, Option<PathBuf>), String> {
    if let Some(path) = custom_path {
        let config = parse_config_file(path)?;
        return Ok((config, Some(path.to_path_buf())));
    }

    for candidate in config_candidates() {
        if candidate.is_file() {
            let config = parse_config_file(&candidate)?;
            return Ok((config, Some(candidate)));
        }
    }

    Ok((ToolConfig::default(), None))
}

fn parse_config_file(path: &Path) -> Result<ToolConfig, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;
    let config: ToolConfig = serde_yaml::from_str(&contents)
        .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;

    if let Some(saturation) = config.saturation {
        if !(0.0..=1.0).contains(&saturation) || saturation == 0.0 {
            return Err(format!(
                "{}: saturation must be in (0, 1], got {}",
                path.display(),
                saturation
            ));
        }
    }
    Ok(config)
}

fn config_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    for name in CONFIG_FILENAMES {
        candidates.push(PathBuf::from(name));
    }
    if let Ok(home) = std::env::var("HOME") {
        for name in CONFIG_FILENAMES {
            candidates.push(
                PathBuf::from(&home)
                    .join(".config")
                    .join("hdrfuse")
                    .join(name),
            );
        }
    }
    candidates
}
