//! TOML configuration file loading
//!
//! Supports `~/.config/earshot/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct EarshotConfigFile {
    /// Wake phrases (e.g. `["hey earshot"]`)
    #[serde(default)]
    pub wake_words: Option<Vec<String>>,

    /// Input device name; default device when unset
    #[serde(default)]
    pub input_device: Option<String>,

    /// Directory to save captured utterances as WAV
    #[serde(default)]
    pub save_dir: Option<String>,

    /// Capture and segmentation tuning
    #[serde(default)]
    pub listener: ListenerFileConfig,

    /// Transcription backend
    #[serde(default)]
    pub stt: SttFileConfig,
}

/// Capture and segmentation tuning
#[derive(Debug, Default, Deserialize)]
pub struct ListenerFileConfig {
    /// Capture sample rate in Hz (e.g. 16000)
    pub sample_rate: Option<u32>,

    /// Samples per frame
    pub frame_samples: Option<usize>,

    /// Frames buffered before the oldest are dropped
    pub buffer_capacity: Option<usize>,

    /// Frames scored together per batch
    pub batch_frames: Option<usize>,

    /// Quiet batches averaged into the noise floor
    pub noise_window: Option<usize>,

    /// Speech threshold as a multiple of the noise floor
    pub threshold_multiplier: Option<f64>,

    /// Lower bound on the speech threshold (0 disables)
    pub min_threshold: Option<f64>,

    /// Silence tolerated inside one utterance, in milliseconds
    pub short_pause_ms: Option<u64>,

    /// Length of the rolling wake phrase run, in milliseconds
    pub wake_window_ms: Option<u64>,

    /// Consumer sleep when the buffer has no full batch, in milliseconds
    pub idle_poll_ms: Option<u64>,

    /// Mute hold after speech output ends, in milliseconds
    pub mute_grace_ms: Option<u64>,
}

/// Transcription backend configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// OpenAI-compatible API base URL
    pub base_url: Option<String>,

    /// Model identifier (e.g. "whisper-1")
    pub model: Option<String>,

    /// API key
    pub api_key: Option<String>,

    /// Spoken language hint (ISO-639-1)
    pub language: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `EarshotConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> EarshotConfigFile {
    let Some(path) = config_file_path() else {
        return EarshotConfigFile::default();
    };

    if !path.exists() {
        return EarshotConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => {
            tracing::info!(path = %path.display(), "loaded config file");
            config
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            EarshotConfigFile::default()
        }
    }
}

/// Read and parse a config file at an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<EarshotConfigFile> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Return the config file path: `EARSHOT_CONFIG` or `~/.config/earshot/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("EARSHOT_CONFIG") {
        return Some(PathBuf::from(path));
    }

    directories::BaseDirs::new().map(|d| d.config_dir().join("earshot").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
wake_words = ["hey computer"]

[listener]
batch_frames = 8
short_pause_ms = 900
"#,
        )
        .unwrap();

        let fc = read_config_file(&path).unwrap();
        assert_eq!(fc.wake_words.unwrap(), vec!["hey computer".to_string()]);
        assert_eq!(fc.listener.batch_frames, Some(8));
        assert_eq!(fc.listener.short_pause_ms, Some(900));
        assert!(fc.listener.noise_window.is_none());
        assert!(fc.stt.model.is_none());
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "listener = 3 = 4").unwrap();

        assert!(matches!(
            read_config_file(&path),
            Err(crate::Error::Toml(_))
        ));
    }
}
