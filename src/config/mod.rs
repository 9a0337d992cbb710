//! Configuration management for earshot

pub mod file;

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, Result};

use file::EarshotConfigFile;

/// Default wake phrase
pub const DEFAULT_WAKE_WORD: &str = "hey earshot";

/// Default OpenAI-compatible API base URL
pub const DEFAULT_STT_BASE_URL: &str = "https://api.openai.com/v1";

/// Resolved earshot configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Capture and segmentation tuning
    pub listener: ListenerConfig,

    /// Transcription backend
    pub stt: SttConfig,

    /// Wake phrases, lower-cased and trimmed
    pub wake_words: Vec<String>,

    /// Input device name (default device when `None`)
    pub input_device: Option<String>,

    /// Directory to save captured utterances as WAV
    pub save_dir: Option<PathBuf>,
}

/// Capture and segmentation tuning
///
/// The defaults are empirically tuned for a 16 kHz mono microphone; none of
/// them change the shape of the algorithm.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,

    /// Samples per frame (1024 at 16 kHz is 64 ms)
    pub frame_samples: usize,

    /// Frames held by the shared buffer before the oldest are dropped
    pub buffer_capacity: usize,

    /// Frames scored together per decision tick
    pub batch_frames: usize,

    /// Quiet scores averaged into the noise floor
    pub noise_window: usize,

    /// Speech threshold as a multiple of the noise floor
    pub threshold_multiplier: f64,

    /// Lower bound on the adaptive threshold; 0 leaves it purely adaptive
    pub min_threshold: f64,

    /// Silence tolerated inside one utterance before it is finalized
    pub short_pause: Duration,

    /// Length of the rolling run handed to the keyword spotter
    pub wake_window: Duration,

    /// Consumer sleep when no full batch is buffered
    pub idle_poll: Duration,

    /// How long the mute flag outlives the end of speech output
    pub mute_grace: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_samples: 1024,
            buffer_capacity: 30,
            batch_frames: 4,
            noise_window: 20,
            threshold_multiplier: 2.0,
            min_threshold: 0.0,
            short_pause: Duration::from_millis(1200),
            wake_window: Duration::from_millis(1200),
            idle_poll: Duration::from_millis(50),
            mute_grace: Duration::from_millis(100),
        }
    }
}

impl ListenerConfig {
    /// Check that the tuning values describe a working pipeline
    ///
    /// # Errors
    ///
    /// Returns error if a size is zero, the buffer cannot hold one batch,
    /// the threshold multiplier is not positive or the floor is negative
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.frame_samples == 0 {
            return Err(Error::Config(
                "sample_rate and frame_samples must be non-zero".to_string(),
            ));
        }
        if self.batch_frames == 0 {
            return Err(Error::Config("batch_frames must be non-zero".to_string()));
        }
        if self.buffer_capacity < self.batch_frames {
            return Err(Error::Config(format!(
                "buffer_capacity ({}) must hold at least one batch ({} frames)",
                self.buffer_capacity, self.batch_frames
            )));
        }
        if self.noise_window == 0 {
            return Err(Error::Config("noise_window must be non-zero".to_string()));
        }
        if self.threshold_multiplier.is_nan() || self.threshold_multiplier <= 0.0 {
            return Err(Error::Config(
                "threshold_multiplier must be positive".to_string(),
            ));
        }
        if self.min_threshold.is_nan() || self.min_threshold < 0.0 {
            return Err(Error::Config(
                "min_threshold must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Duration of one frame
    #[must_use]
    pub fn frame_duration(&self) -> Duration {
        samples_to_duration(self.frame_samples, self.sample_rate)
    }

    /// Duration of one batch
    #[must_use]
    pub fn batch_duration(&self) -> Duration {
        self.frame_duration() * u32::try_from(self.batch_frames).unwrap_or(u32::MAX)
    }
}

/// Transcription backend configuration
#[derive(Clone)]
pub struct SttConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// Model identifier
    pub model: String,

    /// API key (`OPENAI_API_KEY`)
    pub api_key: Option<String>,

    /// Spoken language hint
    pub language: Option<String>,
}

impl std::fmt::Debug for SttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SttConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("language", &self.language)
            .finish()
    }
}

impl Config {
    /// Load configuration from the standard file and environment
    ///
    /// # Errors
    ///
    /// Returns error if the resolved listener settings are invalid
    pub fn load() -> Result<Self> {
        Self::resolve(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Load configuration from an explicit file path and environment
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or the resolved
    /// listener settings are invalid
    pub fn load_from(path: &Path) -> Result<Self> {
        let fc = file::read_config_file(path)?;
        tracing::info!(path = %path.display(), "loaded config file");
        Self::resolve(fc, |key| std::env::var(key).ok())
    }

    /// Resolve a file overlay and an environment lookup into a config
    ///
    /// Precedence is env > file > default.
    ///
    /// # Errors
    ///
    /// Returns error if the resolved listener settings are invalid
    pub fn resolve<F>(fc: EarshotConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |key: &str, file: Option<u64>, default: Duration| {
            parse_env(&env, key)
                .or(file)
                .map_or(default, Duration::from_millis)
        };

        let defaults = ListenerConfig::default();
        let lf = fc.listener;
        let listener = ListenerConfig {
            sample_rate: parse_env(&env, "EARSHOT_SAMPLE_RATE")
                .or(lf.sample_rate)
                .unwrap_or(defaults.sample_rate),
            frame_samples: parse_env(&env, "EARSHOT_FRAME_SAMPLES")
                .or(lf.frame_samples)
                .unwrap_or(defaults.frame_samples),
            buffer_capacity: parse_env(&env, "EARSHOT_BUFFER_CAPACITY")
                .or(lf.buffer_capacity)
                .unwrap_or(defaults.buffer_capacity),
            batch_frames: parse_env(&env, "EARSHOT_BATCH_FRAMES")
                .or(lf.batch_frames)
                .unwrap_or(defaults.batch_frames),
            noise_window: parse_env(&env, "EARSHOT_NOISE_WINDOW")
                .or(lf.noise_window)
                .unwrap_or(defaults.noise_window),
            threshold_multiplier: parse_env(&env, "EARSHOT_THRESHOLD_MULTIPLIER")
                .or(lf.threshold_multiplier)
                .unwrap_or(defaults.threshold_multiplier),
            min_threshold: parse_env(&env, "EARSHOT_MIN_THRESHOLD")
                .or(lf.min_threshold)
                .unwrap_or(defaults.min_threshold),
            short_pause: millis("EARSHOT_SHORT_PAUSE_MS", lf.short_pause_ms, defaults.short_pause),
            wake_window: millis("EARSHOT_WAKE_WINDOW_MS", lf.wake_window_ms, defaults.wake_window),
            idle_poll: millis("EARSHOT_IDLE_POLL_MS", lf.idle_poll_ms, defaults.idle_poll),
            mute_grace: millis("EARSHOT_MUTE_GRACE_MS", lf.mute_grace_ms, defaults.mute_grace),
        };
        listener.validate()?;

        let stt = SttConfig {
            base_url: env("EARSHOT_STT_BASE_URL")
                .or(fc.stt.base_url)
                .unwrap_or_else(|| DEFAULT_STT_BASE_URL.to_string()),
            model: env("EARSHOT_STT_MODEL")
                .or(fc.stt.model)
                .unwrap_or_else(|| "whisper-1".to_string()),
            api_key: env("OPENAI_API_KEY").or(fc.stt.api_key),
            language: env("EARSHOT_STT_LANGUAGE").or(fc.stt.language),
        };

        // Comma-separated in env, list in TOML
        let wake_words = env("EARSHOT_WAKE_WORDS")
            .map(|s| s.split(',').map(ToString::to_string).collect())
            .or(fc.wake_words)
            .unwrap_or_else(|| vec![DEFAULT_WAKE_WORD.to_string()]);
        let wake_words = normalize_wake_words(wake_words);
        if wake_words.is_empty() {
            return Err(Error::Config("at least one wake word is required".to_string()));
        }

        Ok(Self {
            listener,
            stt,
            wake_words,
            input_device: env("EARSHOT_INPUT_DEVICE").or(fc.input_device),
            save_dir: env("EARSHOT_SAVE_DIR")
                .or(fc.save_dir)
                .map(PathBuf::from),
        })
    }
}

fn parse_env<T, F>(env: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    env(key).and_then(|v| v.trim().parse().ok())
}

/// Lower-case and trim wake phrases, dropping empty entries
#[must_use]
pub fn normalize_wake_words(words: Vec<String>) -> Vec<String> {
    words
        .into_iter()
        .map(|w| w.trim().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Convert a sample count at a rate into a duration
#[must_use]
pub fn samples_to_duration(samples: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let samples = u64::try_from(samples).unwrap_or(u64::MAX);
    let rate = u64::from(sample_rate);
    Duration::from_secs(samples / rate)
        + Duration::from_nanos((samples % rate) * 1_000_000_000 / rate)
}
