//! Speech-to-text collaborators
//!
//! The listener calls a fast [`KeywordSpotter`] on short runs of audio while
//! idle and a slower [`Transcriber`] once per finished utterance. Both are
//! invoked synchronously from the consumer thread.

use std::time::Duration;

use super::utterance::samples_to_wav;
use crate::config::{DEFAULT_STT_BASE_URL, SttConfig, normalize_wake_words};
use crate::{Error, Result};

/// Full transcription of captured audio
pub trait Transcriber: Send {
    /// Transcribe mono 16-bit PCM
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails; the utterance then yields no transcript
    fn transcribe(&self, audio: &[i16], sample_rate: u32) -> Result<String>;
}

/// Wake word spotting over a short run of audio
pub trait KeywordSpotter: Send {
    /// Return the spotted text if the run contains a wake word
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails; treated as a miss
    fn spot(&self, audio: &[i16], sample_rate: u32) -> Result<Option<String>>;
}

impl<F> Transcriber for F
where
    F: Fn(&[i16], u32) -> Result<String> + Send,
{
    fn transcribe(&self, audio: &[i16], sample_rate: u32) -> Result<String> {
        self(audio, sample_rate)
    }
}

impl<F> KeywordSpotter for F
where
    F: Fn(&[i16], u32) -> Result<Option<String>> + Send,
{
    fn spot(&self, audio: &[i16], sample_rate: u32) -> Result<Option<String>> {
        self(audio, sample_rate)
    }
}

/// Response from an OpenAI-compatible transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes through an OpenAI-compatible `/audio/transcriptions` endpoint
#[derive(Clone)]
pub struct WhisperTranscriber {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    language: Option<String>,
}

impl WhisperTranscriber {
    /// Create a transcriber from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the hosted API is targeted without a key, or the HTTP
    /// client cannot be built
    pub fn new(config: &SttConfig) -> Result<Self> {
        let api_key = config.api_key.clone().filter(|k| !k.is_empty());
        if api_key.is_none() && config.base_url == DEFAULT_STT_BASE_URL {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!(
                "{}/audio/transcriptions",
                config.base_url.trim_end_matches('/')
            ),
            api_key,
            model: config.model.clone(),
            language: config.language.clone(),
        })
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, audio: &[i16], sample_rate: u32) -> Result<String> {
        let wav = samples_to_wav(audio, sample_rate)?;
        tracing::debug!(audio_bytes = wav.len(), "starting Whisper transcription");

        let mut form = reqwest::blocking::multipart::Form::new()
            .part(
                "file",
                reqwest::blocking::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            tracing::error!(error = %e, "Whisper request failed");
            e
        })?;

        let status = response.status();
        let body = response.text()?;
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = serde_json::from_str(&body)?;
        let text = result.text.trim().to_string();

        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }
}

/// Spots wake phrases by transcribing the run and matching text
pub struct PhraseSpotter<T> {
    wake_words: Vec<String>,
    transcriber: T,
}

impl<T: Transcriber> PhraseSpotter<T> {
    /// Create a spotter for `wake_words` (matched case-insensitively)
    ///
    /// # Errors
    ///
    /// Returns error if no non-empty wake word is given
    pub fn new(wake_words: Vec<String>, transcriber: T) -> Result<Self> {
        let wake_words = normalize_wake_words(wake_words);
        if wake_words.is_empty() {
            return Err(Error::WakeWord("no wake words configured".to_string()));
        }

        tracing::debug!(wake_words = ?wake_words, "phrase spotter initialized");
        Ok(Self {
            wake_words,
            transcriber,
        })
    }

    /// The configured wake words
    #[must_use]
    pub fn wake_words(&self) -> &[String] {
        &self.wake_words
    }

    /// The wake word contained in `transcript`, if any
    #[must_use]
    pub fn find_wake_word(&self, transcript: &str) -> Option<&str> {
        let normalized = transcript.to_lowercase();
        self.wake_words
            .iter()
            .find(|w| normalized.contains(w.as_str()))
            .map(String::as_str)
    }
}

impl<T: Transcriber> KeywordSpotter for PhraseSpotter<T> {
    fn spot(&self, audio: &[i16], sample_rate: u32) -> Result<Option<String>> {
        let transcript = self.transcriber.transcribe(audio, sample_rate)?;

        Ok(self.find_wake_word(&transcript).map(|wake_word| {
            tracing::debug!(wake_word, transcript = %transcript, "wake phrase matched");
            transcript.trim().to_string()
        }))
    }
}

/// Strip everything up to and including the wake word from a transcript
#[must_use]
pub fn strip_wake_word(transcript: &str, wake_word: &str) -> String {
    transcript
        .char_indices()
        .find_map(|(start, _)| {
            let rest = transcript.get(start..)?;
            prefix_len_ignoring_case(rest, wake_word).and_then(|len| rest.get(len..))
        })
        .map_or_else(
            || transcript.trim().to_string(),
            |after| {
                after
                    .trim_start_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
                    .trim_end()
                    .to_string()
            },
        )
}

/// Byte length of the prefix of `text` matching `needle` case-insensitively
///
/// Matches whole characters of `text`, so the result is always a char boundary.
fn prefix_len_ignoring_case(text: &str, needle: &str) -> Option<usize> {
    let mut needle = needle.chars().flat_map(char::to_lowercase).peekable();
    if needle.peek().is_none() {
        return Some(0);
    }

    for (i, c) in text.char_indices() {
        for lower in c.to_lowercase() {
            if needle.next() != Some(lower) {
                return None;
            }
        }
        if needle.peek().is_none() {
            return Some(i + c.len_utf8());
        }
    }
    None
}
