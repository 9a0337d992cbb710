//! A captured utterance and its WAV packaging

use std::path::Path;
use std::time::Duration;

use crate::config::samples_to_duration;
use crate::{Error, Result};

/// Audio captured between a wake word and end of speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Mono 16-bit PCM samples in capture order
    pub samples: Vec<i16>,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl Utterance {
    /// Length of the captured audio
    #[must_use]
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.samples.len(), self.sample_rate)
    }

    /// Encode as a mono 16-bit WAV file
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        samples_to_wav(&self.samples, self.sample_rate)
    }

    /// Write the utterance to `path` as WAV
    ///
    /// # Errors
    ///
    /// Returns error if encoding or writing fails
    pub fn save_wav(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_wav()?)?;
        tracing::debug!(path = %path.display(), "saved utterance");
        Ok(())
    }
}

/// Convert i16 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn test_duration() {
        let utterance = Utterance {
            samples: vec![0; 24_000],
            sample_rate: 16_000,
        };
        assert_eq!(utterance.duration(), Duration::from_millis(1500));
    }

    #[test]
    fn test_wav_header_and_samples() {
        let utterance = Utterance {
            samples: vec![0, 100, -100, i16::MAX, i16::MIN],
            sample_rate: 16_000,
        };
        let wav = utterance.to_wav().unwrap();

        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");

        let mut reader = hound::WavReader::new(Cursor::new(wav)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);

        let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(read, utterance.samples);
    }

    #[test]
    fn test_save_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utterance.wav");
        let utterance = Utterance {
            samples: vec![1; 160],
            sample_rate: 16_000,
        };

        utterance.save_wav(&path).unwrap();
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.len(), 160);
    }
}
