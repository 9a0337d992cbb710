//! Audio input sources
//!
//! A [`FrameSource`] yields fixed-size mono 16-bit frames. [`MicSource`] is
//! the cpal-backed microphone implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig};

use super::Frame;
use crate::config::ListenerConfig;
use crate::{Error, Result};

/// Device callbacks buffered between the audio thread and `read_frame`
const CALLBACK_QUEUE_DEPTH: usize = 64;

/// A failed frame read
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The frame was lost; the next read may succeed
    #[error("dropped frame: {0}")]
    Transient(String),

    /// The device is gone; no further reads can succeed
    #[error("audio device lost: {0}")]
    Fatal(String),
}

impl From<ReadError> for Error {
    fn from(e: ReadError) -> Self {
        Self::Audio(e.to_string())
    }
}

/// Something that produces fixed-duration audio frames
pub trait FrameSource {
    /// Block until the next frame is captured
    ///
    /// # Errors
    ///
    /// Returns [`ReadError::Transient`] for a dropped frame and
    /// [`ReadError::Fatal`] when the source can no longer produce audio
    fn read_frame(&mut self) -> std::result::Result<Frame, ReadError>;
}

enum Captured {
    Samples(Vec<i16>),
    Failed { message: String, fatal: bool },
}

/// Captures frames from a cpal input device
///
/// cpal streams are not `Send`; open the source on the thread that reads it.
pub struct MicSource {
    _stream: Stream,
    frames: FrameAssembler,
}

impl MicSource {
    /// Open the default (or named) input device and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if no matching device or stream configuration exists
    pub fn open(config: &ListenerConfig, device_name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| Error::Audio(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == name))
                .ok_or_else(|| Error::Audio(format!("input device not found: {name}")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| Error::Audio("no input device available".to_string()))?,
        };

        let rate = SampleRate(config.sample_rate);
        let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
            c.min_sample_rate() <= rate && c.max_sample_rate() >= rate
        };
        let usable_format = |c: &cpal::SupportedStreamConfigRange| {
            matches!(c.sample_format(), SampleFormat::I16 | SampleFormat::F32)
        };

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .filter(|c| supports_rate(c) && usable_format(c))
            .min_by_key(cpal::SupportedStreamConfigRange::channels)
            .ok_or_else(|| Error::Audio("no suitable audio config found".to_string()))?
            .with_sample_rate(rate);

        let sample_format = supported.sample_format();
        let stream_config = supported.config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate,
            channels = stream_config.channels,
            format = ?sample_format,
            "audio capture initialized"
        );

        let (tx, rx) = mpsc::sync_channel(CALLBACK_QUEUE_DEPTH);
        let device_lost = Arc::new(AtomicBool::new(false));
        let lost = Arc::clone(&device_lost);
        let stream = match sample_format {
            SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, tx, lost)?,
            SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, tx, lost)?,
            other => {
                return Err(Error::Audio(format!("unsupported sample format: {other:?}")));
            }
        };
        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        tracing::debug!("audio capture started");

        // A healthy device delivers a frame every frame interval; allow slack
        // for scheduler hiccups before reporting a dropped frame.
        let read_timeout = (config.frame_duration() * 8).max(Duration::from_millis(500));

        Ok(Self {
            _stream: stream,
            frames: FrameAssembler::new(rx, device_lost, config.frame_samples, read_timeout),
        })
    }
}

impl FrameSource for MicSource {
    fn read_frame(&mut self) -> std::result::Result<Frame, ReadError> {
        self.frames.next_frame()
    }
}

/// Cuts device callback chunks into fixed-size frames
struct FrameAssembler {
    rx: Receiver<Captured>,
    device_lost: Arc<AtomicBool>,
    pending: Vec<i16>,
    frame_samples: usize,
    read_timeout: Duration,
}

impl FrameAssembler {
    fn new(
        rx: Receiver<Captured>,
        device_lost: Arc<AtomicBool>,
        frame_samples: usize,
        read_timeout: Duration,
    ) -> Self {
        Self {
            rx,
            device_lost,
            pending: Vec::with_capacity(frame_samples * 2),
            frame_samples,
            read_timeout,
        }
    }

    fn next_frame(&mut self) -> std::result::Result<Frame, ReadError> {
        while self.pending.len() < self.frame_samples {
            // The error callback may not fit its message into a full queue
            if self.device_lost.load(Ordering::SeqCst) {
                return Err(device_gone());
            }

            match self.rx.recv_timeout(self.read_timeout) {
                Ok(Captured::Samples(samples)) => self.pending.extend_from_slice(&samples),
                Ok(Captured::Failed { message, fatal }) => {
                    return Err(if fatal {
                        ReadError::Fatal(message)
                    } else {
                        ReadError::Transient(message)
                    });
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.device_lost.load(Ordering::SeqCst) {
                        return Err(device_gone());
                    }
                    return Err(ReadError::Transient(format!(
                        "no audio within {}ms",
                        self.read_timeout.as_millis()
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ReadError::Fatal("capture stream closed".to_string()));
                }
            }
        }

        // Samples past the frame boundary start the next frame
        let rest = self.pending.split_off(self.frame_samples);
        Ok(Frame::new(std::mem::replace(&mut self.pending, rest)))
    }
}

fn device_gone() -> ReadError {
    ReadError::Fatal("audio device not available".to_string())
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    tx: SyncSender<Captured>,
    lost: Arc<AtomicBool>,
) -> Result<Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = usize::from(config.channels).max(1);
    let err_tx = tx.clone();

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let mono: Vec<i16> = data.chunks(channels).map(downmix).collect();
                if let Err(TrySendError::Full(_)) = tx.try_send(Captured::Samples(mono)) {
                    tracing::trace!("capture queue full, dropping callback audio");
                }
            },
            move |err| {
                let fatal = matches!(err, cpal::StreamError::DeviceNotAvailable);
                if fatal {
                    lost.store(true, Ordering::SeqCst);
                }
                tracing::error!(error = %err, fatal, "audio capture error");
                let _ = err_tx.try_send(Captured::Failed {
                    message: err.to_string(),
                    fatal,
                });
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

/// Average one interleaved frame down to a single i16 sample
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn downmix<T>(frame: &[T]) -> i16
where
    T: SizedSample,
    i16: FromSample<T>,
{
    if let [only] = frame {
        return i16::from_sample_(*only);
    }
    let sum: i32 = frame
        .iter()
        .map(|&s| i32::from(i16::from_sample_(s)))
        .sum();
    (sum / frame.len().max(1) as i32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downmix_mono_passthrough() {
        assert_eq!(downmix(&[1234i16]), 1234);
    }

    #[test]
    fn test_downmix_averages_channels() {
        assert_eq!(downmix(&[1000i16, 3000]), 2000);
        assert_eq!(downmix(&[i16::MAX, i16::MAX]), i16::MAX);
        assert_eq!(downmix(&[i16::MIN, i16::MAX]), 0);
    }

    #[test]
    fn test_downmix_converts_float() {
        assert_eq!(downmix(&[0.0f32]), 0);
        assert!(downmix(&[0.5f32, 0.5]) > 16_000);
        assert!(downmix(&[-1.0f32]) <= -32_767);
    }

    fn assembler(
        frame_samples: usize,
    ) -> (SyncSender<Captured>, Arc<AtomicBool>, FrameAssembler) {
        let (tx, rx) = mpsc::sync_channel(8);
        let lost = Arc::new(AtomicBool::new(false));
        let frames = FrameAssembler::new(
            rx,
            Arc::clone(&lost),
            frame_samples,
            Duration::from_millis(20),
        );
        (tx, lost, frames)
    }

    fn ramp(range: std::ops::Range<i16>) -> Captured {
        Captured::Samples(range.collect())
    }

    #[test]
    fn test_chunks_cut_into_frames() {
        let (tx, _lost, mut frames) = assembler(256);
        tx.send(ramp(0..300)).unwrap();
        tx.send(ramp(300..600)).unwrap();

        let first = frames.next_frame().unwrap();
        assert_eq!(first.samples(), (0..256).collect::<Vec<i16>>().as_slice());

        // The 44 carried-over samples lead the second frame
        let second = frames.next_frame().unwrap();
        assert_eq!(second.samples(), (256..512).collect::<Vec<i16>>().as_slice());

        // 88 samples left over is less than a frame
        assert!(matches!(frames.next_frame(), Err(ReadError::Transient(_))));
    }

    #[test]
    fn test_small_chunks_are_joined() {
        let (tx, _lost, mut frames) = assembler(8);
        for start in (0..8).step_by(3) {
            tx.send(ramp(start..(start + 3).min(8))).unwrap();
        }

        let frame = frames.next_frame().unwrap();
        assert_eq!(frame.samples(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_silent_device_is_transient() {
        let (_tx, _lost, mut frames) = assembler(8);
        assert!(matches!(frames.next_frame(), Err(ReadError::Transient(_))));
    }

    #[test]
    fn test_lost_device_is_fatal_without_message() {
        let (tx, lost, mut frames) = assembler(8);
        tx.send(ramp(0..4)).unwrap();

        // Queue had no room for the error; only the flag says the device is gone
        lost.store(true, Ordering::SeqCst);
        assert!(matches!(frames.next_frame(), Err(ReadError::Fatal(_))));
        assert!(matches!(frames.next_frame(), Err(ReadError::Fatal(_))));
    }

    #[test]
    fn test_reported_errors_pass_through() {
        let (tx, _lost, mut frames) = assembler(8);
        tx.send(Captured::Failed {
            message: "overrun".to_string(),
            fatal: false,
        })
        .unwrap();
        tx.send(Captured::Failed {
            message: "unplugged".to_string(),
            fatal: true,
        })
        .unwrap();

        assert!(matches!(frames.next_frame(), Err(ReadError::Transient(_))));
        assert!(matches!(frames.next_frame(), Err(ReadError::Fatal(_))));
    }

    #[test]
    fn test_closed_stream_is_fatal() {
        let (tx, _lost, mut frames) = assembler(8);
        drop(tx);
        assert!(matches!(frames.next_frame(), Err(ReadError::Fatal(_))));
    }

    #[test]
    fn test_read_error_converts() {
        let err: Error = ReadError::Fatal("unplugged".to_string()).into();
        assert!(matches!(err, Error::Audio(msg) if msg.contains("unplugged")));
    }
}
