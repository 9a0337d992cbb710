//! Producer: moves frames from the audio source into the shared buffer

use super::{FrameBuffer, FrameSource, ListenControl, ReadError};
use crate::Result;

/// Pull frames from `source` into `buffer` until shutdown
///
/// Transient read failures are logged and treated as a dropped frame.
///
/// # Errors
///
/// Returns error when the source reports the device is gone
pub fn run_producer<S: FrameSource>(
    source: &mut S,
    buffer: &FrameBuffer,
    control: &ListenControl,
) -> Result<()> {
    let mut captured: u64 = 0;
    let mut transient_failures: u64 = 0;

    while !control.is_shutdown() {
        match source.read_frame() {
            Ok(frame) => {
                buffer.append(frame);
                captured += 1;
            }
            Err(ReadError::Transient(reason)) => {
                transient_failures += 1;
                tracing::warn!(%reason, transient_failures, "frame read failed, continuing");
            }
            Err(e @ ReadError::Fatal(_)) => {
                tracing::error!(error = %e, captured, "audio source failed, producer stopping");
                return Err(e.into());
            }
        }
    }

    tracing::debug!(captured, dropped = buffer.dropped(), "producer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use super::*;
    use crate::voice::Frame;

    struct Scripted(VecDeque<std::result::Result<Frame, ReadError>>);

    impl FrameSource for Scripted {
        fn read_frame(&mut self) -> std::result::Result<Frame, ReadError> {
            self.0
                .pop_front()
                .unwrap_or_else(|| Err(ReadError::Fatal("script exhausted".to_string())))
        }
    }

    #[test]
    fn test_transient_failures_are_skipped() {
        let mut source = Scripted(VecDeque::from(vec![
            Ok(Frame::new(vec![1; 8])),
            Err(ReadError::Transient("overrun".to_string())),
            Ok(Frame::new(vec![2; 8])),
        ]));
        let buffer = FrameBuffer::new(10);
        let control = ListenControl::new(Duration::ZERO);

        let result = run_producer(&mut source, &buffer, &control);

        assert!(result.is_err());
        let frames = buffer.drain_front(2);
        assert_eq!(frames[0].samples()[0], 1);
        assert_eq!(frames[1].samples()[0], 2);
    }

    #[test]
    fn test_fatal_error_stops_producer() {
        let mut source = Scripted(VecDeque::from(vec![
            Err(ReadError::Fatal("unplugged".to_string())),
            Ok(Frame::new(vec![1; 8])),
        ]));
        let buffer = FrameBuffer::new(10);
        let control = ListenControl::new(Duration::ZERO);

        assert!(matches!(
            run_producer(&mut source, &buffer, &control),
            Err(crate::Error::Audio(_))
        ));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_shutdown_stops_before_reading() {
        let mut source = Scripted(VecDeque::from(vec![Ok(Frame::new(vec![1; 8]))]));
        let buffer = FrameBuffer::new(10);
        let control = ListenControl::new(Duration::ZERO);
        control.request_shutdown();

        assert!(run_producer(&mut source, &buffer, &control).is_ok());
        assert!(buffer.is_empty());
    }
}
