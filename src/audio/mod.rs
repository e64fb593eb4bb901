//! # Audio Pipelines
//!
//! Everything between a live audio device and the wire: codec adapters,
//! device abstractions, the capture pipeline, and the playback pipeline.
//!
//! ## Key Components:
//! - **Codec**: PCM16 little-endian ↔ normalized f32 conversion
//! - **Device**: `AudioSource`/`AudioSink` traits with cpal and null backends
//! - **Capture Pipeline**: microphone → fixed blocks → PCM16 frames → channel
//! - **Playback Pipeline**: FIFO queue rendered strictly one frame at a time
//!
//! ## Audio Format:
//! - **Capture**: 16 kHz, 16-bit PCM, mono, little-endian
//! - **Playback**: 24 kHz, 16-bit PCM, mono, little-endian (backend output)
//!
//! Frames move producer → consumer and are never mutated after creation;
//! `AudioFrame` keeps its payload private to enforce that.

pub mod capture;
pub mod codec;
pub mod device;
pub mod playback;

/// Which half of the conversation a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    /// Microphone input heading to the backend
    Capture,
    /// Synthesized speech heading to the output device
    Playback,
}

/// One block of PCM bytes with its direction and arrival order.
///
/// Immutable once created: the payload is only reachable by reference or by
/// consuming the frame, so ownership handoffs down the pipeline cannot
/// accidentally rewrite audio that another stage already observed.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    direction: FrameDirection,
    seq: u64,
    data: Vec<u8>,
}

impl AudioFrame {
    pub fn capture(seq: u64, data: Vec<u8>) -> Self {
        Self {
            direction: FrameDirection::Capture,
            seq,
            data,
        }
    }

    pub fn playback(seq: u64, data: Vec<u8>) -> Self {
        Self {
            direction: FrameDirection::Playback,
            seq,
            data,
        }
    }

    pub fn direction(&self) -> FrameDirection {
        self.direction
    }

    /// Arrival-order sequence number, assigned by the producing side.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_accessors() {
        let frame = AudioFrame::capture(7, vec![1, 2, 3, 4]);
        assert_eq!(frame.direction(), FrameDirection::Capture);
        assert_eq!(frame.seq(), 7);
        assert_eq!(frame.len(), 4);
        assert!(!frame.is_empty());
        assert_eq!(frame.into_data(), vec![1, 2, 3, 4]);
    }
}
