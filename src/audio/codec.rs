//! # PCM Codec Adapters
//!
//! Conversions between normalized floating-point samples and the wire format
//! (16-bit signed little-endian PCM) in both directions.
//!
//! ## Scaling:
//! Encoding clamps to [-1.0, 1.0] and scales asymmetrically (negative samples
//! by 0x8000, non-negative by 0x7FFF) so that full-scale input maps exactly
//! onto the i16 range without overflow on either end. Decoding divides by
//! 32768.0, the conventional inverse.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::{AppError, AppResult};

/// Decode 16-bit little-endian PCM bytes into normalized f32 samples.
///
/// ## Error Handling:
/// An empty buffer or an odd byte count cannot be valid 16-bit PCM and
/// produces a `Decode` error; the playback pipeline treats that as a
/// skip-and-continue condition, not a fatal one.
pub fn decode_pcm16(data: &[u8]) -> AppResult<Vec<f32>> {
    if data.is_empty() {
        return Err(AppError::Decode("empty audio frame".to_string()));
    }
    if data.len() % 2 != 0 {
        return Err(AppError::Decode(format!(
            "frame length {} is not a multiple of 2",
            data.len()
        )));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);

    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }

    Ok(samples)
}

/// Encode normalized f32 samples as 16-bit little-endian PCM bytes.
///
/// Out-of-range input is clamped rather than rejected; capture callbacks can
/// legitimately overshoot [-1.0, 1.0] slightly and a hard error there would
/// drop real speech.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut data = Vec::with_capacity(samples.len() * 2);

    for &sample in samples {
        // WriteBytesExt into a Vec cannot fail
        let _ = data.write_i16::<LittleEndian>(sample_to_i16(sample));
    }

    data
}

/// Clamp one sample and scale it into the i16 range.
fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
    scaled as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_empty_frame() {
        let result = decode_pcm16(&[]);
        assert!(matches!(result, Err(AppError::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_odd_length() {
        let result = decode_pcm16(&[0x00, 0x01, 0x02]);
        assert!(matches!(result, Err(AppError::Decode(_))));
    }

    #[test]
    fn test_decode_is_little_endian() {
        // 0x0100 little-endian = 256
        let samples = decode_pcm16(&[0x00, 0x01]).unwrap();
        assert_eq!(samples.len(), 1);
        assert!((samples[0] - 256.0 / 32768.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_decode_full_scale() {
        // i16::MIN then i16::MAX
        let samples = decode_pcm16(&[0x00, 0x80, 0xFF, 0x7F]).unwrap();
        assert!((samples[0] - (-1.0)).abs() < f32::EPSILON);
        assert!((samples[1] - 32767.0 / 32768.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_encode_clamps_out_of_range() {
        let data = encode_pcm16(&[2.0, -2.0]);
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(cursor.read_i16::<LittleEndian>().unwrap(), i16::MAX);
        assert_eq!(cursor.read_i16::<LittleEndian>().unwrap(), i16::MIN);
    }

    #[test]
    fn test_encode_asymmetric_scaling() {
        let data = encode_pcm16(&[1.0, -1.0, 0.0]);
        let mut cursor = Cursor::new(&data[..]);
        assert_eq!(cursor.read_i16::<LittleEndian>().unwrap(), 32767);
        assert_eq!(cursor.read_i16::<LittleEndian>().unwrap(), -32768);
        assert_eq!(cursor.read_i16::<LittleEndian>().unwrap(), 0);
    }

    #[test]
    fn test_encode_decode_preserves_speech_range() {
        let original = vec![0.0, 0.25, -0.25, 0.5, -0.5, 0.99, -0.99];
        let decoded = decode_pcm16(&encode_pcm16(&original)).unwrap();
        assert_eq!(decoded.len(), original.len());
        for (a, b) in original.iter().zip(decoded.iter()) {
            // One quantization step of slack
            assert!((a - b).abs() < 1.0 / 16384.0, "{} vs {}", a, b);
        }
    }
}
