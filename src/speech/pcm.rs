//! # PCM Helpers
//!
//! Conversions between the sample representations the speech layer meets:
//!
//! - raw little-endian 16-bit PCM, as streamed by the synthesis endpoint
//! - `f32` samples in `[-1.0, 1.0]`, as delivered by the input device
//! - WAV containers, as stored on disk and posted for recognition

use byteorder::{ByteOrder, LittleEndian};
use std::io::{self, Cursor};

/// Decode raw 16-bit little-endian PCM.
///
/// ## Returns:
/// - **Ok(samples)**: one `i16` per two input bytes
/// - **Err(String)**: odd input length
pub fn pcm_bytes_to_samples(data: &[u8]) -> Result<Vec<i16>, String> {
    if data.len() % 2 != 0 {
        return Err(format!(
            "PCM data length must be even for 16-bit samples, got {} bytes",
            data.len()
        ));
    }

    let mut samples = vec![0i16; data.len() / 2];
    LittleEndian::read_i16_into(data, &mut samples);
    Ok(samples)
}

/// Convert float samples to 16-bit PCM, clamping out-of-range values.
pub fn float_to_pcm(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&sample| {
            let scaled = sample * 32768.0;
            scaled.clamp(-32768.0, 32767.0) as i16
        })
        .collect()
}

/// Root mean square energy of a block of float samples.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Wrap mono 16-bit samples in a WAV container.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> io::Result<Vec<u8>> {
    let header = wav::Header::new(wav::WAV_FORMAT_PCM, 1, sample_rate, 16);
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    wav::write(header, &wav::BitDepth::Sixteen(samples.to_vec()), &mut cursor)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pcm_bytes_decode_little_endian() {
        let mut data = Vec::new();
        for sample in [0i16, 1, -1, i16::MAX, i16::MIN] {
            data.extend_from_slice(&sample.to_le_bytes());
        }

        let samples = pcm_bytes_to_samples(&data).unwrap();
        assert_eq!(samples, vec![0, 1, -1, i16::MAX, i16::MIN]);

        assert!(pcm_bytes_to_samples(&[0u8; 15]).is_err());
        assert!(pcm_bytes_to_samples(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_float_to_pcm_clamps() {
        let pcm = float_to_pcm(&[0.0, 0.5, -0.5, 1.5, -1.5]);
        assert_eq!(pcm, vec![0, 16384, -16384, 32767, -32768]);
    }

    #[test]
    fn test_rms() {
        assert_eq!(rms(&[]), 0.0);
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_encode_wav_header() {
        let samples = vec![0i16, 100, -100, 200];
        let bytes = encode_wav(&samples, 24_000).unwrap();

        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(bytes.len(), 44 + samples.len() * 2);

        let (header, data) = wav::read(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(header.sampling_rate, 24_000);
        assert_eq!(header.channel_count, 1);
        assert_eq!(header.bits_per_sample, 16);
        assert!(matches!(data, wav::BitDepth::Sixteen(ref decoded) if *decoded == samples));
    }
}
