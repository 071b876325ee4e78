use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::error;

/// Decodes a base64 chunk of little-endian PCM16 into samples.
///
/// Malformed chunks are logged and skipped rather than tearing down the
/// receiving channel; a dropped chunk is a glitch, a dead channel is a lost
/// interviewer voice.
pub fn decode_pcm16(data: &str) -> Vec<i16> {
    let bytes = match BASE64.decode(data) {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = ?e, "failed to decode base64 audio chunk");
            return Vec::new();
        }
    };

    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Converts PCM16 samples to the normalized f32 form rodio sources expect.
pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|s| *s as f32 / 32768.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn decodes_little_endian_samples() {
        // 0x4000 little-endian is 16384.
        let samples = decode_pcm16("AEA=");
        assert_eq!(samples, vec![16384]);
    }

    #[test]
    fn drops_trailing_odd_byte() {
        let samples = decode_pcm16("AEB/");
        assert_eq!(samples, vec![16384]);
    }

    #[test]
    fn invalid_base64_yields_no_samples() {
        assert!(decode_pcm16("not-base64!").is_empty());
    }

    #[test]
    fn normalizes_full_scale() {
        let converted = pcm16_to_f32(&[i16::MIN, 0, 16384]);
        assert_relative_eq!(converted[0], -1.0);
        assert_relative_eq!(converted[1], 0.0);
        assert_relative_eq!(converted[2], 0.5);
    }
}
