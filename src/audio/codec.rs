//! Sample conversions shared by the built-in stages.

use bytes::{BufMut, Bytes, BytesMut};

use super::AudioEncoding;

const WAV_HEADER_LEN: usize = 44;
const WAV_FORMAT_PCM: u16 = 1;
const WAV_FORMAT_MULAW: u16 = 7;
const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32_635;

/// Decodes a chunk into normalized samples. Returns `None` when the payload
/// cannot be a whole number of samples in `encoding`.
pub fn decode_samples(payload: &[u8], encoding: AudioEncoding) -> Option<Vec<f32>> {
    match encoding {
        AudioEncoding::Linear16 => {
            if payload.len() % 2 != 0 {
                return None;
            }
            Some(
                payload
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32_768.0)
                    .collect(),
            )
        }
        AudioEncoding::Mulaw => Some(
            payload
                .iter()
                .map(|byte| mulaw_to_linear(*byte) as f32 / 32_768.0)
                .collect(),
        ),
    }
}

/// Encodes normalized samples in `encoding`.
pub fn encode_samples(samples: &[f32], encoding: AudioEncoding) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * encoding.bytes_per_sample());
    for sample in samples {
        let value = (sample.clamp(-1.0, 1.0) * 32_767.0).round() as i16;
        match encoding {
            AudioEncoding::Linear16 => buf.put_i16_le(value),
            AudioEncoding::Mulaw => buf.put_u8(linear_to_mulaw(value)),
        }
    }
    buf.freeze()
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let energy: f32 = samples.iter().map(|sample| sample * sample).sum();
    (energy / samples.len() as f32).sqrt()
}

/// Wraps an encoded payload into a self-contained mono WAV container.
pub fn wrap_wav(payload: &[u8], sampling_rate: u32, encoding: AudioEncoding) -> Bytes {
    let (format, bits) = match encoding {
        AudioEncoding::Linear16 => (WAV_FORMAT_PCM, 16_u16),
        AudioEncoding::Mulaw => (WAV_FORMAT_MULAW, 8_u16),
    };
    let block_align = bits / 8;
    let data_len = payload.len() as u32;

    let mut buf = BytesMut::with_capacity(WAV_HEADER_LEN + payload.len());
    buf.put_slice(b"RIFF");
    buf.put_u32_le(36 + data_len);
    buf.put_slice(b"WAVE");
    buf.put_slice(b"fmt ");
    buf.put_u32_le(16);
    buf.put_u16_le(format);
    buf.put_u16_le(1);
    buf.put_u32_le(sampling_rate);
    buf.put_u32_le(sampling_rate * block_align as u32);
    buf.put_u16_le(block_align);
    buf.put_u16_le(bits);
    buf.put_slice(b"data");
    buf.put_u32_le(data_len);
    buf.put_slice(payload);
    buf.freeze()
}

pub fn mulaw_to_linear(byte: u8) -> i16 {
    let value = !byte;
    let sign = value & 0x80;
    let exponent = ((value >> 4) & 0x07) as i32;
    let mantissa = (value & 0x0F) as i32;
    let magnitude = (((mantissa << 3) + MULAW_BIAS) << exponent) - MULAW_BIAS;
    if sign != 0 {
        -magnitude as i16
    } else {
        magnitude as i16
    }
}

pub fn linear_to_mulaw(sample: i16) -> u8 {
    let mut value = sample as i32;
    let sign = if value < 0 {
        value = -value;
        0x80
    } else {
        0x00
    };
    value = value.min(MULAW_CLIP) + MULAW_BIAS;

    let mut exponent = 7;
    let mut mask = 0x4000;
    while exponent > 0 && value & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = (value >> (exponent + 3)) & 0x0F;
    !((sign | (exponent << 4) | mantissa) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odd_length_pcm16_is_rejected() {
        assert!(decode_samples(&[0, 1, 2], AudioEncoding::Linear16).is_none());
        assert_eq!(
            decode_samples(&[0, 0, 0, 0], AudioEncoding::Linear16).map(|s| s.len()),
            Some(2)
        );
    }

    #[test]
    fn mulaw_silence_decodes_to_zero() {
        assert_eq!(mulaw_to_linear(0xFF), 0);
        assert_eq!(linear_to_mulaw(0), 0xFF);
    }

    #[test]
    fn mulaw_preserves_sign_and_rough_magnitude() {
        for sample in [1_000_i16, -1_000, 12_000, -30_000] {
            let decoded = mulaw_to_linear(linear_to_mulaw(sample));
            assert_eq!(decoded.signum(), sample.signum());
            let error = (decoded as i32 - sample as i32).abs();
            assert!(error < (sample as i32).abs() / 10, "{sample} -> {decoded}");
        }
    }

    #[test]
    fn wav_header_describes_payload() {
        let payload = encode_samples(&[0.0; 160], AudioEncoding::Linear16);
        let wav = wrap_wav(&payload, 24_000, AudioEncoding::Linear16);

        assert_eq!(wav.len(), 44 + 320);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]), 24_000);
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 320);
    }

    #[test]
    fn rms_of_constant_signal() {
        assert!((rms(&[0.5; 64]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }
}
