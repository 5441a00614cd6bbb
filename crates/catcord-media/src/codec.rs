//! G.711 mu-law codec and sample-rate helpers for the voice path.
//!
//! Capture runs at 48 kHz mono while the wire codec is PCMU at 8 kHz, so
//! outbound frames are decimated by 6 before encoding and inbound frames
//! expanded by 6 after decoding.

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

/// Encode one linear PCM sample to 8-bit mu-law.
pub fn linear_to_ulaw(sample: i16) -> u8 {
    let mut pcm = sample as i32;
    let sign: u8 = if pcm < 0 {
        pcm = -pcm;
        0x80
    } else {
        0
    };
    if pcm > CLIP {
        pcm = CLIP;
    }
    pcm += BIAS;

    let mut exponent: u8 = 7;
    let mut mask = 0x4000;
    while exponent > 0 && pcm & mask == 0 {
        exponent -= 1;
        mask >>= 1;
    }
    let mantissa = ((pcm >> (exponent + 3)) & 0x0f) as u8;
    !(sign | (exponent << 4) | mantissa)
}

/// Decode one 8-bit mu-law byte back to linear PCM.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = (byte & 0x0f) as i32;
    let magnitude = ((((mantissa << 3) + BIAS) << exponent) - BIAS) as i16;
    if sign != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Encode a 16-bit frame to mu-law bytes.
pub fn encode_frame(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| linear_to_ulaw(s)).collect()
}

/// Decode mu-law bytes back to a 16-bit frame.
pub fn decode_frame(payload: &[u8]) -> Vec<i16> {
    payload.iter().map(|&b| ulaw_to_linear(b)).collect()
}

/// Convert capture samples to 16-bit PCM.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// Convert decoded PCM back to the playback sample format.
pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| s as f32 / i16::MAX as f32).collect()
}

/// Decimate a 48 kHz frame to 8 kHz by averaging each group of six
/// samples.
pub fn downsample_48k_to_8k(samples: &[f32]) -> Vec<f32> {
    samples
        .chunks(6)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect()
}

/// Expand an 8 kHz frame back to 48 kHz by sample repetition.
pub fn upsample_8k_to_48k(samples: &[f32]) -> Vec<f32> {
    let mut out = Vec::with_capacity(samples.len() * 6);
    for &sample in samples {
        out.extend(std::iter::repeat(sample).take(6));
    }
    out
}
