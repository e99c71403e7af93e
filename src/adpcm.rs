#![doc = r#"
Decoding of the trailing ADPCM audio blocks.

Waveform blocks hold groups of up to 18 frames of 128 bytes each,
every group followed by 20 padding bytes. A frame is 16 parameter
bytes plus 112 sample bytes carrying 224 interleaved 4-bit samples.
Each sample is a signed nibble scaled by a per-subframe shift, plus a
two-tap IIR prediction over the previous two output samples. Predictor
state spans the whole stream, not just one frame.
"#]

use crate::error::{FormatError, FormatErrorKind, ReadResult};

const FRAMES_PER_GROUP: usize = 18;
const SUB_FRAMES: usize = 4;
const SUB_FRAME_NIBBLES: usize = 28;
const FRAME_SIZE: usize = 128;
const PARAM_BYTES: usize = 16;
const GROUP_PADDING: usize = 20;

const SHIFT_LIMIT: u8 = 12;
const INDEX_LIMIT: u8 = 3;

/// Predictor coefficients over `prev1`.
const K0: [f64; 4] = [0.0, 0.9375, 1.796875, 1.53125];
/// Predictor coefficients over `prev2`.
const K1: [f64; 4] = [0.0, 0.0, -0.8125, -0.859375];

/// Sample rate of the waveform blocks.
pub const SAMPLE_RATE: u32 = 32000;

/// Running predictor state.
struct Predictor {
    prev1: i32,
    prev2: i32,
}

impl Predictor {
    fn decode(&mut self, sp: u8, nibble: u8, position: usize) -> ReadResult<i16> {
        let shift = sp & 0x0F;
        if shift > SHIFT_LIMIT {
            return Err(FormatError::new(
                position,
                FormatErrorKind::AdpcmParameter {
                    name: "shift",
                    value: shift,
                },
            ));
        }
        let index = sp >> 4;
        if index > INDEX_LIMIT {
            return Err(FormatError::new(
                position,
                FormatErrorKind::AdpcmParameter {
                    name: "index",
                    value: index,
                },
            ));
        }

        // Sign-extend the nibble, scale to the 12-bit base, predict.
        let signed = i32::from((nibble as i8) << 4 >> 4);
        let predicted = f64::from(signed << (12 - shift))
            + K0[usize::from(index)] * f64::from(self.prev1)
            + K1[usize::from(index)] * f64::from(self.prev2);

        let clamped = if predicted > 32767.0 {
            32767
        } else if predicted < -32768.0 {
            -32768
        } else {
            predicted.round() as i16
        };

        self.prev2 = self.prev1;
        self.prev1 = i32::from(clamped);
        Ok(clamped)
    }
}

/// Decode one waveform block to 16-bit mono PCM samples.
///
/// A trailing partial frame terminates decoding; it is not an error.
pub fn decode_to_pcm(data: &[u8]) -> ReadResult<Vec<i16>> {
    let mut samples = Vec::with_capacity(data.len() * 2);
    let mut predictor = Predictor { prev1: 0, prev2: 0 };
    let mut pos = 0usize;

    'stream: loop {
        for _ in 0..FRAMES_PER_GROUP {
            if pos + FRAME_SIZE > data.len() {
                break 'stream;
            }
            let frame = &data[pos..pos + FRAME_SIZE];
            let (params, sample_bytes) = frame.split_at(PARAM_BYTES);

            for i in 0..SUB_FRAMES {
                // j selects the low or high nibble plane.
                for j in 0..2 {
                    let mut sp_index = j + i * 2;
                    if i >= 2 {
                        sp_index += 4;
                    }
                    let sp = params[sp_index];

                    for k in 0..SUB_FRAME_NIBBLES {
                        let su_index = k * SUB_FRAMES + i;
                        let byte = sample_bytes[su_index];
                        let nibble = if j == 0 { byte & 0x0F } else { byte >> 4 };
                        samples.push(predictor.decode(sp, nibble, pos + sp_index)?);
                    }
                }
            }
            pos += FRAME_SIZE;
        }

        pos += GROUP_PADDING.min(data.len().saturating_sub(pos));
        if pos + FRAME_SIZE > data.len() {
            break;
        }
    }

    Ok(samples)
}
