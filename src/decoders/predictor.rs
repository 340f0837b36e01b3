//! PNG predictors for Flate and LZW streams.
//!
//! Predictors 10-15 store per-row deltas so similar rows compress better.
//! Rows are filtered on bytes, not samples; each encoded row carries a
//! leading tag byte naming the per-row algorithm. TIFF predictor 2 is not
//! supported and is rejected up front.

use crate::error::{Error, Result};
use crate::object::Dictionary;

/// Predictor parameters from a `DecodeParms` dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictorParams {
    /// 1 = none, 2 = TIFF (unsupported), 10-15 = PNG
    pub predictor: i64,
    /// Samples per row
    pub columns: usize,
    /// Color components per sample
    pub colors: usize,
    /// Bits per component
    pub bits_per_component: usize,
}

impl Default for PredictorParams {
    fn default() -> Self {
        Self {
            predictor: 1,
            columns: 1,
            colors: 1,
            bits_per_component: 8,
        }
    }
}

impl PredictorParams {
    /// Read parameters out of a `DecodeParms` dictionary, applying defaults.
    pub fn from_parms(parms: Option<&Dictionary>) -> Self {
        let Some(dict) = parms else {
            return Self::default();
        };
        let int = |key: &[u8], default: i64| {
            dict.get(key).and_then(|o| o.as_integer()).unwrap_or(default)
        };
        Self {
            predictor: int(b"Predictor", 1),
            columns: int(b"Columns", 1).max(1) as usize,
            colors: int(b"Colors", 1).max(1) as usize,
            bits_per_component: int(b"BitsPerComponent", 8).max(1) as usize,
        }
    }

    /// Bytes per pixel for filtering purposes (at least one).
    pub fn bytes_per_pixel(&self) -> usize {
        (self.colors * self.bits_per_component).div_ceil(8).max(1)
    }

    /// Bytes of pixel data per row, excluding the tag byte.
    pub fn row_bytes(&self) -> usize {
        (self.columns * self.colors * self.bits_per_component).div_ceil(8)
    }
}

/// Reverse the predictor transform after decompression.
///
/// A trailing short row is recoverable: with `strict` off the complete rows
/// are returned and the remainder dropped with a warning.
pub fn decode_predictor(data: &[u8], params: &PredictorParams, strict: bool) -> Result<Vec<u8>> {
    match params.predictor {
        1 => Ok(data.to_vec()),
        2 => Err(Error::Filter {
            filter: "FlateDecode".to_string(),
            reason: "TIFF predictor 2 is not supported".to_string(),
        }),
        10..=15 => decode_png(data, params, strict),
        other => Err(Error::Filter {
            filter: "FlateDecode".to_string(),
            reason: format!("unknown predictor {}", other),
        }),
    }
}

fn decode_png(data: &[u8], params: &PredictorParams, strict: bool) -> Result<Vec<u8>> {
    let row_bytes = params.row_bytes();
    let stride = row_bytes + 1;
    let bpp = params.bytes_per_pixel();

    let complete_rows = data.len() / stride;
    if data.len() % stride != 0 {
        let detail = format!(
            "predictor input of {} bytes is not a multiple of the {}-byte row",
            data.len(),
            stride
        );
        if strict {
            return Err(Error::Filter {
                filter: "FlateDecode".to_string(),
                reason: detail,
            });
        }
        log::warn!("{}; keeping {} complete rows", detail, complete_rows);
    }

    let mut out: Vec<u8> = Vec::with_capacity(complete_rows * row_bytes);
    let mut prior = vec![0u8; row_bytes];

    for row in 0..complete_rows {
        let encoded = &data[row * stride..row * stride + stride];
        let tag = encoded[0];
        let row_in = &encoded[1..];
        let mut row_out = vec![0u8; row_bytes];

        match tag {
            0 => row_out.copy_from_slice(row_in),
            1 => {
                for i in 0..row_bytes {
                    let left = if i >= bpp { row_out[i - bpp] } else { 0 };
                    row_out[i] = row_in[i].wrapping_add(left);
                }
            }
            2 => {
                for i in 0..row_bytes {
                    row_out[i] = row_in[i].wrapping_add(prior[i]);
                }
            }
            3 => {
                for i in 0..row_bytes {
                    let left = if i >= bpp { row_out[i - bpp] as u16 } else { 0 };
                    let up = prior[i] as u16;
                    row_out[i] = row_in[i].wrapping_add(((left + up) / 2) as u8);
                }
            }
            4 => {
                for i in 0..row_bytes {
                    let left = if i >= bpp { row_out[i - bpp] as i16 } else { 0 };
                    let up = prior[i] as i16;
                    let up_left = if i >= bpp { prior[i - bpp] as i16 } else { 0 };
                    row_out[i] = row_in[i].wrapping_add(paeth(left, up, up_left) as u8);
                }
            }
            other => {
                return Err(Error::Filter {
                    filter: "FlateDecode".to_string(),
                    reason: format!("invalid PNG row filter tag {}", other),
                });
            }
        }

        out.extend_from_slice(&row_out);
        prior = row_out;
    }

    Ok(out)
}

/// Apply the predictor transform before compression.
///
/// Only the fixed filters None, Sub, and Up are emitted (predictors 10-12);
/// Up is what xref streams conventionally use.
pub fn encode_predictor(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    match params.predictor {
        1 => return Ok(data.to_vec()),
        10..=12 => {}
        other => {
            return Err(Error::Filter {
                filter: "FlateDecode".to_string(),
                reason: format!("predictor {} is not supported for encoding", other),
            });
        }
    }

    let row_bytes = params.row_bytes();
    let bpp = params.bytes_per_pixel();
    if row_bytes == 0 || data.len() % row_bytes != 0 {
        return Err(Error::Filter {
            filter: "FlateDecode".to_string(),
            reason: format!(
                "input of {} bytes is not a multiple of the {}-byte row",
                data.len(),
                row_bytes
            ),
        });
    }

    let tag = (params.predictor - 10) as u8;
    let mut out = Vec::with_capacity(data.len() + data.len() / row_bytes);
    let mut prior = vec![0u8; row_bytes];

    for row in data.chunks(row_bytes) {
        out.push(tag);
        match tag {
            0 => out.extend_from_slice(row),
            1 => {
                for i in 0..row_bytes {
                    let left = if i >= bpp { row[i - bpp] } else { 0 };
                    out.push(row[i].wrapping_sub(left));
                }
            }
            2 => {
                for i in 0..row_bytes {
                    out.push(row[i].wrapping_sub(prior[i]));
                }
            }
            _ => unreachable!(),
        }
        prior.copy_from_slice(row);
    }

    Ok(out)
}

/// Paeth filter function from the PNG specification.
fn paeth(a: i16, b: i16, c: i16) -> i16 {
    let p = a + b - c;
    let pa = (p - a).abs();
    let pb = (p - b).abs();
    let pc = (p - c).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}
