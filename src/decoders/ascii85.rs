//! ASCII85Decode: Adobe base-85, four bytes per five characters.

use crate::decoders::Codec;
use crate::error::{Error, Result};
use crate::object::Dictionary;

/// ASCII85Decode codec (Adobe variant: `z` for a zero group, `~>` ends the
/// stream, partial trailing groups allowed).
pub struct Ascii85Codec;

fn filter_error(reason: impl Into<String>) -> Error {
    Error::Filter {
        filter: "ASCII85Decode".to_string(),
        reason: reason.into(),
    }
}

impl Codec for Ascii85Codec {
    fn decode(&self, data: &[u8], _parms: Option<&Dictionary>) -> Result<Vec<u8>> {
        // Some producers emit the optional <~ opener
        let data = data.strip_prefix(b"<~").unwrap_or(data);

        let mut out = Vec::with_capacity(data.len() * 4 / 5);
        let mut group: u32 = 0;
        let mut count = 0usize;

        for &b in data {
            match b {
                b'~' => break,
                b'z' => {
                    if count != 0 {
                        return Err(filter_error("'z' inside a group"));
                    }
                    out.extend_from_slice(&[0, 0, 0, 0]);
                }
                b'!'..=b'u' => {
                    group = group
                        .checked_mul(85)
                        .and_then(|v| v.checked_add(u32::from(b - b'!')))
                        .ok_or_else(|| filter_error("group value overflows 32 bits"))?;
                    count += 1;
                    if count == 5 {
                        out.extend_from_slice(&group.to_be_bytes());
                        group = 0;
                        count = 0;
                    }
                }
                _ if b.is_ascii_whitespace() || b == b'\0' => {}
                other => {
                    return Err(filter_error(format!("invalid byte 0x{:02X}", other)));
                }
            }
        }

        // Partial trailing group: n characters carry n-1 bytes
        if count == 1 {
            return Err(filter_error("single trailing character"));
        }
        if count > 1 {
            let mut padded = group;
            for _ in count..5 {
                padded = padded
                    .checked_mul(85)
                    .and_then(|v| v.checked_add(84))
                    .ok_or_else(|| filter_error("group value overflows 32 bits"))?;
            }
            out.extend_from_slice(&padded.to_be_bytes()[..count - 1]);
        }

        Ok(out)
    }

    fn encode(&self, data: &[u8], _parms: Option<&Dictionary>) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() * 5 / 4 + 2);
        let mut chunks = data.chunks_exact(4);
        for chunk in &mut chunks {
            let value = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if value == 0 {
                out.push(b'z');
            } else {
                out.extend_from_slice(&group_chars(value));
            }
        }

        let tail = chunks.remainder();
        if !tail.is_empty() {
            let mut padded = [0u8; 4];
            padded[..tail.len()].copy_from_slice(tail);
            let value = u32::from_be_bytes(padded);
            // The zero shorthand is not allowed for a partial group
            out.extend_from_slice(&group_chars(value)[..tail.len() + 1]);
        }

        out.extend_from_slice(b"~>");
        Ok(out)
    }
}

fn group_chars(mut value: u32) -> [u8; 5] {
    let mut chars = [0u8; 5];
    for slot in chars.iter_mut().rev() {
        *slot = (value % 85) as u8 + b'!';
        value /= 85;
    }
    chars
}
