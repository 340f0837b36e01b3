//! ASCIIHexDecode: two hex digits per byte, `>` terminates.

use crate::decoders::Codec;
use crate::error::{Error, Result};
use crate::object::Dictionary;

/// ASCIIHexDecode codec.
pub struct AsciiHexCodec;

impl Codec for AsciiHexCodec {
    fn decode(&self, data: &[u8], _parms: Option<&Dictionary>) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() / 2);
        let mut pending: Option<u8> = None;
        for (i, &b) in data.iter().enumerate() {
            match b {
                b'>' => break,
                _ if b.is_ascii_whitespace() || b == b'\0' => continue,
                _ => {
                    let value = match b {
                        b'0'..=b'9' => b - b'0',
                        b'a'..=b'f' => b - b'a' + 10,
                        b'A'..=b'F' => b - b'A' + 10,
                        _ => {
                            return Err(Error::Filter {
                                filter: "ASCIIHexDecode".to_string(),
                                reason: format!("invalid byte 0x{:02X} at position {}", b, i),
                            });
                        }
                    };
                    match pending.take() {
                        Some(hi) => out.push(hi << 4 | value),
                        None => pending = Some(value),
                    }
                }
            }
        }
        // Odd digit count: final digit is padded with a trailing zero
        if let Some(hi) = pending {
            out.push(hi << 4);
        }
        Ok(out)
    }

    fn encode(&self, data: &[u8], _parms: Option<&Dictionary>) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(data.len() * 2 + 1);
        for &b in data {
            out.push(HEX[(b >> 4) as usize]);
            out.push(HEX[(b & 0x0F) as usize]);
        }
        out.push(b'>');
        Ok(out)
    }
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";
