//! RunLengthDecode: length-prefixed literal and repeat runs.

use crate::decoders::Codec;
use crate::error::{Error, Result};
use crate::object::Dictionary;

/// RunLengthDecode codec.
///
/// A length byte `L` of 0..=127 copies the next `L + 1` bytes literally;
/// 129..=255 repeats the next byte `257 - L` times; 128 ends the stream.
/// Decode-only: nothing in the write path produces run-length data.
pub struct RunLengthCodec;

impl Codec for RunLengthCodec {
    fn decode(&self, data: &[u8], _parms: Option<&Dictionary>) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < data.len() {
            let length = data[i];
            i += 1;
            match length {
                0..=127 => {
                    let count = length as usize + 1;
                    if i + count > data.len() {
                        return Err(Error::Filter {
                            filter: "RunLengthDecode".to_string(),
                            reason: format!(
                                "literal run of {} bytes overruns input at position {}",
                                count, i
                            ),
                        });
                    }
                    out.extend_from_slice(&data[i..i + count]);
                    i += count;
                }
                128 => return Ok(out),
                129..=255 => {
                    let Some(&byte) = data.get(i) else {
                        return Err(Error::Filter {
                            filter: "RunLengthDecode".to_string(),
                            reason: format!("repeat run missing its byte at position {}", i),
                        });
                    };
                    i += 1;
                    out.resize(out.len() + (257 - length as usize), byte);
                }
            }
        }
        Ok(out)
    }

    fn encode(&self, _data: &[u8], _parms: Option<&Dictionary>) -> Result<Vec<u8>> {
        Err(Error::Filter {
            filter: "RunLengthDecode".to_string(),
            reason: "encoding is not supported".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_run() {
        let codec = RunLengthCodec;
        let input = [4, b'H', b'e', b'l', b'l', b'o', 128];
        assert_eq!(codec.decode(&input, None).unwrap(), b"Hello");
    }

    #[test]
    fn test_repeat_run() {
        let codec = RunLengthCodec;
        // 257 - 254 = 3 copies
        assert_eq!(codec.decode(&[254, b'x', 128], None).unwrap(), b"xxx");
        // 257 - 129 = 128 copies, the maximum
        assert_eq!(codec.decode(&[129, b'y', 128], None).unwrap(), vec![b'y'; 128]);
    }

    #[test]
    fn test_mixed_runs() {
        let codec = RunLengthCodec;
        let input = [1, b'a', b'b', 255, b'c', 0, b'd', 128];
        assert_eq!(codec.decode(&input, None).unwrap(), b"abccd");
    }

    #[test]
    fn test_eod_stops_decoding() {
        let codec = RunLengthCodec;
        let input = [0, b'a', 128, 0, b'b'];
        assert_eq!(codec.decode(&input, None).unwrap(), b"a");
    }

    #[test]
    fn test_missing_eod_tolerated() {
        let codec = RunLengthCodec;
        assert_eq!(codec.decode(&[0, b'a'], None).unwrap(), b"a");
    }

    #[test]
    fn test_truncated_literal_fails() {
        let codec = RunLengthCodec;
        assert!(codec.decode(&[5, b'a', b'b'], None).is_err());
    }

    #[test]
    fn test_truncated_repeat_fails() {
        let codec = RunLengthCodec;
        assert!(codec.decode(&[200], None).is_err());
    }

    #[test]
    fn test_encode_unsupported() {
        let codec = RunLengthCodec;
        assert!(codec.encode(b"abc", None).is_err());
    }
}
