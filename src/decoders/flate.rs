//! FlateDecode: zlib/deflate, the workhorse filter of modern PDF.

use crate::decoders::predictor::{decode_predictor, encode_predictor, PredictorParams};
use crate::decoders::Codec;
use crate::error::{Error, Result};
use crate::object::Dictionary;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// FlateDecode codec. Applies PNG predictors from `DecodeParms` after
/// inflation and before deflation.
pub struct FlateCodec {
    strict: bool,
}

impl FlateCodec {
    /// Create a codec; `strict` rejects truncated input instead of keeping
    /// the bytes inflated so far.
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }
}

impl Codec for FlateCodec {
    fn decode(&self, data: &[u8], parms: Option<&Dictionary>) -> Result<Vec<u8>> {
        let mut decoder = ZlibDecoder::new(data);
        let mut inflated = Vec::new();
        if let Err(e) = decoder.read_to_end(&mut inflated) {
            // Truncated tails are common in files cut off mid-write. Keep
            // whatever inflated cleanly unless the caller asked for strict.
            if self.strict || inflated.is_empty() {
                return Err(Error::Filter {
                    filter: "FlateDecode".to_string(),
                    reason: e.to_string(),
                });
            }
            log::warn!(
                "FlateDecode: {} after {} bytes; keeping partial output",
                e,
                inflated.len()
            );
        }

        let params = PredictorParams::from_parms(parms);
        if params.predictor > 1 {
            decode_predictor(&inflated, &params, self.strict)
        } else {
            Ok(inflated)
        }
    }

    fn encode(&self, data: &[u8], parms: Option<&Dictionary>) -> Result<Vec<u8>> {
        let params = PredictorParams::from_parms(parms);
        let filtered;
        let input: &[u8] = if params.predictor > 1 {
            filtered = encode_predictor(data, &params)?;
            &filtered
        } else {
            data
        };

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(input)
            .and_then(|_| encoder.finish())
            .map_err(|e| Error::Filter {
                filter: "FlateDecode".to_string(),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;

    #[test]
    fn test_roundtrip() {
        let codec = FlateCodec::new(true);
        let data = b"The quick brown fox jumps over the lazy dog".repeat(20);
        let encoded = codec.encode(&data, None).unwrap();
        assert!(encoded.len() < data.len());
        assert_eq!(codec.decode(&encoded, None).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_empty() {
        let codec = FlateCodec::new(true);
        let encoded = codec.encode(b"", None).unwrap();
        assert_eq!(codec.decode(&encoded, None).unwrap(), b"");
    }

    #[test]
    fn test_invalid_input_fails() {
        let codec = FlateCodec::new(false);
        assert!(codec.decode(b"this is not zlib data", None).is_err());
    }

    #[test]
    fn test_truncated_input_partial_in_lenient_mode() {
        let lenient = FlateCodec::new(false);
        let strict = FlateCodec::new(true);
        let data = b"0123456789".repeat(100);
        let mut encoded = lenient.encode(&data, None).unwrap();
        encoded.truncate(encoded.len() - 5);
        assert!(strict.decode(&encoded, None).is_err());
        let partial = lenient.decode(&encoded, None).unwrap();
        assert!(!partial.is_empty());
        assert!(data.starts_with(&partial));
    }

    #[test]
    fn test_predictor_roundtrip() {
        let mut parms = Dictionary::new();
        parms.insert("Predictor", Object::Integer(12));
        parms.insert("Columns", Object::Integer(4));
        let codec = FlateCodec::new(true);
        let data: Vec<u8> = (0u8..64).collect();
        let encoded = codec.encode(&data, Some(&parms)).unwrap();
        assert_eq!(codec.decode(&encoded, Some(&parms)).unwrap(), data);
    }

    #[test]
    fn test_tiff_predictor_rejected() {
        let mut parms = Dictionary::new();
        parms.insert("Predictor", Object::Integer(2));
        parms.insert("Columns", Object::Integer(4));
        let codec = FlateCodec::new(false);
        let encoded = FlateCodec::new(false).encode(b"", None).unwrap();
        assert!(codec.decode(&encoded, Some(&parms)).is_err());
    }
}
