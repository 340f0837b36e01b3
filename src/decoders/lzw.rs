//! LZWDecode: the PDF 1.0 legacy compression filter.

use crate::decoders::predictor::{decode_predictor, encode_predictor, PredictorParams};
use crate::decoders::Codec;
use crate::error::{Error, Result};
use crate::object::Dictionary;
use weezl::{BitOrder, decode::Decoder, encode::Encoder};

/// LZWDecode codec, honoring `EarlyChange` (default 1) and the same PNG
/// predictor parameters as FlateDecode.
pub struct LzwCodec {
    strict: bool,
}

impl LzwCodec {
    /// Create a codec; `strict` controls predictor row recovery.
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }
}

fn early_change(parms: Option<&Dictionary>) -> i64 {
    parms
        .and_then(|d| d.get(b"EarlyChange"))
        .and_then(|o| o.as_integer())
        .unwrap_or(1)
}

impl Codec for LzwCodec {
    fn decode(&self, data: &[u8], parms: Option<&Dictionary>) -> Result<Vec<u8>> {
        let mut decoder = if early_change(parms) == 0 {
            Decoder::new(BitOrder::Msb, 8)
        } else {
            Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
        };
        let expanded = decoder.decode(data).map_err(|e| Error::Filter {
            filter: "LZWDecode".to_string(),
            reason: e.to_string(),
        })?;

        let params = PredictorParams::from_parms(parms);
        if params.predictor > 1 {
            decode_predictor(&expanded, &params, self.strict)
        } else {
            Ok(expanded)
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

        let mut encoder = if early_change(parms) == 0 {
            Encoder::new(BitOrder::Msb, 8)
        } else {
            Encoder::with_tiff_size_switch(BitOrder::Msb, 8)
        };
        encoder.encode(input).map_err(|e| Error::Filter {
            filter: "LZWDecode".to_string(),
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
        let codec = LzwCodec::new(true);
        let data = b"repetition repetition repetition".repeat(8);
        let encoded = codec.encode(&data, None).unwrap();
        assert!(encoded.len() < data.len());
        assert_eq!(codec.decode(&encoded, None).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_no_early_change() {
        let mut parms = Dictionary::new();
        parms.insert("EarlyChange", Object::Integer(0));
        let codec = LzwCodec::new(true);
        let data = b"aaaabbbbccccdddd".repeat(4);
        let encoded = codec.encode(&data, Some(&parms)).unwrap();
        assert_eq!(codec.decode(&encoded, Some(&parms)).unwrap(), data);
    }

    #[test]
    fn test_roundtrip_with_predictor() {
        let mut parms = Dictionary::new();
        parms.insert("Predictor", Object::Integer(12));
        parms.insert("Columns", Object::Integer(8));
        let codec = LzwCodec::new(true);
        let data: Vec<u8> = (0u8..128).collect();
        let encoded = codec.encode(&data, Some(&parms)).unwrap();
        assert_eq!(codec.decode(&encoded, Some(&parms)).unwrap(), data);
    }

    #[test]
    fn test_invalid_input_fails() {
        let codec = LzwCodec::new(false);
        assert!(codec.decode(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF], None).is_err());
    }
}
