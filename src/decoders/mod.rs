//! Stream filter codecs and the filter registry.
//!
//! Every filter is a [`Codec`] with symmetric `decode`/`encode` entry points
//! keyed by the filter's name bytes in a [`FilterRegistry`]. A stream's
//! `Filter` array forms a chain: decoding applies the codecs in array order,
//! encoding applies them in reverse. Each chain position may carry its own
//! parameter dictionary from `DecodeParms`.
//!
//! Registered by default:
//! - `FlateDecode` (flate2, PNG predictors)
//! - `LZWDecode` (weezl, PNG predictors, EarlyChange)
//! - `ASCIIHexDecode`
//! - `ASCII85Decode`
//! - `RunLengthDecode` (decode-only)
//! - `Crypt` (pass-through; actual decryption happens at resolve time)

use crate::error::{Error, Result};
use crate::object::{Dictionary, Name};
use std::collections::HashMap;
use std::sync::Arc;

mod ascii85;
mod ascii_hex;
mod flate;
mod lzw;
mod predictor;
mod runlength;

pub use ascii85::Ascii85Codec;
pub use ascii_hex::AsciiHexCodec;
pub use flate::FlateCodec;
pub use lzw::LzwCodec;
pub use predictor::{decode_predictor, encode_predictor, PredictorParams};
pub use runlength::RunLengthCodec;

/// Ceiling on decoded stream size, a decompression-bomb guard.
const MAX_DECODED_SIZE: usize = 512 * 1024 * 1024;

/// A stream filter: a byte codec with optional parameters.
pub trait Codec: Send + Sync {
    /// Decode `data`. Must be total on well-formed input; malformed input
    /// fails with [`Error::Filter`].
    fn decode(&self, data: &[u8], parms: Option<&Dictionary>) -> Result<Vec<u8>>;

    /// Encode `data` such that `decode(encode(x, p), p) == x`.
    fn encode(&self, data: &[u8], parms: Option<&Dictionary>) -> Result<Vec<u8>>;
}

/// Decode-only pass-through for the `Crypt` filter.
///
/// Per-object decryption is applied when the stream is resolved, before any
/// filters run, so by the time a chain executes there is nothing left to do.
/// The document layer inspects the crypt filter name to decide whether the
/// payload was encrypted at rest in the first place.
struct CryptCodec;

impl Codec for CryptCodec {
    fn decode(&self, data: &[u8], _parms: Option<&Dictionary>) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn encode(&self, _data: &[u8], _parms: Option<&Dictionary>) -> Result<Vec<u8>> {
        Err(Error::Filter {
            filter: "Crypt".to_string(),
            reason: "Crypt is applied by the security handler, not the filter chain".to_string(),
        })
    }
}

/// Registry of codecs keyed by filter name bytes.
pub struct FilterRegistry {
    codecs: HashMap<Vec<u8>, Arc<dyn Codec>>,
}

impl FilterRegistry {
    /// Registry with the standard filters, lenient about recoverable damage.
    pub fn standard() -> Self {
        Self::with_strictness(false)
    }

    /// Registry with the standard filters; `strict` turns recoverable damage
    /// (short predictor rows, truncated deflate tails) into errors.
    pub fn with_strictness(strict: bool) -> Self {
        let mut registry = Self {
            codecs: HashMap::new(),
        };
        registry.register(&b"FlateDecode"[..], Arc::new(FlateCodec::new(strict)));
        registry.register(&b"LZWDecode"[..], Arc::new(LzwCodec::new(strict)));
        registry.register(&b"ASCIIHexDecode"[..], Arc::new(AsciiHexCodec));
        registry.register(&b"ASCII85Decode"[..], Arc::new(Ascii85Codec));
        registry.register(&b"RunLengthDecode"[..], Arc::new(RunLengthCodec));
        registry.register(&b"Crypt"[..], Arc::new(CryptCodec));
        registry
    }

    /// Register (or replace) a codec under a filter name.
    pub fn register(&mut self, name: impl Into<Vec<u8>>, codec: Arc<dyn Codec>) {
        self.codecs.insert(name.into(), codec);
    }

    /// Look up a codec by name bytes.
    pub fn get(&self, name: &[u8]) -> Option<&Arc<dyn Codec>> {
        self.codecs.get(name)
    }

    fn require(&self, name: &Name) -> Result<&Arc<dyn Codec>> {
        self.get(name.as_bytes())
            .ok_or_else(|| Error::UnsupportedFilter(name.to_string()))
    }

    /// Decode through a filter chain in array order.
    pub fn decode_chain(
        &self,
        data: &[u8],
        chain: &[(Name, Option<Dictionary>)],
    ) -> Result<Vec<u8>> {
        let mut current = data.to_vec();
        for (name, parms) in chain {
            let codec = self.require(name)?;
            current = codec.decode(&current, parms.as_ref())?;
            if current.len() > MAX_DECODED_SIZE {
                return Err(Error::Filter {
                    filter: name.to_string(),
                    reason: format!("decoded size exceeds {} bytes", MAX_DECODED_SIZE),
                });
            }
        }
        Ok(current)
    }

    /// Encode through a filter chain: the inverse of [`Self::decode_chain`],
    /// so the filters run in reverse array order.
    pub fn encode_chain(
        &self,
        data: &[u8],
        chain: &[(Name, Option<Dictionary>)],
    ) -> Result<Vec<u8>> {
        let mut current = data.to_vec();
        for (name, parms) in chain.iter().rev() {
            let codec = self.require(name)?;
            current = codec.encode(&current, parms.as_ref())?;
        }
        Ok(current)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
