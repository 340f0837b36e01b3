//! Object streams (`/Type /ObjStm`, PDF 1.5+).
//!
//! An object stream packs many small indirect objects into one compressed
//! payload. The decoded payload opens with `2N` integers, pairs of
//! `(object_number, byte_offset)`, the offsets relative to `/First`; the
//! object bodies follow, concatenated. Xref-stream type 2 entries address an
//! object by its index in this header.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::lexer::Lexer;
use crate::parser::Parser;

/// Ceiling on `/N`, a memory guard.
const MAX_OBJECT_COUNT: i64 = 1 << 20;

/// A decoded object stream, ready for per-index extraction.
#[derive(Debug)]
pub struct ObjectStream {
    pairs: Vec<(u32, usize)>,
    body: Vec<u8>,
}

impl ObjectStream {
    /// Build from the stream dictionary and the fully decoded payload.
    pub fn parse(dict: &Dictionary, decoded: Vec<u8>) -> Result<Self> {
        if let Some(kind) = dict.get(b"Type").and_then(|o| o.as_name()) {
            if kind.as_bytes() != b"ObjStm" {
                return Err(Error::MalformedStream {
                    offset: 0,
                    reason: format!("object stream has /Type /{}", kind),
                });
            }
        }

        let count = dict
            .get(b"N")
            .and_then(|o| o.as_integer())
            .filter(|n| (0..=MAX_OBJECT_COUNT).contains(n))
            .ok_or_else(|| Error::MalformedStream {
                offset: 0,
                reason: "object stream missing a sane /N".to_string(),
            })? as usize;
        let first = dict
            .get(b"First")
            .and_then(|o| o.as_integer())
            .filter(|&f| f >= 0)
            .ok_or_else(|| Error::MalformedStream {
                offset: 0,
                reason: "object stream missing /First".to_string(),
            })? as usize;
        if first > decoded.len() {
            return Err(Error::MalformedStream {
                offset: 0,
                reason: format!(
                    "/First {} is beyond the {} decoded bytes",
                    first,
                    decoded.len()
                ),
            });
        }

        let mut lexer = Lexer::new(&decoded[..first]);
        let mut pairs = Vec::with_capacity(count);
        for i in 0..count {
            let number = lexer.read_integer().map_err(|_| Error::MalformedStream {
                offset: lexer.pos(),
                reason: format!("pair {} of the object stream header is malformed", i),
            })?;
            let offset = lexer.read_integer().map_err(|_| Error::MalformedStream {
                offset: lexer.pos(),
                reason: format!("pair {} of the object stream header is malformed", i),
            })?;
            if number < 0 || number > u32::MAX as i64 || offset < 0 {
                return Err(Error::MalformedStream {
                    offset: lexer.pos(),
                    reason: format!("pair {} of the object stream header is out of range", i),
                });
            }
            pairs.push((number as u32, offset as usize));
        }

        Ok(Self {
            pairs,
            body: decoded[first..].to_vec(),
        })
    }

    /// Number of objects in the stream.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the stream holds no objects.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The declared object numbers, in header order.
    pub fn object_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.pairs.iter().map(|&(n, _)| n)
    }

    /// Extract the object at header index `index`.
    ///
    /// Compressed objects always have generation 0. An object stored here
    /// must not itself be a stream, and per-object decryption never applies:
    /// the container's payload was decrypted as a whole.
    pub fn object_at(&self, index: u32) -> Result<(ObjectRef, Object)> {
        let &(number, offset) = self.pairs.get(index as usize).ok_or_else(|| {
            Error::MalformedStream {
                offset: 0,
                reason: format!(
                    "object stream has {} objects, index {} requested",
                    self.pairs.len(),
                    index
                ),
            }
        })?;
        if offset >= self.body.len() {
            return Err(Error::MalformedStream {
                offset,
                reason: format!("object {} offset is beyond the stream body", number),
            });
        }
        let mut parser = Parser::new_at(&self.body, offset, false);
        let object = parser.parse_object()?;
        if matches!(object, Object::Stream(_)) {
            return Err(Error::MalformedStream {
                offset,
                reason: format!("object {} inside an object stream is a stream", number),
            });
        }
        Ok((ObjectRef::new(number, 0), object))
    }

    /// Extract by object number instead of index.
    pub fn object_by_number(&self, number: u32) -> Result<(ObjectRef, Object)> {
        let index = self
            .pairs
            .iter()
            .position(|&(n, _)| n == number)
            .ok_or(Error::UnknownObject(ObjectRef::new(number, 0)))?;
        self.object_at(index as u32)
    }
}
