//! Object body serialization.
//!
//! Renders [`Object`]s into PDF source form. Output is deterministic: the
//! same object graph in the same order always yields the same bytes.
//! Dictionary entries are written in insertion order, which is what makes
//! parse/serialize round-trips stable.

use crate::encryption::SecurityHandler;
use crate::error::Result;
use crate::lexer::is_regular;
use crate::object::{Dictionary, Name, Object, ObjectRef, Stream};

/// Serializer for object bodies, optionally encrypting strings and stream
/// payloads with a per-object key.
pub struct ObjectSerializer<'a> {
    crypt: Option<(&'a SecurityHandler, ObjectRef)>,
}

impl<'a> ObjectSerializer<'a> {
    /// Plain serializer: no encryption.
    pub fn new() -> Self {
        Self { crypt: None }
    }

    /// Serializer that encrypts strings and stream payloads as the content
    /// of object `reference`.
    pub fn encrypted(handler: &'a SecurityHandler, reference: ObjectRef) -> Self {
        Self {
            crypt: Some((handler, reference)),
        }
    }

    /// Append the source form of `obj` to `out`.
    pub fn write_object(&self, out: &mut Vec<u8>, obj: &Object) -> Result<()> {
        match obj {
            Object::Null => out.extend_from_slice(b"null"),
            Object::Boolean(true) => out.extend_from_slice(b"true"),
            Object::Boolean(false) => out.extend_from_slice(b"false"),
            Object::Integer(i) => out.extend_from_slice(i.to_string().as_bytes()),
            Object::Real(r) => write_real(out, *r),
            Object::LiteralString(s) => {
                let bytes = self.transform_string(s)?;
                write_literal_string(out, &bytes);
            }
            Object::HexString(s) => {
                let bytes = self.transform_string(s)?;
                write_hex_string(out, &bytes);
            }
            Object::Name(name) => write_name(out, name),
            Object::Array(items) => {
                out.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(b' ');
                    }
                    self.write_object(out, item)?;
                }
                out.push(b']');
            }
            Object::Dictionary(dict) => self.write_dictionary(out, dict)?,
            Object::Stream(stream) => self.write_stream(out, stream)?,
            Object::Reference(r) => {
                out.extend_from_slice(format!("{} {} R", r.number, r.generation).as_bytes());
            }
        }
        Ok(())
    }

    fn transform_string(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        match self.crypt {
            Some((handler, reference)) => handler.encrypt_string(bytes, reference),
            None => Ok(bytes.to_vec()),
        }
    }

    fn write_dictionary(&self, out: &mut Vec<u8>, dict: &Dictionary) -> Result<()> {
        out.extend_from_slice(b"<<");
        for (key, value) in dict.iter() {
            out.push(b' ');
            write_name(out, key);
            out.push(b' ');
            self.write_object(out, value)?;
        }
        out.extend_from_slice(b" >>");
        Ok(())
    }

    fn write_stream(&self, out: &mut Vec<u8>, stream: &Stream) -> Result<()> {
        let payload = match self.crypt {
            Some((handler, reference)) => handler.encrypt_stream(&stream.data, reference)?,
            None => stream.data.to_vec(),
        };

        // Length always reflects the bytes actually written
        let mut dict = stream.dict.clone();
        dict.insert("Length", Object::Integer(payload.len() as i64));

        self.write_dictionary(out, &dict)?;
        out.extend_from_slice(b"\nstream\n");
        out.extend_from_slice(&payload);
        out.extend_from_slice(b"\nendstream");
        Ok(())
    }
}

impl Default for ObjectSerializer<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-point rendering, trailing zeros trimmed; never scientific notation.
fn write_real(out: &mut Vec<u8>, value: f64) {
    if !value.is_finite() {
        // NaN or infinity cannot be represented; the closest legal object
        out.push(b'0');
        return;
    }
    let formatted = format!("{:.6}", value);
    let mut trimmed = formatted.trim_end_matches('0').to_string();
    // Keep one fractional digit so the value reads back as a real
    if trimmed.ends_with('.') {
        trimmed.push('0');
    }
    out.extend_from_slice(trimmed.as_bytes());
}

/// Names: `/` plus the bytes, any byte outside the regular set (or `#`)
/// escaped as `#XX`.
fn write_name(out: &mut Vec<u8>, name: &Name) {
    out.push(b'/');
    for &b in name.as_bytes() {
        if is_regular(b) && b != b'#' && (0x21..=0x7E).contains(&b) {
            out.push(b);
        } else {
            out.push(b'#');
            out.push(HEX[(b >> 4) as usize]);
            out.push(HEX[(b & 0x0F) as usize]);
        }
    }
}

/// Literal string form: parens balanced by escaping, control and high bytes
/// as three-digit octal so a following digit cannot extend the escape.
fn write_literal_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'(');
    for &b in bytes {
        match b {
            b'(' => out.extend_from_slice(b"\\("),
            b')' => out.extend_from_slice(b"\\)"),
            b'\\' => out.extend_from_slice(b"\\\\"),
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x20..=0x7E => out.push(b),
            other => {
                out.push(b'\\');
                out.push(b'0' + (other >> 6));
                out.push(b'0' + ((other >> 3) & 7));
                out.push(b'0' + (other & 7));
            }
        }
    }
    out.push(b')');
}

/// Hex string form, uppercase digits.
fn write_hex_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'<');
    for &b in bytes {
        out.push(HEX[(b >> 4) as usize]);
        out.push(HEX[(b & 0x0F) as usize]);
    }
    out.push(b'>');
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

/// Convenience: serialize one object to a fresh buffer without encryption.
pub fn serialize_object(obj: &Object) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ObjectSerializer::new().write_object(&mut out, obj)?;
    Ok(out)
}
