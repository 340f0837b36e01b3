//! Whole-file emission: header, objects, xref, trailer.
//!
//! [`DocumentWriter`] is a stateful byte buffer with a position counter.
//! Object offsets are recorded as they are written and fed back into
//! whichever xref form the save selected. Output is deterministic for a
//! given object set and ordering.

use crate::decoders::{Codec, FlateCodec};
use crate::encryption::SecurityHandler;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Name, Object, ObjectRef, Stream};
use crate::writer::serializer::ObjectSerializer;
use crate::xref::XRefEntry;
use std::collections::BTreeMap;

/// Stateful writer producing a complete PDF byte buffer.
pub struct DocumentWriter<'a> {
    out: Vec<u8>,
    crypt: Option<&'a SecurityHandler>,
    /// The object holding the Encrypt dictionary is written in the clear
    crypt_exempt: Option<ObjectRef>,
}

impl<'a> DocumentWriter<'a> {
    /// Writer without encryption.
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            crypt: None,
            crypt_exempt: None,
        }
    }

    /// Writer that encrypts strings and stream payloads, except in the
    /// `exempt` object (the Encrypt dictionary itself).
    pub fn with_encryption(handler: &'a SecurityHandler, exempt: Option<ObjectRef>) -> Self {
        Self {
            out: Vec::new(),
            crypt: Some(handler),
            crypt_exempt: exempt,
        }
    }

    /// Bytes written so far.
    pub fn position(&self) -> u64 {
        self.out.len() as u64
    }

    /// Append raw bytes verbatim (the incremental-update prefix).
    pub fn append_raw(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    /// `%PDF-x.y` plus the high-bit binary marker comment.
    pub fn write_header(&mut self, version: (u8, u8)) {
        self.out
            .extend_from_slice(format!("%PDF-{}.{}\n", version.0, version.1).as_bytes());
        self.out.extend_from_slice(b"%\xE2\xE3\xCF\xD3\n");
    }

    /// Write one indirect object; returns the offset of its header.
    pub fn write_object(&mut self, reference: ObjectRef, obj: &Object) -> Result<u64> {
        let offset = self.position();
        self.out.extend_from_slice(
            format!("{} {} obj\n", reference.number, reference.generation).as_bytes(),
        );
        let serializer = match self.crypt {
            Some(handler) if Some(reference) != self.crypt_exempt => {
                ObjectSerializer::encrypted(handler, reference)
            }
            _ => ObjectSerializer::new(),
        };
        serializer.write_object(&mut self.out, obj)?;
        self.out.extend_from_slice(b"\nendobj\n");
        Ok(offset)
    }

    /// Classical `xref` table. Returns its starting offset for `startxref`.
    pub fn write_classical_xref(&mut self, entries: &BTreeMap<u32, XRefEntry>) -> Result<u64> {
        let offset = self.position();
        self.out.extend_from_slice(b"xref\n");
        for (first, group) in group_contiguous(entries) {
            self.out
                .extend_from_slice(format!("{} {}\n", first, group.len()).as_bytes());
            for entry in group {
                let line = match entry {
                    XRefEntry::InUse { offset, generation } => {
                        format!("{:010} {:05} n \n", offset, generation)
                    }
                    XRefEntry::Free {
                        next_free,
                        next_generation,
                    } => format!("{:010} {:05} f \n", next_free, next_generation),
                    XRefEntry::Compressed { container, .. } => {
                        return Err(Error::Serialization(format!(
                            "compressed entry (container {}) cannot appear in a classical xref",
                            container
                        )));
                    }
                };
                debug_assert_eq!(line.len(), 20);
                self.out.extend_from_slice(line.as_bytes());
            }
        }
        Ok(offset)
    }

    /// `trailer` dictionary plus `startxref` and `%%EOF`.
    pub fn write_trailer(&mut self, trailer: &Dictionary, startxref: u64) -> Result<()> {
        self.out.extend_from_slice(b"trailer\n");
        ObjectSerializer::new().write_object(&mut self.out, &Object::Dictionary(trailer.clone()))?;
        self.out.push(b'\n');
        self.write_startxref(startxref);
        Ok(())
    }

    /// `startxref` and `%%EOF` alone (xref-stream form has no trailer
    /// keyword).
    pub fn write_startxref(&mut self, startxref: u64) {
        self.out
            .extend_from_slice(format!("startxref\n{}\n%%EOF\n", startxref).as_bytes());
    }

    /// Write the xref as a `/Type /XRef` stream object numbered `reference`.
    ///
    /// `entries` must not yet contain the stream's own entry; it is added at
    /// the current position. The payload is Flate-compressed behind PNG
    /// predictor 12. Returns the offset for `startxref`.
    pub fn write_xref_stream(
        &mut self,
        reference: ObjectRef,
        entries: &BTreeMap<u32, XRefEntry>,
        trailer: &Dictionary,
    ) -> Result<u64> {
        let offset = self.position();
        let mut entries = entries.clone();
        entries.insert(
            reference.number,
            XRefEntry::InUse {
                offset,
                generation: reference.generation,
            },
        );

        // Field widths sized to the largest values present
        let mut max_field2 = 0u64;
        for entry in entries.values() {
            let field2 = match entry {
                XRefEntry::Free { next_free, .. } => u64::from(*next_free),
                XRefEntry::InUse { offset, .. } => *offset,
                XRefEntry::Compressed { container, .. } => u64::from(*container),
            };
            max_field2 = max_field2.max(field2);
        }
        let w2 = byte_width(max_field2);
        let record_len = 1 + w2 + 2;

        let groups = group_contiguous(&entries);
        let mut records = Vec::with_capacity(entries.len() * record_len);
        for (_, group) in &groups {
            for entry in group {
                let (kind, field2, field3) = match entry {
                    XRefEntry::Free {
                        next_free,
                        next_generation,
                    } => (0u8, u64::from(*next_free), *next_generation as u32),
                    XRefEntry::InUse { offset, generation } => {
                        (1, *offset, *generation as u32)
                    }
                    XRefEntry::Compressed { container, index } => {
                        (2, u64::from(*container), *index)
                    }
                };
                records.push(kind);
                records.extend_from_slice(&field2.to_be_bytes()[8 - w2..]);
                records.extend_from_slice(&(field3 as u16).to_be_bytes());
            }
        }

        let mut parms = Dictionary::new();
        parms.insert("Predictor", Object::Integer(12));
        parms.insert("Columns", Object::Integer(record_len as i64));
        let payload = FlateCodec::new(false).encode(&records, Some(&parms))?;

        let size = entries.keys().next_back().copied().unwrap_or(0) as i64 + 1;
        let mut dict = Dictionary::new();
        dict.insert("Type", Object::Name(Name::from("XRef")));
        dict.insert("Size", Object::Integer(size));
        dict.insert(
            "W",
            Object::Array(vec![
                Object::Integer(1),
                Object::Integer(w2 as i64),
                Object::Integer(2),
            ]),
        );
        if !(groups.len() == 1 && groups[0].0 == 0 && groups[0].1.len() as i64 == size) {
            let mut index = Vec::with_capacity(groups.len() * 2);
            for (first, group) in &groups {
                index.push(Object::Integer(*first as i64));
                index.push(Object::Integer(group.len() as i64));
            }
            dict.insert("Index", Object::Array(index));
        }
        dict.insert("Filter", Object::Name(Name::from("FlateDecode")));
        dict.insert("DecodeParms", Object::Dictionary(parms));
        for (key, value) in trailer.iter() {
            if !dict.contains_key(key.as_bytes()) {
                dict.insert(key.clone(), value.clone());
            }
        }

        // The xref stream itself is never encrypted
        let stream = Object::Stream(Stream::new(dict, payload));
        self.out.extend_from_slice(
            format!("{} {} obj\n", reference.number, reference.generation).as_bytes(),
        );
        ObjectSerializer::new().write_object(&mut self.out, &stream)?;
        self.out.extend_from_slice(b"\nendobj\n");
        Ok(offset)
    }

    /// Consume the writer, yielding the finished byte buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }
}

impl Default for DocumentWriter<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Group entries into runs of contiguous object numbers, ascending.
pub fn group_contiguous(entries: &BTreeMap<u32, XRefEntry>) -> Vec<(u32, Vec<XRefEntry>)> {
    let mut groups: Vec<(u32, Vec<XRefEntry>)> = Vec::new();
    for (&number, &entry) in entries {
        match groups.last_mut() {
            Some((first, group)) if *first + group.len() as u32 == number => group.push(entry),
            _ => groups.push((number, vec![entry])),
        }
    }
    groups
}

fn byte_width(value: u64) -> usize {
    let mut width = 1;
    while value >> (width * 8) != 0 {
        width += 1;
    }
    width
}
