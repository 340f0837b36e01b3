//! The document: one parsed PDF and everything you can do to it.
//!
//! A [`Document`] owns the input bytes, the merged cross-reference state, a
//! resolution cache, optional security-handler state, and a set of staged
//! edits. Objects materialize lazily on first [`Document::resolve`] and are
//! memoized by `(number, generation)`; an in-flight set breaks reference
//! cycles by handing back the symbolic reference instead of recursing.
//!
//! Reading never mutates the input buffer. Saving either rewrites the file
//! from the object graph or appends an incremental-update section, leaving
//! the original bytes untouched.

use crate::config::{LoadOptions, SaveOptions, XrefStyle};
use crate::decoders::FilterRegistry;
use crate::encryption::{CryptProvider, EncryptDict, Permissions, SecurityHandler};
use crate::error::{Error, Result, Warning, WarningKind};
use crate::object::{Dictionary, Name, Object, ObjectRef, Stream};
use crate::objstm::ObjectStream;
use crate::parser::{IndirectPayload, Parser};
use crate::writer::DocumentWriter;
use crate::xref::{locate_startxref, XRefEntry, XRefTable};
use crate::xref_recovery::rebuild_xref;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// How far into the file the `%PDF-` header may be.
const HEADER_WINDOW: usize = 1024;

/// A staged edit, applied at the next save.
#[derive(Debug, Clone)]
enum Staged {
    /// Add or replace the object at this generation
    Put(u16, Object),
    /// Free the slot; the generation freed
    Free(u16),
}

/// A parsed PDF document.
pub struct Document {
    buf: Vec<u8>,
    base: usize,
    version: (u8, u8),
    options: LoadOptions,
    registry: FilterRegistry,
    xref: XRefTable,
    cache: HashMap<ObjectRef, Object>,
    in_flight: HashSet<ObjectRef>,
    container_cache: HashMap<u32, Arc<ObjectStream>>,
    encrypt_dict: Option<EncryptDict>,
    encrypt_ref: Option<ObjectRef>,
    file_id: Vec<u8>,
    security: Option<SecurityHandler>,
    auth_attempted: bool,
    staged: BTreeMap<u32, Staged>,
    next_number: u32,
    warnings: Vec<Warning>,
    rebuild_attempted: bool,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("version", &self.version)
            .field("objects", &self.xref.len())
            .field("encrypted", &self.encrypt_dict.is_some())
            .field("warnings", &self.warnings.len())
            .finish()
    }
}

impl Document {
    /// Open a document from bytes with default (lenient) options.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        Self::from_bytes_with_options(buf, LoadOptions::default())
    }

    /// Open a document from bytes.
    pub fn from_bytes_with_options(buf: Vec<u8>, options: LoadOptions) -> Result<Self> {
        let mut warnings = Vec::new();
        let (base, version) = parse_header(&buf, options.strict, &mut warnings)?;
        let registry = FilterRegistry::with_strictness(options.strict);

        let xref = match locate_startxref(&buf, options.strict, &mut warnings).and_then(|start| {
            XRefTable::load(&buf, base, start, &registry, options.strict, &mut warnings)
        }) {
            Ok(xref) => xref,
            Err(e) if !options.strict => {
                log::warn!("xref unusable ({}); rebuilding from a full scan", e);
                warnings.push(Warning::new(
                    0,
                    WarningKind::MalformedXref,
                    format!("xref unusable: {}", e),
                ));
                rebuild_xref(&buf, base, &mut warnings)?
            }
            Err(e) => return Err(e),
        };

        let next_number = xref.max_object_number() + 1;
        let mut document = Self {
            buf,
            base,
            version,
            options,
            registry,
            xref,
            cache: HashMap::new(),
            in_flight: HashSet::new(),
            container_cache: HashMap::new(),
            encrypt_dict: None,
            encrypt_ref: None,
            file_id: Vec::new(),
            security: None,
            auth_attempted: false,
            staged: BTreeMap::new(),
            next_number,
            warnings,
            rebuild_attempted: false,
        };
        document.init_encryption()?;
        Ok(document)
    }

    /// Read the trailer's Encrypt entry, if any, and parse it. The Encrypt
    /// dictionary and the trailer ID are themselves never encrypted.
    fn init_encryption(&mut self) -> Result<()> {
        let Some(encrypt) = self.xref.trailer().get(b"Encrypt").cloned() else {
            return Ok(());
        };

        self.file_id = self
            .xref
            .trailer()
            .get(b"ID")
            .and_then(|o| o.as_array())
            .and_then(|ids| ids.first())
            .and_then(|o| o.as_string_bytes())
            .map(|s| s.to_vec())
            .unwrap_or_default();

        let dict = match encrypt {
            Object::Dictionary(dict) => dict,
            Object::Reference(r) => {
                self.encrypt_ref = Some(r);
                match self.load_reference(r)? {
                    Object::Dictionary(dict) => dict,
                    other => {
                        return Err(Error::UnsupportedEncryption(format!(
                            "Encrypt resolves to a {}",
                            other.type_name()
                        )));
                    }
                }
            }
            other => {
                return Err(Error::UnsupportedEncryption(format!(
                    "Encrypt entry is a {}",
                    other.type_name()
                )));
            }
        };

        self.encrypt_dict = Some(EncryptDict::from_dict(&dict)?);
        Ok(())
    }

    /// Attach the cipher primitives used for decryption and encryption.
    pub fn set_crypt_provider(&mut self, provider: Arc<dyn CryptProvider>) {
        if let Some(dict) = &self.encrypt_dict {
            self.security = Some(SecurityHandler::new(
                dict.clone(),
                self.file_id.clone(),
                provider,
            ));
        }
    }

    /// Whether the document carries an Encrypt dictionary.
    pub fn is_encrypted(&self) -> bool {
        self.encrypt_dict.is_some()
    }

    /// Apply a password, user or owner. Returns whether it matched. For an
    /// unencrypted document every password vacuously succeeds.
    pub fn authenticate(&mut self, password: &[u8]) -> Result<bool> {
        if self.encrypt_dict.is_none() {
            return Ok(true);
        }
        let handler = self.security.as_mut().ok_or(Error::CryptProviderMissing)?;
        self.auth_attempted = true;
        Ok(handler.authenticate(password))
    }

    /// Access-level flags from the P entry, once encrypted state is known.
    pub fn permissions(&self) -> Option<Permissions> {
        self.encrypt_dict
            .as_ref()
            .map(|d| Permissions::from_p_value(d.permissions))
    }

    /// The effective trailer dictionary.
    pub fn trailer(&self) -> &Dictionary {
        self.xref.trailer()
    }

    /// Header version digits.
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Recoveries applied so far.
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Snapshot iteration over the effective xref entries.
    pub fn xref_entries(&self) -> Vec<(u32, XRefEntry)> {
        self.xref.entries().collect()
    }

    /// The merged cross-reference state.
    pub fn xref(&self) -> &XRefTable {
        &self.xref
    }

    /// Resolve a reference to its object. Free entries resolve to Null. The
    /// result is memoized; re-entrant resolution (a cycle) yields the
    /// symbolic reference unchanged.
    pub fn resolve(&mut self, reference: ObjectRef) -> Result<Object> {
        // Staged edits shadow the file
        match self.staged.get(&reference.number) {
            Some(Staged::Put(generation, obj)) if *generation == reference.generation => {
                return Ok(obj.clone());
            }
            Some(Staged::Free(_)) => return Ok(Object::Null),
            _ => {}
        }

        self.check_access()?;

        if let Some(cached) = self.cache.get(&reference) {
            return Ok(cached.clone());
        }
        if self.in_flight.contains(&reference) {
            return Ok(Object::Reference(reference));
        }

        let entry = match self.xref.get(reference.number) {
            Some(entry) => *entry,
            None => return Err(Error::UnknownObject(reference)),
        };
        if entry.is_free() {
            return Ok(Object::Null);
        }

        self.in_flight.insert(reference);
        let loaded = self.load_entry(reference, entry);
        self.in_flight.remove(&reference);

        let object = match loaded {
            Ok(object) => object,
            Err(e) if !self.options.strict && !self.rebuild_attempted => {
                // A bad offset usually means the whole table is shifted;
                // rebuild once from a full scan and retry.
                log::warn!("resolve of {} failed ({}); rebuilding xref", reference, e);
                self.warnings.push(Warning::new(
                    0,
                    WarningKind::MalformedXref,
                    format!("resolve of {} failed: {}; xref rebuilt", reference, e),
                ));
                self.rebuild_attempted = true;
                let mut warnings = std::mem::take(&mut self.warnings);
                let rebuilt = rebuild_xref(&self.buf, self.base, &mut warnings);
                self.warnings = warnings;
                self.xref = rebuilt?;
                self.cache.clear();
                self.container_cache.clear();
                return self.resolve(reference);
            }
            Err(e) => return Err(e),
        };

        self.cache.insert(reference, object.clone());
        Ok(object)
    }

    /// Chase `obj` through at most one level of indirection.
    pub fn resolved(&mut self, obj: &Object) -> Result<Object> {
        match obj {
            Object::Reference(r) => self.resolve(*r),
            other => Ok(other.clone()),
        }
    }

    /// Fully decoded payload of the stream object behind `reference`.
    pub fn stream_data(&mut self, reference: ObjectRef) -> Result<Vec<u8>> {
        let object = self.resolve(reference)?;
        let Object::Stream(stream) = object else {
            return Err(Error::MalformedStream {
                offset: 0,
                reason: format!("{} is a {}, not a stream", reference, object.type_name()),
            });
        };
        self.decode_stream(&stream)
    }

    /// Apply a stream's filter chain, resolving indirect filter entries.
    pub fn decode_stream(&mut self, stream: &Stream) -> Result<Vec<u8>> {
        let names = match stream.dict.get(b"Filter") {
            Some(Object::Reference(r)) => match self.resolve(*r)? {
                Object::Name(n) => vec![n],
                Object::Array(items) => items
                    .iter()
                    .filter_map(|o| o.as_name().cloned())
                    .collect(),
                _ => Vec::new(),
            },
            _ => stream.filter_names(),
        };
        let mut chain = Vec::with_capacity(names.len());
        for (i, name) in names.into_iter().enumerate() {
            let parms = match stream.decode_parms(i) {
                Some(dict) => Some(dict.clone()),
                None => match stream.dict.get(b"DecodeParms") {
                    Some(Object::Reference(r)) if i == 0 => {
                        self.resolve(*r)?.as_dict().cloned()
                    }
                    _ => None,
                },
            };
            chain.push((name, parms));
        }
        self.registry.decode_chain(&stream.data, &chain)
    }

    /// Stage a new object; the returned reference is valid immediately.
    pub fn add_object(&mut self, object: Object) -> ObjectRef {
        let reference = ObjectRef::new(self.next_number, 0);
        self.next_number += 1;
        self.staged
            .insert(reference.number, Staged::Put(reference.generation, object));
        reference
    }

    /// Stage a replacement for an existing object.
    pub fn replace_object(&mut self, reference: ObjectRef, object: Object) {
        self.next_number = self.next_number.max(reference.number + 1);
        self.staged
            .insert(reference.number, Staged::Put(reference.generation, object));
    }

    /// Stage freeing an object slot.
    pub fn free_object(&mut self, reference: ObjectRef) {
        self.staged
            .insert(reference.number, Staged::Free(reference.generation));
    }

    /// Serialize to a fresh byte buffer.
    pub fn save(&mut self, options: SaveOptions) -> Result<Vec<u8>> {
        let style = match options.xref_style {
            XrefStyle::Auto => {
                if self.xref.used_stream_xref {
                    XrefStyle::Stream
                } else {
                    XrefStyle::Classical
                }
            }
            other => other,
        };
        if options.incremental {
            self.save_incremental(style)
        } else {
            self.save_full(style)
        }
    }

    // ------------------------------------------------------------------
    // Loading internals
    // ------------------------------------------------------------------

    /// Encrypted documents refuse resolution until a password succeeds.
    fn check_access(&self) -> Result<()> {
        if self.encrypt_dict.is_none() {
            return Ok(());
        }
        match &self.security {
            None => Err(Error::CryptProviderMissing),
            Some(handler) if handler.is_authenticated() => Ok(()),
            Some(_) if self.auth_attempted => Err(Error::BadPassword),
            Some(_) => Err(Error::EncryptionRequired),
        }
    }

    fn load_entry(&mut self, reference: ObjectRef, entry: XRefEntry) -> Result<Object> {
        match entry {
            XRefEntry::Free { .. } => Ok(Object::Null),
            XRefEntry::InUse { offset, generation } => {
                if generation != reference.generation {
                    return Err(Error::UnknownObject(reference));
                }
                let mut object = self.load_at_offset(reference, offset)?;
                self.decrypt_loaded(reference, &mut object)?;
                Ok(object)
            }
            XRefEntry::Compressed { container, index } => {
                self.load_compressed(reference, container, index)
            }
        }
    }

    /// Load a top-level `N G obj` definition, resolving an indirect stream
    /// Length through the document when needed.
    fn load_at_offset(&mut self, expected: ObjectRef, offset: u64) -> Result<Object> {
        let absolute = self
            .base
            .checked_add(offset as usize)
            .filter(|&p| p < self.buf.len())
            .ok_or(Error::MalformedXref {
                offset,
                reason: format!("offset of {} is outside the file", expected),
            })?;

        // Phase 1: header and body up to any stream payload
        let (found, payload, warnings) = {
            let mut parser = Parser::new_at(&self.buf, absolute, self.options.strict);
            let (found, payload) = parser.parse_indirect()?;
            (found, payload, parser.take_warnings())
        };
        self.warnings.extend(warnings);

        if found != expected {
            return Err(Error::WrongObjectHeader {
                offset,
                expected,
                found,
            });
        }

        let (dict, data_start) = match payload {
            IndirectPayload::Object(object) => return Ok(object),
            IndirectPayload::PendingStream { dict, data_start } => (dict, data_start),
        };

        // Phase 2: figure out Length, possibly through another object
        let length = match dict.get(b"Length") {
            Some(Object::Integer(len)) => usize::try_from(*len).ok(),
            Some(Object::Reference(length_ref)) => self.resolve_length(*length_ref)?,
            _ => None,
        };

        // Phase 3: pull the payload bytes
        let (data, warnings) = {
            let mut parser = Parser::new_at(&self.buf, data_start, self.options.strict);
            let (data, _) = parser.read_stream_payload(data_start, length)?;
            (data, parser.take_warnings())
        };
        self.warnings.extend(warnings);

        Ok(Object::Stream(Stream::new(dict, data)))
    }

    /// Resolve an indirect Length. A cycle back into the stream being loaded
    /// shows up as the in-flight placeholder and is a hard error.
    fn resolve_length(&mut self, length_ref: ObjectRef) -> Result<Option<usize>> {
        match self.resolve(length_ref) {
            Ok(Object::Integer(len)) => Ok(usize::try_from(len).ok()),
            Ok(Object::Reference(_)) => Err(Error::CircularReference(length_ref)),
            Ok(other) => {
                log::warn!(
                    "Length {} resolves to a {}; scanning for endstream",
                    length_ref,
                    other.type_name()
                );
                Ok(None)
            }
            Err(Error::CircularReference(r)) => Err(Error::CircularReference(r)),
            Err(e) if !self.options.strict => {
                log::warn!("Length {} unresolvable ({}); scanning for endstream", length_ref, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Load an object stored in an object stream (xref type 2).
    fn load_compressed(
        &mut self,
        reference: ObjectRef,
        container: u32,
        index: u32,
    ) -> Result<Object> {
        if reference.generation != 0 {
            return Err(Error::UnknownObject(reference));
        }
        if container == reference.number {
            return Err(Error::CircularReference(reference));
        }

        let stream = match self.container_cache.get(&container) {
            Some(stream) => Arc::clone(stream),
            None => {
                let container_ref = ObjectRef::new(container, 0);
                let object = self.resolve(container_ref)?;
                let Object::Stream(stream) = object else {
                    return Err(Error::MalformedStream {
                        offset: 0,
                        reason: format!(
                            "object stream container {} is a {}",
                            container_ref,
                            object.type_name()
                        ),
                    });
                };
                let decoded = self.decode_stream(&stream)?;
                let parsed = Arc::new(ObjectStream::parse(&stream.dict, decoded)?);
                self.container_cache.insert(container, Arc::clone(&parsed));
                parsed
            }
        };

        let (found, object) = stream.object_at(index)?;
        if found.number != reference.number {
            let warning = Warning::new(
                0,
                WarningKind::MalformedStream,
                format!(
                    "object stream {} slot {} holds {}, expected {}; matched by number",
                    container, index, found, reference
                ),
            );
            if self.options.strict {
                return Err(Error::WrongObjectHeader {
                    offset: 0,
                    expected: reference,
                    found,
                });
            }
            log::warn!("{}", warning);
            self.warnings.push(warning);
            let (_, object) = stream.object_by_number(reference.number)?;
            return Ok(object);
        }
        // Contents of the container were decrypted as a whole; no per-object
        // pass here.
        Ok(object)
    }

    /// Internal raw load without the access gate, used for the Encrypt
    /// dictionary before any password exists. Not cached.
    fn load_reference(&mut self, reference: ObjectRef) -> Result<Object> {
        let entry = *self
            .xref
            .get(reference.number)
            .ok_or(Error::UnknownObject(reference))?;
        match entry {
            XRefEntry::InUse { offset, .. } => self.load_at_offset(reference, offset),
            XRefEntry::Free { .. } => Ok(Object::Null),
            XRefEntry::Compressed { container, index } => {
                // Containers of the Encrypt dict would themselves need
                // decryption; the format forbids this arrangement.
                let _ = (container, index);
                Err(Error::UnsupportedEncryption(
                    "Encrypt dictionary stored in an object stream".to_string(),
                ))
            }
        }
    }

    /// Walk a freshly loaded object, decrypting strings and stream payloads
    /// in place.
    fn decrypt_loaded(&mut self, reference: ObjectRef, object: &mut Object) -> Result<()> {
        if Some(reference) == self.encrypt_ref {
            return Ok(());
        }
        let Some(handler) = &self.security else {
            return Ok(());
        };
        if !handler.is_authenticated() {
            return Ok(());
        }
        decrypt_tree(handler, reference, object)
    }

    // ------------------------------------------------------------------
    // Saving internals
    // ------------------------------------------------------------------

    /// Objects that only exist to carry the xref machinery and must not be
    /// re-emitted as ordinary objects on a full rewrite.
    fn is_structural(object: &Object) -> bool {
        let Object::Stream(stream) = object else {
            return false;
        };
        matches!(
            stream.dict.get(b"Type").and_then(|o| o.as_name()).map(Name::as_bytes),
            Some(b"XRef") | Some(b"ObjStm")
        )
    }

    fn save_trailer_base(&self) -> Dictionary {
        let mut trailer = Dictionary::new();
        let source = self.xref.trailer();
        for key in [&b"Root"[..], b"Info", b"ID", b"Encrypt"] {
            if let Some(value) = source.get(key) {
                trailer.insert(Name::from(key), value.clone());
            }
        }
        trailer
    }

    fn encryption_for_write(&self) -> Result<Option<(&SecurityHandler, Option<ObjectRef>)>> {
        if self.encrypt_dict.is_none() {
            return Ok(None);
        }
        match &self.security {
            Some(handler) if handler.is_authenticated() => {
                Ok(Some((handler, self.encrypt_ref)))
            }
            Some(_) => Err(Error::EncryptionRequired),
            None => Err(Error::CryptProviderMissing),
        }
    }

    fn save_full(&mut self, style: XrefStyle) -> Result<Vec<u8>> {
        // Materialize every live object first; resolution may still mutate
        // caches and warnings.
        let mut objects: BTreeMap<u32, (u16, Object)> = BTreeMap::new();
        let mut freed: Vec<(u32, u16)> = Vec::new();

        let entries: Vec<(u32, XRefEntry)> = self.xref.entries().collect();
        for (number, entry) in entries {
            if number == 0 || self.staged.contains_key(&number) {
                continue;
            }
            let generation = match entry {
                XRefEntry::Free { .. } => continue,
                XRefEntry::InUse { generation, .. } => generation,
                XRefEntry::Compressed { .. } => 0,
            };
            let reference = ObjectRef::new(number, generation);
            match self.resolve(reference) {
                Ok(object) => {
                    if Self::is_structural(&object) {
                        continue;
                    }
                    objects.insert(number, (generation, object));
                }
                Err(e) if !self.options.strict => {
                    log::warn!("dropping unreadable object {}: {}", reference, e);
                    self.warnings.push(Warning::new(
                        0,
                        WarningKind::MalformedXref,
                        format!("object {} dropped from rewrite: {}", reference, e),
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        for (&number, staged) in &self.staged {
            match staged {
                Staged::Put(generation, object) => {
                    objects.insert(number, (*generation, object.clone()));
                }
                Staged::Free(generation) => {
                    objects.remove(&number);
                    freed.push((number, *generation));
                }
            }
        }

        let crypt = self.encryption_for_write()?;
        let mut writer = match crypt {
            Some((handler, exempt)) => DocumentWriter::with_encryption(handler, exempt),
            None => DocumentWriter::new(),
        };
        writer.write_header(self.version);

        let mut entries: BTreeMap<u32, XRefEntry> = BTreeMap::new();
        for (&number, (generation, object)) in &objects {
            let offset = writer.write_object(ObjectRef::new(number, *generation), object)?;
            entries.insert(
                number,
                XRefEntry::InUse {
                    offset,
                    generation: *generation,
                },
            );
        }

        // Free list: head at object 0, freed slots chained through it with
        // bumped generations.
        freed.sort_unstable();
        let mut next_free = 0u32;
        for &(number, generation) in freed.iter().rev() {
            entries.insert(
                number,
                XRefEntry::Free {
                    next_free,
                    next_generation: generation.saturating_add(1),
                },
            );
            next_free = number;
        }
        entries.insert(
            0,
            XRefEntry::Free {
                next_free,
                next_generation: 65535,
            },
        );

        let mut trailer = self.save_trailer_base();
        match style {
            XrefStyle::Classical | XrefStyle::Auto => {
                let size = entries.keys().next_back().copied().unwrap_or(0) as i64 + 1;
                trailer.insert("Size", Object::Integer(size));
                let startxref = writer.write_classical_xref(&entries)?;
                writer.write_trailer(&trailer, startxref)?;
            }
            XrefStyle::Stream => {
                let xref_number = entries.keys().next_back().copied().unwrap_or(0) + 1;
                let startxref =
                    writer.write_xref_stream(ObjectRef::new(xref_number, 0), &entries, &trailer)?;
                writer.write_startxref(startxref);
            }
        }

        Ok(writer.into_bytes())
    }

    fn save_incremental(&mut self, style: XrefStyle) -> Result<Vec<u8>> {
        let xref_number = self.next_number;
        if matches!(style, XrefStyle::Stream) {
            self.next_number += 1;
        }
        let crypt = self.encryption_for_write()?;
        let mut writer = match crypt {
            Some((handler, exempt)) => DocumentWriter::with_encryption(handler, exempt),
            None => DocumentWriter::new(),
        };
        writer.append_raw(&self.buf);
        if !self.buf.ends_with(b"\n") && !self.buf.ends_with(b"\r") {
            writer.append_raw(b"\n");
        }

        let mut entries: BTreeMap<u32, XRefEntry> = BTreeMap::new();
        let staged: Vec<(u32, Staged)> = self
            .staged
            .iter()
            .map(|(&n, s)| (n, s.clone()))
            .collect();
        for (number, staged) in staged {
            match staged {
                Staged::Put(generation, object) => {
                    let offset = writer.write_object(ObjectRef::new(number, generation), &object)?
                        - self.base as u64;
                    entries.insert(number, XRefEntry::InUse { offset, generation });
                }
                Staged::Free(generation) => {
                    entries.insert(
                        number,
                        XRefEntry::Free {
                            next_free: 0,
                            next_generation: generation.saturating_add(1),
                        },
                    );
                }
            }
        }

        let mut trailer = self.save_trailer_base();
        let size = self
            .xref
            .trailer()
            .get(b"Size")
            .and_then(|o| o.as_integer())
            .unwrap_or(0)
            .max(entries.keys().next_back().copied().unwrap_or(0) as i64 + 1)
            .max(self.xref.max_object_number() as i64 + 1);
        trailer.insert("Prev", Object::Integer(self.xref.start_offset as i64));

        match style {
            XrefStyle::Classical | XrefStyle::Auto => {
                trailer.insert("Size", Object::Integer(size));
                let startxref = writer.write_classical_xref(&entries)? - self.base as u64;
                writer.write_trailer(&trailer, startxref)?;
            }
            XrefStyle::Stream => {
                trailer.insert("Size", Object::Integer(size.max(xref_number as i64 + 1)));
                let startxref = writer.write_xref_stream(
                    ObjectRef::new(xref_number, 0),
                    &entries,
                    &trailer,
                )? - self.base as u64;
                writer.write_startxref(startxref);
            }
        }

        Ok(writer.into_bytes())
    }
}

/// Find `%PDF-x.y` within the first kilobyte.
fn parse_header(
    buf: &[u8],
    strict: bool,
    warnings: &mut Vec<Warning>,
) -> Result<(usize, (u8, u8))> {
    let window = &buf[..buf.len().min(HEADER_WINDOW)];
    let marker = b"%PDF-";
    let base = window
        .windows(marker.len())
        .position(|w| w == marker)
        .ok_or(Error::MalformedHeader)?;

    let digits = &buf[base + marker.len()..];
    let version = match (digits.first(), digits.get(1), digits.get(2)) {
        (Some(major @ b'0'..=b'9'), Some(b'.'), Some(minor @ b'0'..=b'9')) => {
            (major - b'0', minor - b'0')
        }
        _ => return Err(Error::MalformedHeader),
    };

    if base != 0 {
        let warning = Warning::new(
            0,
            WarningKind::MalformedHeader,
            format!("{} bytes precede the PDF header", base),
        );
        if strict {
            return Err(Error::MalformedHeader);
        }
        log::warn!("{}", warning);
        warnings.push(warning);
    }

    Ok((base, version))
}

/// Recursively decrypt strings and stream payloads in place.
fn decrypt_tree(
    handler: &SecurityHandler,
    reference: ObjectRef,
    object: &mut Object,
) -> Result<()> {
    match object {
        Object::LiteralString(bytes) | Object::HexString(bytes) => {
            *bytes = handler.decrypt_string(bytes, reference)?;
        }
        Object::Array(items) => {
            for item in items {
                decrypt_tree(handler, reference, item)?;
            }
        }
        Object::Dictionary(dict) => decrypt_dict(handler, reference, dict)?,
        Object::Stream(stream) => {
            decrypt_dict(handler, reference, &mut stream.dict)?;
            if stream_payload_is_exempt(handler, stream) {
                return Ok(());
            }
            let plaintext = handler.decrypt_stream(&stream.data, reference)?;
            stream.data = plaintext.into();
        }
        _ => {}
    }
    Ok(())
}

fn decrypt_dict(
    handler: &SecurityHandler,
    reference: ObjectRef,
    dict: &mut Dictionary,
) -> Result<()> {
    let keys: Vec<Name> = dict.iter().map(|(k, _)| k.clone()).collect();
    for key in keys {
        if let Some(value) = dict.get_mut(key.as_bytes()) {
            decrypt_tree(handler, reference, value)?;
        }
    }
    Ok(())
}

/// Streams excluded from blanket decryption: xref streams were consumed
/// before any key existed, a `Crypt` filter overrides the default cipher
/// (its Identity form means "stored in the clear"), and metadata streams
/// opt out when EncryptMetadata is false.
fn stream_payload_is_exempt(handler: &SecurityHandler, stream: &Stream) -> bool {
    let type_name = stream.dict.get(b"Type").and_then(|o| o.as_name()).map(Name::as_bytes);
    if type_name == Some(b"XRef") {
        return true;
    }
    if type_name == Some(b"Metadata") && !handler.encrypts_metadata() {
        return true;
    }
    stream
        .filter_names()
        .iter()
        .any(|name| name.as_bytes() == b"Crypt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Name;

    /// A five-object document: catalog, page tree, page, font, content.
    fn minimal_pdf(style: XrefStyle) -> Vec<u8> {
        let mut writer = DocumentWriter::new();
        writer.write_header((1, 4));

        let mut catalog = Dictionary::new();
        catalog.insert("Type", Object::Name(Name::from("Catalog")));
        catalog.insert("Pages", Object::Reference(ObjectRef::new(2, 0)));

        let mut pages = Dictionary::new();
        pages.insert("Type", Object::Name(Name::from("Pages")));
        pages.insert("Kids", Object::Array(vec![Object::Reference(ObjectRef::new(3, 0))]));
        pages.insert("Count", Object::Integer(1));

        let mut page = Dictionary::new();
        page.insert("Type", Object::Name(Name::from("Page")));
        page.insert("Parent", Object::Reference(ObjectRef::new(2, 0)));
        page.insert("Contents", Object::Reference(ObjectRef::new(5, 0)));

        let mut font = Dictionary::new();
        font.insert("Type", Object::Name(Name::from("Font")));
        font.insert("Subtype", Object::Name(Name::from("Type1")));
        font.insert("BaseFont", Object::Name(Name::from("Helvetica")));

        let content = Stream::new(Dictionary::new(), &b"BT /F1 12 Tf ET"[..]);

        let mut entries = BTreeMap::new();
        entries.insert(
            0,
            XRefEntry::Free {
                next_free: 0,
                next_generation: 65535,
            },
        );
        for (number, object) in [
            (1u32, Object::Dictionary(catalog)),
            (2, Object::Dictionary(pages)),
            (3, Object::Dictionary(page)),
            (4, Object::Dictionary(font)),
            (5, Object::Stream(content)),
        ] {
            let offset = writer.write_object(ObjectRef::new(number, 0), &object).unwrap();
            entries.insert(number, XRefEntry::InUse { offset, generation: 0 });
        }

        let mut trailer = Dictionary::new();
        trailer.insert("Root", Object::Reference(ObjectRef::new(1, 0)));
        match style {
            XrefStyle::Stream => {
                let startxref = writer
                    .write_xref_stream(ObjectRef::new(6, 0), &entries, &trailer)
                    .unwrap();
                writer.write_startxref(startxref);
            }
            _ => {
                trailer.insert("Size", Object::Integer(6));
                let startxref = writer.write_classical_xref(&entries).unwrap();
                writer.write_trailer(&trailer, startxref).unwrap();
            }
        }
        writer.into_bytes()
    }

    #[test]
    fn test_open_minimal() {
        let mut doc = Document::from_bytes(minimal_pdf(XrefStyle::Classical)).unwrap();
        assert_eq!(doc.version(), (1, 4));
        assert!(!doc.is_encrypted());
        assert!(doc.warnings().is_empty());

        let root = doc.trailer().get(b"Root").and_then(|o| o.as_reference()).unwrap();
        let catalog = doc.resolve(root).unwrap();
        assert_eq!(
            catalog.as_dict().and_then(|d| d.get(b"Type")).and_then(|o| o.as_name()),
            Some(&Name::from("Catalog"))
        );

        let pages_ref = catalog
            .as_dict()
            .and_then(|d| d.get(b"Pages"))
            .and_then(|o| o.as_reference())
            .unwrap();
        let pages = doc.resolve(pages_ref).unwrap();
        assert_eq!(
            pages.as_dict().and_then(|d| d.get(b"Count")).and_then(|o| o.as_integer()),
            Some(1)
        );
    }

    #[test]
    fn test_open_stream_xref() {
        let mut doc = Document::from_bytes(minimal_pdf(XrefStyle::Stream)).unwrap();
        assert!(doc.xref().used_stream_xref);
        let root = doc.trailer().get(b"Root").and_then(|o| o.as_reference()).unwrap();
        assert!(doc.resolve(root).unwrap().as_dict().is_some());
    }

    #[test]
    fn test_resolve_free_is_null() {
        let mut doc = Document::from_bytes(minimal_pdf(XrefStyle::Classical)).unwrap();
        assert!(doc.resolve(ObjectRef::new(0, 65535)).unwrap().is_null());
    }

    #[test]
    fn test_resolve_unknown_object() {
        let mut doc = Document::from_bytes(minimal_pdf(XrefStyle::Classical)).unwrap();
        assert!(matches!(
            doc.resolve(ObjectRef::new(99, 0)),
            Err(Error::UnknownObject(_))
        ));
    }

    #[test]
    fn test_resolution_is_memoized() {
        let mut doc = Document::from_bytes(minimal_pdf(XrefStyle::Classical)).unwrap();
        let r = ObjectRef::new(4, 0);
        let first = doc.resolve(r).unwrap();
        let second = doc.resolve(r).unwrap();
        assert_eq!(first, second);
        assert!(doc.cache.contains_key(&r));
    }

    #[test]
    fn test_cycles_resolve_to_placeholder() {
        // Page /Parent points back at the pages node; chasing both ways
        // terminates because references stay symbolic.
        let mut doc = Document::from_bytes(minimal_pdf(XrefStyle::Classical)).unwrap();
        let page = doc.resolve(ObjectRef::new(3, 0)).unwrap();
        let parent = page
            .as_dict()
            .and_then(|d| d.get(b"Parent"))
            .and_then(|o| o.as_reference())
            .unwrap();
        let pages = doc.resolve(parent).unwrap();
        let kid = pages
            .as_dict()
            .and_then(|d| d.get(b"Kids"))
            .and_then(|o| o.as_array())
            .and_then(|a| a.first().cloned())
            .unwrap();
        assert_eq!(kid.as_reference(), Some(ObjectRef::new(3, 0)));
    }

    #[test]
    fn test_stream_data() {
        let mut doc = Document::from_bytes(minimal_pdf(XrefStyle::Classical)).unwrap();
        assert_eq!(doc.stream_data(ObjectRef::new(5, 0)).unwrap(), b"BT /F1 12 Tf ET");
    }

    #[test]
    fn test_xref_entries_snapshot() {
        let doc = Document::from_bytes(minimal_pdf(XrefStyle::Classical)).unwrap();
        let entries = doc.xref_entries();
        assert_eq!(entries.len(), 6);
        assert!(entries[0].1.is_free());
    }

    #[test]
    fn test_bad_startxref_recovers_with_warning() {
        let original = minimal_pdf(XrefStyle::Classical);
        // Rewrite the startxref value to point 10 bytes past the real table
        let pos = original.windows(9).rposition(|w| w == b"startxref").unwrap();
        let digits_at = pos + 10;
        let digits_end = digits_at
            + original[digits_at..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
        let value: u64 = std::str::from_utf8(&original[digits_at..digits_end])
            .unwrap()
            .parse()
            .unwrap();
        let mut bytes = original[..digits_at].to_vec();
        bytes.extend_from_slice((value + 10).to_string().as_bytes());
        bytes.extend_from_slice(&original[digits_end..]);

        let mut doc = Document::from_bytes(bytes.clone()).unwrap();
        assert!(!doc.warnings().is_empty());
        let root = doc.trailer().get(b"Root").and_then(|o| o.as_reference()).unwrap();
        assert!(doc.resolve(root).unwrap().as_dict().is_some());

        let strict = Document::from_bytes_with_options(bytes, LoadOptions::strict());
        assert!(strict.is_err());
    }

    #[test]
    fn test_leading_junk_before_header() {
        let mut bytes = b"GARBAGE BYTES\n".to_vec();
        bytes.extend_from_slice(&minimal_pdf(XrefStyle::Classical));
        let mut doc = Document::from_bytes(bytes).unwrap();
        assert!(!doc.warnings().is_empty());
        let root = doc.trailer().get(b"Root").and_then(|o| o.as_reference()).unwrap();
        assert!(doc.resolve(root).unwrap().as_dict().is_some());
    }

    #[test]
    fn test_missing_header_fails() {
        assert!(matches!(
            Document::from_bytes(b"not a pdf at all".to_vec()),
            Err(Error::MalformedHeader)
        ));
    }

    #[test]
    fn test_add_and_save_classical_roundtrip() {
        let mut doc = Document::from_bytes(minimal_pdf(XrefStyle::Classical)).unwrap();
        let mut marker = Dictionary::new();
        marker.insert("Type", Object::Name(Name::from("Marker")));
        let new_ref = doc.add_object(Object::Dictionary(marker.clone()));

        let saved = doc.save(SaveOptions::classical()).unwrap();
        let mut reopened = Document::from_bytes(saved).unwrap();
        assert!(reopened.warnings().is_empty());

        let read_back = reopened.resolve(new_ref).unwrap();
        assert_eq!(read_back, Object::Dictionary(marker));

        // All original objects still resolve
        for number in 1..=5 {
            assert!(!reopened.resolve(ObjectRef::new(number, 0)).unwrap().is_null());
        }
    }

    #[test]
    fn test_save_stream_xref_roundtrip() {
        let mut doc = Document::from_bytes(minimal_pdf(XrefStyle::Classical)).unwrap();
        let saved = doc.save(SaveOptions::stream()).unwrap();
        let mut reopened = Document::from_bytes(saved).unwrap();
        assert!(reopened.xref().used_stream_xref);
        let root = reopened
            .trailer()
            .get(b"Root")
            .and_then(|o| o.as_reference())
            .unwrap();
        assert!(reopened.resolve(root).unwrap().as_dict().is_some());
    }

    #[test]
    fn test_save_auto_matches_input() {
        let mut doc = Document::from_bytes(minimal_pdf(XrefStyle::Stream)).unwrap();
        let saved = doc.save(SaveOptions::default()).unwrap();
        let reopened = Document::from_bytes(saved).unwrap();
        assert!(reopened.xref().used_stream_xref);
    }

    #[test]
    fn test_incremental_update_preserves_prior_bytes() {
        let original = minimal_pdf(XrefStyle::Classical);
        let mut doc = Document::from_bytes(original.clone()).unwrap();
        let mut marker = Dictionary::new();
        marker.insert("Kind", Object::Name(Name::from("Appended")));
        let new_ref = doc.add_object(Object::Dictionary(marker));

        let saved = doc.save(SaveOptions::incremental()).unwrap();
        assert_eq!(&saved[..original.len()], &original[..]);

        let mut reopened = Document::from_bytes(saved).unwrap();
        assert!(reopened.resolve(new_ref).unwrap().as_dict().is_some());
        // Prior objects come from the old section through Prev
        assert!(!reopened.resolve(ObjectRef::new(1, 0)).unwrap().is_null());
        assert_eq!(reopened.xref().sections().len(), 2);
    }

    #[test]
    fn test_replace_object_staged_and_saved() {
        let mut doc = Document::from_bytes(minimal_pdf(XrefStyle::Classical)).unwrap();
        doc.replace_object(ObjectRef::new(4, 0), Object::Integer(777));
        assert_eq!(doc.resolve(ObjectRef::new(4, 0)).unwrap(), Object::Integer(777));

        let saved = doc.save(SaveOptions::classical()).unwrap();
        let mut reopened = Document::from_bytes(saved).unwrap();
        assert_eq!(reopened.resolve(ObjectRef::new(4, 0)).unwrap(), Object::Integer(777));
    }

    #[test]
    fn test_free_object_chains_free_list() {
        let mut doc = Document::from_bytes(minimal_pdf(XrefStyle::Classical)).unwrap();
        doc.free_object(ObjectRef::new(4, 0));
        assert!(doc.resolve(ObjectRef::new(4, 0)).unwrap().is_null());

        let saved = doc.save(SaveOptions::classical()).unwrap();
        let mut reopened = Document::from_bytes(saved).unwrap();
        assert!(reopened.resolve(ObjectRef::new(4, 0)).unwrap().is_null());
        match reopened.xref().get(0) {
            Some(XRefEntry::Free { next_free, .. }) => assert_eq!(*next_free, 4),
            other => panic!("unexpected head entry {:?}", other),
        }
        match reopened.xref().get(4) {
            Some(XRefEntry::Free { next_generation, .. }) => assert_eq!(*next_generation, 1),
            other => panic!("unexpected freed entry {:?}", other),
        }
    }

    #[test]
    fn test_save_is_deterministic() {
        let bytes = minimal_pdf(XrefStyle::Classical);
        let save = |bytes: Vec<u8>| {
            let mut doc = Document::from_bytes(bytes).unwrap();
            doc.save(SaveOptions::classical()).unwrap()
        };
        assert_eq!(save(bytes.clone()), save(bytes));
    }

    /// Handcraft a file so the stream's Length can stay an indirect
    /// reference (the writer would rewrite it to a direct value).
    fn pdf_with_length(length_value: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"%PDF-1.4\n");
        let o1 = buf.len();
        buf.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
        let o2 = buf.len();
        buf.extend_from_slice(
            format!(
                "2 0 obj\n<< /Length {} >>\nstream\npayload\nendstream\nendobj\n",
                length_value
            )
            .as_bytes(),
        );
        let o3 = buf.len();
        buf.extend_from_slice(b"3 0 obj\n7\nendobj\n");
        let xref = buf.len();
        buf.extend_from_slice(
            format!(
                "xref\n0 4\n0000000000 65535 f \n{:010} 00000 n \n{:010} 00000 n \n{:010} 00000 n \ntrailer\n<< /Size 4 /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
                o1, o2, o3, xref
            )
            .as_bytes(),
        );
        buf
    }

    #[test]
    fn test_indirect_length_resolution() {
        let mut doc = Document::from_bytes(pdf_with_length("3 0 R")).unwrap();
        assert_eq!(doc.stream_data(ObjectRef::new(2, 0)).unwrap(), b"payload");
        assert!(doc.warnings().is_empty());
    }

    #[test]
    fn test_circular_length_detected() {
        // Length points at the stream object itself
        let mut doc = Document::from_bytes_with_options(
            pdf_with_length("2 0 R"),
            LoadOptions::strict(),
        )
        .unwrap();
        assert!(matches!(
            doc.resolve(ObjectRef::new(2, 0)),
            Err(Error::CircularReference(_))
        ));
    }

    #[test]
    fn test_wrong_length_falls_back_to_scan() {
        let mut doc = Document::from_bytes(pdf_with_length("9999")).unwrap();
        assert_eq!(doc.stream_data(ObjectRef::new(2, 0)).unwrap(), b"payload");
        assert!(!doc.warnings().is_empty());
    }
}
