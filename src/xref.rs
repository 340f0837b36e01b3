//! Cross-reference discovery, parsing, and merging.
//!
//! The xref maps object numbers to file locations. Three forms exist in the
//! wild and all are handled here:
//!
//! - classical `xref` tables (PDF 1.0+): subsections of 20-byte entries,
//!   terminated by a `trailer` dictionary;
//! - xref streams (PDF 1.5+): an indirect stream object with `/Type /XRef`
//!   whose decoded payload holds fixed-width binary records, the stream
//!   dictionary doubling as the trailer;
//! - hybrid files: a classical section whose trailer points at a supplemental
//!   xref stream through `XRefStm`.
//!
//! Incremental updates chain sections through `Prev`, newest first; the
//! merged view lets the first section that defines an object win.

use crate::decoders::FilterRegistry;
use crate::error::{Error, Result, Warning, WarningKind};
use crate::lexer::Lexer;
use crate::object::{Dictionary, Object, Stream};
use crate::parser::{IndirectPayload, Parser};
use std::collections::{BTreeMap, HashSet};

/// How far back from EOF to look for `startxref`.
const STARTXREF_WINDOW: usize = 1024;

/// Ceiling on subsection entry counts, a memory-exhaustion guard.
const MAX_SUBSECTION_COUNT: i64 = 1 << 23;

/// Ceiling on the `Prev` chain length.
const MAX_SECTIONS: usize = 64;

/// One cross-reference entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XRefEntry {
    /// Object slot is free; `next_free` chains the free list.
    Free {
        /// Next free object number
        next_free: u32,
        /// Generation to use if the slot is reused
        next_generation: u16,
    },
    /// Object stored at a byte offset as `N G obj`.
    InUse {
        /// Offset of the first byte of the header
        offset: u64,
        /// Generation number
        generation: u16,
    },
    /// Object stored inside an object stream (xref-stream type 2).
    Compressed {
        /// Object number of the containing stream
        container: u32,
        /// Index of the object within the stream
        index: u32,
    },
}

impl XRefEntry {
    /// Whether the entry marks a free slot.
    pub fn is_free(&self) -> bool {
        matches!(self, XRefEntry::Free { .. })
    }

    /// Generation number the entry addresses (0 for compressed objects).
    pub fn generation(&self) -> u16 {
        match self {
            XRefEntry::Free { next_generation, .. } => *next_generation,
            XRefEntry::InUse { generation, .. } => *generation,
            XRefEntry::Compressed { .. } => 0,
        }
    }
}

/// One xref section: its entries plus its trailer dictionary.
#[derive(Debug, Clone)]
pub struct XRefSection {
    /// Entries declared by this section
    pub entries: BTreeMap<u32, XRefEntry>,
    /// Trailer dictionary (the stream dictionary for xref streams)
    pub trailer: Dictionary,
    /// Whether the section was stored as an xref stream
    pub is_stream: bool,
}

/// Links a section declares to other sections.
#[derive(Debug, Clone, Copy, Default)]
struct SectionLinks {
    prev: Option<u64>,
    xref_stm: Option<u64>,
}

/// The assembled cross-reference state: all sections newest-first plus the
/// merged view.
#[derive(Debug, Clone)]
pub struct XRefTable {
    sections: Vec<XRefSection>,
    merged: BTreeMap<u32, XRefEntry>,
    /// Offset the newest section was parsed from (the `startxref` target)
    pub start_offset: u64,
    /// Whether the newest section was an xref stream
    pub used_stream_xref: bool,
    /// Whether the table was rebuilt by a full scan
    pub rebuilt: bool,
}

impl XRefTable {
    /// Assemble the table starting from the `startxref` offset, following
    /// `Prev` and `XRefStm` links.
    pub fn load(
        buf: &[u8],
        base: usize,
        start_offset: u64,
        registry: &FilterRegistry,
        strict: bool,
        warnings: &mut Vec<Warning>,
    ) -> Result<Self> {
        let mut sections: Vec<XRefSection> = Vec::new();
        let mut merged: BTreeMap<u32, XRefEntry> = BTreeMap::new();
        let mut seen: HashSet<u64> = HashSet::new();
        let mut next = Some(start_offset);
        let mut used_stream_xref = false;

        while let Some(offset) = next {
            if sections.len() >= MAX_SECTIONS {
                return Err(Error::MalformedXref {
                    offset,
                    reason: format!("more than {} chained sections", MAX_SECTIONS),
                });
            }
            if !seen.insert(offset) {
                let warning = Warning::new(
                    offset,
                    WarningKind::MalformedXref,
                    format!("circular Prev chain re-enters offset {}", offset),
                );
                if strict {
                    return Err(Error::MalformedXref {
                        offset,
                        reason: warning.detail,
                    });
                }
                log::warn!("{}", warning);
                warnings.push(warning);
                break;
            }

            let (section, links) = parse_section(buf, base, offset, registry, strict, warnings)?;
            if sections.is_empty() {
                used_stream_xref = section.is_stream;
            }
            for (&number, &entry) in &section.entries {
                merged.entry(number).or_insert(entry);
            }

            // Hybrid file: the classical section's XRefStm supplements it at
            // the same precedence level, classical entries winning.
            if let Some(stm_offset) = links.xref_stm {
                if seen.insert(stm_offset) {
                    match parse_section(buf, base, stm_offset, registry, strict, warnings) {
                        Ok((stm_section, _)) => {
                            for (&number, &entry) in &stm_section.entries {
                                merged.entry(number).or_insert(entry);
                            }
                            sections.push(section);
                            sections.push(stm_section);
                        }
                        Err(e) => {
                            let warning = Warning::new(
                                stm_offset,
                                WarningKind::MalformedXref,
                                format!("XRefStm at {} unusable: {}", stm_offset, e),
                            );
                            if strict {
                                return Err(e);
                            }
                            log::warn!("{}", warning);
                            warnings.push(warning);
                            sections.push(section);
                        }
                    }
                } else {
                    sections.push(section);
                }
            } else {
                sections.push(section);
            }

            next = links.prev;
        }

        if sections.is_empty() {
            return Err(Error::MalformedXref {
                offset: start_offset,
                reason: "no xref section found".to_string(),
            });
        }

        Ok(Self {
            sections,
            merged,
            start_offset,
            used_stream_xref,
            rebuilt: false,
        })
    }

    /// Build a table from a single already-assembled section (used by the
    /// full-scan recovery path).
    pub fn from_section(section: XRefSection, rebuilt: bool) -> Self {
        let merged = section.entries.clone();
        let used_stream_xref = section.is_stream;
        Self {
            sections: vec![section],
            merged,
            start_offset: 0,
            used_stream_xref,
            rebuilt,
        }
    }

    /// Look up the effective entry for an object number.
    pub fn get(&self, number: u32) -> Option<&XRefEntry> {
        self.merged.get(&number)
    }

    /// Snapshot iteration over the effective entries, ascending by number.
    pub fn entries(&self) -> impl Iterator<Item = (u32, XRefEntry)> + '_ {
        self.merged.iter().map(|(&n, &e)| (n, e))
    }

    /// The effective trailer: the newest section's.
    pub fn trailer(&self) -> &Dictionary {
        &self.sections[0].trailer
    }

    /// All sections, newest first.
    pub fn sections(&self) -> &[XRefSection] {
        &self.sections
    }

    /// Number of effective entries.
    pub fn len(&self) -> usize {
        self.merged.len()
    }

    /// Whether the merged view is empty.
    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    /// Largest known object number.
    pub fn max_object_number(&self) -> u32 {
        self.merged.keys().next_back().copied().unwrap_or(0)
    }
}

/// Locate the `startxref` value by scanning the tail of the buffer.
///
/// Tolerates trailing whitespace and a missing `%%EOF` marker (with a
/// warning). Returns the byte offset the newest xref section claims to live
/// at, relative to the header.
pub fn locate_startxref(buf: &[u8], strict: bool, warnings: &mut Vec<Warning>) -> Result<u64> {
    let tail_start = buf.len().saturating_sub(STARTXREF_WINDOW);
    let tail = &buf[tail_start..];
    let keyword_pos = find_last(tail, b"startxref").ok_or(Error::MalformedXref {
        offset: tail_start as u64,
        reason: "startxref keyword not found in the last 1024 bytes".to_string(),
    })?;

    let mut lexer = Lexer::new_at(buf, tail_start + keyword_pos + b"startxref".len());
    let offset = lexer.read_integer().map_err(|_| Error::MalformedXref {
        offset: (tail_start + keyword_pos) as u64,
        reason: "startxref is not followed by an integer".to_string(),
    })?;
    if offset < 0 {
        return Err(Error::MalformedXref {
            offset: (tail_start + keyword_pos) as u64,
            reason: format!("negative startxref offset {}", offset),
        });
    }

    lexer.skip_whitespace();
    if !lexer.remaining().starts_with(b"%%EOF") {
        let warning = Warning::new(
            lexer.pos() as u64,
            WarningKind::MalformedXref,
            "missing %%EOF marker after startxref".to_string(),
        );
        if strict {
            return Err(Error::MalformedXref {
                offset: lexer.pos() as u64,
                reason: warning.detail,
            });
        }
        log::warn!("{}", warning);
        warnings.push(warning);
    }

    Ok(offset as u64)
}

fn find_last(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).rev().find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Parse the section at `offset`, classical or stream form.
fn parse_section(
    buf: &[u8],
    base: usize,
    offset: u64,
    registry: &FilterRegistry,
    strict: bool,
    warnings: &mut Vec<Warning>,
) -> Result<(XRefSection, SectionLinks)> {
    let absolute = base
        .checked_add(offset as usize)
        .filter(|&p| p < buf.len())
        .ok_or(Error::MalformedXref {
            offset,
            reason: format!("offset {} is outside the file", offset),
        })?;

    let mut lexer = Lexer::new_at(buf, absolute);
    if lexer.match_keyword(b"xref") {
        parse_classical_section(buf, lexer.pos(), offset, strict, warnings)
    } else {
        parse_stream_section(buf, absolute, offset, registry, strict, warnings)
    }
}

/// Classical table: `xref`, subsections of `first count` headers and 20-byte
/// entries, then `trailer` and its dictionary. Short or mangled entry lines
/// are tolerated entry-by-entry in lenient mode.
fn parse_classical_section(
    buf: &[u8],
    after_keyword: usize,
    section_offset: u64,
    strict: bool,
    warnings: &mut Vec<Warning>,
) -> Result<(XRefSection, SectionLinks)> {
    let mut lexer = Lexer::new_at(buf, after_keyword);
    let mut entries = BTreeMap::new();

    loop {
        if lexer.match_keyword(b"trailer") {
            break;
        }
        lexer.skip_ws_and_comments();
        if lexer.at_end() {
            return Err(Error::MalformedXref {
                offset: section_offset,
                reason: "section ended without a trailer".to_string(),
            });
        }

        let header_offset = lexer.pos();
        let first = lexer.read_integer().map_err(|_| Error::MalformedXref {
            offset: header_offset as u64,
            reason: "subsection header is not `first count`".to_string(),
        })?;
        let count = lexer.read_integer().map_err(|_| Error::MalformedXref {
            offset: header_offset as u64,
            reason: "subsection header is not `first count`".to_string(),
        })?;
        if first < 0 || count < 0 || count > MAX_SUBSECTION_COUNT {
            return Err(Error::MalformedXref {
                offset: header_offset as u64,
                reason: format!("unreasonable subsection header {} {}", first, count),
            });
        }

        for i in 0..count as u32 {
            let number = first as u32 + i;
            let entry_offset = lexer.pos();
            match parse_classical_entry(&mut lexer) {
                Ok(entry) => {
                    entries.insert(number, entry);
                }
                Err(e) => {
                    let warning = Warning::new(
                        entry_offset as u64,
                        WarningKind::MalformedXref,
                        format!("bad xref entry for object {}: {}; marked free", number, e),
                    );
                    if strict {
                        return Err(Error::MalformedXref {
                            offset: entry_offset as u64,
                            reason: warning.detail,
                        });
                    }
                    log::warn!("{}", warning);
                    warnings.push(warning);
                    // Placeholder keeps subsequent numbering aligned
                    entries.insert(
                        number,
                        XRefEntry::Free {
                            next_free: 0,
                            next_generation: 65535,
                        },
                    );
                    lexer.read_line();
                }
            }
        }
    }

    let mut parser = Parser::new_at(buf, lexer.pos(), strict);
    let trailer = match parser.parse_object()? {
        Object::Dictionary(dict) => dict,
        other => {
            return Err(Error::MalformedXref {
                offset: lexer.pos() as u64,
                reason: format!("trailer is a {}, not a dictionary", other.type_name()),
            });
        }
    };
    warnings.extend(parser.take_warnings());

    let links = section_links(&trailer);
    Ok((
        XRefSection {
            entries,
            trailer,
            is_stream: false,
        },
        links,
    ))
}

/// One `oooooooooo ggggg n|f` entry, whitespace-tolerant.
fn parse_classical_entry(lexer: &mut Lexer<'_>) -> Result<XRefEntry> {
    let offset = lexer.read_integer()?;
    let generation = lexer.read_integer()?;
    if offset < 0 || !(0..=65535).contains(&generation) {
        return Err(Error::MalformedToken {
            offset: lexer.pos(),
            expected: "entry offset and generation in range",
        });
    }
    lexer.skip_whitespace();
    let kind = lexer.peek_byte().ok_or(Error::MalformedToken {
        offset: lexer.pos(),
        expected: "entry type flag",
    })?;
    match kind {
        b'n' | b'N' => {
            lexer.advance(1);
            Ok(XRefEntry::InUse {
                offset: offset as u64,
                generation: generation as u16,
            })
        }
        b'f' | b'F' => {
            lexer.advance(1);
            Ok(XRefEntry::Free {
                next_free: offset as u32,
                next_generation: generation as u16,
            })
        }
        _ => Err(Error::MalformedToken {
            offset: lexer.pos(),
            expected: "n or f",
        }),
    }
}

/// Xref stream: an indirect `/Type /XRef` stream whose decoded payload holds
/// `sum(W)`-byte big-endian records.
fn parse_stream_section(
    buf: &[u8],
    absolute: usize,
    section_offset: u64,
    registry: &FilterRegistry,
    strict: bool,
    warnings: &mut Vec<Warning>,
) -> Result<(XRefSection, SectionLinks)> {
    let mut parser = Parser::new_at(buf, absolute, strict);
    let parsed = parser.parse_indirect().map_err(|e| Error::MalformedXref {
        offset: section_offset,
        reason: format!("neither an xref keyword nor an indirect object: {}", e),
    })?;
    let (_, payload) = parsed;
    let IndirectPayload::PendingStream { dict, data_start } = payload else {
        return Err(Error::MalformedXref {
            offset: section_offset,
            reason: "indirect object at xref offset is not a stream".to_string(),
        });
    };

    // Length must be direct here; xref streams precede any resolution
    // machinery. An indirect Length falls back to the endstream scan.
    let length = dict
        .get(b"Length")
        .and_then(|o| o.as_integer())
        .and_then(|len| usize::try_from(len).ok());
    let (data, _) = parser.read_stream_payload(data_start, length)?;
    warnings.extend(parser.take_warnings());
    let stream = Stream::new(dict, data);

    match stream.dict.get(b"Type").and_then(|o| o.as_name()) {
        Some(name) if name.as_bytes() == b"XRef" => {}
        Some(other) => {
            return Err(Error::MalformedXref {
                offset: section_offset,
                reason: format!("stream at xref offset has /Type /{}", other),
            });
        }
        None => {
            let warning = Warning::new(
                section_offset,
                WarningKind::MalformedXref,
                "xref stream is missing /Type /XRef".to_string(),
            );
            if strict {
                return Err(Error::MalformedXref {
                    offset: section_offset,
                    reason: warning.detail,
                });
            }
            log::warn!("{}", warning);
            warnings.push(warning);
        }
    }

    let chain: Vec<_> = stream
        .filter_names()
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name, stream.decode_parms(i).cloned()))
        .collect();
    let decoded = registry.decode_chain(&stream.data, &chain)?;

    let widths = stream
        .dict
        .get(b"W")
        .and_then(|o| o.as_array())
        .ok_or(Error::MalformedXref {
            offset: section_offset,
            reason: "missing /W array".to_string(),
        })?;
    if widths.len() != 3 {
        return Err(Error::MalformedXref {
            offset: section_offset,
            reason: format!("/W has {} fields, expected 3", widths.len()),
        });
    }
    let mut w = [0usize; 3];
    for (slot, value) in w.iter_mut().zip(widths) {
        *slot = value
            .as_integer()
            .filter(|&v| (0..=8).contains(&v))
            .ok_or(Error::MalformedXref {
                offset: section_offset,
                reason: "/W field out of range".to_string(),
            })? as usize;
    }
    let record_len = w.iter().sum::<usize>();
    if record_len == 0 {
        return Err(Error::MalformedXref {
            offset: section_offset,
            reason: "/W describes empty records".to_string(),
        });
    }

    let size = stream
        .dict
        .get(b"Size")
        .and_then(|o| o.as_integer())
        .ok_or(Error::MalformedXref {
            offset: section_offset,
            reason: "missing /Size".to_string(),
        })?;

    let ranges: Vec<(u32, u32)> = match stream.dict.get(b"Index").and_then(|o| o.as_array()) {
        Some(index) => {
            if index.len() % 2 != 0 {
                return Err(Error::MalformedXref {
                    offset: section_offset,
                    reason: "/Index has an odd number of values".to_string(),
                });
            }
            index
                .chunks(2)
                .map(|pair| {
                    let first = pair[0].as_integer();
                    let count = pair[1].as_integer();
                    match (first, count) {
                        (Some(f), Some(c)) if f >= 0 && (0..=MAX_SUBSECTION_COUNT).contains(&c) => {
                            Ok((f as u32, c as u32))
                        }
                        _ => Err(Error::MalformedXref {
                            offset: section_offset,
                            reason: "bad /Index pair".to_string(),
                        }),
                    }
                })
                .collect::<Result<_>>()?
        }
        None => {
            if !(0..=MAX_SUBSECTION_COUNT).contains(&size) {
                return Err(Error::MalformedXref {
                    offset: section_offset,
                    reason: format!("unreasonable /Size {}", size),
                });
            }
            vec![(0, size as u32)]
        }
    };

    let mut entries = BTreeMap::new();
    let mut cursor = 0usize;
    'ranges: for (first, count) in ranges {
        for i in 0..count {
            if cursor + record_len > decoded.len() {
                let warning = Warning::new(
                    section_offset,
                    WarningKind::MalformedXref,
                    format!(
                        "xref stream data ends after {} of {} declared entries",
                        entries.len(),
                        size
                    ),
                );
                if strict {
                    return Err(Error::MalformedXref {
                        offset: section_offset,
                        reason: warning.detail,
                    });
                }
                log::warn!("{}", warning);
                warnings.push(warning);
                break 'ranges;
            }
            let record = &decoded[cursor..cursor + record_len];
            cursor += record_len;

            // A zero-width type field defaults to 1 (in-use)
            let kind = if w[0] == 0 { 1 } else { read_be(&record[..w[0]]) };
            let field2 = read_be(&record[w[0]..w[0] + w[1]]);
            let field3 = read_be(&record[w[0] + w[1]..]);

            let entry = match kind {
                0 => XRefEntry::Free {
                    next_free: field2 as u32,
                    next_generation: field3 as u16,
                },
                1 => XRefEntry::InUse {
                    offset: field2,
                    generation: field3 as u16,
                },
                2 => XRefEntry::Compressed {
                    container: field2 as u32,
                    index: field3 as u32,
                },
                other => {
                    return Err(Error::MalformedXref {
                        offset: section_offset,
                        reason: format!("unknown entry type {}", other),
                    });
                }
            };
            entries.insert(first + i, entry);
        }
    }

    let links = section_links(&stream.dict);
    Ok((
        XRefSection {
            entries,
            trailer: stream.dict,
            is_stream: true,
        },
        links,
    ))
}

fn section_links(trailer: &Dictionary) -> SectionLinks {
    let offset = |key: &[u8]| {
        trailer
            .get(key)
            .and_then(|o| o.as_integer())
            .and_then(|v| u64::try_from(v).ok())
    };
    SectionLinks {
        prev: offset(b"Prev"),
        xref_stm: offset(b"XRefStm"),
    }
}

/// Big-endian integer of up to 8 bytes.
fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| acc << 8 | u64::from(b))
}
