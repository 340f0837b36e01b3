//! Cross-reference reconstruction for damaged files.
//!
//! When `startxref` lies, the table is truncated, or an offset points into
//! the weeds, the file is scanned end to end for `N G obj` headers and a
//! fresh single-section table is built from what is found. Later definitions
//! shadow earlier ones, matching how incremental updates append. Objects
//! living inside object streams cannot be recovered this way; objects whose
//! containers are rediscovered still resolve through them.

use crate::error::{Error, Result, Warning, WarningKind};
use crate::lexer::{is_regular, Lexer};
use crate::object::{Dictionary, Name, Object};
use crate::parser::{IndirectPayload, Parser};
use crate::xref::{XRefEntry, XRefSection, XRefTable};
use std::collections::BTreeMap;

/// Rebuild the xref by scanning `buf[base..]` for object headers.
///
/// Returns a single-section table flagged as rebuilt. Fails only when no
/// object at all can be found or no trailer can be recovered or synthesized.
pub fn rebuild_xref(buf: &[u8], base: usize, warnings: &mut Vec<Warning>) -> Result<XRefTable> {
    let body = &buf[base..];
    log::warn!("rebuilding xref by scanning {} bytes", body.len());

    let mut entries: BTreeMap<u32, XRefEntry> = BTreeMap::new();
    let mut found = 0usize;

    for (offset, number, generation) in scan_object_headers(body) {
        // Later definitions win: a plain insert overwrites earlier ones
        entries.insert(
            number,
            XRefEntry::InUse {
                offset: offset as u64,
                generation,
            },
        );
        found += 1;
    }

    if entries.is_empty() {
        return Err(Error::MalformedXref {
            offset: 0,
            reason: "full scan found no object headers".to_string(),
        });
    }
    log::info!("full scan recovered {} headers, {} live objects", found, entries.len());

    entries.entry(0).or_insert(XRefEntry::Free {
        next_free: 0,
        next_generation: 65535,
    });

    let trailer = recover_trailer(body, &entries).ok_or(Error::MalformedXref {
        offset: 0,
        reason: "full scan found no trailer and no catalog".to_string(),
    })?;

    warnings.push(Warning::new(
        0,
        WarningKind::MalformedXref,
        format!("xref rebuilt from a full scan ({} objects)", entries.len()),
    ));

    let section = XRefSection {
        entries,
        trailer,
        is_stream: false,
    };
    Ok(XRefTable::from_section(section, true))
}

/// Every plausible `N G obj` header: `(offset_of_N, number, generation)`.
fn scan_object_headers(body: &[u8]) -> Vec<(usize, u32, u16)> {
    let mut headers = Vec::new();
    let mut search_from = 0usize;

    while let Some(found) = find_from(body, b"obj", search_from) {
        search_from = found + 1;

        // Keyword boundary: `objX` and `endobj` are not headers
        let after = body.get(found + 3).copied();
        if after.map_or(false, is_regular) {
            continue;
        }
        if found > 0 && is_regular(body[found - 1]) {
            continue;
        }

        let Some((start, number, generation)) = integers_before(body, found) else {
            continue;
        };

        // The header must be followed by something an object can start with
        let mut lexer = Lexer::new_at(body, found + 3);
        lexer.skip_ws_and_comments();
        let valid_start = matches!(
            lexer.peek_byte(),
            Some(b'<' | b'[' | b'(' | b'/' | b't' | b'f' | b'n' | b'+' | b'-' | b'.' | b'0'..=b'9')
        );
        if !valid_start {
            continue;
        }

        headers.push((start, number, generation));
    }

    headers
}

/// Walk backwards from the `obj` keyword over `G` then `N`. Returns the
/// offset of `N` and both values.
fn integers_before(body: &[u8], keyword: usize) -> Option<(usize, u32, u16)> {
    let (gen_start, gen_end) = token_before(body, keyword)?;
    let (num_start, num_end) = token_before(body, gen_start)?;

    let generation: u16 = std::str::from_utf8(&body[gen_start..gen_end])
        .ok()?
        .parse()
        .ok()?;
    let number: u32 = std::str::from_utf8(&body[num_start..num_end])
        .ok()?
        .parse()
        .ok()?;
    if number == 0 {
        return None;
    }

    // The number must begin a token, not continue one
    if num_start > 0 && is_regular(body[num_start - 1]) {
        return None;
    }
    Some((num_start, number, generation))
}

/// The all-digit token ending right before `end` (whitespace between
/// tolerated). Returns its byte range.
fn token_before(body: &[u8], end: usize) -> Option<(usize, usize)> {
    let mut i = end;
    while i > 0 && body[i - 1].is_ascii_whitespace() {
        i -= 1;
    }
    let stop = i;
    while i > 0 && body[i - 1].is_ascii_digit() {
        i -= 1;
    }
    if i == stop {
        return None;
    }
    Some((i, stop))
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| from + i)
}

/// Find a usable trailer: the last parseable `trailer` dictionary, falling
/// back to a synthesized one pointing at a discovered catalog or at the Root
/// of a discovered xref stream.
fn recover_trailer(body: &[u8], entries: &BTreeMap<u32, XRefEntry>) -> Option<Dictionary> {
    let mut best: Option<Dictionary> = None;
    let mut search_from = 0usize;
    while let Some(found) = find_from(body, b"trailer", search_from) {
        search_from = found + 1;
        let mut parser = Parser::new_at(body, found + b"trailer".len(), false);
        if let Ok(Object::Dictionary(dict)) = parser.parse_object() {
            if dict.contains_key(b"Root") {
                best = Some(dict);
            }
        }
    }
    if let Some(mut dict) = best {
        refresh_size(&mut dict, entries);
        return Some(dict);
    }

    // No classical trailer: look through the recovered objects for an xref
    // stream (its dictionary carries Root) or the catalog itself.
    let mut catalog: Option<u32> = None;
    for (&number, entry) in entries {
        let XRefEntry::InUse { offset, .. } = entry else {
            continue;
        };
        let mut parser = Parser::new_at(body, *offset as usize, false);
        let Ok((_, payload)) = parser.parse_indirect() else {
            continue;
        };
        let dict = match &payload {
            IndirectPayload::Object(Object::Dictionary(dict)) => dict,
            IndirectPayload::PendingStream { dict, .. } => dict,
            _ => continue,
        };
        match dict.get(b"Type").and_then(|o| o.as_name()).map(Name::as_bytes) {
            Some(b"XRef") if dict.contains_key(b"Root") => {
                let mut trailer = dict.clone();
                refresh_size(&mut trailer, entries);
                return Some(trailer);
            }
            Some(b"Catalog") => catalog = Some(number),
            _ => {}
        }
    }

    catalog.map(|number| {
        let mut trailer = Dictionary::new();
        refresh_size(&mut trailer, entries);
        trailer.insert("Root", Object::Reference(crate::object::ObjectRef::new(number, 0)));
        trailer
    })
}

fn refresh_size(trailer: &mut Dictionary, entries: &BTreeMap<u32, XRefEntry>) {
    let size = entries.keys().next_back().copied().unwrap_or(0) as i64 + 1;
    trailer.insert("Size", Object::Integer(size));
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"%PDF-1.4\n\
1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
2 0 obj\n<< /Type /Pages /Kids [3 0 R] /Count 1 >>\nendobj\n\
3 0 obj\n<< /Type /Page /Parent 2 0 R >>\nendobj\n\
trailer\n<< /Size 4 /Root 1 0 R >>\n\
startxref\n999999\n%%EOF\n";

    #[test]
    fn test_rebuild_finds_all_objects() {
        let mut warnings = Vec::new();
        let table = rebuild_xref(SAMPLE, 0, &mut warnings).unwrap();
        assert!(table.rebuilt);
        assert!(table.get(1).is_some());
        assert!(table.get(2).is_some());
        assert!(table.get(3).is_some());
        assert!(!warnings.is_empty());
    }

    #[test]
    fn test_rebuild_offsets_point_at_headers() {
        let table = rebuild_xref(SAMPLE, 0, &mut Vec::new()).unwrap();
        let XRefEntry::InUse { offset, .. } = *table.get(2).unwrap() else {
            panic!("expected in-use entry");
        };
        assert!(SAMPLE[offset as usize..].starts_with(b"2 0 obj"));
    }

    #[test]
    fn test_rebuild_recovers_trailer() {
        let table = rebuild_xref(SAMPLE, 0, &mut Vec::new()).unwrap();
        let root = table.trailer().get(b"Root").and_then(|o| o.as_reference());
        assert_eq!(root.map(|r| r.number), Some(1));
        assert_eq!(
            table.trailer().get(b"Size").and_then(|o| o.as_integer()),
            Some(4)
        );
    }

    #[test]
    fn test_rebuild_without_trailer_synthesizes_from_catalog() {
        let sample = b"1 0 obj\n<< /Type /Catalog >>\nendobj\n2 0 obj\n42\nendobj\n";
        let table = rebuild_xref(sample, 0, &mut Vec::new()).unwrap();
        let root = table.trailer().get(b"Root").and_then(|o| o.as_reference());
        assert_eq!(root.map(|r| r.number), Some(1));
    }

    #[test]
    fn test_rebuild_later_definition_wins() {
        let mut sample = Vec::new();
        sample.extend_from_slice(b"4 0 obj\n(old)\nendobj\n");
        let second = sample.len();
        sample.extend_from_slice(b"4 0 obj\n(new)\nendobj\n");
        sample.extend_from_slice(b"1 0 obj\n<< /Type /Catalog >>\nendobj\n");
        let table = rebuild_xref(&sample, 0, &mut Vec::new()).unwrap();
        assert_eq!(
            table.get(4),
            Some(&XRefEntry::InUse {
                offset: second as u64,
                generation: 0
            })
        );
    }

    #[test]
    fn test_rebuild_skips_false_positives() {
        // "5 0 obj" inside a literal string must not become an entry, since
        // no valid object syntax follows it
        let sample =
            b"1 0 obj\n<< /Type /Catalog >>\nendobj\n2 0 obj\n(not 5 0 obj)\nendobj\n";
        let table = rebuild_xref(sample, 0, &mut Vec::new()).unwrap();
        assert!(table.get(1).is_some());
        assert!(table.get(2).is_some());
    }

    #[test]
    fn test_rebuild_empty_input_fails() {
        assert!(rebuild_xref(b"nothing to see", 0, &mut Vec::new()).is_err());
    }
}
