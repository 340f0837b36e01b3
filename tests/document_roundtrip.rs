//! End-to-end reading, resolution, and rewrite scenarios.

use pdf_carousel::decoders::{Ascii85Codec, Codec, FlateCodec};
use pdf_carousel::writer::DocumentWriter;
use pdf_carousel::{
    Dictionary, Document, Name, Object, ObjectRef, SaveOptions, Stream, XRefEntry,
};
use std::collections::BTreeMap;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn free_head() -> XRefEntry {
    XRefEntry::Free {
        next_free: 0,
        next_generation: 65535,
    }
}

/// Catalog, page tree, one page, a font, and a content stream.
fn five_object_pdf() -> Vec<u8> {
    let mut writer = DocumentWriter::new();
    writer.write_header((1, 6));

    let mut catalog = Dictionary::new();
    catalog.insert("Type", Object::Name(Name::from("Catalog")));
    catalog.insert("Pages", Object::Reference(ObjectRef::new(2, 0)));

    let mut pages = Dictionary::new();
    pages.insert("Type", Object::Name(Name::from("Pages")));
    pages.insert(
        "Kids",
        Object::Array(vec![Object::Reference(ObjectRef::new(3, 0))]),
    );
    pages.insert("Count", Object::Integer(1));

    let mut page = Dictionary::new();
    page.insert("Type", Object::Name(Name::from("Page")));
    page.insert("Parent", Object::Reference(ObjectRef::new(2, 0)));
    page.insert("Resources", Object::Reference(ObjectRef::new(4, 0)));
    page.insert("Contents", Object::Reference(ObjectRef::new(5, 0)));

    let mut font = Dictionary::new();
    font.insert("Type", Object::Name(Name::from("Font")));
    font.insert("Subtype", Object::Name(Name::from("Type1")));
    font.insert("BaseFont", Object::Name(Name::from("Helvetica")));

    let content = Stream::new(
        Dictionary::new(),
        &b"BT /F1 24 Tf 72 712 Td (Hi) Tj ET"[..],
    );

    let mut entries = BTreeMap::new();
    entries.insert(0, free_head());
    for (number, object) in [
        (1u32, Object::Dictionary(catalog)),
        (2, Object::Dictionary(pages)),
        (3, Object::Dictionary(page)),
        (4, Object::Dictionary(font)),
        (5, Object::Stream(content)),
    ] {
        let offset = writer
            .write_object(ObjectRef::new(number, 0), &object)
            .unwrap();
        entries.insert(number, XRefEntry::InUse { offset, generation: 0 });
    }

    let mut trailer = Dictionary::new();
    trailer.insert("Size", Object::Integer(6));
    trailer.insert("Root", Object::Reference(ObjectRef::new(1, 0)));
    let startxref = writer.write_classical_xref(&entries).unwrap();
    writer.write_trailer(&trailer, startxref).unwrap();
    writer.into_bytes()
}

#[test]
fn minimal_read_follows_the_page_tree() {
    init_logging();
    let mut doc = Document::from_bytes(five_object_pdf()).unwrap();

    let root = doc
        .trailer()
        .get(b"Root")
        .and_then(|o| o.as_reference())
        .unwrap();
    let catalog = doc.resolve(root).unwrap();
    assert_eq!(
        catalog
            .as_dict()
            .and_then(|d| d.get(b"Type"))
            .and_then(|o| o.as_name()),
        Some(&Name::from("Catalog"))
    );

    let pages_ref = catalog
        .as_dict()
        .and_then(|d| d.get(b"Pages"))
        .and_then(|o| o.as_reference())
        .unwrap();
    let pages = doc.resolve(pages_ref).unwrap();
    assert_eq!(
        pages
            .as_dict()
            .and_then(|d| d.get(b"Type"))
            .and_then(|o| o.as_name()),
        Some(&Name::from("Pages"))
    );
    assert_eq!(
        pages
            .as_dict()
            .and_then(|d| d.get(b"Count"))
            .and_then(|o| o.as_integer()),
        Some(1)
    );
}

#[test]
fn every_xref_entry_resolves_or_is_free() {
    init_logging();
    let mut doc = Document::from_bytes(five_object_pdf()).unwrap();
    for (number, entry) in doc.xref_entries() {
        let generation = entry.generation();
        let resolved = doc.resolve(ObjectRef::new(number, generation)).unwrap();
        assert_eq!(entry.is_free(), resolved.is_null(), "object {}", number);
    }
}

#[test]
fn object_stream_members_resolve() {
    init_logging();
    // Three compressed objects (10, 11, 12) inside object stream 2,
    // indexed by an xref stream.
    let mut writer = DocumentWriter::new();
    writer.write_header((1, 5));

    let mut catalog = Dictionary::new();
    catalog.insert("Type", Object::Name(Name::from("Catalog")));
    catalog.insert("Marker", Object::Reference(ObjectRef::new(10, 0)));
    let o1 = writer
        .write_object(ObjectRef::new(1, 0), &Object::Dictionary(catalog))
        .unwrap();

    let header = b"10 0 11 18 12 21 ";
    let bodies = b"<< /Kind /Demo >> 42 [ 1 2 ]";
    let mut payload = header.to_vec();
    payload.extend_from_slice(bodies);
    let mut objstm_dict = Dictionary::new();
    objstm_dict.insert("Type", Object::Name(Name::from("ObjStm")));
    objstm_dict.insert("N", Object::Integer(3));
    objstm_dict.insert("First", Object::Integer(header.len() as i64));
    let o2 = writer
        .write_object(
            ObjectRef::new(2, 0),
            &Object::Stream(Stream::new(objstm_dict, payload)),
        )
        .unwrap();

    let mut entries = BTreeMap::new();
    entries.insert(0, free_head());
    entries.insert(1, XRefEntry::InUse { offset: o1, generation: 0 });
    entries.insert(2, XRefEntry::InUse { offset: o2, generation: 0 });
    entries.insert(10, XRefEntry::Compressed { container: 2, index: 0 });
    entries.insert(11, XRefEntry::Compressed { container: 2, index: 1 });
    entries.insert(12, XRefEntry::Compressed { container: 2, index: 2 });

    let mut trailer = Dictionary::new();
    trailer.insert("Root", Object::Reference(ObjectRef::new(1, 0)));
    let startxref = writer
        .write_xref_stream(ObjectRef::new(13, 0), &entries, &trailer)
        .unwrap();
    writer.write_startxref(startxref);

    let mut doc = Document::from_bytes(writer.into_bytes()).unwrap();
    assert!(doc.xref().used_stream_xref);

    let first = doc.resolve(ObjectRef::new(10, 0)).unwrap();
    assert_eq!(
        first
            .as_dict()
            .and_then(|d| d.get(b"Kind"))
            .and_then(|o| o.as_name()),
        Some(&Name::from("Demo"))
    );
    assert_eq!(doc.resolve(ObjectRef::new(11, 0)).unwrap(), Object::Integer(42));
    assert_eq!(
        doc.resolve(ObjectRef::new(12, 0)).unwrap(),
        Object::Array(vec![Object::Integer(1), Object::Integer(2)])
    );
}

#[test]
fn roundtrip_preserves_the_object_graph() {
    init_logging();
    let mut doc = Document::from_bytes(five_object_pdf()).unwrap();
    let originals: Vec<(u32, Object)> = (1..=5)
        .map(|n| (n, doc.resolve(ObjectRef::new(n, 0)).unwrap()))
        .collect();

    let saved = doc.save(SaveOptions::classical()).unwrap();
    let mut reopened = Document::from_bytes(saved).unwrap();
    for (number, original) in originals {
        let reread = reopened.resolve(ObjectRef::new(number, 0)).unwrap();
        assert_eq!(reread, original, "object {}", number);
    }
}

#[test]
fn add_marker_and_reopen() {
    init_logging();
    let mut doc = Document::from_bytes(five_object_pdf()).unwrap();
    let mut marker = Dictionary::new();
    marker.insert("Type", Object::Name(Name::from("Marker")));
    let marker_ref = doc.add_object(Object::Dictionary(marker.clone()));

    let saved = doc.save(SaveOptions::classical()).unwrap();
    let mut reopened = Document::from_bytes(saved).unwrap();
    assert_eq!(
        reopened.resolve(marker_ref).unwrap(),
        Object::Dictionary(marker)
    );
    for number in 1..=5 {
        assert!(!reopened
            .resolve(ObjectRef::new(number, 0))
            .unwrap()
            .is_null());
    }
}

#[test]
fn filter_chain_decodes_through_the_document() {
    init_logging();
    // Filter [ASCII85Decode FlateDecode]: stored form is ascii85(deflate(x))
    let payload = b"the payload that went through two filters".to_vec();
    let deflated = FlateCodec::new(true).encode(&payload, None).unwrap();
    let stored = Ascii85Codec.encode(&deflated, None).unwrap();

    let mut writer = DocumentWriter::new();
    writer.write_header((1, 4));
    let mut catalog = Dictionary::new();
    catalog.insert("Type", Object::Name(Name::from("Catalog")));
    let o1 = writer
        .write_object(ObjectRef::new(1, 0), &Object::Dictionary(catalog))
        .unwrap();

    let mut dict = Dictionary::new();
    dict.insert(
        "Filter",
        Object::Array(vec![
            Object::Name(Name::from("ASCII85Decode")),
            Object::Name(Name::from("FlateDecode")),
        ]),
    );
    let o2 = writer
        .write_object(ObjectRef::new(2, 0), &Object::Stream(Stream::new(dict, stored)))
        .unwrap();

    let mut entries = BTreeMap::new();
    entries.insert(0, free_head());
    entries.insert(1, XRefEntry::InUse { offset: o1, generation: 0 });
    entries.insert(2, XRefEntry::InUse { offset: o2, generation: 0 });
    let mut trailer = Dictionary::new();
    trailer.insert("Size", Object::Integer(3));
    trailer.insert("Root", Object::Reference(ObjectRef::new(1, 0)));
    let startxref = writer.write_classical_xref(&entries).unwrap();
    writer.write_trailer(&trailer, startxref).unwrap();

    let mut doc = Document::from_bytes(writer.into_bytes()).unwrap();
    assert_eq!(doc.stream_data(ObjectRef::new(2, 0)).unwrap(), payload);
}

#[test]
fn incremental_update_appends_only() {
    init_logging();
    let original = five_object_pdf();
    let mut doc = Document::from_bytes(original.clone()).unwrap();

    // Replace the font and add a fresh object
    let mut font = Dictionary::new();
    font.insert("Type", Object::Name(Name::from("Font")));
    font.insert("Subtype", Object::Name(Name::from("Type1")));
    font.insert("BaseFont", Object::Name(Name::from("Courier")));
    doc.replace_object(ObjectRef::new(4, 0), Object::Dictionary(font));
    let extra = doc.add_object(Object::LiteralString(b"appended".to_vec()));

    let saved = doc.save(SaveOptions::incremental()).unwrap();

    // Prior bytes intact at their original offsets
    assert_eq!(&saved[..original.len()], &original[..]);

    let mut reopened = Document::from_bytes(saved).unwrap();
    assert_eq!(reopened.xref().sections().len(), 2);
    let font = reopened.resolve(ObjectRef::new(4, 0)).unwrap();
    assert_eq!(
        font.as_dict()
            .and_then(|d| d.get(b"BaseFont"))
            .and_then(|o| o.as_name()),
        Some(&Name::from("Courier"))
    );
    assert_eq!(
        reopened.resolve(extra).unwrap(),
        Object::LiteralString(b"appended".to_vec())
    );
    // Untouched objects still come from the first section
    assert!(!reopened.resolve(ObjectRef::new(1, 0)).unwrap().is_null());
}

#[test]
fn stream_xref_rewrite_reopens() {
    init_logging();
    let mut doc = Document::from_bytes(five_object_pdf()).unwrap();
    let saved = doc.save(SaveOptions::stream()).unwrap();

    let mut reopened = Document::from_bytes(saved).unwrap();
    assert!(reopened.xref().used_stream_xref);
    for number in 1..=5 {
        assert!(!reopened
            .resolve(ObjectRef::new(number, 0))
            .unwrap()
            .is_null());
    }

    // And back to classical
    let classical = reopened.save(SaveOptions::classical()).unwrap();
    let mut again = Document::from_bytes(classical).unwrap();
    assert!(!again.xref().used_stream_xref);
    assert!(!again.resolve(ObjectRef::new(5, 0)).unwrap().is_null());
}
