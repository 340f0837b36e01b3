//! # pdf_carousel
//!
//! A low-level PDF processor for the Carousel Object System (COS) layer:
//! everything between raw bytes and a resolved object graph, in both
//! directions.
//!
//! ## What it does
//!
//! - **Lexing and parsing**: context-sensitive tokenization and recursive
//!   object assembly, byte offsets on every error.
//! - **Cross-reference resolution**: classical tables, xref streams, hybrid
//!   files, incremental-update chains, object streams, and a full-scan
//!   rebuild when the table lies.
//! - **Filters**: FlateDecode (PNG predictors), LZWDecode, ASCIIHexDecode,
//!   ASCII85Decode, RunLengthDecode, and a registry to plug in more.
//! - **Encryption**: the Standard security handler, revisions 2-4 (ARC4 and
//!   AES-128-CBC), with cipher primitives injected through a trait.
//! - **Serialization**: deterministic byte output with classical or stream
//!   xref, full rewrite or append-only incremental update.
//!
//! ## Quick start
//!
//! ```no_run
//! use pdf_carousel::{Document, SaveOptions};
//!
//! # fn main() -> pdf_carousel::Result<()> {
//! let bytes = std::fs::read("input.pdf").expect("read input");
//! let mut doc = Document::from_bytes(bytes)?;
//!
//! let root = doc.trailer().get(b"Root").and_then(|o| o.as_reference()).unwrap();
//! let catalog = doc.resolve(root)?;
//! println!("catalog: {:?}", catalog);
//!
//! let saved = doc.save(SaveOptions::classical())?;
//! std::fs::write("output.pdf", saved).expect("write output");
//! # Ok(())
//! # }
//! ```
//!
//! Encrypted documents need a crypt provider before a password can be
//! applied:
//!
//! ```no_run
//! use pdf_carousel::{Document, StandardCryptProvider};
//! use std::sync::Arc;
//!
//! # fn main() -> pdf_carousel::Result<()> {
//! # let bytes = Vec::new();
//! let mut doc = Document::from_bytes(bytes)?;
//! if doc.is_encrypted() {
//!     doc.set_crypt_provider(Arc::new(StandardCryptProvider));
//!     assert!(doc.authenticate(b"hello")?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! The document instance is single-threaded-reentrant: share it across
//! threads only behind external synchronization. All I/O is bytes-in,
//! bytes-out; files are the caller's business.

#![warn(missing_docs)]

pub mod config;
pub mod decoders;
pub mod document;
pub mod encryption;
pub mod error;
pub mod lexer;
pub mod object;
pub mod objstm;
pub mod parser;
pub mod writer;
pub mod xref;
pub mod xref_recovery;

pub use config::{LoadOptions, SaveOptions, XrefStyle};
pub use document::Document;
pub use encryption::{
    CryptProvider, IdentityCryptProvider, Permissions, SecurityHandler, StandardCryptProvider,
};
pub use error::{Error, Result, Warning, WarningKind};
pub use object::{Dictionary, Name, Object, ObjectRef, Stream};
pub use xref::{XRefEntry, XRefSection, XRefTable};
