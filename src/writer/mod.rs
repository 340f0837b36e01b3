//! Serialization: object bodies and whole-file emission.

mod pdf_writer;
mod serializer;

pub use pdf_writer::{group_contiguous, DocumentWriter};
pub use serializer::{serialize_object, ObjectSerializer};
