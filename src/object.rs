//! COS object types.
//!
//! The Carousel Object System (COS) is the low-level object layer every PDF
//! file is built from. [`Object`] is the tagged union of all COS cases;
//! [`Dictionary`] preserves key insertion order so a parsed file can be
//! re-serialized without shuffling entries; literal and hexadecimal strings
//! stay distinct variants for the same reason.

use bytes::Bytes;
use indexmap::IndexMap;
use std::borrow::Borrow;

/// A PDF name after `#xx` escape resolution.
///
/// Names are raw byte strings; comparisons are byte-exact. Most names are
/// ASCII, but the format allows any byte except the delimiter set.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(pub Vec<u8>);

impl Name {
    /// Name bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for Name {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Self {
        Name(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Name {
    fn from(b: &[u8]) -> Self {
        Name(b.to_vec())
    }
}

impl std::fmt::Debug for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}", String::from_utf8_lossy(&self.0))
    }
}

impl std::fmt::Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Reference to an indirect object: `(object number, generation)`.
///
/// Object number 0 is reserved for the head of the free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    /// Object number
    pub number: u32,
    /// Generation number
    pub generation: u16,
}

impl ObjectRef {
    /// Create a new reference.
    pub fn new(number: u32, generation: u16) -> Self {
        Self { number, generation }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.number, self.generation)
    }
}

/// A dictionary mapping names to objects, preserving insertion order.
///
/// Duplicate keys follow "last wins": [`Dictionary::insert`] returns the
/// previous value so the parser can record a warning.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dictionary(IndexMap<Name, Object>);

impl Dictionary {
    /// Create an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value by key bytes.
    pub fn get(&self, key: &[u8]) -> Option<&Object> {
        self.0.get(key)
    }

    /// Mutable lookup by key bytes.
    pub fn get_mut(&mut self, key: &[u8]) -> Option<&mut Object> {
        self.0.get_mut(key)
    }

    /// Insert a key/value pair. Returns the previous value if the key was
    /// already present (duplicate key in the source).
    pub fn insert(&mut self, key: impl Into<Name>, value: Object) -> Option<Object> {
        self.0.insert(key.into(), value)
    }

    /// Remove a key, preserving the order of the remaining entries.
    pub fn remove(&mut self, key: &[u8]) -> Option<Object> {
        self.0.shift_remove(key)
    }

    /// Whether the key is present.
    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Name, &Object)> {
        self.0.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the dictionary has no entries.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Name, Object)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (Name, Object)>>(iter: T) -> Self {
        Dictionary(iter.into_iter().collect())
    }
}

/// A stream: a dictionary plus a raw byte payload.
///
/// The payload is kept exactly as it appears in the file, possibly filtered
/// and possibly encrypted. Decoding happens on demand through the filter
/// registry; decryption happens at resolve time.
#[derive(Debug, Clone, PartialEq)]
pub struct Stream {
    /// The stream dictionary (carries Length, Filter, DecodeParms, ...)
    pub dict: Dictionary,
    /// Raw payload bytes as stored in the file
    pub data: Bytes,
}

impl Stream {
    /// Create a stream from a dictionary and payload.
    pub fn new(dict: Dictionary, data: impl Into<Bytes>) -> Self {
        Self {
            dict,
            data: data.into(),
        }
    }

    /// The filter names applied to the payload, in decode order.
    ///
    /// `Filter` may be a single name or an array of names; anything else
    /// yields an empty list.
    pub fn filter_names(&self) -> Vec<Name> {
        match self.dict.get(b"Filter") {
            Some(Object::Name(n)) => vec![n.clone()],
            Some(Object::Array(items)) => items
                .iter()
                .filter_map(|o| o.as_name().cloned())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The decode-parameter dictionary for the filter at `index`, when given
    /// directly. `DecodeParms` may be a single dictionary or an array aligned
    /// with the filter array.
    pub fn decode_parms(&self, index: usize) -> Option<&Dictionary> {
        match self.dict.get(b"DecodeParms").or_else(|| self.dict.get(b"DP")) {
            Some(Object::Dictionary(d)) if index == 0 => Some(d),
            Some(Object::Array(items)) => match items.get(index) {
                Some(Object::Dictionary(d)) => Some(d),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A COS object.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// The null object
    Null,
    /// Boolean
    Boolean(bool),
    /// Integer
    Integer(i64),
    /// Real number
    Real(f64),
    /// Literal string `(...)` after escape resolution
    LiteralString(Vec<u8>),
    /// Hexadecimal string `<...>` after hex decoding
    HexString(Vec<u8>),
    /// Name after `#xx` resolution
    Name(Name),
    /// Ordered sequence of objects
    Array(Vec<Object>),
    /// Name-keyed mapping, insertion order preserved
    Dictionary(Dictionary),
    /// Dictionary plus raw byte payload
    Stream(Stream),
    /// Indirect reference `N G R`
    Reference(ObjectRef),
}

impl Object {
    /// Human-readable type name, without the payload.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::LiteralString(_) => "LiteralString",
            Object::HexString(_) => "HexString",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream(_) => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Try to read as an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to read as a real; integers coerce.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Object::Real(r) => Some(*r),
            Object::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to read as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to read as a name.
    pub fn as_name(&self) -> Option<&Name> {
        match self {
            Object::Name(n) => Some(n),
            _ => None,
        }
    }

    /// String bytes of either string variant.
    pub fn as_string_bytes(&self) -> Option<&[u8]> {
        match self {
            Object::LiteralString(s) | Object::HexString(s) => Some(s),
            _ => None,
        }
    }

    /// Try to read as an array.
    pub fn as_array(&self) -> Option<&[Object]> {
        match self {
            Object::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Dictionary view: works for both dictionaries and streams.
    pub fn as_dict(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream(s) => Some(&s.dict),
            _ => None,
        }
    }

    /// Try to read as a stream.
    pub fn as_stream(&self) -> Option<&Stream> {
        match self {
            Object::Stream(s) => Some(s),
            _ => None,
        }
    }

    /// Try to read as a reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Whether this is the null object.
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_lookup_by_bytes() {
        let mut dict = Dictionary::new();
        dict.insert("Type", Object::Name(Name::from("Catalog")));
        assert_eq!(
            dict.get(b"Type").and_then(|o| o.as_name()),
            Some(&Name::from("Catalog"))
        );
        assert!(dict.get(b"Missing").is_none());
    }

    #[test]
    fn test_dictionary_preserves_insertion_order() {
        let mut dict = Dictionary::new();
        dict.insert("Zebra", Object::Integer(1));
        dict.insert("Alpha", Object::Integer(2));
        dict.insert("Mid", Object::Integer(3));
        let keys: Vec<_> = dict.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![Name::from("Zebra"), Name::from("Alpha"), Name::from("Mid")]);
    }

    #[test]
    fn test_dictionary_duplicate_key_last_wins() {
        let mut dict = Dictionary::new();
        assert!(dict.insert("Length", Object::Integer(10)).is_none());
        let old = dict.insert("Length", Object::Integer(20));
        assert_eq!(old, Some(Object::Integer(10)));
        assert_eq!(dict.get(b"Length").and_then(|o| o.as_integer()), Some(20));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn test_string_variants_are_distinct() {
        let lit = Object::LiteralString(b"abc".to_vec());
        let hex = Object::HexString(b"abc".to_vec());
        assert_ne!(lit, hex);
        assert_eq!(lit.as_string_bytes(), hex.as_string_bytes());
    }

    #[test]
    fn test_stream_dict_access() {
        let mut dict = Dictionary::new();
        dict.insert("Length", Object::Integer(5));
        let obj = Object::Stream(Stream::new(dict, &b"hello"[..]));
        assert_eq!(
            obj.as_dict().and_then(|d| d.get(b"Length")).and_then(|o| o.as_integer()),
            Some(5)
        );
    }

    #[test]
    fn test_filter_names_single_and_array() {
        let mut dict = Dictionary::new();
        dict.insert("Filter", Object::Name(Name::from("FlateDecode")));
        let s = Stream::new(dict, &b""[..]);
        assert_eq!(s.filter_names(), vec![Name::from("FlateDecode")]);

        let mut dict = Dictionary::new();
        dict.insert(
            "Filter",
            Object::Array(vec![
                Object::Name(Name::from("ASCII85Decode")),
                Object::Name(Name::from("FlateDecode")),
            ]),
        );
        let s = Stream::new(dict, &b""[..]);
        assert_eq!(
            s.filter_names(),
            vec![Name::from("ASCII85Decode"), Name::from("FlateDecode")]
        );
    }

    #[test]
    fn test_decode_parms_array_alignment() {
        let mut parms = Dictionary::new();
        parms.insert("Predictor", Object::Integer(12));
        let mut dict = Dictionary::new();
        dict.insert(
            "DecodeParms",
            Object::Array(vec![Object::Null, Object::Dictionary(parms)]),
        );
        let s = Stream::new(dict, &b""[..]);
        assert!(s.decode_parms(0).is_none());
        assert!(s.decode_parms(1).is_some());
    }

    #[test]
    fn test_reference_display() {
        assert_eq!(format!("{}", ObjectRef::new(12, 3)), "12 3 R");
    }

    #[test]
    fn test_real_coercion() {
        assert_eq!(Object::Integer(3).as_real(), Some(3.0));
        assert_eq!(Object::Real(0.5).as_real(), Some(0.5));
        assert!(Object::Null.as_real().is_none());
    }
}
