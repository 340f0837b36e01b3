//! Standard security handler: password-based encryption, revisions 2-4.
//!
//! The handler derives the file key from a password (user or owner path),
//! then a per-object key for every string and stream it transforms. The
//! cipher primitives themselves are consumed through [`CryptProvider`] so the
//! cryptographic library is a runtime choice: [`IdentityCryptProvider`] is a
//! no-op stub, [`StandardCryptProvider`] is the batteries-included default on
//! the `aes`/`cbc` crates plus a local ARC4.
//!
//! Revision 5+ (AES-256) is out of scope but fits behind the same trait and
//! dictionary parsing when it arrives.

use crate::error::{Error, Result};
use crate::object::{Dictionary, Name, Object};

mod algorithms;
mod handler;
mod rc4;

pub use algorithms::{
    compute_file_key, compute_owner_entry, compute_user_entry_r2, compute_user_entry_r3,
    pad_password,
};
pub use handler::SecurityHandler;
pub use rc4::arc4_transform;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// Injected cipher primitives.
///
/// `arc4` is its own inverse; the AES entry points are AES-128-CBC with
/// PKCS#7 padding, IV passed explicitly.
pub trait CryptProvider: Send + Sync {
    /// Apply the ARC4 keystream.
    fn arc4(&self, key: &[u8], data: &[u8]) -> Vec<u8>;

    /// AES-128-CBC encrypt with PKCS#7 padding.
    fn aes_cbc_encrypt(&self, key: &[u8], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>>;

    /// AES-128-CBC decrypt, stripping PKCS#7 padding.
    fn aes_cbc_decrypt(&self, key: &[u8], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>>;
}

/// No-op provider: every transform returns its input.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityCryptProvider;

impl CryptProvider for IdentityCryptProvider {
    fn arc4(&self, _key: &[u8], data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn aes_cbc_encrypt(&self, _key: &[u8], _iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn aes_cbc_decrypt(&self, _key: &[u8], _iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

/// Working provider backed by the `aes` and `cbc` crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCryptProvider;

impl CryptProvider for StandardCryptProvider {
    fn arc4(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        arc4_transform(key, data)
    }

    fn aes_cbc_encrypt(&self, key: &[u8], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes128CbcEnc::new_from_slices(key, iv)
            .map_err(|_| Error::UnsupportedEncryption("AES key must be 16 bytes".to_string()))?;
        let mut buf = vec![0u8; data.len() + 16];
        buf[..data.len()].copy_from_slice(data);
        let len = cipher
            .encrypt_padded_mut::<Pkcs7>(&mut buf, data.len())
            .map_err(|_| Error::UnsupportedEncryption("AES padding failed".to_string()))?
            .len();
        buf.truncate(len);
        Ok(buf)
    }

    fn aes_cbc_decrypt(&self, key: &[u8], iv: &[u8; 16], data: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes128CbcDec::new_from_slices(key, iv)
            .map_err(|_| Error::UnsupportedEncryption("AES key must be 16 bytes".to_string()))?;
        let mut buf = data.to_vec();
        let plaintext = cipher
            .decrypt_padded_mut::<Pkcs7>(&mut buf)
            .map_err(|_| Error::BadPassword)?;
        Ok(plaintext.to_vec())
    }
}

bitflags::bitflags! {
    /// Access permissions from the P entry (ISO 32000-2 table 22 bit
    /// positions, 1-based in the standard, so bit 3 is `1 << 2`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Permissions: u32 {
        /// Print the document
        const PRINT = 1 << 2;
        /// Modify contents
        const MODIFY = 1 << 3;
        /// Copy text and graphics
        const EXTRACT = 1 << 4;
        /// Add or modify annotations
        const ANNOTATE = 1 << 5;
        /// Fill in form fields (revision 3+)
        const FILL_FORMS = 1 << 8;
        /// Extract for accessibility (revision 3+)
        const ACCESSIBILITY = 1 << 9;
        /// Assemble: insert, rotate, delete pages (revision 3+)
        const ASSEMBLE = 1 << 10;
        /// Print at full resolution (revision 3+)
        const PRINT_HIGH_RES = 1 << 11;
    }
}

impl Permissions {
    /// Interpret the raw signed P value.
    pub fn from_p_value(p: i32) -> Self {
        Self::from_bits_retain(p as u32)
    }
}

/// Cipher selected by the encryption dictionary for a class of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMethod {
    /// No transformation
    Identity,
    /// ARC4 stream cipher (V1/V2, crypt filter /V2)
    Arc4,
    /// AES-128-CBC with a 16-byte IV prefix (crypt filter /AESV2)
    AesV2,
}

/// Parsed `/Encrypt` dictionary for the Standard handler.
#[derive(Debug, Clone)]
pub struct EncryptDict {
    /// Algorithm version (V): 1, 2, or 4
    pub version: i64,
    /// Standard handler revision (R): 2, 3, or 4
    pub revision: i64,
    /// Key length in bits (Length), 40 when absent
    pub length_bits: i64,
    /// Owner entry (O), 32 bytes
    pub owner_entry: Vec<u8>,
    /// User entry (U), 32 bytes
    pub user_entry: Vec<u8>,
    /// Permission bits (P) as stored, sign-extended
    pub permissions: i32,
    /// Whether metadata streams are encrypted (R4)
    pub encrypt_metadata: bool,
    /// Cipher for stream payloads
    pub stream_method: CryptMethod,
    /// Cipher for strings
    pub string_method: CryptMethod,
}

impl EncryptDict {
    /// Parse the `/Encrypt` dictionary. Anything outside the Standard
    /// handler, revisions 2-4, fails with [`Error::UnsupportedEncryption`].
    pub fn from_dict(dict: &Dictionary) -> Result<Self> {
        let filter = dict
            .get(b"Filter")
            .and_then(|o| o.as_name())
            .ok_or_else(|| Error::UnsupportedEncryption("missing /Filter".to_string()))?;
        if filter.as_bytes() != b"Standard" {
            return Err(Error::UnsupportedEncryption(format!(
                "security handler /{} (only /Standard is supported)",
                filter
            )));
        }

        let int = |key: &[u8]| dict.get(key).and_then(|o| o.as_integer());
        let version = int(b"V").unwrap_or(0);
        let revision = int(b"R").unwrap_or(0);
        if !matches!(version, 1 | 2 | 4) || !(2..=4).contains(&revision) {
            return Err(Error::UnsupportedEncryption(format!(
                "V={} R={} (supported: V 1/2/4, R 2-4)",
                version, revision
            )));
        }

        let string_entry = |key: &[u8]| -> Result<Vec<u8>> {
            dict.get(key)
                .and_then(|o| o.as_string_bytes())
                .map(|s| s.to_vec())
                .ok_or_else(|| {
                    Error::UnsupportedEncryption(format!(
                        "missing /{} entry",
                        String::from_utf8_lossy(key)
                    ))
                })
        };
        let owner_entry = string_entry(b"O")?;
        let user_entry = string_entry(b"U")?;

        let permissions = int(b"P")
            .ok_or_else(|| Error::UnsupportedEncryption("missing /P entry".to_string()))?
            as i32;

        let length_bits = int(b"Length").unwrap_or(40);
        let encrypt_metadata = dict
            .get(b"EncryptMetadata")
            .and_then(|o| o.as_bool())
            .unwrap_or(true);

        let (stream_method, string_method) = if version == 4 {
            (
                crypt_filter_method(dict, b"StmF")?,
                crypt_filter_method(dict, b"StrF")?,
            )
        } else {
            (CryptMethod::Arc4, CryptMethod::Arc4)
        };

        Ok(Self {
            version,
            revision,
            length_bits,
            owner_entry,
            user_entry,
            permissions,
            encrypt_metadata,
            stream_method,
            string_method,
        })
    }

    /// Effective file key length in bytes (5 for V1, clamped 5..=16 else).
    pub fn key_length(&self) -> usize {
        if self.version == 1 {
            5
        } else {
            ((self.length_bits / 8) as usize).clamp(5, 16)
        }
    }
}

/// Resolve `StmF`/`StrF` through the `CF` crypt-filter dictionary (V4).
fn crypt_filter_method(dict: &Dictionary, selector: &[u8]) -> Result<CryptMethod> {
    let Some(name) = dict.get(selector).and_then(|o| o.as_name()) else {
        // Absent selector means Identity per the crypt-filter defaults
        return Ok(CryptMethod::Identity);
    };
    if name.as_bytes() == b"Identity" {
        return Ok(CryptMethod::Identity);
    }
    let cfm = dict
        .get(b"CF")
        .and_then(|o| match o {
            Object::Dictionary(cf) => cf.get(name.as_bytes()),
            _ => None,
        })
        .and_then(|o| o.as_dict())
        .and_then(|filter| filter.get(b"CFM"))
        .and_then(|o| o.as_name());
    match cfm.map(Name::as_bytes) {
        Some(b"V2") => Ok(CryptMethod::Arc4),
        Some(b"AESV2") => Ok(CryptMethod::AesV2),
        Some(b"None") | None => Ok(CryptMethod::Identity),
        Some(other) => Err(Error::UnsupportedEncryption(format!(
            "crypt filter method /{}",
            String::from_utf8_lossy(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_dict(version: i64, revision: i64) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("Filter", Object::Name(Name::from("Standard")));
        dict.insert("V", Object::Integer(version));
        dict.insert("R", Object::Integer(revision));
        dict.insert("O", Object::HexString(vec![1u8; 32]));
        dict.insert("U", Object::HexString(vec![2u8; 32]));
        dict.insert("P", Object::Integer(-44));
        dict
    }

    #[test]
    fn test_parse_v2_dict() {
        let mut dict = base_dict(2, 3);
        dict.insert("Length", Object::Integer(128));
        let parsed = EncryptDict::from_dict(&dict).unwrap();
        assert_eq!(parsed.key_length(), 16);
        assert_eq!(parsed.stream_method, CryptMethod::Arc4);
        assert_eq!(parsed.string_method, CryptMethod::Arc4);
    }

    #[test]
    fn test_parse_v1_defaults_to_40_bits() {
        let parsed = EncryptDict::from_dict(&base_dict(1, 2)).unwrap();
        assert_eq!(parsed.key_length(), 5);
    }

    #[test]
    fn test_parse_v4_aes_crypt_filters() {
        let mut std_cf = Dictionary::new();
        std_cf.insert("CFM", Object::Name(Name::from("AESV2")));
        std_cf.insert("Length", Object::Integer(16));
        let mut cf = Dictionary::new();
        cf.insert("StdCF", Object::Dictionary(std_cf));

        let mut dict = base_dict(4, 4);
        dict.insert("Length", Object::Integer(128));
        dict.insert("CF", Object::Dictionary(cf));
        dict.insert("StmF", Object::Name(Name::from("StdCF")));
        dict.insert("StrF", Object::Name(Name::from("StdCF")));

        let parsed = EncryptDict::from_dict(&dict).unwrap();
        assert_eq!(parsed.stream_method, CryptMethod::AesV2);
        assert_eq!(parsed.string_method, CryptMethod::AesV2);
    }

    #[test]
    fn test_parse_v4_missing_selectors_are_identity() {
        let mut dict = base_dict(4, 4);
        dict.insert("Length", Object::Integer(128));
        let parsed = EncryptDict::from_dict(&dict).unwrap();
        assert_eq!(parsed.stream_method, CryptMethod::Identity);
        assert_eq!(parsed.string_method, CryptMethod::Identity);
    }

    #[test]
    fn test_rejects_non_standard_handler() {
        let mut dict = base_dict(2, 3);
        dict.insert("Filter", Object::Name(Name::from("Custom")));
        assert!(matches!(
            EncryptDict::from_dict(&dict),
            Err(Error::UnsupportedEncryption(_))
        ));
    }

    #[test]
    fn test_rejects_revision_5() {
        let dict = base_dict(4, 5);
        assert!(EncryptDict::from_dict(&dict).is_err());
    }

    #[test]
    fn test_permissions_bits() {
        let p = Permissions::from_p_value(-44);
        // -44 = ...11010100: print yes, modify no, extract yes
        assert!(p.contains(Permissions::PRINT));
        assert!(!p.contains(Permissions::MODIFY));
        assert!(p.contains(Permissions::EXTRACT));
        assert!(p.contains(Permissions::FILL_FORMS));
    }

    #[test]
    fn test_aes_roundtrip_through_standard_provider() {
        let provider = StandardCryptProvider;
        let key = [7u8; 16];
        let iv = [9u8; 16];
        let plaintext = b"sixteen byte blocks are padded";
        let ciphertext = provider.aes_cbc_encrypt(&key, &iv, plaintext).unwrap();
        assert_eq!(ciphertext.len() % 16, 0);
        assert_ne!(&ciphertext[..plaintext.len().min(ciphertext.len())], &plaintext[..]);
        let decrypted = provider.aes_cbc_decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_aes_wrong_key_fails_padding() {
        let provider = StandardCryptProvider;
        let ciphertext = provider
            .aes_cbc_encrypt(&[7u8; 16], &[9u8; 16], b"secret content")
            .unwrap();
        // Wrong key: padding check rejects it, or at best garbage comes out
        match provider.aes_cbc_decrypt(&[8u8; 16], &[9u8; 16], &ciphertext) {
            Err(_) => {}
            Ok(plaintext) => assert_ne!(plaintext, b"secret content"),
        }
    }

    #[test]
    fn test_identity_provider_is_noop() {
        let provider = IdentityCryptProvider;
        assert_eq!(provider.arc4(b"k", b"data"), b"data");
        assert_eq!(
            provider.aes_cbc_decrypt(&[0; 16], &[0; 16], b"data").unwrap(),
            b"data"
        );
    }
}
