//! Per-document security handler state.

use super::algorithms;
use super::{CryptMethod, CryptProvider, EncryptDict, Permissions};
use crate::error::{Error, Result};
use crate::object::ObjectRef;
use md5::{Digest, Md5};
use std::sync::Arc;

/// The Standard security handler bound to one document.
///
/// Holds the parsed `/Encrypt` dictionary, the trailer file ID, the injected
/// cipher provider, and (after successful authentication) the derived file
/// key. All string and stream transforms go through the per-object key
/// derivation of ISO 32000-2 §7.6.5.
#[derive(Clone)]
pub struct SecurityHandler {
    dict: EncryptDict,
    file_id: Vec<u8>,
    provider: Arc<dyn CryptProvider>,
    file_key: Option<Vec<u8>>,
}

impl std::fmt::Debug for SecurityHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityHandler")
            .field("revision", &self.dict.revision)
            .field("authenticated", &self.file_key.is_some())
            .finish()
    }
}

impl SecurityHandler {
    /// Create a handler from a parsed `/Encrypt` dictionary and the first
    /// trailer `ID` string.
    pub fn new(dict: EncryptDict, file_id: Vec<u8>, provider: Arc<dyn CryptProvider>) -> Self {
        log::info!(
            "document is encrypted (V={}, R={}, {} -bit key)",
            dict.version,
            dict.revision,
            dict.key_length() * 8
        );
        Self {
            dict,
            file_id,
            provider,
            file_key: None,
        }
    }

    /// Attempt authentication with `password`, first as the user password,
    /// then through the owner-password path. On success the file key is
    /// retained; on failure any previous key is cleared.
    pub fn authenticate(&mut self, password: &[u8]) -> bool {
        if let Some(key) = self.try_user_password(password) {
            log::info!("user password accepted");
            self.file_key = Some(key);
            return true;
        }

        // Owner path: decrypt O with the owner password to recover the user
        // password, then authenticate with that.
        let recovered = algorithms::recover_user_password(
            password,
            &self.dict.owner_entry,
            self.dict.revision,
            self.dict.key_length(),
            self.provider.as_ref(),
        );
        if let Some(key) = self.try_user_password(&recovered) {
            log::info!("owner password accepted");
            self.file_key = Some(key);
            return true;
        }

        log::warn!("password rejected");
        self.file_key = None;
        false
    }

    fn try_user_password(&self, password: &[u8]) -> Option<Vec<u8>> {
        algorithms::authenticate_user_password(
            password,
            &self.dict.user_entry,
            &self.dict.owner_entry,
            self.dict.permissions,
            &self.file_id,
            self.dict.revision,
            self.dict.key_length(),
            self.dict.encrypt_metadata,
            self.provider.as_ref(),
        )
    }

    /// Whether a valid password has been applied.
    pub fn is_authenticated(&self) -> bool {
        self.file_key.is_some()
    }

    /// Drop the derived key (a failed re-authentication does this too).
    pub fn clear_key(&mut self) {
        self.file_key = None;
    }

    /// Access-level flags from the P entry.
    pub fn permissions(&self) -> Permissions {
        Permissions::from_p_value(self.dict.permissions)
    }

    /// The parsed encryption dictionary.
    pub fn encrypt_dict(&self) -> &EncryptDict {
        &self.dict
    }

    /// Whether metadata streams are encrypted.
    pub fn encrypts_metadata(&self) -> bool {
        self.dict.encrypt_metadata
    }

    /// Derive the per-object key: MD5 over file key, the low 3 bytes of the
    /// object number, the low 2 bytes of the generation, and (for AES) the
    /// `sAlT` marker; truncated to `min(file_key_len + 5, 16)`.
    fn object_key(&self, reference: ObjectRef, aes: bool) -> Result<Vec<u8>> {
        let file_key = self.file_key.as_ref().ok_or(Error::EncryptionRequired)?;
        let mut hasher = Md5::new();
        hasher.update(file_key);
        hasher.update(&reference.number.to_le_bytes()[..3]);
        hasher.update(&reference.generation.to_le_bytes()[..2]);
        if aes {
            hasher.update(b"sAlT");
        }
        let mut key = hasher.finalize().to_vec();
        key.truncate((file_key.len() + 5).min(16));
        Ok(key)
    }

    fn apply(
        &self,
        method: CryptMethod,
        data: &[u8],
        reference: ObjectRef,
        decrypt: bool,
    ) -> Result<Vec<u8>> {
        match method {
            CryptMethod::Identity => Ok(data.to_vec()),
            CryptMethod::Arc4 => {
                let key = self.object_key(reference, false)?;
                Ok(self.provider.arc4(&key, data))
            }
            CryptMethod::AesV2 => {
                let derived = self.object_key(reference, true)?;
                let mut key = [0u8; 16];
                key[..derived.len().min(16)].copy_from_slice(&derived[..derived.len().min(16)]);
                if decrypt {
                    // The IV is the first 16 bytes of the ciphertext
                    if data.len() < 16 {
                        return Err(Error::BadPassword);
                    }
                    let mut iv = [0u8; 16];
                    iv.copy_from_slice(&data[..16]);
                    self.provider.aes_cbc_decrypt(&key, &iv, &data[16..])
                } else {
                    // IV derived from key and length keeps output deterministic
                    let mut hasher = Md5::new();
                    hasher.update(key);
                    hasher.update((data.len() as u64).to_le_bytes());
                    let iv: [u8; 16] = hasher.finalize().into();
                    let mut out = iv.to_vec();
                    out.extend(self.provider.aes_cbc_encrypt(&key, &iv, data)?);
                    Ok(out)
                }
            }
        }
    }

    /// Decrypt string bytes stored in object `reference`.
    pub fn decrypt_string(&self, data: &[u8], reference: ObjectRef) -> Result<Vec<u8>> {
        self.apply(self.dict.string_method, data, reference, true)
    }

    /// Encrypt string bytes for object `reference`.
    pub fn encrypt_string(&self, data: &[u8], reference: ObjectRef) -> Result<Vec<u8>> {
        self.apply(self.dict.string_method, data, reference, false)
    }

    /// Decrypt a stream payload stored in object `reference`.
    pub fn decrypt_stream(&self, data: &[u8], reference: ObjectRef) -> Result<Vec<u8>> {
        self.apply(self.dict.stream_method, data, reference, true)
    }

    /// Encrypt a stream payload for object `reference`.
    pub fn encrypt_stream(&self, data: &[u8], reference: ObjectRef) -> Result<Vec<u8>> {
        self.apply(self.dict.stream_method, data, reference, false)
    }
}
