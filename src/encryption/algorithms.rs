//! Key derivation and password authentication for the Standard handler.
//!
//! Implements Algorithms 2-7 of ISO 32000-2 §7.6.4 for revisions 2-4. MD5 is
//! pinned by the file format here; only the ciphers go through the injected
//! provider.

use super::CryptProvider;
use md5::{Digest, Md5};

/// The canonical 32-byte password padding string (Algorithm 2, step a).
pub const PASSWORD_PAD: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01,
    0x08, 0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53,
    0x69, 0x7A,
];

/// Pad or truncate a password to exactly 32 bytes.
pub fn pad_password(password: &[u8]) -> [u8; 32] {
    let mut padded = [0u8; 32];
    let len = password.len().min(32);
    padded[..len].copy_from_slice(&password[..len]);
    padded[len..].copy_from_slice(&PASSWORD_PAD[..32 - len]);
    padded
}

/// Derive the file encryption key from a password (Algorithm 2).
#[allow(clippy::too_many_arguments)]
pub fn compute_file_key(
    password: &[u8],
    owner_entry: &[u8],
    permissions: i32,
    file_id: &[u8],
    revision: i64,
    key_length: usize,
    encrypt_metadata: bool,
) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(pad_password(password));
    hasher.update(owner_entry);
    hasher.update(permissions.to_le_bytes());
    hasher.update(file_id);
    if revision >= 4 && !encrypt_metadata {
        hasher.update([0xFF, 0xFF, 0xFF, 0xFF]);
    }
    let mut hash = hasher.finalize().to_vec();

    if revision >= 3 {
        for _ in 0..50 {
            let mut hasher = Md5::new();
            hasher.update(&hash[..key_length]);
            hash = hasher.finalize().to_vec();
        }
    }

    hash.truncate(key_length);
    hash
}

/// Expected U entry for revision 2 (Algorithm 4): ARC4 of the pad string.
pub fn compute_user_entry_r2(key: &[u8], provider: &dyn CryptProvider) -> Vec<u8> {
    provider.arc4(key, &PASSWORD_PAD)
}

/// Expected U entry for revision 3+ (Algorithm 5): MD5 of pad + file ID,
/// then 20 ARC4 passes with XOR-stepped keys. Only the first 16 bytes are
/// significant; the trailing 16 are arbitrary and zeroed here.
pub fn compute_user_entry_r3(key: &[u8], file_id: &[u8], provider: &dyn CryptProvider) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(PASSWORD_PAD);
    hasher.update(file_id);
    let mut hash = hasher.finalize().to_vec();

    for i in 0..20u8 {
        let stepped: Vec<u8> = key.iter().map(|&b| b ^ i).collect();
        hash = provider.arc4(&stepped, &hash);
    }

    hash.extend_from_slice(&[0u8; 16]);
    hash
}

/// Derive the ARC4 key protecting the O entry (Algorithm 3, steps a-d).
pub fn owner_key(owner_password: &[u8], revision: i64, key_length: usize) -> Vec<u8> {
    let mut hash = Md5::digest(pad_password(owner_password)).to_vec();
    if revision >= 3 {
        for _ in 0..50 {
            hash = Md5::digest(&hash).to_vec();
        }
    }
    hash.truncate(key_length);
    hash
}

/// Compute the O entry from the owner and user passwords (Algorithm 3).
pub fn compute_owner_entry(
    owner_password: &[u8],
    user_password: &[u8],
    revision: i64,
    key_length: usize,
    provider: &dyn CryptProvider,
) -> Vec<u8> {
    let key = owner_key(owner_password, revision, key_length);
    let mut data = pad_password(user_password).to_vec();
    if revision >= 3 {
        for i in 0..20u8 {
            let stepped: Vec<u8> = key.iter().map(|&b| b ^ i).collect();
            data = provider.arc4(&stepped, &data);
        }
    } else {
        data = provider.arc4(&key, &data);
    }
    data
}

/// Recover the (padded) user password from the O entry given the owner
/// password (Algorithm 7, decryption side).
pub fn recover_user_password(
    owner_password: &[u8],
    owner_entry: &[u8],
    revision: i64,
    key_length: usize,
    provider: &dyn CryptProvider,
) -> Vec<u8> {
    let key = owner_key(owner_password, revision, key_length);
    let mut data = owner_entry.to_vec();
    if revision >= 3 {
        for i in (0..20u8).rev() {
            let stepped: Vec<u8> = key.iter().map(|&b| b ^ i).collect();
            data = provider.arc4(&stepped, &data);
        }
    } else {
        data = provider.arc4(&key, &data);
    }
    data
}

/// Validate a user password (Algorithms 4/5 check). Returns the file key on
/// success.
#[allow(clippy::too_many_arguments)]
pub fn authenticate_user_password(
    password: &[u8],
    user_entry: &[u8],
    owner_entry: &[u8],
    permissions: i32,
    file_id: &[u8],
    revision: i64,
    key_length: usize,
    encrypt_metadata: bool,
    provider: &dyn CryptProvider,
) -> Option<Vec<u8>> {
    let key = compute_file_key(
        password,
        owner_entry,
        permissions,
        file_id,
        revision,
        key_length,
        encrypt_metadata,
    );
    let expected = if revision >= 3 {
        compute_user_entry_r3(&key, file_id, provider)
    } else {
        compute_user_entry_r2(&key, provider)
    };
    // Revision 3+ compares only the first 16 bytes
    let significant = if revision >= 3 { 16 } else { 32 };
    if user_entry.len() >= significant
        && constant_time_eq(&user_entry[..significant], &expected[..significant])
    {
        Some(key)
    } else {
        None
    }
}

/// Constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
