//! Authenticated encryption and key derivation for at-rest page/WAL bytes.
//!
//! Mirrors the shape of `storage`/`buffer`: a small set of caller-provided
//! buffers in, caller-provided buffers (or freshly allocated `Vec`s) out, no
//! hidden global state. Every operation here is a pure function over key
//! material plus bytes; callers own the decision of *when* to encrypt
//! (buffer pool flush) and *what* AAD to bind (page id, LSN).

#[cfg(test)]
mod tests;

use aes_gcm::{
    Aes256Gcm, Key as AesKey, Nonce,
    aead::{Aead, KeyInit},
};
use argon2::{Algorithm, Argon2, Params, Version};
use common::{DbError, DbResult};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length in bytes of a derived key, a GCM nonce, and a KDF salt.
pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const SALT_LEN: usize = 16;

/// A 256-bit key derived from a passphrase. Zeroized on drop so a crash
/// dump or a reused stack frame never leaks it.
#[derive(Clone, ZeroizeOnDrop)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

/// Random salt persisted in the catalog header page, one per database.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt(pub [u8; SALT_LEN]);

impl Salt {
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Salt(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_LEN]) -> Self {
        Salt(bytes)
    }
}

/// Argon2id cost parameters. Defaults are deliberately modest so tests and
/// interactive `Open` calls don't stall; production deployments should raise
/// `memory_cost_kib` per their threat model.
#[derive(Clone, Copy, Debug)]
pub struct KdfParams {
    pub memory_cost_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        KdfParams {
            memory_cost_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Derives a 256-bit key from a passphrase and salt using Argon2id.
///
/// Per the crypto service's contract, this function itself cannot observe
/// whether the passphrase is correct — that's only discoverable via the
/// first authenticated [`open`] against real ciphertext.
pub fn derive_key(passphrase: &str, salt: &Salt, params: KdfParams) -> DbResult<Key> {
    let argon2 = Argon2::new(
        Algorithm::Argon2id,
        Version::V0x13,
        Params::new(
            params.memory_cost_kib,
            params.iterations,
            params.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| DbError::Corruption(format!("invalid KDF params: {e}")))?,
    );

    let mut out = [0u8; KEY_LEN];
    argon2
        .hash_password_into(passphrase.as_bytes(), &salt.0, &mut out)
        .map_err(|e| DbError::AuthError(format!("key derivation failed: {e}")))?;

    Ok(Key(out))
}

/// Ciphertext plus the nonce used to produce it. The AEAD tag is appended
/// to `ciphertext` by the underlying `aes-gcm` crate (the standard
/// nonce||ciphertext||tag framing), so callers only need to persist the two
/// fields below.
#[derive(Clone, Debug)]
pub struct Sealed {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Encrypts `plaintext` under `key`, binding the ciphertext to `aad` (the
/// page id or WAL LSN it belongs to) so a ciphertext copied to a different
/// logical slot fails to authenticate.
pub fn seal(key: &Key, aad: &[u8], plaintext: &[u8]) -> DbResult<Sealed> {
    let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key.as_bytes()));

    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            aes_gcm::aead::Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| DbError::AuthError(format!("seal failed: {e}")))?;

    Ok(Sealed {
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Decrypts and authenticates `ciphertext` under `key` and `aad`. Tag
/// mismatch (including a ciphertext sealed under the wrong AAD) surfaces as
/// [`DbError::AuthError`] — `aes-gcm` compares tags in constant time
/// internally, so this call is constant-time on the failure path by
/// construction rather than by any extra effort here.
pub fn open(key: &Key, aad: &[u8], nonce: &[u8; NONCE_LEN], ciphertext: &[u8]) -> DbResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(AesKey::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Nonce::from_slice(nonce);

    cipher
        .decrypt(
            nonce,
            aes_gcm::aead::Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| DbError::AuthError("ciphertext failed authentication".into()))
}

/// Zeroes a buffer that held key-derived material. Used by the buffer
/// pool's scratch-buffer release path (`§4.3`): only buffers that actually
/// carried plaintext derived from a key need this, plain page I/O buffers
/// don't pay the cost.
pub fn zeroize_buffer(buf: &mut [u8]) {
    buf.zeroize();
}
