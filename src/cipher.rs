//! Stateful symmetric stream ciphers for the encrypted leg.
//!
//! A [`Cipher`] holds two independent keystream states — one consumed by
//! whichever task writes to the encrypted socket, one consumed by whichever
//! task reads from it — so that a single stream-wrapper instance can be
//! driven concurrently by the two copy tasks of a session without locking.
//! Each direction derives its own IV so both peers agree on per-direction
//! keystreams with no handshake.

use aes::{Aes128, Aes192, Aes256};
use cfb_mode::{BufDecryptor as CfbDecryptor, BufEncryptor as CfbEncryptor};
use cipher::generic_array::GenericArray;
use cipher::{consts::U16, KeyInit, KeyIvInit, StreamCipher as _};
use md5::{Digest, Md5};

use crate::config::Role;

/// Cipher tags this build accepts.
const KNOWN_METHODS: &[&str] = &["rc4", "rc4-md5", "aes-128-cfb", "aes-192-cfb", "aes-256-cfb"];

pub fn validate_method(method: &str) -> Result<(), UnknownMethod> {
    if KNOWN_METHODS.contains(&method) {
        Ok(())
    } else {
        Err(UnknownMethod)
    }
}

#[derive(Debug)]
pub struct UnknownMethod;

fn key_and_iv_len(method: &str) -> (usize, usize) {
    match method {
        "rc4" => (16, 0),
        "rc4-md5" => (16, 16),
        "aes-128-cfb" => (16, 16),
        "aes-192-cfb" => (24, 16),
        "aes-256-cfb" => (32, 16),
        _ => unreachable!("validate_method should have rejected this"),
    }
}

/// OpenSSL's classic `EVP_BytesToKey`-style password extension:
/// `D_i = MD5(D_{i-1} || secret)`, concatenated until `len` bytes are
/// produced.
fn extend_password(secret: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len + Md5::output_size());
    let mut prev: Vec<u8> = Vec::new();
    while out.len() < len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(secret);
        let digest = hasher.finalize();
        prev = digest.to_vec();
        out.extend_from_slice(&prev);
    }
    out.truncate(len);
    out
}

trait DirState: Send {
    fn apply(&mut self, data: &mut [u8]);
}

struct Rc4State(rc4::Rc4<U16>);

impl DirState for Rc4State {
    fn apply(&mut self, data: &mut [u8]) {
        self.0.apply_keystream(data);
    }
}

/// `cfb_mode`'s buffered encryptor/decryptor: unlike the plain
/// `Encryptor`/`Decryptor` (block-aligned, one-shot `encrypt`/`decrypt`
/// consuming `self`), the buffered variants implement `StreamCipher` and
/// carry partial-block state across calls, which is what lets `apply`
/// stream arbitrary, non-block-aligned read sizes the way RC4 does.
enum CfbState {
    Enc128(CfbEncryptor<Aes128>),
    Dec128(CfbDecryptor<Aes128>),
    Enc192(CfbEncryptor<Aes192>),
    Dec192(CfbDecryptor<Aes192>),
    Enc256(CfbEncryptor<Aes256>),
    Dec256(CfbDecryptor<Aes256>),
}

impl DirState for CfbState {
    fn apply(&mut self, data: &mut [u8]) {
        match self {
            CfbState::Enc128(c) => c.apply_keystream(data),
            CfbState::Dec128(c) => c.apply_keystream(data),
            CfbState::Enc192(c) => c.apply_keystream(data),
            CfbState::Dec192(c) => c.apply_keystream(data),
            CfbState::Enc256(c) => c.apply_keystream(data),
            CfbState::Dec256(c) => c.apply_keystream(data),
        }
    }
}

/// A constructed, per-session cipher. `encrypt`/`decrypt` each advance an
/// independent keystream; the stream wrapper guarantees at most one task
/// calls `encrypt` and at most one task calls `decrypt` concurrently.
pub struct Cipher {
    encrypt_state: Box<dyn DirState>,
    decrypt_state: Box<dyn DirState>,
}

impl Cipher {
    pub fn new(method: &str, secret: &[u8], role: Role) -> Result<Self, UnknownMethod> {
        validate_method(method)?;
        let (key_len, iv_len) = key_and_iv_len(method);
        let material = extend_password(secret, key_len + 2 * iv_len);
        let key = &material[..key_len];
        let slot_a = &material[key_len..key_len + iv_len];
        let slot_b = &material[key_len + iv_len..key_len + 2 * iv_len];

        let (encrypt_iv, decrypt_iv) = match role {
            Role::Client => (slot_a, slot_b),
            Role::Server => (slot_b, slot_a),
        };

        let key_arr = |k: &[u8]| GenericArray::<u8, U16>::clone_from_slice(k);

        let (encrypt_state, decrypt_state): (Box<dyn DirState>, Box<dyn DirState>) = match method
        {
            "rc4" => (
                Box::new(Rc4State(rc4::Rc4::new(GenericArray::from_slice(key)))),
                Box::new(Rc4State(rc4::Rc4::new(GenericArray::from_slice(key)))),
            ),
            "rc4-md5" => {
                let enc_key = key_arr(&md5_subkey(key, encrypt_iv));
                let dec_key = key_arr(&md5_subkey(key, decrypt_iv));
                (
                    Box::new(Rc4State(rc4::Rc4::new(&enc_key))),
                    Box::new(Rc4State(rc4::Rc4::new(&dec_key))),
                )
            }
            "aes-128-cfb" => (
                Box::new(CfbState::Enc128(CfbEncryptor::<Aes128>::new(
                    GenericArray::from_slice(key),
                    GenericArray::from_slice(encrypt_iv),
                ))),
                Box::new(CfbState::Dec128(CfbDecryptor::<Aes128>::new(
                    GenericArray::from_slice(key),
                    GenericArray::from_slice(decrypt_iv),
                ))),
            ),
            "aes-192-cfb" => (
                Box::new(CfbState::Enc192(CfbEncryptor::<Aes192>::new(
                    GenericArray::from_slice(key),
                    GenericArray::from_slice(encrypt_iv),
                ))),
                Box::new(CfbState::Dec192(CfbDecryptor::<Aes192>::new(
                    GenericArray::from_slice(key),
                    GenericArray::from_slice(decrypt_iv),
                ))),
            ),
            "aes-256-cfb" => (
                Box::new(CfbState::Enc256(CfbEncryptor::<Aes256>::new(
                    GenericArray::from_slice(key),
                    GenericArray::from_slice(encrypt_iv),
                ))),
                Box::new(CfbState::Dec256(CfbDecryptor::<Aes256>::new(
                    GenericArray::from_slice(key),
                    GenericArray::from_slice(decrypt_iv),
                ))),
            ),
            _ => unreachable!(),
        };

        Ok(Self {
            encrypt_state,
            decrypt_state,
        })
    }

    /// Encrypts `data` in place, advancing the encrypt keystream.
    pub fn encrypt(&mut self, data: &mut [u8]) {
        self.encrypt_state.apply(data);
    }

    /// Decrypts `data` in place, advancing the decrypt keystream.
    pub fn decrypt(&mut self, data: &mut [u8]) {
        self.decrypt_state.apply(data);
    }

    /// Splits the cipher into two single-owner halves so the two copy
    /// tasks of a session can each drive one keystream without sharing a
    /// `&mut Cipher` across tasks.
    pub fn into_halves(self) -> (EncryptHalf, DecryptHalf) {
        (
            EncryptHalf(self.encrypt_state),
            DecryptHalf(self.decrypt_state),
        )
    }
}

/// Owns the encrypt-direction keystream; used by whichever copy task writes
/// onto the encrypted leg.
pub struct EncryptHalf(Box<dyn DirState>);

impl EncryptHalf {
    pub fn apply(&mut self, data: &mut [u8]) {
        self.0.apply(data);
    }
}

/// Owns the decrypt-direction keystream; used by whichever copy task reads
/// from the encrypted leg.
pub struct DecryptHalf(Box<dyn DirState>);

impl DecryptHalf {
    pub fn apply(&mut self, data: &mut [u8]) {
        self.0.apply(data);
    }
}

fn md5_subkey(key: &[u8], iv: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(key);
    hasher.update(iv);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_method_rejected() {
        assert!(validate_method("xyz").is_err());
    }

    #[test]
    fn known_methods_accepted() {
        for m in KNOWN_METHODS {
            assert!(validate_method(m).is_ok());
        }
    }

    #[test]
    fn client_encrypt_matches_server_decrypt_rc4_md5() {
        let mut client = Cipher::new("rc4-md5", b"secret", Role::Client).unwrap();
        let mut server = Cipher::new("rc4-md5", b"secret", Role::Server).unwrap();

        let mut plaintext = b"hello tunnel world".to_vec();
        let original = plaintext.clone();

        client.encrypt(&mut plaintext);
        assert_ne!(plaintext, original);

        server.decrypt(&mut plaintext);
        assert_eq!(plaintext, original);
    }

    #[test]
    fn client_encrypt_matches_server_decrypt_aes256cfb() {
        let mut client = Cipher::new("aes-256-cfb", b"some secret", Role::Client).unwrap();
        let mut server = Cipher::new("aes-256-cfb", b"some secret", Role::Server).unwrap();

        let mut plaintext = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let original = plaintext.clone();

        client.encrypt(&mut plaintext);
        server.decrypt(&mut plaintext);
        assert_eq!(plaintext, original);
    }

    #[test]
    fn plain_rc4_has_no_iv_and_is_direction_symmetric() {
        let mut client = Cipher::new("rc4", b"secret", Role::Client).unwrap();
        let mut server = Cipher::new("rc4", b"secret", Role::Server).unwrap();

        let mut plaintext = vec![9u8, 8, 7, 6, 5, 4, 3, 2, 1];
        let original = plaintext.clone();

        client.encrypt(&mut plaintext);
        server.decrypt(&mut plaintext);
        assert_eq!(plaintext, original);
    }

    #[test]
    fn mismatched_secret_does_not_round_trip() {
        let mut client = Cipher::new("rc4", b"a", Role::Client).unwrap();
        let mut server = Cipher::new("rc4", b"b", Role::Server).unwrap();

        let mut plaintext = vec![1u8, 2, 3, 4, 5, 6, 7, 8];
        let original = plaintext.clone();

        client.encrypt(&mut plaintext);
        server.decrypt(&mut plaintext);
        assert_ne!(plaintext, original);
    }
}
