use crate::error::CoreError;
use crate::time::now_ms;
use blake3::Hasher;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use courier_api::types::Envelope;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

const SHARED_KEY_CONTEXT: &[u8] = b"courier:shared-key:v1";
const KEY_ID_CONTEXT: &[u8] = b"courier:key-id:v1";
const SIGNATURE_CONTEXT: &[u8] = b"courier:envelope-sig:v1";

pub const NONCE_LEN: usize = 24;

#[derive(Clone)]
pub struct KeyPair {
    pub dh_private: StaticSecret,
    pub dh_public: [u8; 32],
    pub signing: SigningKey,
    pub key_id: String,
    pub created_at: u64,
    pub expires_at: Option<u64>,
}

impl KeyPair {
    pub fn verifying_key(&self) -> [u8; 32] {
        VerifyingKey::from(&self.signing).to_bytes()
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

#[derive(Clone)]
pub struct SharedKey {
    bytes: [u8; 32],
    pub key_id: String,
}

impl std::fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedKey")
            .field("bytes", &"<redacted>")
            .field("key_id", &self.key_id)
            .finish()
    }
}

pub fn generate_keypair(expires_at: Option<u64>) -> Result<KeyPair, CoreError> {
    let mut dh_seed = [0u8; 32];
    let mut sig_seed = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut dh_seed)
        .map_err(|_| CoreError::KeyExchange)?;
    OsRng
        .try_fill_bytes(&mut sig_seed)
        .map_err(|_| CoreError::KeyExchange)?;
    let dh_private = StaticSecret::from(dh_seed);
    let dh_public = PublicKey::from(&dh_private).to_bytes();
    let signing = SigningKey::from_bytes(&sig_seed);
    Ok(KeyPair {
        key_id: short_id(KEY_ID_CONTEXT, &[&dh_public]),
        dh_private,
        dh_public,
        signing,
        created_at: now_ms(),
        expires_at,
    })
}

/// Per-pair symmetric key; commutative, both ends derive the same key
/// and key id.
pub fn derive_shared_key(
    mine: &KeyPair,
    their_dh_public: &[u8; 32],
) -> Result<SharedKey, CoreError> {
    if mine.is_expired(now_ms()) {
        return Err(CoreError::KeyExchange);
    }
    let shared = mine
        .dh_private
        .diffie_hellman(&PublicKey::from(*their_dh_public));
    let hkdf = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut bytes = [0u8; 32];
    hkdf.expand(SHARED_KEY_CONTEXT, &mut bytes)
        .map_err(|_| CoreError::KeyExchange)?;
    let (left, right) = if mine.dh_public <= *their_dh_public {
        (&mine.dh_public, their_dh_public)
    } else {
        (their_dh_public, &mine.dh_public)
    };
    Ok(SharedKey {
        bytes,
        key_id: short_id(KEY_ID_CONTEXT, &[left, right]),
    })
}

// Fresh random nonce per call; nonces must never repeat under one key.
pub fn encrypt(plaintext: &[u8], key: &SharedKey) -> Result<(Vec<u8>, [u8; NONCE_LEN]), CoreError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|_| CoreError::KeyExchange)?;
    let cipher = XChaCha20Poly1305::new_from_slice(&key.bytes).map_err(|_| CoreError::KeyExchange)?;
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: key.key_id.as_bytes(),
            },
        )
        .map_err(|_| CoreError::KeyExchange)?;
    Ok((ciphertext, nonce))
}

pub fn decrypt(
    ciphertext: &[u8],
    nonce: &[u8; NONCE_LEN],
    key: &SharedKey,
) -> Result<Vec<u8>, CoreError> {
    let cipher = XChaCha20Poly1305::new_from_slice(&key.bytes).map_err(|_| CoreError::KeyExchange)?;
    cipher
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: key.key_id.as_bytes(),
            },
        )
        .map_err(|_| CoreError::Decryption)
}

// Digest over the canonical field tuple only.
pub fn canonical_digest(envelope: &Envelope) -> [u8; 32] {
    let mut hasher = Hasher::new();
    hasher.update(SIGNATURE_CONTEXT);
    hasher.update(envelope.id.as_bytes());
    hasher.update(envelope.thread_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(envelope.sender.as_bytes());
    hasher.update(&[0]);
    hasher.update(envelope.recipient.as_bytes());
    hasher.update(&[0]);
    hasher.update(envelope.content.as_bytes());
    hasher.update(&envelope.timestamp.to_le_bytes());
    *hasher.finalize().as_bytes()
}

pub fn sign_envelope(envelope: &Envelope, signing: &SigningKey) -> [u8; 64] {
    let digest = canonical_digest(envelope);
    signing.sign(&digest).to_bytes()
}

pub fn verify_envelope(
    envelope: &Envelope,
    signature: &[u8],
    verifying: &[u8; 32],
) -> Result<(), CoreError> {
    let digest = canonical_digest(envelope);
    let key = VerifyingKey::from_bytes(verifying).map_err(|_| CoreError::Signature)?;
    let sig = Signature::from_slice(signature).map_err(|_| CoreError::Signature)?;
    key.verify(&digest, &sig).map_err(|_| CoreError::Signature)
}

fn short_id(context: &[u8], parts: &[&[u8; 32]]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(context);
    for part in parts {
        hasher.update(*part);
    }
    hex::encode(&hasher.finalize().as_bytes()[..8])
}
