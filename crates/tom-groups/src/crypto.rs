/// Cryptographic primitives for the group layer.
///
/// - Signatures: Ed25519 (the `NodeId` is the verifying key).
/// - Key wrapping: ephemeral X25519 Diffie-Hellman + XChaCha20-Poly1305,
///   used to hand a message's symmetric key to each recipient.
/// - Bodies: XChaCha20-Poly1305 under a random 32-byte symmetric key.
///
/// Ed25519 → X25519 conversion follows libsodium, so a node's identity
/// key doubles as its encryption key.
use chacha20poly1305::{
    aead::{
        rand_core::{OsRng, RngCore},
        Aead, KeyInit,
    },
    XChaCha20Poly1305, XNonce,
};
use curve25519_dalek::edwards::CompressedEdwardsY;
use ed25519_dalek::{Signer, SigningKey};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};

use crate::types::NodeId;
use crate::TomGroupError;

/// HKDF info string for domain separation.
const HKDF_INFO: &[u8] = b"tom-groups-keywrap-xchacha20poly1305-v1";

/// A 32-byte symmetric message key.
pub type SymmetricKey = [u8; 32];

/// Symmetric key sealed for one recipient.
///
/// Contains everything needed to unwrap: ciphertext, nonce, and the
/// sender's ephemeral X25519 public key for DH key recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// XChaCha20-Poly1305 ciphertext (includes 16-byte auth tag).
    pub ciphertext: Vec<u8>,
    /// 24-byte nonce.
    pub nonce: [u8; 24],
    /// Sender's ephemeral X25519 public key.
    pub ephemeral_pk: [u8; 32],
}

// ── Identity ─────────────────────────────────────────────────────────────

/// The local node's signing identity.
#[derive(Clone)]
pub struct LocalIdentity {
    seed: [u8; 32],
    id: NodeId,
}

impl LocalIdentity {
    /// Build an identity from a 32-byte Ed25519 secret seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let id = NodeId::from_bytes(signing_key.verifying_key().to_bytes());
        Self { seed, id }
    }

    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Secret seed (for decryption).
    pub fn secret_seed(&self) -> &[u8; 32] {
        &self.seed
    }

    /// Sign arbitrary bytes.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::from_bytes(&self.seed);
        signing_key.sign(data).to_bytes().to_vec()
    }
}

impl std::fmt::Debug for LocalIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalIdentity").field("id", &self.id).finish()
    }
}

/// Verify an Ed25519 signature made by `signer`.
///
/// Uses strict verification (rejects non-canonical signatures).
pub fn verify(signer: &NodeId, data: &[u8], signature: &[u8]) -> Result<(), TomGroupError> {
    let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&signer.as_bytes())
        .map_err(|_| TomGroupError::InvalidSignature)?;
    let sig_bytes: [u8; 64] = signature
        .try_into()
        .map_err(|_| TomGroupError::InvalidSignature)?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    verifying_key
        .verify_strict(data, &signature)
        .map_err(|_| TomGroupError::InvalidSignature)
}

// ── Symmetric bodies ─────────────────────────────────────────────────────

/// Generate a random symmetric key.
pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Encrypt a body under a symmetric key. Returns (ciphertext, nonce).
pub fn seal(plaintext: &[u8], key: &SymmetricKey) -> Result<(Vec<u8>, [u8; 24]), TomGroupError> {
    let cipher = XChaCha20Poly1305::new(&(*key).into());
    let mut nonce_bytes = [0u8; 24];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from(nonce_bytes);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| TomGroupError::Crypto(format!("encryption failed: {e}")))?;
    Ok((ciphertext, nonce_bytes))
}

/// Decrypt a body sealed with [`seal`].
pub fn open(
    ciphertext: &[u8],
    nonce: &[u8; 24],
    key: &SymmetricKey,
) -> Result<Vec<u8>, TomGroupError> {
    let cipher = XChaCha20Poly1305::new(&(*key).into());
    cipher
        .decrypt(&XNonce::from(*nonce), ciphertext)
        .map_err(|_| TomGroupError::Crypto("decryption failed: authentication error".into()))
}

// ── Key wrapping ─────────────────────────────────────────────────────────

/// Convert an Ed25519 public key to an X25519 public key.
pub fn ed25519_to_x25519_public(ed25519_pk: &[u8; 32]) -> Result<[u8; 32], TomGroupError> {
    let compressed = CompressedEdwardsY(*ed25519_pk);
    let edwards = compressed.decompress().ok_or_else(|| {
        TomGroupError::Crypto("invalid Ed25519 public key: decompression failed".into())
    })?;
    Ok(edwards.to_montgomery().to_bytes())
}

/// Convert an Ed25519 secret seed to an X25519 secret key.
///
/// SHA-512(seed), first 32 bytes, clamped.
pub fn ed25519_to_x25519_secret(ed25519_seed: &[u8; 32]) -> [u8; 32] {
    let hash = Sha512::digest(ed25519_seed);
    let mut secret = [0u8; 32];
    secret.copy_from_slice(&hash[..32]);
    secret[0] &= 248;
    secret[31] &= 127;
    secret[31] |= 64;
    secret
}

fn derive_key(shared_secret: &[u8; 32]) -> Result<[u8; 32], TomGroupError> {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret);
    let mut key = [0u8; 32];
    hkdf.expand(HKDF_INFO, &mut key)
        .map_err(|e| TomGroupError::Crypto(format!("hkdf expand: {e}")))?;
    Ok(key)
}

/// Seal `plaintext` for a recipient identified by their `NodeId`.
pub fn encrypt(plaintext: &[u8], recipient: &NodeId) -> Result<EncryptedPayload, TomGroupError> {
    let recipient_x25519 = X25519PublicKey::from(ed25519_to_x25519_public(&recipient.as_bytes())?);

    let ephemeral_secret = X25519Secret::random_from_rng(OsRng);
    let ephemeral_public = X25519PublicKey::from(&ephemeral_secret);

    let shared_secret = ephemeral_secret.diffie_hellman(&recipient_x25519);
    let key = derive_key(shared_secret.as_bytes())?;
    let (ciphertext, nonce) = seal(plaintext, &key)?;

    Ok(EncryptedPayload {
        ciphertext,
        nonce,
        ephemeral_pk: ephemeral_public.to_bytes(),
    })
}

/// Open an `EncryptedPayload` with the recipient's Ed25519 secret seed.
pub fn decrypt(
    payload: &EncryptedPayload,
    recipient_seed: &[u8; 32],
) -> Result<Vec<u8>, TomGroupError> {
    let x25519_secret = X25519Secret::from(ed25519_to_x25519_secret(recipient_seed));
    let ephemeral_pk = X25519PublicKey::from(payload.ephemeral_pk);
    let shared_secret = x25519_secret.diffie_hellman(&ephemeral_pk);
    let key = derive_key(shared_secret.as_bytes())?;
    open(&payload.ciphertext, &payload.nonce, &key)
}

/// Wrap a symmetric key for one recipient.
pub fn wrap_key(key: &SymmetricKey, recipient: &NodeId) -> Result<EncryptedPayload, TomGroupError> {
    encrypt(key, recipient)
}

/// Unwrap a symmetric key addressed to us.
pub fn unwrap_key(
    wrapped: &EncryptedPayload,
    identity: &LocalIdentity,
) -> Result<SymmetricKey, TomGroupError> {
    let bytes = decrypt(wrapped, identity.secret_seed())?;
    bytes
        .try_into()
        .map_err(|_| TomGroupError::Crypto("unwrapped key has wrong length".into()))
}
