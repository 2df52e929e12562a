//! Key pair, event ids and Ed25519 signing.
//!
//! An event id is the SHA-256 of the JCS-canonical JSON array
//! `[0, pubkey, created_at, kind, tags, content]`. The signature is Ed25519
//! over the 32 id bytes, hex-encoded. Verifying signatures on ingested events
//! is the job of the ingestion layer and is not done here.

use ed25519_dalek::{Signer as _, SigningKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::{Event, UnsignedEvent};

/// Errors returned by [`Signer::sign`] and key loading.
#[derive(Debug, Error, PartialEq)]
pub enum SigningError {
    #[error("draft is authored by {draft}, but the signer is {signer}")]
    ForeignAuthor { draft: String, signer: String },
    #[error("seed must be 32 bytes of hex: {0}")]
    InvalidSeed(String),
    #[error("canonicalization failed: {0}")]
    Canonicalization(String),
}

/// Anything that can turn a draft into a signed [`Event`].
///
/// The engine only ever signs on behalf of the local viewer, so a signer
/// also answers "who am I".
pub trait Signer: Send + Sync {
    /// Hex public key of the local identity.
    fn public_key(&self) -> String;

    /// Assign an id and signature to `draft`.
    ///
    /// A draft with an empty `pubkey` is attributed to this signer.
    fn sign(&self, draft: UnsignedEvent) -> Result<Event, SigningError>;
}

/// An Ed25519 key pair.
///
/// The host is responsible for persisting the seed and passing it back on
/// restart.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh key pair using OS randomness.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore a key pair from a previously saved 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn from_seed_hex(seed: &str) -> Result<Self, SigningError> {
        let bytes = hex::decode(seed).map_err(|e| SigningError::InvalidSeed(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SigningError::InvalidSeed("wrong length".into()))?;
        Ok(Self::from_seed(&seed))
    }

    /// The raw 32-byte seed. **Keep this secret.**
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn seed_hex(&self) -> String {
        hex::encode(self.seed())
    }
}

impl Signer for Keypair {
    fn public_key(&self) -> String {
        hex::encode(self.signing_key.verifying_key().as_bytes())
    }

    fn sign(&self, mut draft: UnsignedEvent) -> Result<Event, SigningError> {
        let own = self.public_key();
        if draft.pubkey.is_empty() {
            draft.pubkey = own.clone();
        } else if draft.pubkey != own {
            return Err(SigningError::ForeignAuthor {
                draft: draft.pubkey,
                signer: own,
            });
        }

        let digest = id_digest(&draft)?;
        let signature = self.signing_key.sign(&digest);

        Ok(Event {
            id: hex::encode(digest),
            pubkey: draft.pubkey,
            created_at: draft.created_at,
            kind: draft.kind,
            tags: draft.tags,
            content: draft.content,
            sig: hex::encode(signature.to_bytes()),
        })
    }
}

/// The id an event with these fields must carry.
pub fn event_id(draft: &UnsignedEvent) -> Result<String, SigningError> {
    id_digest(draft).map(hex::encode)
}

fn id_digest(draft: &UnsignedEvent) -> Result<[u8; 32], SigningError> {
    let preimage = serde_json::json!([
        0,
        draft.pubkey,
        draft.created_at,
        draft.kind,
        draft.tags,
        draft.content,
    ]);
    let bytes =
        serde_jcs::to_vec(&preimage).map_err(|e| SigningError::Canonicalization(e.to_string()))?;
    Ok(Sha256::digest(&bytes).into())
}
