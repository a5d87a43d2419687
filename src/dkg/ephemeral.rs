//! Per-pair ephemeral key exchange and authenticated encryption of share
//! payloads.
//!
//! Before phase 1 every member samples one fresh elliptic-curve key pair per
//! peer. Both sides of a pair derive the same symmetric key from the
//! Diffie-Hellman shared point via HKDF with run-scoped domain separation,
//! and shares travel under AES-GCM so that a failed decryption is an
//! unforgeable accusation trigger.

use core::ops::Mul;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use ark_ec::Group;
use ark_ff::UniformRand;
use ark_secp256k1::{Fr, Projective};
use ark_serialize::CanonicalSerialize;
use hkdf::Hkdf;
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::dkg::pedersen::SharePair;
use crate::error::{DkgError, DkgResult};
use crate::group::MemberIndex;
use crate::parameters::RunTag;

const KEY_DERIVATION_CONTEXT: &[u8] = b"beacon-dkg/v1/symmetric-key";

/// The public half of one per-pair ephemeral key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EphemeralPublicKey(pub(crate) Projective);

impl EphemeralPublicKey {
    /// Compressed byte encoding of the curve point.
    pub fn to_bytes(&self) -> DkgResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.0
            .serialize_compressed(&mut bytes)
            .map_err(|_| DkgError::Protocol("ephemeral key compression failed".into()))?;
        Ok(bytes)
    }
}

/// The private half of one per-pair ephemeral key, zeroed on drop.
///
/// Revealed intentionally exactly once: inside a justification, where the
/// accused publishes the pair key so that every honest member can recompute
/// the symmetric key and re-adjudicate the accusation.
#[derive(Clone, Debug, PartialEq, Eq, Zeroize)]
pub struct EphemeralSecret(pub(crate) Fr);

impl Drop for EphemeralSecret {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl EphemeralSecret {
    /// The matching public half.
    pub fn public_key(&self) -> EphemeralPublicKey {
        EphemeralPublicKey(Projective::generator().mul(self.0))
    }
}

/// A per-pair ephemeral key pair.
#[derive(Clone, Debug)]
pub struct EphemeralKeyPair {
    /// The private half, kept local (until a justification demands it).
    pub secret: EphemeralSecret,
    /// The broadcast public half.
    pub public: EphemeralPublicKey,
}

impl EphemeralKeyPair {
    /// Sample a fresh key pair.
    pub fn generate(mut rng: impl RngCore + CryptoRng) -> Self {
        let secret = EphemeralSecret(Fr::rand(&mut rng));
        let public = secret.public_key();
        Self { secret, public }
    }
}

/// A derived pairwise symmetric key, zeroed on drop.
#[derive(Clone, Debug, PartialEq, Eq, Zeroize)]
pub struct SymmetricKey([u8; 32]);

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Derive the symmetric key shared by members `a` and `b` from one side's
/// ephemeral secret and the other side's ephemeral public key.
///
/// Both orientations of the pair produce the same key: the shared point is
/// symmetric and the domain-separation info orders the indices canonically.
pub fn derive_symmetric_key(
    secret: &EphemeralSecret,
    public: &EphemeralPublicKey,
    run: RunTag,
    a: MemberIndex,
    b: MemberIndex,
) -> DkgResult<SymmetricKey> {
    let shared = public.0.mul(secret.0);
    let mut shared_bytes = Vec::new();
    shared
        .serialize_compressed(&mut shared_bytes)
        .map_err(|_| DkgError::Protocol("shared point compression failed".into()))?;

    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut info = KEY_DERIVATION_CONTEXT.to_vec();
    info.extend_from_slice(&run.to_bytes());
    info.extend_from_slice(&lo.to_le_bytes());
    info.extend_from_slice(&hi.to_le_bytes());

    let hkdf = Hkdf::<Sha256>::new(None, &shared_bytes);
    let mut key = [0u8; 32];
    hkdf.expand(&info, &mut key)
        .map_err(|_| DkgError::Protocol("symmetric key expansion failed".into()))?;
    shared_bytes.zeroize();

    Ok(SymmetricKey(key))
}

/// An authenticated ciphertext carrying one encrypted share pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShareCiphertext {
    /// The AES-GCM nonce, fresh per packet.
    pub nonce: [u8; 12],
    /// Ciphertext plus authentication tag.
    pub bytes: Vec<u8>,
}

/// Encrypt a share pair under a pairwise symmetric key.
pub fn seal_shares(
    key: &SymmetricKey,
    shares: &SharePair,
    mut rng: impl RngCore + CryptoRng,
) -> DkgResult<ShareCiphertext> {
    let cipher = Aes256Gcm::new_from_slice(&key.0)
        .map_err(|_| DkgError::Protocol("symmetric key has the wrong length".into()))?;

    let mut nonce = [0u8; 12];
    rng.fill_bytes(&mut nonce);

    let mut plaintext = encode_share_pair(shares);
    let bytes = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
        .map_err(|_| DkgError::Protocol("share encryption failed".into()))?;
    plaintext.zeroize();

    Ok(ShareCiphertext { nonce, bytes })
}

/// Decrypt and decode a share pair.
///
/// Returns `None` on any authentication or framing failure. This is the
/// hard accusation trigger of phase 4, never a local error.
pub fn open_shares(key: &SymmetricKey, ciphertext: &ShareCiphertext) -> Option<SharePair> {
    let cipher = Aes256Gcm::new_from_slice(&key.0).ok()?;
    let mut plaintext = cipher
        .decrypt(Nonce::from_slice(&ciphertext.nonce), ciphertext.bytes.as_ref())
        .ok()?;
    let shares = decode_share_pair(&plaintext);
    plaintext.zeroize();
    shares
}

fn encode_share_pair(shares: &SharePair) -> Vec<u8> {
    let mut out = Vec::new();
    for scalar in [&shares.s, &shares.t] {
        let bytes = scalar.to_bytes_be();
        out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(&bytes);
    }
    out
}

fn decode_share_pair(bytes: &[u8]) -> Option<SharePair> {
    let mut cursor = bytes;
    let mut scalars = Vec::with_capacity(2);
    for _ in 0..2 {
        if cursor.len() < 2 {
            return None;
        }
        let len = u16::from_le_bytes([cursor[0], cursor[1]]) as usize;
        cursor = &cursor[2..];
        if cursor.len() < len {
            return None;
        }
        scalars.push(BigUint::from_bytes_be(&cursor[..len]));
        cursor = &cursor[len..];
    }
    if !cursor.is_empty() {
        return None;
    }
    let t = scalars.pop()?;
    let s = scalars.pop()?;
    Some(SharePair { s, t })
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::OsRng;

    fn run() -> RunTag {
        RunTag {
            group_id: 7,
            nonce: 3,
        }
    }

    #[test]
    fn both_sides_derive_the_same_key() {
        let ours = EphemeralKeyPair::generate(OsRng);
        let theirs = EphemeralKeyPair::generate(OsRng);

        let k_ab = derive_symmetric_key(&ours.secret, &theirs.public, run(), 1, 2).unwrap();
        let k_ba = derive_symmetric_key(&theirs.secret, &ours.public, run(), 2, 1).unwrap();
        assert_eq!(k_ab, k_ba);
    }

    #[test]
    fn different_runs_derive_different_keys() {
        let ours = EphemeralKeyPair::generate(OsRng);
        let theirs = EphemeralKeyPair::generate(OsRng);

        let first = derive_symmetric_key(&ours.secret, &theirs.public, run(), 1, 2).unwrap();
        let other_run = RunTag {
            group_id: 7,
            nonce: 4,
        };
        let second =
            derive_symmetric_key(&ours.secret, &theirs.public, other_run, 1, 2).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn sealed_shares_roundtrip() {
        let ours = EphemeralKeyPair::generate(OsRng);
        let theirs = EphemeralKeyPair::generate(OsRng);
        let key = derive_symmetric_key(&ours.secret, &theirs.public, run(), 1, 2).unwrap();

        let shares = SharePair {
            s: BigUint::from(123456789u64),
            t: BigUint::from(987654321u64),
        };
        let ciphertext = seal_shares(&key, &shares, OsRng).unwrap();
        assert_eq!(open_shares(&key, &ciphertext), Some(shares));
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let ours = EphemeralKeyPair::generate(OsRng);
        let theirs = EphemeralKeyPair::generate(OsRng);
        let key = derive_symmetric_key(&ours.secret, &theirs.public, run(), 1, 2).unwrap();
        let wrong = derive_symmetric_key(&ours.secret, &theirs.public, run(), 1, 3).unwrap();

        let shares = SharePair {
            s: BigUint::from(1u32),
            t: BigUint::from(2u32),
        };
        let ciphertext = seal_shares(&key, &shares, OsRng).unwrap();
        assert_eq!(open_shares(&wrong, &ciphertext), None);
    }

    #[test]
    fn tampered_ciphertext_fails_to_open() {
        let ours = EphemeralKeyPair::generate(OsRng);
        let theirs = EphemeralKeyPair::generate(OsRng);
        let key = derive_symmetric_key(&ours.secret, &theirs.public, run(), 1, 2).unwrap();

        let shares = SharePair {
            s: BigUint::from(5u32),
            t: BigUint::from(6u32),
        };
        let mut ciphertext = seal_shares(&key, &shares, OsRng).unwrap();
        ciphertext.bytes[0] ^= 0x01;
        assert_eq!(open_shares(&key, &ciphertext), None);
    }

    #[test]
    fn revealed_secret_matches_broadcast_public_half() {
        let pair = EphemeralKeyPair::generate(OsRng);
        assert_eq!(pair.secret.public_key(), pair.public);
    }
}
