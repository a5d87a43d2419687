//! Typed protocol messages exchanged over the group broadcast channel.
//!
//! Sender identity is carried by the envelope, which the bus stamps from the
//! authenticated channel membership; payloads never name their own sender.

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::BigUint;

use crate::dkg::ephemeral::{EphemeralPublicKey, EphemeralSecret, ShareCiphertext};
use crate::dkg::pedersen::SharePair;
use crate::dkg::phase::Phase;
use crate::group::MemberIndex;

/// Phase 1: the sender's ephemeral public keys, one per peer, keyed by the
/// peer the key is addressed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EphemeralPublicKeysMessage {
    /// Receiver index → public half of the sender's pair key for them.
    pub keys: BTreeMap<MemberIndex, EphemeralPublicKey>,
}

/// Phase 3: the sender's Pedersen commitment vector `C_0..C_T`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitmentsMessage {
    /// Commitments in ascending coefficient order.
    pub commitments: Vec<BigUint>,
}

/// Phase 3: the sender's encrypted shares, one packet per peer.
///
/// Packets are broadcast rather than unicast so that every member holds the
/// ciphertexts later needed to adjudicate accusations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerSharesMessage {
    /// Receiver index → authenticated ciphertext of `(s, t)` for them.
    pub packets: BTreeMap<MemberIndex, ShareCiphertext>,
}

/// Phase 4: dealers whose shares failed to decrypt or verify for the sender.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharesAccusationsMessage {
    /// Indices of the accused dealers.
    pub accused: BTreeSet<MemberIndex>,
}

/// One revealed response inside a justification: the pair's ephemeral
/// private key plus the plaintext shares, letting every member recompute the
/// symmetric key, reopen the original ciphertext and re-run the share check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JustifiedShare {
    /// Private half of the accused's ephemeral key toward the accuser. The
    /// public half broadcast in phase 1 authenticates this revelation.
    pub ephemeral_secret: EphemeralSecret,
    /// The plaintext shares the accused claims to have sent.
    pub shares: SharePair,
}

/// Phase 5: the accused sender's responses, one per accuser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharesJustificationMessage {
    /// Accuser index → revelation for that accuser.
    pub responses: BTreeMap<MemberIndex, JustifiedShare>,
}

/// Phase 7: the sender's public key share points `A_k = g^{a_k} mod p`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeySharePointsMessage {
    /// Share points in ascending coefficient order; `points[0]` is the
    /// sender's individual public key.
    pub points: Vec<BigUint>,
}

/// Phase 8: qualified members whose share points contradict the shares the
/// sender holds from them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointsAccusationsMessage {
    /// Indices of the accused members.
    pub accused: BTreeSet<MemberIndex>,
}

/// Phase 9: responses to share-point accusations, one per accuser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointsJustificationMessage {
    /// Accuser index → revelation for that accuser.
    pub responses: BTreeMap<MemberIndex, JustifiedShare>,
}

/// Phase 10: the shares the sender holds from members disqualified after
/// qualification, revealed so their keys can be reconstructed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisqualifiedSharesMessage {
    /// Disqualified member index → the share pair that member dealt to the
    /// sender.
    pub shares: BTreeMap<MemberIndex, SharePair>,
}

/// Any protocol message, as carried by an envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    /// Phase 1 broadcast.
    EphemeralPublicKeys(EphemeralPublicKeysMessage),
    /// Phase 3 broadcast (commitment half).
    Commitments(CommitmentsMessage),
    /// Phase 3 broadcast (encrypted share half).
    PeerShares(PeerSharesMessage),
    /// Phase 4 broadcast.
    SharesAccusations(SharesAccusationsMessage),
    /// Phase 5 broadcast.
    SharesJustification(SharesJustificationMessage),
    /// Phase 7 broadcast.
    PublicKeySharePoints(PublicKeySharePointsMessage),
    /// Phase 8 broadcast.
    PointsAccusations(PointsAccusationsMessage),
    /// Phase 9 broadcast.
    PointsJustification(PointsJustificationMessage),
    /// Phase 10 broadcast.
    DisqualifiedShares(DisqualifiedSharesMessage),
}

/// Discriminant of a [`Payload`], used for first-wins deduplication.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageKind {
    /// [`Payload::EphemeralPublicKeys`]
    EphemeralPublicKeys,
    /// [`Payload::Commitments`]
    Commitments,
    /// [`Payload::PeerShares`]
    PeerShares,
    /// [`Payload::SharesAccusations`]
    SharesAccusations,
    /// [`Payload::SharesJustification`]
    SharesJustification,
    /// [`Payload::PublicKeySharePoints`]
    PublicKeySharePoints,
    /// [`Payload::PointsAccusations`]
    PointsAccusations,
    /// [`Payload::PointsJustification`]
    PointsJustification,
    /// [`Payload::DisqualifiedShares`]
    DisqualifiedShares,
}

impl Payload {
    /// The deduplication discriminant.
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::EphemeralPublicKeys(_) => MessageKind::EphemeralPublicKeys,
            Payload::Commitments(_) => MessageKind::Commitments,
            Payload::PeerShares(_) => MessageKind::PeerShares,
            Payload::SharesAccusations(_) => MessageKind::SharesAccusations,
            Payload::SharesJustification(_) => MessageKind::SharesJustification,
            Payload::PublicKeySharePoints(_) => MessageKind::PublicKeySharePoints,
            Payload::PointsAccusations(_) => MessageKind::PointsAccusations,
            Payload::PointsJustification(_) => MessageKind::PointsJustification,
            Payload::DisqualifiedShares(_) => MessageKind::DisqualifiedShares,
        }
    }

    /// The phase this payload belongs to. The bus drops envelopes whose
    /// phase tag disagrees with their payload.
    pub fn phase(&self) -> Phase {
        match self {
            Payload::EphemeralPublicKeys(_) => Phase::EphemeralKeyGen,
            Payload::Commitments(_) | Payload::PeerShares(_) => Phase::Commit,
            Payload::SharesAccusations(_) => Phase::CommitmentVerify,
            Payload::SharesJustification(_) => Phase::SharesJustify,
            Payload::PublicKeySharePoints(_) => Phase::PublicKeyShare,
            Payload::PointsAccusations(_) => Phase::PublicKeyShareVerify,
            Payload::PointsJustification(_) => Phase::PointsJustify,
            Payload::DisqualifiedShares(_) => Phase::DisqualifiedShareReveal,
        }
    }
}
