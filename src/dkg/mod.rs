//! The distributed key generation protocol: phase tags, per-member state,
//! message types and the async driver.

pub(crate) mod engine;
pub(crate) mod ephemeral;
pub(crate) mod member;
pub(crate) mod messages;
pub(crate) mod output;
pub(crate) mod pedersen;
pub(crate) mod phase;

pub use engine::DkgEngine;
pub use ephemeral::{
    derive_symmetric_key, open_shares, seal_shares, EphemeralKeyPair, EphemeralPublicKey,
    EphemeralSecret, ShareCiphertext, SymmetricKey,
};
pub use member::MemberContext;
pub use messages::{
    CommitmentsMessage, DisqualifiedSharesMessage, EphemeralPublicKeysMessage, JustifiedShare,
    MessageKind, Payload, PeerSharesMessage, PointsAccusationsMessage, PointsJustificationMessage,
    PublicKeySharePointsMessage, SharesAccusationsMessage, SharesJustificationMessage,
};
pub use output::{member_public_key, DkgOutput, SecretKeyShare};
pub use pedersen::{PedersenVss, PolynomialPair, SharePair};
pub use phase::{Phase, PhaseSchedule};
