//! This library implements the distributed key generation (DKG) engine of a
//! threshold random-beacon client: a Pedersen/GJKR-style verifiable secret
//! sharing protocol in which N mutually distrusting peers cooperatively
//! produce a shared group public key and per-peer private key shares, such
//! that any T+1 of them can later reconstruct signatures while no single
//! party ever learns the group private key. Up to T corrupt or silent peers
//! are tolerated; their misbehavior is detected through public accusation
//! and justification phases and recorded for on-chain accountability.
//!
//! The protocol runs in twelve barrier-synchronized phases, with phase
//! boundaries driven by chain block heights so that every honest member
//! reaches identical disqualification decisions:
//!
//! 1. ephemeral key generation, 2. symmetric key derivation, 3. Pedersen
//! commitments and encrypted shares, 4. commitment verification,
//! 5. share justification, 6. qualification, 7. public key share points,
//! 8. share point verification, 9. points justification, 10. disqualified
//! share revelation, 11. reconstruction, 12. combination.
//!
//! # Usage
//!
//! Each member prepares a [`MemberContext`](dkg::MemberContext), joins the
//! run's broadcast channel, and hands both to a
//! [`DkgEngine`](dkg::DkgEngine) together with a chain adapter and the
//! agreed phase schedule:
//!
//! ```rust,ignore
//! let group = Group::from_roster(&roster)?;
//! let ctx = MemberContext::new(params, group, my_index, run)?;
//! let channel = network.join(run, my_index)?;
//! let schedule = PhaseSchedule::new(start_block, params.phase_duration_blocks());
//!
//! let engine = DkgEngine::new(ctx, channel, chain, schedule);
//! let output = engine.run(OsRng).await?;
//! output.publish(chain.as_ref()).await?;
//! ```
//!
//! On success every qualified member holds the same group public key and
//! its own private share; on abort (cancellation, too many disqualified
//! peers, chain failure) all secret material is zeroized before the engine
//! returns.
//!
//! The network transport and the chain are external collaborators behind
//! the [`bus::GroupTransport`] and [`chain::BeaconChain`] traits; in-process
//! implementations of both are provided for tests and local clusters.

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(future_incompatible)]

mod error;
pub use error::{DkgError, DkgResult};

/// Modular arithmetic helpers for the Pedersen group.
pub mod arith;
/// The message bus: framing, deduplication and phase filtering over an
/// authenticated broadcast transport.
pub mod bus;
/// The chain adapter contract and an in-process chain.
pub mod chain;
/// Group membership and the disqualification ledger.
pub mod group;
/// Public parameters and run identity.
pub mod parameters;

/// The key generation protocol itself.
pub mod dkg;

pub use dkg::{DkgEngine, MemberContext};

/// A deterministic 256-bit test group, available for tests and benchmarks.
///
/// `p` is a safe prime with `q = (p - 1) / 2`; `g` and `h` are squares of
/// hash-derived seeds, so both generate the order-q subgroup of quadratic
/// residues and `log_g h` is unknown.
pub mod testing {
    use num_bigint::BigUint;

    use crate::error::DkgResult;
    use crate::group::OperatorId;
    use crate::parameters::{PublicParameters, DEFAULT_PHASE_DURATION_BLOCKS};

    const TEST_PRIME_HEX: &str =
        "99437383fe7211d6f83247930268716e805844056d94759ddc7c88e65cb1c4db";
    const TEST_SUBGROUP_ORDER_HEX: &str =
        "4ca1b9c1ff3908eb7c1923c9813438b7402c2202b6ca3aceee3e44732e58e26d";
    const TEST_GENERATOR_G_HEX: &str =
        "2fad55a783ec30c17df60c5cf793abddedc287a8ef542c9a0aa84d1a5ef9a57f";
    const TEST_GENERATOR_H_HEX: &str =
        "339e18db3d9f758f40934e7d19d90fc0042b4f8b780fd820ff94e835217fb2aa";

    fn constant(hex: &str) -> BigUint {
        BigUint::parse_bytes(hex.as_bytes(), 16).expect("test constants are valid hex")
    }

    /// Assemble test parameters for an `(n, t)` group, surfacing validation
    /// failures.
    pub fn try_test_parameters(n: u32, t: u32) -> DkgResult<PublicParameters> {
        PublicParameters::new(
            n,
            t,
            constant(TEST_PRIME_HEX),
            constant(TEST_SUBGROUP_ORDER_HEX),
            constant(TEST_GENERATOR_G_HEX),
            constant(TEST_GENERATOR_H_HEX),
            DEFAULT_PHASE_DURATION_BLOCKS,
        )
    }

    /// Test parameters for a valid `(n, t)` group.
    pub fn test_parameters(n: u32, t: u32) -> PublicParameters {
        try_test_parameters(n, t).expect("valid test group configuration")
    }

    /// A roster of `n` distinct operator identities.
    pub fn test_roster(n: u32) -> Vec<OperatorId> {
        (1..=u64::from(n)).map(|i| 1000 + i).collect()
    }
}
