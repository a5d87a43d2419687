//! Configurable public parameters for an instance of a beacon DKG run.

use num_bigint::BigUint;
use num_traits::One;

use crate::error::{DkgError, DkgResult};

/// Default number of blocks every member waits before closing a phase.
pub const DEFAULT_PHASE_DURATION_BLOCKS: u64 = 3;

/// The public, per-run configuration shared by every group member.
///
/// Carries the Pedersen group description (prime `p`, subgroup order `q`,
/// generators `g` and `h` with unknown `log_g h`), the group sizing
/// parameters and the per-phase timeout. All values are fixed before the
/// run starts and never change mid-run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicParameters {
    group_size: u32,
    dishonest_threshold: u32,
    prime: BigUint,
    subgroup_order: BigUint,
    generator_g: BigUint,
    generator_h: BigUint,
    phase_duration_blocks: u64,
}

impl PublicParameters {
    /// Validate and assemble a parameter set.
    ///
    /// Checks performed at startup, all of which indicate misconfiguration
    /// rather than peer behavior:
    ///  - `group_size >= 3` and `2 * dishonest_threshold + 1 <= group_size`,
    ///  - `q` divides `p - 1`,
    ///  - `g` and `h` are distinct non-identity elements of order `q`.
    ///
    /// `h != g^c` for known `c` is a trusted-setup assumption and cannot be
    /// checked here.
    pub fn new(
        group_size: u32,
        dishonest_threshold: u32,
        prime: BigUint,
        subgroup_order: BigUint,
        generator_g: BigUint,
        generator_h: BigUint,
        phase_duration_blocks: u64,
    ) -> DkgResult<Self> {
        if group_size < 3 {
            return Err(DkgError::Domain(format!(
                "group size {group_size} below the minimum of 3"
            )));
        }
        if 2 * dishonest_threshold + 1 > group_size {
            return Err(DkgError::Domain(format!(
                "dishonest threshold {dishonest_threshold} too large for group size {group_size}"
            )));
        }
        if phase_duration_blocks == 0 {
            return Err(DkgError::Domain("phase duration must be non-zero".into()));
        }

        let one = BigUint::one();
        if (&prime - &one) % &subgroup_order != BigUint::from(0u32) {
            return Err(DkgError::Domain(
                "subgroup order does not divide p - 1".into(),
            ));
        }
        for (name, generator) in [("g", &generator_g), ("h", &generator_h)] {
            if generator <= &one || generator >= &prime {
                return Err(DkgError::Domain(format!(
                    "generator {name} outside the multiplicative group"
                )));
            }
            if generator.modpow(&subgroup_order, &prime) != one {
                return Err(DkgError::Domain(format!(
                    "generator {name} does not have order q"
                )));
            }
        }
        if generator_g == generator_h {
            return Err(DkgError::Domain(
                "generators g and h must be distinct".into(),
            ));
        }

        Ok(Self {
            group_size,
            dishonest_threshold,
            prime,
            subgroup_order,
            generator_g,
            generator_h,
            phase_duration_blocks,
        })
    }

    /// The number of members in the group, `N`.
    pub fn group_size(&self) -> u32 {
        self.group_size
    }

    /// The dishonest threshold `T`: the run tolerates up to `T` corrupt or
    /// absent members.
    pub fn dishonest_threshold(&self) -> u32 {
        self.dishonest_threshold
    }

    /// The smallest number of members that can reconstruct a secret, `T + 1`.
    pub fn recovery_threshold(&self) -> u32 {
        self.dishonest_threshold + 1
    }

    /// Length of every commitment and share-point vector, `T + 1`.
    pub fn commitment_length(&self) -> usize {
        self.dishonest_threshold as usize + 1
    }

    /// The field prime `p`.
    pub fn prime(&self) -> &BigUint {
        &self.prime
    }

    /// The order `q` of the subgroup generated by `g` and `h`.
    pub fn subgroup_order(&self) -> &BigUint {
        &self.subgroup_order
    }

    /// The subgroup generator `g`.
    pub fn generator_g(&self) -> &BigUint {
        &self.generator_g
    }

    /// The subgroup generator `h`, with `log_g h` unknown to every party.
    pub fn generator_h(&self) -> &BigUint {
        &self.generator_h
    }

    /// The number of blocks each phase stays open.
    pub fn phase_duration_blocks(&self) -> u64 {
        self.phase_duration_blocks
    }
}

/// Identity of a single protocol run.
///
/// Every run is tagged with the group it belongs to and a per-run nonce.
/// The message bus rejects a second run carrying the same tag from the same
/// sender, and the tag is folded into the symmetric key derivation so that
/// keys never carry over between runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunTag {
    /// Identifier of the signing group, assigned at group formation.
    pub group_id: u64,
    /// Nonce distinguishing runs within the same group.
    pub nonce: u64,
}

impl RunTag {
    /// Stable byte encoding, used for key-derivation domain separation.
    pub fn to_bytes(self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.group_id.to_le_bytes());
        bytes[8..].copy_from_slice(&self.nonce.to_le_bytes());
        bytes
    }
}
