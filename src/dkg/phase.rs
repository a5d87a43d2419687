//! Protocol phase tags and the block-height schedule that closes them.
//!
//! The twelve phases run in a fixed order for every member. A member never
//! advances before its local deadline, even with every expected message in
//! hand, so that slow-but-honest peers observe the same per-phase message
//! sets and every member reaches identical disqualification decisions.

use core::fmt;

/// One phase of the distributed key generation protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    /// Phase 1: per-pair ephemeral key generation and broadcast.
    EphemeralKeyGen,
    /// Phase 2: symmetric key derivation from the exchanged ephemerals.
    SymmetricKeyDerive,
    /// Phase 3: Pedersen commitments and encrypted share distribution.
    Commit,
    /// Phase 4: share decryption, commitment verification, accusations.
    CommitmentVerify,
    /// Phase 5: justification of share accusations.
    SharesJustify,
    /// Phase 6: computation of the qualified set.
    Qualify,
    /// Phase 7: broadcast of public key share points.
    PublicKeyShare,
    /// Phase 8: verification of share points, accusations.
    PublicKeyShareVerify,
    /// Phase 9: justification of share-point accusations.
    PointsJustify,
    /// Phase 10: revelation of shares held for late-disqualified members.
    DisqualifiedShareReveal,
    /// Phase 11: reconstruction of late-disqualified members' keys.
    Reconstruct,
    /// Phase 12: combination into the group public key and final share.
    Combine,
}

impl Phase {
    /// Every phase, in protocol order.
    pub const ALL: [Phase; 12] = [
        Phase::EphemeralKeyGen,
        Phase::SymmetricKeyDerive,
        Phase::Commit,
        Phase::CommitmentVerify,
        Phase::SharesJustify,
        Phase::Qualify,
        Phase::PublicKeyShare,
        Phase::PublicKeyShareVerify,
        Phase::PointsJustify,
        Phase::DisqualifiedShareReveal,
        Phase::Reconstruct,
        Phase::Combine,
    ];

    /// One-based protocol phase number.
    pub fn number(self) -> u8 {
        Phase::ALL.iter().position(|p| *p == self).unwrap_or(0) as u8 + 1
    }

    /// The phase preceding this one, if any.
    pub fn previous(self) -> Option<Phase> {
        let n = self.number();
        if n <= 1 {
            None
        } else {
            Some(Phase::ALL[n as usize - 2])
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phase {} ({:?})", self.number(), self)
    }
}

/// Absolute block-height deadlines for every phase of one run.
///
/// Deadlines are derived from the run's agreed start block plus the
/// cumulative phase budget, so every member computes the same boundary
/// heights without further coordination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PhaseSchedule {
    start_block: u64,
    phase_duration: u64,
}

impl PhaseSchedule {
    /// Build the schedule for a run starting at `start_block`, with every
    /// phase open for `phase_duration` blocks.
    pub fn new(start_block: u64, phase_duration: u64) -> Self {
        Self {
            start_block,
            phase_duration,
        }
    }

    /// The block at which the run begins.
    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    /// The block height at which `phase` closes.
    pub fn deadline(&self, phase: Phase) -> u64 {
        self.start_block + u64::from(phase.number()) * self.phase_duration
    }

    /// The block height at which the whole run is over.
    pub fn end_block(&self) -> u64 {
        self.deadline(Phase::Combine)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn phases_are_numbered_in_order() {
        for (i, phase) in Phase::ALL.iter().enumerate() {
            assert_eq!(phase.number() as usize, i + 1);
        }
        assert_eq!(Phase::EphemeralKeyGen.previous(), None);
        assert_eq!(Phase::Combine.previous(), Some(Phase::Reconstruct));
    }

    #[test]
    fn deadlines_accumulate_from_start_block() {
        let schedule = PhaseSchedule::new(100, 5);
        assert_eq!(schedule.deadline(Phase::EphemeralKeyGen), 105);
        assert_eq!(schedule.deadline(Phase::Commit), 115);
        assert_eq!(schedule.end_block(), 160);
    }
}
