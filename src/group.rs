//! Group membership roster and the disqualification ledger.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::dkg::Phase;
use crate::error::{DkgError, DkgResult};

/// A member's position in the group, `1..=N`. Member indices double as the
/// evaluation points of the secret-sharing polynomials and are fixed at
/// group formation.
pub type MemberIndex = u32;

/// On-chain identity of the operator behind a member index.
pub type OperatorId = u64;

/// The kind of peer misbehavior recorded on the ledger.
///
/// Misbehavior never aborts a run by itself; it is accumulated here and
/// reported to the caller for on-chain accountability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Misbehavior {
    /// The member's ephemeral public keys never arrived, or did not cover
    /// the whole group.
    MissingEphemeralKeys,
    /// The member's commitments or encrypted shares never arrived.
    MissingCommitments,
    /// The member broadcast a commitment vector of the wrong length.
    MalformedCommitments,
    /// A share accusation against the member was sustained.
    FailedShareJustification,
    /// The member accused a peer whose revelation proved the share valid.
    FalseShareAccusation,
    /// The member's public key share points never arrived or were malformed.
    MissingSharePoints,
    /// A share-point accusation against the member was sustained.
    FailedPointJustification,
    /// The member accused a peer whose revelation proved the points valid.
    FalsePointAccusation,
}

/// Why and when a member was excluded from the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Disqualification {
    /// The phase whose closing barrier recorded the exclusion.
    pub phase: Phase,
    /// The observed misbehavior.
    pub kind: Misbehavior,
}

/// Per-operator accountability data handed to the caller on termination,
/// suitable as input to on-chain slashing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisqualificationReport {
    /// Operators excluded from the run, with cause.
    pub disqualified: BTreeMap<OperatorId, Disqualification>,
    /// Operators that went silent but were not (yet) disqualified.
    pub inactive: Vec<OperatorId>,
}

/// The membership roster of one signing group together with its
/// disqualification ledger.
///
/// The ledger grows monotonically: a member, once disqualified, stays
/// disqualified, and the first recorded cause wins. All ledger updates are
/// driven by broadcast-visible evidence so that every honest member reaches
/// the same ledger state from the same message log.
#[derive(Clone, Debug)]
pub struct Group {
    operators: BTreeMap<MemberIndex, OperatorId>,
    inactive: BTreeSet<MemberIndex>,
    disqualified: BTreeMap<MemberIndex, Disqualification>,
}

impl Group {
    /// Build a group from the bootstrap roster. Member `i` is the operator
    /// at roster position `i - 1`.
    pub fn from_roster(roster: &[OperatorId]) -> DkgResult<Self> {
        let mut operators = BTreeMap::new();
        let mut seen = BTreeSet::new();
        for (position, &operator) in roster.iter().enumerate() {
            if !seen.insert(operator) {
                return Err(DkgError::Domain(format!(
                    "operator {operator} appears twice in the roster"
                )));
            }
            operators.insert(position as MemberIndex + 1, operator);
        }
        Ok(Self {
            operators,
            inactive: BTreeSet::new(),
            disqualified: BTreeMap::new(),
        })
    }

    /// Number of members in the roster.
    pub fn size(&self) -> u32 {
        self.operators.len() as u32
    }

    /// All member indices, in order.
    pub fn member_indices(&self) -> impl Iterator<Item = MemberIndex> + '_ {
        self.operators.keys().copied()
    }

    /// Whether `index` belongs to the roster at all.
    pub fn is_member(&self, index: MemberIndex) -> bool {
        self.operators.contains_key(&index)
    }

    /// The operator behind a member index.
    pub fn operator_of(&self, index: MemberIndex) -> Option<OperatorId> {
        self.operators.get(&index).copied()
    }

    /// The member index of an operator.
    pub fn index_of(&self, operator: OperatorId) -> Option<MemberIndex> {
        self.operators
            .iter()
            .find(|(_, op)| **op == operator)
            .map(|(index, _)| *index)
    }

    /// Record that a member went silent. Inactivity is a demotion step, not
    /// yet a disqualification.
    pub fn mark_inactive(&mut self, index: MemberIndex) {
        if self.is_member(index) {
            self.inactive.insert(index);
        }
    }

    /// Whether the member is currently marked inactive.
    pub fn is_inactive(&self, index: MemberIndex) -> bool {
        self.inactive.contains(&index)
    }

    /// Members currently marked inactive.
    pub fn inactive_members(&self) -> impl Iterator<Item = MemberIndex> + '_ {
        self.inactive.iter().copied()
    }

    /// Exclude a member from the run. Idempotent: the first recorded cause
    /// wins and later calls are ignored.
    pub fn disqualify(&mut self, index: MemberIndex, phase: Phase, kind: Misbehavior) {
        if !self.is_member(index) || self.disqualified.contains_key(&index) {
            return;
        }
        warn!(member = index, %phase, ?kind, "disqualifying group member");
        self.disqualified
            .insert(index, Disqualification { phase, kind });
    }

    /// Whether the member may still participate.
    pub fn is_eligible(&self, index: MemberIndex) -> bool {
        self.is_member(index) && !self.disqualified.contains_key(&index)
    }

    /// All members not (yet) disqualified, in index order.
    pub fn eligible_members(&self) -> BTreeSet<MemberIndex> {
        self.operators
            .keys()
            .copied()
            .filter(|index| !self.disqualified.contains_key(index))
            .collect()
    }

    /// Members disqualified during any of the given phases.
    pub fn disqualified_during(&self, phases: &[Phase]) -> BTreeSet<MemberIndex> {
        self.disqualified
            .iter()
            .filter(|(_, dq)| phases.contains(&dq.phase))
            .map(|(index, _)| *index)
            .collect()
    }

    /// The recorded disqualification for a member, if any.
    pub fn disqualification_of(&self, index: MemberIndex) -> Option<&Disqualification> {
        self.disqualified.get(&index)
    }

    /// Assemble the accountability report, keyed by operator identity.
    pub fn report(&self) -> DisqualificationReport {
        DisqualificationReport {
            disqualified: self
                .disqualified
                .iter()
                .filter_map(|(index, dq)| self.operator_of(*index).map(|op| (op, *dq)))
                .collect(),
            inactive: self
                .inactive
                .iter()
                .copied()
                .filter(|index| !self.disqualified.contains_key(index))
                .filter_map(|index| self.operator_of(index))
                .collect(),
        }
    }
}
