//! The per-member protocol state and its phase transitions.
//!
//! A single [`MemberContext`] value carries one member through all twelve
//! phases; the driver feeds it the messages collected within each phase
//! window and invokes the matching transition at the barrier. Every
//! disqualification decision is derived from broadcast-visible evidence
//! only, so any two honest members with the same message log end up with
//! identical ledgers and identical qualified sets.

use std::collections::{BTreeMap, BTreeSet};

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::arith;
use crate::dkg::ephemeral::{
    derive_symmetric_key, open_shares, seal_shares, EphemeralKeyPair, EphemeralPublicKey,
    ShareCiphertext, SymmetricKey,
};
use crate::dkg::messages::{
    CommitmentsMessage, DisqualifiedSharesMessage, EphemeralPublicKeysMessage, JustifiedShare,
    PeerSharesMessage, PointsAccusationsMessage, PointsJustificationMessage,
    PublicKeySharePointsMessage, SharesAccusationsMessage, SharesJustificationMessage,
};
use crate::dkg::output::{DkgOutput, SecretKeyShare};
use crate::dkg::pedersen::{PedersenVss, PolynomialPair, SharePair};
use crate::dkg::phase::Phase;
use crate::error::{DkgError, DkgResult};
use crate::group::{Group, MemberIndex, Misbehavior};
use crate::parameters::{PublicParameters, RunTag};

/// Which public commitment a revealed share is checked against during
/// adjudication.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ShareCheck {
    /// The Pedersen commitment vector from phase 3.
    Commitments,
    /// The public key share points from phase 7.
    SharePoints,
}

/// One member's complete run state.
#[derive(Debug)]
pub struct MemberContext {
    params: PublicParameters,
    run: RunTag,
    me: MemberIndex,
    group: Group,

    // Phase 1-2 key material.
    ephemeral_pairs: BTreeMap<MemberIndex, EphemeralKeyPair>,
    peer_ephemeral: BTreeMap<MemberIndex, BTreeMap<MemberIndex, EphemeralPublicKey>>,
    symmetric_keys: BTreeMap<MemberIndex, SymmetricKey>,

    // Phase 3 dealing state.
    polynomial: Option<PolynomialPair>,
    self_share: Option<SharePair>,
    issued_shares: BTreeMap<MemberIndex, SharePair>,
    commitments: BTreeMap<MemberIndex, Vec<BigUint>>,
    share_packets: BTreeMap<MemberIndex, BTreeMap<MemberIndex, ShareCiphertext>>,

    // Phase 4-5 verification state.
    received_shares: BTreeMap<MemberIndex, SharePair>,
    share_accusers: BTreeMap<MemberIndex, BTreeSet<MemberIndex>>,

    // Phase 6-9 qualification state.
    qualified: BTreeSet<MemberIndex>,
    share_points: BTreeMap<MemberIndex, Vec<BigUint>>,
    point_accusers: BTreeMap<MemberIndex, BTreeSet<MemberIndex>>,

    // Phase 10-12 reconstruction and combination state.
    revealed_shares: BTreeMap<MemberIndex, BTreeMap<MemberIndex, SharePair>>,
    reconstructed: BTreeMap<MemberIndex, (BigUint, BigUint)>,
    group_public_key: Option<BigUint>,
    final_share: Option<BigUint>,
}

impl MemberContext {
    /// Build the run state for member `me` of `group`.
    pub fn new(
        params: PublicParameters,
        group: Group,
        me: MemberIndex,
        run: RunTag,
    ) -> DkgResult<Self> {
        if group.size() != params.group_size() {
            return Err(DkgError::Domain(format!(
                "roster size {} does not match configured group size {}",
                group.size(),
                params.group_size()
            )));
        }
        if !group.is_member(me) {
            return Err(DkgError::Domain(format!(
                "member index {me} is not on the roster"
            )));
        }
        Ok(Self {
            params,
            run,
            me,
            group,
            ephemeral_pairs: BTreeMap::new(),
            peer_ephemeral: BTreeMap::new(),
            symmetric_keys: BTreeMap::new(),
            polynomial: None,
            self_share: None,
            issued_shares: BTreeMap::new(),
            commitments: BTreeMap::new(),
            share_packets: BTreeMap::new(),
            received_shares: BTreeMap::new(),
            share_accusers: BTreeMap::new(),
            qualified: BTreeSet::new(),
            share_points: BTreeMap::new(),
            point_accusers: BTreeMap::new(),
            revealed_shares: BTreeMap::new(),
            reconstructed: BTreeMap::new(),
            group_public_key: None,
            final_share: None,
        })
    }

    /// This member's index.
    pub fn member_index(&self) -> MemberIndex {
        self.me
    }

    /// The run this context belongs to.
    pub fn run(&self) -> RunTag {
        self.run
    }

    /// The group ledger, for inspection.
    pub fn group(&self) -> &Group {
        &self.group
    }

    /// The qualified set, fixed in phase 6.
    pub fn qualified_members(&self) -> &BTreeSet<MemberIndex> {
        &self.qualified
    }

    // ----- Phase 1: ephemeral key generation ------------------------------

    /// Generate one ephemeral key pair per peer and assemble the broadcast
    /// announcing the public halves.
    pub fn generate_ephemeral_keys(
        &mut self,
        mut rng: impl RngCore + CryptoRng,
    ) -> EphemeralPublicKeysMessage {
        let mut keys = BTreeMap::new();
        for peer in self.group.member_indices().collect::<Vec<_>>() {
            if peer == self.me {
                continue;
            }
            let pair = EphemeralKeyPair::generate(&mut rng);
            keys.insert(peer, pair.public);
            self.ephemeral_pairs.insert(peer, pair);
        }
        // Our own broadcast also feeds the adjudication ledger.
        self.peer_ephemeral.insert(self.me, keys.clone());
        EphemeralPublicKeysMessage { keys }
    }

    /// Record a peer's phase-1 broadcast.
    pub fn record_ephemeral_keys(&mut self, sender: MemberIndex, message: EphemeralPublicKeysMessage) {
        if sender == self.me || !self.group.is_member(sender) {
            return;
        }
        self.peer_ephemeral.entry(sender).or_insert(message.keys);
    }

    /// Close phase 1: peers whose keys are missing, or do not cover the
    /// whole group, are marked inactive.
    pub fn close_ephemeral_phase(&mut self) {
        let members: Vec<MemberIndex> = self.group.member_indices().collect();
        for &peer in &members {
            if peer == self.me {
                continue;
            }
            let covers_group = self.peer_ephemeral.get(&peer).is_some_and(|keys| {
                members
                    .iter()
                    .all(|&receiver| receiver == peer || keys.contains_key(&receiver))
            });
            if !covers_group {
                debug!(member = self.me, peer, "missing ephemeral keys, marking inactive");
                self.group.mark_inactive(peer);
            }
        }
    }

    // ----- Phase 2: symmetric key derivation ------------------------------

    /// Derive the pairwise symmetric keys with every active peer.
    pub fn derive_symmetric_keys(&mut self) -> DkgResult<()> {
        let peers: Vec<MemberIndex> = self
            .group
            .member_indices()
            .filter(|&peer| peer != self.me && !self.group.is_inactive(peer))
            .collect();
        for peer in peers {
            let pair = self.ephemeral_pairs.get(&peer).ok_or_else(|| {
                DkgError::Protocol(format!("no ephemeral key pair generated for peer {peer}"))
            })?;
            let Some(their_key) = self
                .peer_ephemeral
                .get(&peer)
                .and_then(|keys| keys.get(&self.me))
            else {
                // Coverage was checked at the phase-1 barrier.
                self.group.mark_inactive(peer);
                continue;
            };
            let key = derive_symmetric_key(&pair.secret, their_key, self.run, self.me, peer)?;
            self.symmetric_keys.insert(peer, key);
        }
        Ok(())
    }

    /// Close phase 2: peers still inactive after two missed deadlines are
    /// disqualified.
    pub fn close_symmetric_phase(&mut self) {
        for peer in self.group.inactive_members().collect::<Vec<_>>() {
            self.group.disqualify(
                peer,
                Phase::SymmetricKeyDerive,
                Misbehavior::MissingEphemeralKeys,
            );
        }
    }

    // ----- Phase 3: commitments and encrypted shares ----------------------

    /// Sample the secret polynomial pair, commit to it, and encrypt one
    /// share pair per active peer.
    pub fn commitments_and_shares(
        &mut self,
        mut rng: impl RngCore + CryptoRng,
    ) -> DkgResult<(CommitmentsMessage, PeerSharesMessage)> {
        let polynomial = PolynomialPair::random(
            self.params.dishonest_threshold(),
            self.params.subgroup_order(),
            &mut rng,
        );
        let vss = PedersenVss::new(&self.params);
        let commitments = vss.commit(&polynomial)?;

        let mut packets = BTreeMap::new();
        for peer in self.group.eligible_members() {
            if peer == self.me {
                continue;
            }
            let share = vss.evaluate(&polynomial, peer);
            let key = self.symmetric_keys.get(&peer).ok_or_else(|| {
                DkgError::Protocol(format!("no symmetric key for eligible peer {peer}"))
            })?;
            packets.insert(peer, seal_shares(key, &share, &mut rng)?);
            self.issued_shares.insert(peer, share);
        }

        let self_share = vss.evaluate(&polynomial, self.me);
        self.received_shares.insert(self.me, self_share.clone());
        self.self_share = Some(self_share);
        self.commitments.insert(self.me, commitments.clone());
        self.share_packets.insert(self.me, packets.clone());
        self.polynomial = Some(polynomial);

        Ok((
            CommitmentsMessage { commitments },
            PeerSharesMessage { packets },
        ))
    }

    /// Record a dealer's phase-3 commitment broadcast.
    pub fn record_commitments(&mut self, sender: MemberIndex, message: CommitmentsMessage) {
        if sender == self.me || !self.group.is_eligible(sender) {
            return;
        }
        self.commitments.entry(sender).or_insert(message.commitments);
    }

    /// Record a dealer's phase-3 encrypted share broadcast.
    pub fn record_peer_shares(&mut self, sender: MemberIndex, message: PeerSharesMessage) {
        if sender == self.me || !self.group.is_eligible(sender) {
            return;
        }
        self.share_packets.entry(sender).or_insert(message.packets);
    }

    /// Close phase 3: dealers whose commitments or packets are missing or
    /// malformed are disqualified.
    pub fn close_commitment_phase(&mut self) {
        let eligible = self.group.eligible_members();
        let prime = self.params.prime().clone();
        for &dealer in &eligible {
            if dealer == self.me {
                continue;
            }
            match self.commitments.get(&dealer) {
                None => {
                    self.group
                        .disqualify(dealer, Phase::Commit, Misbehavior::MissingCommitments);
                    continue;
                }
                Some(commitments) => {
                    let well_formed = commitments.len() == self.params.commitment_length()
                        && commitments
                            .iter()
                            .all(|c| !c.is_zero() && c < &prime);
                    if !well_formed {
                        self.group.disqualify(
                            dealer,
                            Phase::Commit,
                            Misbehavior::MalformedCommitments,
                        );
                        continue;
                    }
                }
            }
            let covers_group = self.share_packets.get(&dealer).is_some_and(|packets| {
                eligible
                    .iter()
                    .all(|&receiver| receiver == dealer || packets.contains_key(&receiver))
            });
            if !covers_group {
                self.group
                    .disqualify(dealer, Phase::Commit, Misbehavior::MissingCommitments);
            }
        }
    }

    // ----- Phase 4: commitment verification -------------------------------

    /// Decrypt and verify every received share; returns the accusation
    /// broadcast if any dealer's share failed.
    pub fn verify_received_shares(&mut self) -> Option<SharesAccusationsMessage> {
        let vss = PedersenVss::new(&self.params);
        let mut accused = BTreeSet::new();

        for dealer in self.group.eligible_members() {
            if dealer == self.me {
                continue;
            }
            let Some(commitments) = self.commitments.get(&dealer) else {
                continue;
            };
            let Some(key) = self.symmetric_keys.get(&dealer) else {
                accused.insert(dealer);
                continue;
            };
            let Some(packet) = self
                .share_packets
                .get(&dealer)
                .and_then(|packets| packets.get(&self.me))
            else {
                accused.insert(dealer);
                continue;
            };
            match open_shares(key, packet) {
                Some(share) if vss.verify_share(self.me, &share, commitments) => {
                    self.received_shares.insert(dealer, share);
                }
                _ => {
                    warn!(member = self.me, dealer, "received share failed verification");
                    accused.insert(dealer);
                }
            }
        }

        for &dealer in &accused {
            self.share_accusers.entry(dealer).or_default().insert(self.me);
        }
        if accused.is_empty() {
            None
        } else {
            Some(SharesAccusationsMessage { accused })
        }
    }

    /// Record a peer's phase-4 accusations. Repeated accusations of the
    /// same pair are idempotent; the first one wins.
    pub fn record_share_accusations(&mut self, sender: MemberIndex, message: SharesAccusationsMessage) {
        if sender == self.me || !self.group.is_eligible(sender) {
            return;
        }
        for accused in message.accused {
            if accused == sender || !self.group.is_eligible(accused) {
                continue;
            }
            self.share_accusers.entry(accused).or_default().insert(sender);
        }
    }

    // ----- Phase 5: share accusation justification ------------------------

    /// If this member stands accused, reveal the pair keys and plaintext
    /// shares for every accuser.
    pub fn justify_share_accusations(&self) -> Option<SharesJustificationMessage> {
        let responses = self.respond_to_accusers(self.share_accusers.get(&self.me)?);
        if responses.is_empty() {
            None
        } else {
            Some(SharesJustificationMessage { responses })
        }
    }

    /// Adjudicate every share accusation against the collected
    /// justifications and update the ledger.
    pub fn resolve_share_accusations(
        &mut self,
        justifications: &BTreeMap<MemberIndex, SharesJustificationMessage>,
    ) {
        let accusations = self.share_accusers.clone();
        for (accused, accusers) in accusations {
            for accuser in accusers {
                if !self.group.is_eligible(accused) {
                    break;
                }
                if !self.group.is_eligible(accuser) {
                    continue;
                }
                let response = justifications
                    .get(&accused)
                    .and_then(|message| message.responses.get(&accuser));
                match response {
                    Some(response)
                        if self.revelation_is_consistent(
                            accused,
                            accuser,
                            response,
                            ShareCheck::Commitments,
                        ) =>
                    {
                        // The share was valid all along; the accusation was
                        // baseless and the revealed share is usable.
                        self.group.disqualify(
                            accuser,
                            Phase::SharesJustify,
                            Misbehavior::FalseShareAccusation,
                        );
                        if accuser == self.me {
                            self.received_shares.insert(accused, response.shares.clone());
                        }
                    }
                    _ => {
                        self.group.disqualify(
                            accused,
                            Phase::SharesJustify,
                            Misbehavior::FailedShareJustification,
                        );
                    }
                }
            }
        }
    }

    // ----- Phase 6: qualification -----------------------------------------

    /// Fix the qualified set. Fails the run when fewer than T+1 members
    /// survived phases 1-5.
    pub fn qualify(&mut self) -> DkgResult<()> {
        self.qualified = self.group.eligible_members();
        let required = self.params.recovery_threshold() as usize;
        if self.qualified.len() < required {
            return Err(DkgError::InsufficientQualifiedMembers {
                qualified: self.qualified.len(),
                required,
            });
        }
        debug!(member = self.me, qualified = self.qualified.len(), "qualified set fixed");
        Ok(())
    }

    // ----- Phase 7: public key share points -------------------------------

    /// Compute and announce `A_k = g^{a_k} mod p`, if this member is
    /// qualified.
    pub fn share_points_message(&mut self) -> Option<PublicKeySharePointsMessage> {
        if !self.qualified.contains(&self.me) || !self.group.is_eligible(self.me) {
            return None;
        }
        let polynomial = self.polynomial.as_ref()?;
        let p = self.params.prime();
        let g = self.params.generator_g();
        let points: Vec<BigUint> = polynomial
            .secret_coefficients()
            .iter()
            .map(|a_k| g.modpow(a_k, p))
            .collect();
        self.share_points.insert(self.me, points.clone());
        Some(PublicKeySharePointsMessage { points })
    }

    /// Record a qualified peer's share points. Malformed vectors
    /// disqualify immediately.
    pub fn record_share_points(&mut self, sender: MemberIndex, message: PublicKeySharePointsMessage) {
        if sender == self.me
            || !self.qualified.contains(&sender)
            || !self.group.is_eligible(sender)
        {
            return;
        }
        let prime = self.params.prime();
        let well_formed = message.points.len() == self.params.commitment_length()
            && message.points.iter().all(|a| !a.is_zero() && a < prime);
        if !well_formed {
            self.group
                .disqualify(sender, Phase::PublicKeyShare, Misbehavior::MissingSharePoints);
            return;
        }
        self.share_points.entry(sender).or_insert(message.points);
    }

    /// Close phase 7: qualified members that stayed silent lose their spot.
    pub fn close_points_phase(&mut self) {
        for member in self.qualified.clone() {
            if self.group.is_eligible(member) && !self.share_points.contains_key(&member) {
                self.group.disqualify(
                    member,
                    Phase::PublicKeyShare,
                    Misbehavior::MissingSharePoints,
                );
            }
        }
    }

    // ----- Phase 8: share point verification ------------------------------

    /// Check every qualified peer's points against the share it dealt us:
    /// `g^{s_ji} ≡ ∏_k A_{j,k}^{i^k} (mod p)`.
    pub fn verify_share_points(&mut self) -> Option<PointsAccusationsMessage> {
        let mut accused = BTreeSet::new();
        for &peer in &self.qualified {
            if peer == self.me || !self.group.is_eligible(peer) {
                continue;
            }
            let Some(points) = self.share_points.get(&peer) else {
                continue;
            };
            let Some(share) = self.received_shares.get(&peer) else {
                continue;
            };
            if !self.share_matches_points(self.me, &share.s, points) {
                warn!(member = self.me, peer, "share points contradict the dealt share");
                accused.insert(peer);
            }
        }
        for &peer in &accused {
            self.point_accusers.entry(peer).or_default().insert(self.me);
        }
        if accused.is_empty() {
            None
        } else {
            Some(PointsAccusationsMessage { accused })
        }
    }

    /// Record a peer's phase-8 accusations.
    pub fn record_point_accusations(&mut self, sender: MemberIndex, message: PointsAccusationsMessage) {
        if sender == self.me
            || !self.qualified.contains(&sender)
            || !self.group.is_eligible(sender)
        {
            return;
        }
        for accused in message.accused {
            if accused == sender || !self.qualified.contains(&accused) {
                continue;
            }
            self.point_accusers.entry(accused).or_default().insert(sender);
        }
    }

    // ----- Phase 9: share point justification -----------------------------

    /// If this member's points were challenged, reveal the pair keys and
    /// plaintext shares for every accuser.
    pub fn justify_point_accusations(&self) -> Option<PointsJustificationMessage> {
        let responses = self.respond_to_accusers(self.point_accusers.get(&self.me)?);
        if responses.is_empty() {
            None
        } else {
            Some(PointsJustificationMessage { responses })
        }
    }

    /// Adjudicate every share-point accusation, mirroring phase 5 but
    /// checking revelations against the phase-7 points.
    pub fn resolve_point_accusations(
        &mut self,
        justifications: &BTreeMap<MemberIndex, PointsJustificationMessage>,
    ) {
        let accusations = self.point_accusers.clone();
        for (accused, accusers) in accusations {
            for accuser in accusers {
                if !self.group.is_eligible(accused) {
                    break;
                }
                if !self.group.is_eligible(accuser) {
                    continue;
                }
                let response = justifications
                    .get(&accused)
                    .and_then(|message| message.responses.get(&accuser));
                match response {
                    Some(response)
                        if self.revelation_is_consistent(
                            accused,
                            accuser,
                            response,
                            ShareCheck::SharePoints,
                        ) =>
                    {
                        self.group.disqualify(
                            accuser,
                            Phase::PointsJustify,
                            Misbehavior::FalsePointAccusation,
                        );
                    }
                    _ => {
                        self.group.disqualify(
                            accused,
                            Phase::PointsJustify,
                            Misbehavior::FailedPointJustification,
                        );
                    }
                }
            }
        }
    }

    // ----- Phase 10: disqualified share revelation ------------------------

    /// Members that entered phase 7 qualified but were disqualified since.
    /// Their contributions stay in the group key, so their individual keys
    /// must be reconstructed.
    pub fn reconstruction_set(&self) -> BTreeSet<MemberIndex> {
        let late_phases = [
            Phase::PublicKeyShare,
            Phase::PublicKeyShareVerify,
            Phase::PointsJustify,
        ];
        self.group
            .disqualified_during(&late_phases)
            .intersection(&self.qualified)
            .copied()
            .collect()
    }

    /// Reveal the shares this member holds from every late-disqualified
    /// member.
    pub fn revealed_shares_message(&self) -> Option<DisqualifiedSharesMessage> {
        if !self.qualified.contains(&self.me) || !self.group.is_eligible(self.me) {
            return None;
        }
        let shares: BTreeMap<MemberIndex, SharePair> = self
            .reconstruction_set()
            .into_iter()
            .filter_map(|member| {
                self.received_shares
                    .get(&member)
                    .map(|share| (member, share.clone()))
            })
            .collect();
        if shares.is_empty() {
            None
        } else {
            Some(DisqualifiedSharesMessage { shares })
        }
    }

    /// Record shares revealed by a qualified peer, dropping any that fail
    /// the original commitment check.
    pub fn record_revealed_shares(&mut self, sender: MemberIndex, message: DisqualifiedSharesMessage) {
        if sender == self.me
            || !self.qualified.contains(&sender)
            || !self.group.is_eligible(sender)
        {
            return;
        }
        let reconstruction_set = self.reconstruction_set();
        let vss = PedersenVss::new(&self.params);
        for (member, share) in message.shares {
            if !reconstruction_set.contains(&member) {
                continue;
            }
            let Some(commitments) = self.commitments.get(&member) else {
                continue;
            };
            if !vss.verify_share(sender, &share, commitments) {
                warn!(member = self.me, sender, of = member, "revealed share failed commitment check");
                continue;
            }
            self.revealed_shares
                .entry(member)
                .or_default()
                .entry(sender)
                .or_insert(share);
        }
    }

    // ----- Phase 11: reconstruction ---------------------------------------

    /// Interpolate the individual keys of every late-disqualified member
    /// from the revealed shares.
    pub fn reconstruct_disqualified_keys(&mut self) -> DkgResult<()> {
        let q = self.params.subgroup_order().clone();
        let p = self.params.prime().clone();
        let g = self.params.generator_g().clone();
        let required = self.params.recovery_threshold() as usize;

        for member in self.reconstruction_set() {
            let mut evaluations: BTreeMap<MemberIndex, BigUint> = self
                .revealed_shares
                .get(&member)
                .map(|revealed| {
                    revealed
                        .iter()
                        .map(|(holder, share)| (*holder, share.s.clone()))
                        .collect()
                })
                .unwrap_or_default();
            if let Some(own) = self.received_shares.get(&member) {
                evaluations.insert(self.me, own.s.clone());
            }

            if evaluations.len() < required {
                return Err(DkgError::Protocol(format!(
                    "only {} revealed shares to reconstruct member {member}, need {required}",
                    evaluations.len()
                )));
            }

            let chosen: Vec<(MemberIndex, BigUint)> =
                evaluations.into_iter().take(required).collect();
            let indices: Vec<MemberIndex> = chosen.iter().map(|(holder, _)| *holder).collect();

            let mut z = BigUint::zero();
            for (holder, evaluation) in &chosen {
                let lambda = arith::lagrange_at_zero(*holder, &indices, &q)?;
                z = (z + lambda * evaluation) % &q;
            }
            let y = g.modpow(&z, &p);
            debug!(member = self.me, of = member, "reconstructed individual key");
            self.reconstructed.insert(member, (z, y));
        }
        Ok(())
    }

    // ----- Phase 12: combination ------------------------------------------

    /// Combine the qualified share points and the reconstructed keys into
    /// the group public key, and fold the received shares into this
    /// member's final private share.
    pub fn combine(&mut self) -> DkgResult<()> {
        let p = self.params.prime();
        let q = self.params.subgroup_order();

        let mut group_key = BigUint::one();
        for &member in &self.qualified {
            if self.reconstructed.contains_key(&member) {
                continue;
            }
            let points = self.share_points.get(&member).ok_or_else(|| {
                DkgError::Protocol(format!("no share points for qualified member {member}"))
            })?;
            group_key = group_key * &points[0] % p;
        }
        for (z, y) in self.reconstructed.values() {
            debug_assert_eq!(y, &self.params.generator_g().modpow(z, p));
            group_key = group_key * y % p;
        }

        let mut share = BigUint::zero();
        for &member in &self.qualified {
            let received = self.received_shares.get(&member).ok_or_else(|| {
                DkgError::Protocol(format!("no share received from qualified member {member}"))
            })?;
            share = (share + &received.s) % q;
        }

        self.group_public_key = Some(group_key);
        self.final_share = Some(share);
        Ok(())
    }

    /// Package the run output and erase all remaining secret material.
    pub fn finish(&mut self) -> DkgResult<DkgOutput> {
        let group_public_key = self
            .group_public_key
            .clone()
            .ok_or_else(|| DkgError::Protocol("finish called before combine".into()))?;
        let final_share = self
            .final_share
            .clone()
            .ok_or_else(|| DkgError::Protocol("finish called before combine".into()))?;

        let output = DkgOutput {
            run: self.run,
            member_index: self.me,
            group_public_key,
            secret_share: SecretKeyShare::new(self.me, final_share),
            qualified: self.qualified.iter().copied().collect(),
            reconstructed: self.reconstructed.keys().copied().collect(),
            report: self.group.report(),
        };
        self.scrub_secrets();
        Ok(output)
    }

    // ----- Secret hygiene -------------------------------------------------

    /// Erase every secret held by this context: polynomial coefficients,
    /// issued and received shares, ephemeral private keys and symmetric
    /// keys. Called on both the success and the abort path.
    pub fn scrub_secrets(&mut self) {
        if let Some(mut polynomial) = self.polynomial.take() {
            polynomial.zeroize();
        }
        self.self_share = None;
        self.issued_shares.clear();
        self.received_shares.clear();
        self.revealed_shares.clear();
        self.ephemeral_pairs.clear();
        self.symmetric_keys.clear();
        if let Some(mut share) = self.final_share.take() {
            share.set_zero();
        }
    }

    /// Whether every secret container is empty. Test support for the
    /// zeroization guarantee.
    pub fn secrets_scrubbed(&self) -> bool {
        self.polynomial.is_none()
            && self.self_share.is_none()
            && self.issued_shares.is_empty()
            && self.received_shares.is_empty()
            && self.revealed_shares.is_empty()
            && self.ephemeral_pairs.is_empty()
            && self.symmetric_keys.is_empty()
            && self.final_share.is_none()
    }

    // ----- Shared adjudication machinery ----------------------------------

    fn respond_to_accusers(
        &self,
        accusers: &BTreeSet<MemberIndex>,
    ) -> BTreeMap<MemberIndex, JustifiedShare> {
        let mut responses = BTreeMap::new();
        for &accuser in accusers {
            let (Some(pair), Some(share)) = (
                self.ephemeral_pairs.get(&accuser),
                self.issued_shares.get(&accuser),
            ) else {
                continue;
            };
            responses.insert(
                accuser,
                JustifiedShare {
                    ephemeral_secret: pair.secret.clone(),
                    shares: share.clone(),
                },
            );
        }
        responses
    }

    /// Re-run the accuser's check from broadcast evidence alone. Returns
    /// true when the revelation proves the accused dealt a valid share,
    /// i.e. the accusation was false.
    fn revelation_is_consistent(
        &self,
        accused: MemberIndex,
        accuser: MemberIndex,
        response: &JustifiedShare,
        check: ShareCheck,
    ) -> bool {
        // The revealed private half must match the public half the accused
        // broadcast toward the accuser in phase 1.
        let Some(broadcast_public) = self
            .peer_ephemeral
            .get(&accused)
            .and_then(|keys| keys.get(&accuser))
        else {
            return false;
        };
        if &response.ephemeral_secret.public_key() != broadcast_public {
            return false;
        }

        // The accuser's own phase-1 key toward the accused; eligible
        // accusers always broadcast full coverage.
        let Some(accuser_public) = self
            .peer_ephemeral
            .get(&accuser)
            .and_then(|keys| keys.get(&accused))
        else {
            return true;
        };

        // Recompute the pair key and reopen the ciphertext from phase 3.
        let Ok(key) = derive_symmetric_key(
            &response.ephemeral_secret,
            accuser_public,
            self.run,
            accused,
            accuser,
        ) else {
            return false;
        };
        let Some(ciphertext) = self
            .share_packets
            .get(&accused)
            .and_then(|packets| packets.get(&accuser))
        else {
            return false;
        };
        let Some(opened) = open_shares(&key, ciphertext) else {
            return false;
        };
        if opened != response.shares {
            return false;
        }

        match check {
            ShareCheck::Commitments => {
                let Some(commitments) = self.commitments.get(&accused) else {
                    return false;
                };
                PedersenVss::new(&self.params).verify_share(accuser, &response.shares, commitments)
            }
            ShareCheck::SharePoints => {
                let Some(points) = self.share_points.get(&accused) else {
                    return false;
                };
                self.share_matches_points(accuser, &response.shares.s, points)
            }
        }
    }

    fn share_matches_points(
        &self,
        receiver: MemberIndex,
        s: &BigUint,
        points: &[BigUint],
    ) -> bool {
        if points.len() != self.params.commitment_length() {
            return false;
        }
        let p = self.params.prime();
        let lhs = self.params.generator_g().modpow(s, p);
        lhs == arith::horner_combine(points, receiver, p)
    }
}
