//! The async driver advancing one member through the protocol phases.
//!
//! One engine runs one member. Its only suspension points are the block
//! clock (phase barriers) and the message bus; both are cancellable. The
//! engine never advances a phase before its deadline, even with every
//! expected message already collected, so a fast majority cannot
//! desynchronize from slower honest peers.

use core::fmt;
use std::collections::BTreeMap;
use std::sync::Arc;

use rand::{CryptoRng, RngCore};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::bus::{GroupTransport, MessageBus};
use crate::chain::BeaconChain;
use crate::dkg::member::MemberContext;
use crate::dkg::messages::Payload;
use crate::dkg::output::DkgOutput;
use crate::dkg::phase::{Phase, PhaseSchedule};
use crate::error::{DkgError, DkgResult};
use crate::group::MemberIndex;

/// Drives one [`MemberContext`] through a full run over a joined broadcast
/// channel and a chain clock.
pub struct DkgEngine<T> {
    ctx: MemberContext,
    bus: MessageBus<T>,
    chain: Arc<dyn BeaconChain>,
    schedule: PhaseSchedule,
    cancel: Arc<Notify>,
}

impl<T> fmt::Debug for DkgEngine<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkgEngine")
            .field("member", &self.ctx.member_index())
            .field("run", &self.ctx.run())
            .field("schedule", &self.schedule)
            .finish_non_exhaustive()
    }
}

impl<T: GroupTransport> DkgEngine<T> {
    /// Assemble an engine from a prepared member context, a joined
    /// transport channel, a chain adapter and the agreed phase schedule.
    pub fn new(
        ctx: MemberContext,
        transport: T,
        chain: Arc<dyn BeaconChain>,
        schedule: PhaseSchedule,
    ) -> Self {
        let bus = MessageBus::new(ctx.member_index(), transport);
        Self {
            ctx,
            bus,
            chain,
            schedule,
            cancel: Arc::new(Notify::new()),
        }
    }

    /// A handle that aborts the run when notified. Cancellation zeroizes
    /// all secret material before the engine returns.
    pub fn cancel_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.cancel)
    }

    /// Execute all twelve phases and assemble the final output.
    pub async fn run(mut self, mut rng: impl RngCore + CryptoRng) -> DkgResult<DkgOutput> {
        let member = self.ctx.member_index();
        let run = self.ctx.run();
        info!(
            member,
            group = run.group_id,
            nonce = run.nonce,
            "starting distributed key generation"
        );

        for phase in Phase::ALL {
            if let Err(error) = self.advance(phase, &mut rng).await {
                warn!(member, %phase, %error, "key generation aborted");
                self.ctx.scrub_secrets();
                return Err(error);
            }
        }

        let output = self.ctx.finish()?;
        info!(
            member,
            qualified = output.qualified.len(),
            reconstructed = output.reconstructed.len(),
            "distributed key generation complete"
        );
        Ok(output)
    }

    /// Open `phase`: send its outbound messages, collect inbound traffic
    /// until the block deadline, then run the barrier transition.
    async fn advance(
        &mut self,
        phase: Phase,
        rng: &mut (impl RngCore + CryptoRng),
    ) -> DkgResult<()> {
        self.bus.open_phase(phase);
        debug!(member = self.ctx.member_index(), %phase, "entering phase");

        match phase {
            Phase::EphemeralKeyGen => {
                let message = self.ctx.generate_ephemeral_keys(&mut *rng);
                self.bus
                    .broadcast(phase, Payload::EphemeralPublicKeys(message))
                    .await?;
            }
            Phase::SymmetricKeyDerive => self.ctx.derive_symmetric_keys()?,
            Phase::Commit => {
                let (commitments, shares) = self.ctx.commitments_and_shares(&mut *rng)?;
                self.bus
                    .broadcast(phase, Payload::Commitments(commitments))
                    .await?;
                self.bus.broadcast(phase, Payload::PeerShares(shares)).await?;
            }
            Phase::CommitmentVerify => {
                if let Some(accusations) = self.ctx.verify_received_shares() {
                    self.bus
                        .broadcast(phase, Payload::SharesAccusations(accusations))
                        .await?;
                }
            }
            Phase::SharesJustify => {
                if let Some(justification) = self.ctx.justify_share_accusations() {
                    self.bus
                        .broadcast(phase, Payload::SharesJustification(justification))
                        .await?;
                }
            }
            Phase::Qualify => {}
            Phase::PublicKeyShare => {
                if let Some(points) = self.ctx.share_points_message() {
                    self.bus
                        .broadcast(phase, Payload::PublicKeySharePoints(points))
                        .await?;
                }
            }
            Phase::PublicKeyShareVerify => {
                if let Some(accusations) = self.ctx.verify_share_points() {
                    self.bus
                        .broadcast(phase, Payload::PointsAccusations(accusations))
                        .await?;
                }
            }
            Phase::PointsJustify => {
                if let Some(justification) = self.ctx.justify_point_accusations() {
                    self.bus
                        .broadcast(phase, Payload::PointsJustification(justification))
                        .await?;
                }
            }
            Phase::DisqualifiedShareReveal => {
                if let Some(revealed) = self.ctx.revealed_shares_message() {
                    self.bus
                        .broadcast(phase, Payload::DisqualifiedShares(revealed))
                        .await?;
                }
            }
            Phase::Reconstruct | Phase::Combine => {}
        }

        let inbox = self.collect_until_deadline(phase).await?;

        match phase {
            Phase::EphemeralKeyGen => {
                for (sender, payload) in inbox {
                    if let Payload::EphemeralPublicKeys(message) = payload {
                        self.ctx.record_ephemeral_keys(sender, message);
                    }
                }
                self.ctx.close_ephemeral_phase();
            }
            Phase::SymmetricKeyDerive => self.ctx.close_symmetric_phase(),
            Phase::Commit => {
                for (sender, payload) in inbox {
                    match payload {
                        Payload::Commitments(message) => {
                            self.ctx.record_commitments(sender, message);
                        }
                        Payload::PeerShares(message) => {
                            self.ctx.record_peer_shares(sender, message);
                        }
                        _ => {}
                    }
                }
                self.ctx.close_commitment_phase();
            }
            Phase::CommitmentVerify => {
                for (sender, payload) in inbox {
                    if let Payload::SharesAccusations(message) = payload {
                        self.ctx.record_share_accusations(sender, message);
                    }
                }
            }
            Phase::SharesJustify => {
                let mut justifications = BTreeMap::new();
                for (sender, payload) in inbox {
                    if let Payload::SharesJustification(message) = payload {
                        justifications.entry(sender).or_insert(message);
                    }
                }
                if let Some(own) = self.ctx.justify_share_accusations() {
                    justifications.insert(self.ctx.member_index(), own);
                }
                self.ctx.resolve_share_accusations(&justifications);
            }
            Phase::Qualify => self.ctx.qualify()?,
            Phase::PublicKeyShare => {
                for (sender, payload) in inbox {
                    if let Payload::PublicKeySharePoints(message) = payload {
                        self.ctx.record_share_points(sender, message);
                    }
                }
                self.ctx.close_points_phase();
            }
            Phase::PublicKeyShareVerify => {
                for (sender, payload) in inbox {
                    if let Payload::PointsAccusations(message) = payload {
                        self.ctx.record_point_accusations(sender, message);
                    }
                }
            }
            Phase::PointsJustify => {
                let mut justifications = BTreeMap::new();
                for (sender, payload) in inbox {
                    if let Payload::PointsJustification(message) = payload {
                        justifications.entry(sender).or_insert(message);
                    }
                }
                if let Some(own) = self.ctx.justify_point_accusations() {
                    justifications.insert(self.ctx.member_index(), own);
                }
                self.ctx.resolve_point_accusations(&justifications);
            }
            Phase::DisqualifiedShareReveal => {
                for (sender, payload) in inbox {
                    if let Payload::DisqualifiedShares(message) = payload {
                        self.ctx.record_revealed_shares(sender, message);
                    }
                }
            }
            Phase::Reconstruct => self.ctx.reconstruct_disqualified_keys()?,
            Phase::Combine => self.ctx.combine()?,
        }
        Ok(())
    }

    /// Collect the current phase's inbound messages until the phase
    /// deadline block. Never returns early: the barrier is what keeps
    /// disqualification decisions uniform across honest members.
    async fn collect_until_deadline(
        &mut self,
        phase: Phase,
    ) -> DkgResult<Vec<(MemberIndex, Payload)>> {
        let deadline = self.schedule.deadline(phase);
        let chain = Arc::clone(&self.chain);
        let cancel = Arc::clone(&self.cancel);
        let mut at_deadline = chain.wait_for_block(deadline);

        let mut inbox = Vec::new();
        loop {
            tokio::select! {
                _ = cancel.notified() => return Err(DkgError::Cancelled),
                _ = &mut at_deadline => break,
                received = self.bus.recv() => match received {
                    Some(envelope) if envelope.phase == phase => {
                        inbox.push((envelope.sender, envelope.payload));
                    }
                    // Grace-window stragglers for the prior phase arrive
                    // after its barrier closed and are ignored.
                    Some(_) => {}
                    None => {
                        return Err(DkgError::External("broadcast channel closed".into()));
                    }
                },
            }
        }
        Ok(inbox)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bus::LocalNetwork;
    use crate::chain::LocalChain;
    use crate::group::Group;
    use crate::parameters::RunTag;
    use crate::testing;

    use rand::rngs::OsRng;
    use std::time::Duration;

    fn run_tag(nonce: u64) -> RunTag {
        RunTag { group_id: 42, nonce }
    }

    fn spawn_engines(
        n: u32,
        t: u32,
        run: RunTag,
        network: &Arc<LocalNetwork>,
        chain: &Arc<LocalChain>,
    ) -> Vec<DkgEngine<crate::bus::LocalChannel>> {
        let params = testing::test_parameters(n, t);
        let roster = testing::test_roster(n);
        let schedule = PhaseSchedule::new(chain.current_block(), params.phase_duration_blocks());

        (1..=n)
            .map(|index| {
                let group = Group::from_roster(&roster).unwrap();
                let ctx = MemberContext::new(params.clone(), group, index, run).unwrap();
                let channel = network.join(run, index).unwrap();
                DkgEngine::new(
                    ctx,
                    channel,
                    Arc::clone(chain) as Arc<dyn BeaconChain>,
                    schedule,
                )
            })
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn three_honest_engines_agree_on_the_group_key() {
        let network = LocalNetwork::new();
        let chain = LocalChain::new();
        let miner = chain.start_mining(Duration::from_millis(10));

        let engines = spawn_engines(3, 1, run_tag(1), &network, &chain);
        let handles: Vec<_> = engines
            .into_iter()
            .map(|engine| tokio::spawn(engine.run(OsRng)))
            .collect();

        let mut keys = Vec::new();
        for handle in handles {
            let output = handle.await.unwrap().unwrap();
            assert_eq!(output.qualified.len(), 3);
            keys.push(output.group_public_key.clone());
        }
        miner.abort();

        assert!(keys.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_aborts_and_scrubs() {
        let network = LocalNetwork::new();
        let chain = LocalChain::new();
        // No mining: the engine parks on the first phase barrier.

        let mut engines = spawn_engines(3, 1, run_tag(2), &network, &chain);
        let engine = engines.remove(0);
        let cancel = engine.cancel_handle();

        let handle = tokio::spawn(engine.run(OsRng));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.notify_one();

        assert!(matches!(handle.await.unwrap(), Err(DkgError::Cancelled)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn no_phase_advances_without_blocks() {
        let network = LocalNetwork::new();
        let chain = LocalChain::new();

        let mut engines = spawn_engines(3, 1, run_tag(3), &network, &chain);
        let engine = engines.remove(0);

        // All peers' messages could arrive instantly, but with a stalled
        // clock the first barrier never opens.
        let result =
            tokio::time::timeout(Duration::from_millis(100), tokio::spawn(engine.run(OsRng)))
                .await;
        assert!(result.is_err(), "engine advanced without reaching the deadline block");
    }
}
