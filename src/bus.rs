//! Group-scoped message bus: framing, deduplication and phase filtering on
//! top of an authenticated broadcast transport.
//!
//! The transport below the bus is an external collaborator; the in-process
//! [`LocalNetwork`] implements its contract for tests and local clusters.
//! Envelope sender identities are stamped by the transport from channel
//! membership, so payloads cannot forge their origin.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::dkg::{MessageKind, Payload, Phase};
use crate::error::{DkgError, DkgResult};
use crate::group::MemberIndex;
use crate::parameters::RunTag;

/// One framed broadcast message.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Authenticated index of the sending member.
    pub sender: MemberIndex,
    /// The phase the sender stamped on the message.
    pub phase: Phase,
    /// The message body.
    pub payload: Payload,
}

/// The broadcast transport contract the bus runs on.
///
/// Implementations must deliver every sent envelope to every channel member
/// within the sending phase's window and must stamp `Envelope::sender` from
/// authenticated channel membership, dropping forged identities before
/// delivery.
#[async_trait]
pub trait GroupTransport: Send {
    /// Broadcast an envelope to the whole group, including the sender.
    async fn send(&self, phase: Phase, payload: Payload) -> DkgResult<()>;

    /// The next delivered envelope, or `None` once the channel is closed.
    async fn recv(&mut self) -> Option<Envelope>;
}

/// Phase-aware view over a [`GroupTransport`].
///
/// Applies the delivery rules the state machine relies on: envelopes are
/// surfaced while their phase tag matches the open phase or the
/// immediately preceding one (a grace window for clock skew); envelopes
/// that arrive ahead of the local clock are held back until their phase
/// opens, which is what makes broadcasts reliable within the phase window
/// even when peers cross a barrier first; anything staler than the grace
/// window is dropped. A sender's first message of a given kind wins and
/// repeats are dropped, and a member's own broadcasts are not delivered
/// back to it.
pub struct MessageBus<T> {
    me: MemberIndex,
    transport: T,
    open_phase: Option<Phase>,
    held_back: Vec<Envelope>,
    seen: BTreeSet<(MemberIndex, MessageKind)>,
}

impl<T> core::fmt::Debug for MessageBus<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageBus")
            .field("me", &self.me)
            .field("open_phase", &self.open_phase)
            .field("held_back", &self.held_back.len())
            .finish_non_exhaustive()
    }
}

impl<T: GroupTransport> MessageBus<T> {
    /// Wrap a joined transport channel for member `me`.
    pub fn new(me: MemberIndex, transport: T) -> Self {
        Self {
            me,
            transport,
            open_phase: None,
            held_back: Vec::new(),
            seen: BTreeSet::new(),
        }
    }

    /// Advance the delivery window to `phase`, discarding held-back
    /// envelopes the window has moved past.
    pub fn open_phase(&mut self, phase: Phase) {
        self.open_phase = Some(phase);
        self.held_back.retain(|envelope| envelope.phase >= phase);
    }

    /// Broadcast a payload tagged with `phase`.
    pub async fn broadcast(&self, phase: Phase, payload: Payload) -> DkgResult<()> {
        self.transport.send(phase, payload).await
    }

    /// The next envelope passing the delivery rules, or `None` once the
    /// transport closes.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let Some(open) = self.open_phase else {
                let _ = self.transport.recv().await?;
                continue;
            };

            // Surface an envelope held back until its phase opened.
            if let Some(position) = self
                .held_back
                .iter()
                .position(|envelope| envelope.phase == open)
            {
                let envelope = self.held_back.swap_remove(position);
                if self.seen.insert((envelope.sender, envelope.payload.kind())) {
                    return Some(envelope);
                }
                continue;
            }

            let envelope = self.transport.recv().await?;
            if envelope.sender == self.me {
                continue;
            }
            if envelope.payload.phase() != envelope.phase {
                warn!(
                    sender = envelope.sender,
                    phase = %envelope.phase,
                    "dropping envelope whose payload contradicts its phase tag"
                );
                continue;
            }
            if envelope.phase > open {
                // A peer crossed the barrier before our clock did.
                self.held_back.push(envelope);
                continue;
            }
            if envelope.phase != open && Some(envelope.phase) != open.previous() {
                debug!(
                    sender = envelope.sender,
                    tagged = %envelope.phase,
                    open = %open,
                    "dropping stale envelope"
                );
                continue;
            }
            if !self.seen.insert((envelope.sender, envelope.payload.kind())) {
                debug!(sender = envelope.sender, "dropping duplicate envelope");
                continue;
            }
            return Some(envelope);
        }
    }
}

#[derive(Debug)]
struct RunChannel {
    sender: broadcast::Sender<Envelope>,
    joined: BTreeSet<MemberIndex>,
}

/// An in-process broadcast provider implementing the network contract for
/// tests and local clusters.
///
/// Channels are scoped by run tag, and a member attempting to join the same
/// run twice is refused, which makes re-running a finished (group, nonce)
/// pair impossible by construction.
#[derive(Debug, Default)]
pub struct LocalNetwork {
    channels: Mutex<BTreeMap<RunTag, RunChannel>>,
}

impl LocalNetwork {
    /// An empty provider.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Join the broadcast channel for `run` as member `me`.
    pub fn join(&self, run: RunTag, me: MemberIndex) -> DkgResult<LocalChannel> {
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| DkgError::External("network channel registry poisoned".into()))?;
        let channel = channels.entry(run).or_insert_with(|| RunChannel {
            sender: broadcast::channel(1024).0,
            joined: BTreeSet::new(),
        });
        if !channel.joined.insert(me) {
            return Err(DkgError::External(format!(
                "member {me} already ran group {} nonce {}",
                run.group_id, run.nonce
            )));
        }
        Ok(LocalChannel {
            me,
            sender: channel.sender.clone(),
            receiver: channel.sender.subscribe(),
        })
    }
}

/// One member's endpoint on a [`LocalNetwork`] run channel.
#[derive(Debug)]
pub struct LocalChannel {
    me: MemberIndex,
    sender: broadcast::Sender<Envelope>,
    receiver: broadcast::Receiver<Envelope>,
}

#[async_trait]
impl GroupTransport for LocalChannel {
    async fn send(&self, phase: Phase, payload: Payload) -> DkgResult<()> {
        let envelope = Envelope {
            sender: self.me,
            phase,
            payload,
        };
        self.sender
            .send(envelope)
            .map_err(|_| DkgError::External("broadcast channel has no receivers".into()))?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.receiver.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(member = self.me, skipped, "broadcast receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
