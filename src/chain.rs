//! Chain adapter contract and an in-process chain for tests and local
//! clusters.
//!
//! The protocol only uses the chain as a monotonic clock (block heights
//! drive phase boundaries) and as the publication target for the final
//! group public key. Everything else about the chain stays behind the
//! [`BeaconChain`] trait.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{DkgError, DkgResult};
use crate::group::MemberIndex;
use crate::parameters::RunTag;

/// Receipt for a submitted group public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    /// Block at which the submission was accepted.
    pub block: u64,
}

/// The chain interface the key generation engine depends on.
#[async_trait]
pub trait BeaconChain: Send + Sync {
    /// The current block height. Monotonically non-decreasing.
    fn current_block(&self) -> u64;

    /// Resolve once the chain reaches `height`. Returns immediately if the
    /// chain is already there.
    async fn wait_for_block(&self, height: u64);

    /// Publish the final group public key. Idempotent by run tag: a repeat
    /// submission for the same run returns the original receipt.
    async fn publish_group_public_key(
        &self,
        run: RunTag,
        public_key: Vec<u8>,
        member_indices: Vec<MemberIndex>,
    ) -> DkgResult<TxReceipt>;
}

#[derive(Debug)]
struct Submission {
    block: u64,
    public_key: Vec<u8>,
}

/// An in-process [`BeaconChain`] whose blocks are minted by the caller or by
/// a background ticker, used by tests and local clusters.
#[derive(Debug)]
pub struct LocalChain {
    height_tx: watch::Sender<u64>,
    submissions: Mutex<BTreeMap<RunTag, Submission>>,
}

impl LocalChain {
    /// A chain starting at block zero.
    pub fn new() -> Arc<Self> {
        let (height_tx, _) = watch::channel(0);
        Arc::new(Self {
            height_tx,
            submissions: Mutex::new(BTreeMap::new()),
        })
    }

    /// Mint one block.
    pub fn advance_block(&self) {
        self.height_tx.send_modify(|height| *height += 1);
    }

    /// Mint blocks on a fixed cadence until the handle is aborted or the
    /// chain is dropped.
    pub fn start_mining(self: &Arc<Self>, block_time: Duration) -> JoinHandle<()> {
        let chain = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(block_time).await;
                chain.advance_block();
            }
        })
    }

    /// The key published for `run`, if any.
    pub fn published_key(&self, run: RunTag) -> Option<Vec<u8>> {
        self.submissions
            .lock()
            .expect("chain submissions lock poisoned")
            .get(&run)
            .map(|submission| submission.public_key.clone())
    }
}

#[async_trait]
impl BeaconChain for LocalChain {
    fn current_block(&self) -> u64 {
        *self.height_tx.borrow()
    }

    async fn wait_for_block(&self, height: u64) {
        let mut rx = self.height_tx.subscribe();
        // wait_for only fails when the sender is dropped, which cannot
        // happen while `self` is alive.
        let _ = rx.wait_for(|current| *current >= height).await;
    }

    async fn publish_group_public_key(
        &self,
        run: RunTag,
        public_key: Vec<u8>,
        _member_indices: Vec<MemberIndex>,
    ) -> DkgResult<TxReceipt> {
        let mut submissions = self
            .submissions
            .lock()
            .map_err(|_| DkgError::External("chain submissions lock poisoned".into()))?;
        let block = self.current_block();
        let submission = submissions.entry(run).or_insert_with(|| {
            debug!(group = run.group_id, nonce = run.nonce, "group key published");
            Submission { block, public_key }
        });
        Ok(TxReceipt {
            block: submission.block,
        })
    }
}
