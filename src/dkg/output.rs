//! Final result assembly for a completed key generation run.

use num_bigint::BigUint;
use num_traits::{One, Zero};
use zeroize::Zeroize;

use crate::arith;
use crate::chain::{BeaconChain, TxReceipt};
use crate::error::DkgResult;
use crate::group::{DisqualificationReport, MemberIndex};
use crate::parameters::{PublicParameters, RunTag};

/// One member's final private share of the group signing key, zeroed on
/// drop. This is the only secret a member retains after the run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretKeyShare {
    index: MemberIndex,
    share: BigUint,
}

impl SecretKeyShare {
    pub(crate) fn new(index: MemberIndex, share: BigUint) -> Self {
        Self { index, share }
    }

    /// The member index the share belongs to, which is also its
    /// interpolation point.
    pub fn index(&self) -> MemberIndex {
        self.index
    }

    /// The share value `x_i = ∑_{j∈Q} s_ji mod q`.
    pub fn value(&self) -> &BigUint {
        &self.share
    }
}

impl Zeroize for SecretKeyShare {
    fn zeroize(&mut self) {
        self.share.set_zero();
    }
}

impl Drop for SecretKeyShare {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Everything a member walks away with from a successful run.
#[derive(Clone, Debug)]
pub struct DkgOutput {
    /// The run that produced this output.
    pub run: RunTag,
    /// This member's index.
    pub member_index: MemberIndex,
    /// The group public key `Y`.
    pub group_public_key: BigUint,
    /// This member's private share of the group key.
    pub secret_share: SecretKeyShare,
    /// The qualified set whose contributions make up `Y`.
    pub qualified: Vec<MemberIndex>,
    /// Qualified members whose individual keys had to be reconstructed.
    pub reconstructed: Vec<MemberIndex>,
    /// Accountability data for on-chain slashing.
    pub report: DisqualificationReport,
}

impl DkgOutput {
    /// Big-endian byte encoding of the group public key, as submitted on
    /// chain.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.group_public_key.to_bytes_be()
    }

    /// Submit the group public key through the chain adapter. Idempotent by
    /// run tag, so every qualified member may submit independently.
    pub async fn publish(&self, chain: &dyn BeaconChain) -> DkgResult<TxReceipt> {
        chain
            .publish_group_public_key(self.run, self.public_key_bytes(), self.qualified.clone())
            .await
    }
}

/// Recompute member `index`'s individual public key from the share-point
/// vectors of every qualified member:
/// `g^{x_index} = ∏_j ∏_k A_{j,k}^{index^k} mod p`.
///
/// Only meaningful when `point_vectors` covers the full qualified set and
/// no member was reconstructed away.
pub fn member_public_key(
    params: &PublicParameters,
    point_vectors: &[Vec<BigUint>],
    index: MemberIndex,
) -> BigUint {
    let p = params.prime();
    let mut acc = BigUint::one();
    for points in point_vectors {
        acc = acc * arith::horner_combine(points, index, p) % p;
    }
    acc
}
