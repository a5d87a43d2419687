//! Pedersen verifiable secret sharing over the multiplicative group mod p.
//!
//! A dealer commits to two degree-T polynomials f and g with
//! `C_k = g^{a_k} · h^{b_k} mod p` and hands member j the evaluations
//! `(f(j), g(j))`. Receivers check shares against the commitment vector
//! without learning anything about the polynomials beyond their own point.

use num_bigint::BigUint;
use num_traits::Zero;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::arith;
use crate::error::{DkgError, DkgResult};
use crate::group::MemberIndex;
use crate::parameters::PublicParameters;

/// The two secret polynomials a dealer samples in phase 3.
///
/// `a` carries the dealt secret in its constant term; `b` is the blinding
/// polynomial. Both are zeroed on drop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolynomialPair {
    pub(crate) a: Vec<BigUint>,
    pub(crate) b: Vec<BigUint>,
}

impl PolynomialPair {
    /// Sample a fresh pair of degree-`threshold` polynomials with uniform
    /// coefficients in ℤ_q.
    pub fn random(
        threshold: u32,
        q: &BigUint,
        mut rng: impl RngCore + CryptoRng,
    ) -> Self {
        let len = threshold as usize + 1;
        let mut a = Vec::with_capacity(len);
        let mut b = Vec::with_capacity(len);
        for _ in 0..len {
            a.push(arith::random_scalar(q, &mut rng));
            b.push(arith::random_scalar(q, &mut rng));
        }
        Self { a, b }
    }

    /// The dealt secret, `f(0)`.
    pub fn secret(&self) -> &BigUint {
        &self.a[0]
    }

    /// The coefficients of the secret polynomial `f`.
    pub fn secret_coefficients(&self) -> &[BigUint] {
        &self.a
    }
}

impl Zeroize for PolynomialPair {
    fn zeroize(&mut self) {
        for coefficient in self.a.iter_mut().chain(self.b.iter_mut()) {
            coefficient.set_zero();
        }
    }
}

impl Drop for PolynomialPair {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// One evaluated share pair `(s, t) = (f(j), g(j))`, zeroed on drop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharePair {
    /// Evaluation of the secret polynomial.
    pub s: BigUint,
    /// Evaluation of the blinding polynomial.
    pub t: BigUint,
}

impl Zeroize for SharePair {
    fn zeroize(&mut self) {
        self.s.set_zero();
        self.t.set_zero();
    }
}

impl Drop for SharePair {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// The Pedersen commitment scheme bound to one parameter set.
#[derive(Clone, Copy, Debug)]
pub struct PedersenVss<'a> {
    params: &'a PublicParameters,
}

impl<'a> PedersenVss<'a> {
    /// Bind the scheme to a validated parameter set.
    pub fn new(params: &'a PublicParameters) -> Self {
        Self { params }
    }

    /// Commit to a polynomial pair: `C_k = g^{a_k} · h^{b_k} mod p`.
    ///
    /// Fails with a domain error if any coefficient is outside ℤ_q.
    pub fn commit(&self, polynomials: &PolynomialPair) -> DkgResult<Vec<BigUint>> {
        let p = self.params.prime();
        let q = self.params.subgroup_order();
        if polynomials.a.len() != self.params.commitment_length()
            || polynomials.b.len() != self.params.commitment_length()
        {
            return Err(DkgError::Domain(
                "polynomial degree does not match the threshold".into(),
            ));
        }

        let mut commitments = Vec::with_capacity(polynomials.a.len());
        for (a_k, b_k) in polynomials.a.iter().zip(&polynomials.b) {
            if a_k >= q || b_k >= q {
                return Err(DkgError::Domain(
                    "polynomial coefficient outside Z_q".into(),
                ));
            }
            let commitment = self.params.generator_g().modpow(a_k, p)
                * self.params.generator_h().modpow(b_k, p)
                % p;
            commitments.push(commitment);
        }
        Ok(commitments)
    }

    /// Evaluate both polynomials at member index `j`.
    pub fn evaluate(&self, polynomials: &PolynomialPair, j: MemberIndex) -> SharePair {
        let q = self.params.subgroup_order();
        SharePair {
            s: arith::horner_eval(&polynomials.a, j, q),
            t: arith::horner_eval(&polynomials.b, j, q),
        }
    }

    /// Check a received share against a dealer's commitment vector:
    /// `g^s · h^t ≡ ∏_k C_k^{j^k} (mod p)`, linear in T via the
    /// multiplicative Horner fold.
    pub fn verify_share(
        &self,
        j: MemberIndex,
        share: &SharePair,
        commitments: &[BigUint],
    ) -> bool {
        let p = self.params.prime();
        let q = self.params.subgroup_order();
        if commitments.len() != self.params.commitment_length() {
            return false;
        }
        if &share.s >= q || &share.t >= q {
            return false;
        }

        let lhs = self.params.generator_g().modpow(&share.s, p)
            * self.params.generator_h().modpow(&share.t, p)
            % p;
        lhs == arith::horner_combine(commitments, j, p)
    }
}
