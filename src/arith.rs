//! Modular arithmetic over the Pedersen group's prime field and its
//! order-q subgroup.
//!
//! All protocol scalars live in ℤ_q and all group elements in the order-q
//! subgroup of ℤ_p*. Elliptic-curve material for the ephemeral key exchange
//! deliberately uses its own types and never flows through these helpers.

use num_bigint::{BigUint, RandBigInt};
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};

use crate::error::{DkgError, DkgResult};

/// Sample a uniformly random scalar in `[0, q)`.
pub fn random_scalar(q: &BigUint, mut rng: impl RngCore + CryptoRng) -> BigUint {
    rng.gen_biguint_below(q)
}

/// Invert `x` modulo the prime `modulus` via Fermat's little theorem.
///
/// Fails with a domain error on zero, which has no inverse.
pub fn mod_inv(x: &BigUint, modulus: &BigUint) -> DkgResult<BigUint> {
    if x.is_zero() {
        return Err(DkgError::Domain("zero has no modular inverse".into()));
    }
    let exponent = modulus - 2u32;
    Ok(x.modpow(&exponent, modulus))
}

/// `(a - b) mod m` for operands already reduced mod `m`.
pub fn mod_sub(a: &BigUint, b: &BigUint, m: &BigUint) -> BigUint {
    ((a + m) - b) % m
}

/// Evaluate a polynomial with coefficients in ℤ_q at the member index
/// `point`, using Horner's method. Coefficients are in ascending degree
/// order, so `coefficients[0]` is the constant term.
pub fn horner_eval(coefficients: &[BigUint], point: u32, q: &BigUint) -> BigUint {
    let x = BigUint::from(point);
    let mut acc = BigUint::zero();
    for coefficient in coefficients.iter().rev() {
        acc = (acc * &x + coefficient) % q;
    }
    acc
}

/// Fold a vector of group elements as `∏_k points[k]^{x^k} mod p`.
///
/// The multiplicative analogue of Horner's method: one small-exponent
/// modular exponentiation per element, linear in the vector length.
pub fn horner_combine(points: &[BigUint], point: u32, p: &BigUint) -> BigUint {
    let x = BigUint::from(point);
    let mut acc = BigUint::one();
    for element in points.iter().rev() {
        acc = acc.modpow(&x, p) * element % p;
    }
    acc
}

/// Lagrange coefficient at zero for `my_index` within the interpolation set
/// `indices`, mod the prime `q`:
/// `λ = ∏_{j≠my_index} j / (j - my_index) mod q`.
pub fn lagrange_at_zero(my_index: u32, indices: &[u32], q: &BigUint) -> DkgResult<BigUint> {
    let mut numerator = BigUint::one();
    let mut denominator = BigUint::one();

    let mine = BigUint::from(my_index) % q;

    for &j in indices {
        if j == my_index {
            continue;
        }
        let other = BigUint::from(j) % q;

        numerator = numerator * &other % q;
        denominator = denominator * mod_sub(&other, &mine, q) % q;
    }

    if denominator.is_zero() {
        return Err(DkgError::Domain(
            "duplicate indices in interpolation set".into(),
        ));
    }

    Ok(numerator * mod_inv(&denominator, q)? % q)
}
