//! Benchmarks for the Pedersen commitment scheme and the pairwise share
//! encryption used by the key generation protocol.

#[macro_use]
extern crate criterion;

use criterion::Criterion;
use rand::rngs::OsRng;

use beacon_dkg::dkg::{
    derive_symmetric_key, open_shares, seal_shares, EphemeralKeyPair, PedersenVss, PolynomialPair,
};
use beacon_dkg::parameters::RunTag;
use beacon_dkg::testing;

const GROUP_SIZE: u32 = 64;
const DISHONEST_THRESHOLD: u32 = 31;

fn criterion_benchmark(c: &mut Criterion) {
    let params = testing::test_parameters(GROUP_SIZE, DISHONEST_THRESHOLD);
    let vss = PedersenVss::new(&params);
    let polynomials = PolynomialPair::random(
        params.dishonest_threshold(),
        params.subgroup_order(),
        OsRng,
    );

    c.bench_function("pedersen commit (T+1 coefficients)", |b| {
        b.iter(|| vss.commit(&polynomials).unwrap())
    });

    let commitments = vss.commit(&polynomials).unwrap();
    let share = vss.evaluate(&polynomials, 7);

    c.bench_function("share evaluation", |b| b.iter(|| vss.evaluate(&polynomials, 7)));

    c.bench_function("share verification", |b| {
        b.iter(|| assert!(vss.verify_share(7, &share, &commitments)))
    });

    let run = RunTag {
        group_id: 1,
        nonce: 1,
    };
    let ours = EphemeralKeyPair::generate(OsRng);
    let theirs = EphemeralKeyPair::generate(OsRng);

    c.bench_function("symmetric key derivation", |b| {
        b.iter(|| derive_symmetric_key(&ours.secret, &theirs.public, run, 1, 2).unwrap())
    });

    let key = derive_symmetric_key(&ours.secret, &theirs.public, run, 1, 2).unwrap();
    let sealed = seal_shares(&key, &share, OsRng).unwrap();

    c.bench_function("share packet seal", |b| {
        b.iter(|| seal_shares(&key, &share, OsRng).unwrap())
    });

    c.bench_function("share packet open", |b| {
        b.iter(|| open_shares(&key, &sealed).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
