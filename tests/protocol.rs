//! End-to-end protocol scenarios driven over a scripted message plane.
//!
//! Every member is driven honestly through all twelve phases; faults are
//! injected at the message plane (dropped broadcasts, corrupted packets,
//! forged accusations, tampered share points), so Byzantine behavior is
//! expressed exactly as the honest majority observes it. Assertions only
//! inspect the honest members' results.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use num_traits::Zero;
use rand::rngs::OsRng;

use beacon_dkg::arith;
use beacon_dkg::dkg::{
    member_public_key, DkgOutput, Phase, PointsJustificationMessage, SharesAccusationsMessage,
    SharesJustificationMessage,
};
use beacon_dkg::group::{Group, MemberIndex, Misbehavior};
use beacon_dkg::parameters::RunTag;
use beacon_dkg::testing;
use beacon_dkg::{DkgError, DkgResult, MemberContext};

/// Faults injected into the message plane.
#[derive(Default)]
struct Faults {
    /// Senders whose broadcasts stop being delivered from the given phase.
    silent_from: BTreeMap<MemberIndex, Phase>,
    /// Corrupt the encrypted packet `(dealer, receiver)` in transit.
    corrupt_packet: Option<(MemberIndex, MemberIndex)>,
    /// Deliver a baseless phase-4 accusation `(accuser, accused)`.
    forged_accusation: Option<(MemberIndex, MemberIndex)>,
    /// Replace this member's phase-7 share points with unrelated values.
    tamper_points: Option<MemberIndex>,
}

impl Faults {
    fn is_silent(&self, sender: MemberIndex, phase: Phase) -> bool {
        self.silent_from
            .get(&sender)
            .is_some_and(|from| phase >= *from)
    }
}

struct Scenario {
    results: Vec<DkgResult<DkgOutput>>,
    members: Vec<MemberContext>,
    point_vectors: Vec<Vec<BigUint>>,
}

impl Scenario {
    fn output(&self, member: MemberIndex) -> &DkgOutput {
        self.results[member as usize - 1]
            .as_ref()
            .expect("member expected to finish")
    }

    fn ledger(&self, member: MemberIndex) -> &Group {
        self.members[member as usize - 1].group()
    }
}

fn run_scenario(n: u32, t: u32, faults: &Faults) -> Scenario {
    let params = testing::test_parameters(n, t);
    let roster = testing::test_roster(n);
    let run = RunTag {
        group_id: 77,
        nonce: 1,
    };
    let mut members: Vec<MemberContext> = (1..=n)
        .map(|index| {
            MemberContext::new(
                params.clone(),
                Group::from_roster(&roster).unwrap(),
                index,
                run,
            )
            .unwrap()
        })
        .collect();
    let mut failures: Vec<Option<DkgError>> = vec![None; n as usize];

    // Phase 1: ephemeral keys.
    let key_messages: Vec<_> = members
        .iter_mut()
        .map(|m| (m.member_index(), m.generate_ephemeral_keys(OsRng)))
        .collect();
    for member in members.iter_mut() {
        for (sender, message) in &key_messages {
            if !faults.is_silent(*sender, Phase::EphemeralKeyGen) {
                member.record_ephemeral_keys(*sender, message.clone());
            }
        }
        member.close_ephemeral_phase();
    }

    // Phase 2: symmetric keys.
    for member in members.iter_mut() {
        member.derive_symmetric_keys().unwrap();
        member.close_symmetric_phase();
    }

    // Phase 3: commitments and encrypted shares.
    let mut commitment_messages: Vec<_> = members
        .iter_mut()
        .map(|m| {
            let (commitments, shares) = m.commitments_and_shares(OsRng).unwrap();
            (m.member_index(), commitments, shares)
        })
        .collect();
    if let Some((dealer, receiver)) = faults.corrupt_packet {
        let entry = &mut commitment_messages[dealer as usize - 1].2;
        entry
            .packets
            .get_mut(&receiver)
            .expect("scripted dealer addresses the receiver")
            .bytes[0] ^= 0x01;
    }
    for member in members.iter_mut() {
        for (sender, commitments, shares) in &commitment_messages {
            if !faults.is_silent(*sender, Phase::Commit) {
                member.record_commitments(*sender, commitments.clone());
                member.record_peer_shares(*sender, shares.clone());
            }
        }
        member.close_commitment_phase();
    }

    // Phase 4: verification and accusations.
    let mut accusations: Vec<(MemberIndex, SharesAccusationsMessage)> = members
        .iter_mut()
        .filter_map(|m| {
            m.verify_received_shares()
                .map(|message| (m.member_index(), message))
        })
        .collect();
    if let Some((accuser, accused)) = faults.forged_accusation {
        accusations.push((
            accuser,
            SharesAccusationsMessage {
                accused: [accused].into(),
            },
        ));
    }
    for member in members.iter_mut() {
        for (sender, message) in &accusations {
            if !faults.is_silent(*sender, Phase::CommitmentVerify) {
                member.record_share_accusations(*sender, message.clone());
            }
        }
    }

    // Phase 5: justification and adjudication.
    let justifications: BTreeMap<MemberIndex, SharesJustificationMessage> = members
        .iter()
        .filter_map(|m| {
            if faults.is_silent(m.member_index(), Phase::SharesJustify) {
                return None;
            }
            m.justify_share_accusations()
                .map(|message| (m.member_index(), message))
        })
        .collect();
    for member in members.iter_mut() {
        member.resolve_share_accusations(&justifications);
    }

    // Phase 6: qualification.
    for (member, failure) in members.iter_mut().zip(failures.iter_mut()) {
        if let Err(error) = member.qualify() {
            *failure = Some(error);
        }
    }

    // Phase 7: share points.
    let mut point_messages: Vec<_> = members
        .iter_mut()
        .zip(failures.iter())
        .filter(|(_, failure)| failure.is_none())
        .filter_map(|(m, _)| m.share_points_message().map(|msg| (m.member_index(), msg)))
        .collect();
    if let Some(tampered) = faults.tamper_points {
        for (sender, message) in point_messages.iter_mut() {
            if *sender == tampered {
                let p = params.prime();
                for point in message.points.iter_mut() {
                    *point = &*point * &*point % p;
                }
            }
        }
    }
    for (member, failure) in members.iter_mut().zip(failures.iter()) {
        if failure.is_some() {
            continue;
        }
        for (sender, message) in &point_messages {
            if !faults.is_silent(*sender, Phase::PublicKeyShare) {
                member.record_share_points(*sender, message.clone());
            }
        }
        member.close_points_phase();
    }

    // Phase 8: share point verification.
    let point_accusations: Vec<_> = members
        .iter_mut()
        .zip(failures.iter())
        .filter(|(_, failure)| failure.is_none())
        .filter_map(|(m, _)| m.verify_share_points().map(|msg| (m.member_index(), msg)))
        .collect();
    for (member, failure) in members.iter_mut().zip(failures.iter()) {
        if failure.is_some() {
            continue;
        }
        for (sender, message) in &point_accusations {
            if !faults.is_silent(*sender, Phase::PublicKeyShareVerify) {
                member.record_point_accusations(*sender, message.clone());
            }
        }
    }

    // Phase 9: points justification and adjudication.
    let point_justifications: BTreeMap<MemberIndex, PointsJustificationMessage> = members
        .iter()
        .zip(failures.iter())
        .filter(|(_, failure)| failure.is_none())
        .filter_map(|(m, _)| {
            if faults.is_silent(m.member_index(), Phase::PointsJustify) {
                return None;
            }
            m.justify_point_accusations()
                .map(|message| (m.member_index(), message))
        })
        .collect();
    for (member, failure) in members.iter_mut().zip(failures.iter()) {
        if failure.is_none() {
            member.resolve_point_accusations(&point_justifications);
        }
    }

    // Phase 10: disqualified share revelation.
    let revealed: Vec<_> = members
        .iter()
        .zip(failures.iter())
        .filter(|(_, failure)| failure.is_none())
        .filter_map(|(m, _)| {
            if faults.is_silent(m.member_index(), Phase::DisqualifiedShareReveal) {
                return None;
            }
            m.revealed_shares_message()
                .map(|message| (m.member_index(), message))
        })
        .collect();
    for (member, failure) in members.iter_mut().zip(failures.iter()) {
        if failure.is_some() {
            continue;
        }
        for (sender, message) in &revealed {
            member.record_revealed_shares(*sender, message.clone());
        }
    }

    // Phases 11-12: reconstruction, combination, output.
    let results: Vec<DkgResult<DkgOutput>> = members
        .iter_mut()
        .zip(failures.into_iter())
        .map(|(member, failure)| {
            if let Some(error) = failure {
                member.scrub_secrets();
                return Err(error);
            }
            member.reconstruct_disqualified_keys()?;
            member.combine()?;
            member.finish()
        })
        .collect();

    Scenario {
        results,
        members,
        point_vectors: point_messages.into_iter().map(|(_, msg)| msg.points).collect(),
    }
}

fn assert_group_key_consistency(scenario: &Scenario, honest: &[MemberIndex]) -> BigUint {
    let key = scenario.output(honest[0]).group_public_key.clone();
    for &member in honest {
        assert_eq!(
            scenario.output(member).group_public_key,
            key,
            "member {member} derived a different group key"
        );
    }
    key
}

fn assert_shares_interpolate_to_key(
    scenario: &Scenario,
    indices: &[MemberIndex],
    group_key: &BigUint,
    n: u32,
    t: u32,
) {
    let params = testing::test_parameters(n, t);
    let q = params.subgroup_order();
    let mut secret = BigUint::zero();
    for &member in indices {
        let lambda = arith::lagrange_at_zero(member, indices, q).unwrap();
        secret = (secret + lambda * scenario.output(member).secret_share.value()) % q;
    }
    assert_eq!(&params.generator_g().modpow(&secret, params.prime()), group_key);
}

#[test]
fn clean_run_five_members() {
    let scenario = run_scenario(5, 2, &Faults::default());

    let honest = [1, 2, 3, 4, 5];
    let group_key = assert_group_key_consistency(&scenario, &honest);
    assert_shares_interpolate_to_key(&scenario, &[1, 2, 3], &group_key, 5, 2);

    let params = testing::test_parameters(5, 2);
    for &member in &honest {
        let output = scenario.output(member);
        assert_eq!(output.qualified, vec![1, 2, 3, 4, 5]);
        assert!(output.reconstructed.is_empty());
        assert!(output.report.disqualified.is_empty());

        let expected = member_public_key(&params, &scenario.point_vectors, member);
        let actual = params
            .generator_g()
            .modpow(output.secret_share.value(), params.prime());
        assert_eq!(actual, expected);
    }
}

#[test]
fn silent_sender_is_disqualified_and_run_completes() {
    let faults = Faults {
        silent_from: BTreeMap::from([(3, Phase::Commit)]),
        ..Faults::default()
    };
    let scenario = run_scenario(5, 2, &faults);

    let honest = [1, 2, 4, 5];
    let group_key = assert_group_key_consistency(&scenario, &honest);
    assert_shares_interpolate_to_key(&scenario, &[1, 2, 4], &group_key, 5, 2);

    for &member in &honest {
        let output = scenario.output(member);
        assert_eq!(output.qualified, vec![1, 2, 4, 5]);
        let dq = scenario.ledger(member).disqualification_of(3).unwrap();
        assert_eq!(dq.phase, Phase::Commit);
        assert_eq!(dq.kind, Misbehavior::MissingCommitments);
        // The report names the silent operator for slashing.
        assert!(output.report.disqualified.contains_key(&1003));
    }
}

#[test]
fn malformed_share_fails_justification() {
    let faults = Faults {
        corrupt_packet: Some((4, 2)),
        ..Faults::default()
    };
    let scenario = run_scenario(5, 2, &faults);

    let honest = [1, 2, 3, 5];
    let group_key = assert_group_key_consistency(&scenario, &honest);
    assert_shares_interpolate_to_key(&scenario, &[1, 2, 3], &group_key, 5, 2);

    for &member in &honest {
        assert_eq!(scenario.output(member).qualified, vec![1, 2, 3, 5]);
        let dq = scenario.ledger(member).disqualification_of(4).unwrap();
        assert_eq!(dq.phase, Phase::SharesJustify);
        assert_eq!(dq.kind, Misbehavior::FailedShareJustification);
    }

    // Identical message logs yield identical ledgers at every honest member.
    let reference = scenario.output(1).report.clone();
    for &member in &honest[1..] {
        assert_eq!(scenario.output(member).report, reference);
    }
}

#[test]
fn false_accuser_is_disqualified() {
    let faults = Faults {
        forged_accusation: Some((2, 4)),
        ..Faults::default()
    };
    let scenario = run_scenario(5, 2, &faults);

    let honest = [1, 3, 4, 5];
    let group_key = assert_group_key_consistency(&scenario, &honest);
    assert_shares_interpolate_to_key(&scenario, &[1, 3, 4], &group_key, 5, 2);

    for &member in &honest {
        assert_eq!(scenario.output(member).qualified, vec![1, 3, 4, 5]);
        let dq = scenario.ledger(member).disqualification_of(2).unwrap();
        assert_eq!(dq.phase, Phase::SharesJustify);
        assert_eq!(dq.kind, Misbehavior::FalseShareAccusation);
    }
}

#[test]
fn too_many_silent_members_abort_the_run() {
    let faults = Faults {
        silent_from: BTreeMap::from([
            (3, Phase::EphemeralKeyGen),
            (4, Phase::EphemeralKeyGen),
            (5, Phase::EphemeralKeyGen),
        ]),
        ..Faults::default()
    };
    let scenario = run_scenario(5, 2, &faults);

    for member in [1, 2] {
        match &scenario.results[member - 1] {
            Err(DkgError::InsufficientQualifiedMembers {
                qualified,
                required,
            }) => {
                assert_eq!(*qualified, 2);
                assert_eq!(*required, 3);
            }
            other => panic!("member {member} expected an aborted run, got {other:?}"),
        }
        // Abort zeroizes everything.
        assert!(scenario.members[member - 1].secrets_scrubbed());
    }
}

#[test]
fn late_point_mismatch_triggers_reconstruction() {
    let faults = Faults {
        tamper_points: Some(5),
        ..Faults::default()
    };
    let scenario = run_scenario(7, 3, &faults);

    let honest = [1, 2, 3, 4, 6, 7];
    let group_key = assert_group_key_consistency(&scenario, &honest);
    // T+1 = 4 honest shares still interpolate to the key behind Y, proving
    // the reconstructed contribution of member 5 landed in the product.
    assert_shares_interpolate_to_key(&scenario, &[1, 2, 3, 4], &group_key, 7, 3);

    for &member in &honest {
        let output = scenario.output(member);
        // Member 5 stays in the qualified set; its key was reconstructed.
        assert_eq!(output.qualified, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(output.reconstructed, vec![5]);

        let dq = scenario.ledger(member).disqualification_of(5).unwrap();
        assert_eq!(dq.phase, Phase::PointsJustify);
        assert_eq!(dq.kind, Misbehavior::FailedPointJustification);
    }
}
