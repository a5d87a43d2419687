//! A full asynchronous run: five engines over the in-process network and
//! chain, through key publication.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::OsRng;

use beacon_dkg::bus::LocalNetwork;
use beacon_dkg::chain::{BeaconChain, LocalChain};
use beacon_dkg::dkg::{DkgEngine, PhaseSchedule};
use beacon_dkg::group::Group;
use beacon_dkg::parameters::RunTag;
use beacon_dkg::testing;
use beacon_dkg::MemberContext;

#[tokio::test(flavor = "multi_thread")]
async fn five_member_cluster_generates_and_publishes_a_key() {
    let n = 5;
    let t = 2;
    let params = testing::test_parameters(n, t);
    let roster = testing::test_roster(n);
    let run = RunTag {
        group_id: 11,
        nonce: 1,
    };

    let network = LocalNetwork::new();
    let chain = LocalChain::new();
    let miner = chain.start_mining(Duration::from_millis(10));
    let schedule = PhaseSchedule::new(chain.current_block(), params.phase_duration_blocks());

    let handles: Vec<_> = (1..=n)
        .map(|index| {
            let group = Group::from_roster(&roster).unwrap();
            let ctx = MemberContext::new(params.clone(), group, index, run).unwrap();
            let channel = network.join(run, index).unwrap();
            let engine = DkgEngine::new(
                ctx,
                channel,
                Arc::clone(&chain) as Arc<dyn BeaconChain>,
                schedule,
            );
            tokio::spawn(engine.run(OsRng))
        })
        .collect();

    let mut outputs = Vec::new();
    for handle in handles {
        outputs.push(handle.await.unwrap().unwrap());
    }
    miner.abort();

    let group_key = &outputs[0].group_public_key;
    for output in &outputs {
        assert_eq!(&output.group_public_key, group_key);
        assert_eq!(output.qualified, vec![1, 2, 3, 4, 5]);
        assert!(output.report.disqualified.is_empty());
    }

    // Every qualified member submits; the chain keeps the first submission.
    for output in &outputs {
        output.publish(chain.as_ref()).await.unwrap();
    }
    assert_eq!(
        chain.published_key(run),
        Some(outputs[0].public_key_bytes())
    );

    // The bus refuses a second run under the same tag from the same sender.
    assert!(network.join(run, 1).is_err());
}
