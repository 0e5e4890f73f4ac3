//! Multi-boot scenarios: persisted rounds across reboots and fleets
//! sharing one medium.

use leach_core::aggregate::AggregateBuffer;
use leach_core::hal::RngSource;
use leach_core::role::{ClusterHeadOutcome, StationOutcome};
use leach_core::sim::{FixedSensor, Fleet, ScriptedRandom, SimMedium, SimPower};
use leach_core::storage::ROUND_FILE;
use leach_core::{FileStore, Node, NodeConfig, NodeIdentity, Role, RoleOutcome, RoundState};
use std::collections::HashMap;
use std::time::Duration;
use tempfile::tempdir;

const SECRET: &str = "leach-cluster";

fn node_id() -> NodeIdentity {
    NodeIdentity::new([0x5C, 0xCF, 0x7F, 0x12, 0x34, 0x56])
}

#[tokio::test(start_paused = true)]
async fn test_one_epoch_across_reboots() {
    let dir = tempdir().unwrap();
    let medium = SimMedium::new();
    medium.add_base_station("BASE_STATION", SECRET);
    let config = NodeConfig::default().with_epoch_length(7);
    let draws = [0.05, 0.2, 0.9, 0.9, 0.9, 0.9, 0.9];

    let mut reports = Vec::new();
    for draw in draws {
        // fresh drivers every boot, only the round file survives
        let mut node = Node::new(
            config.clone(),
            medium.radio(node_id()),
            FileStore::new(dir.path()),
            ScriptedRandom::new(vec![draw]),
            FixedSensor::new(512),
            SimPower::new(),
        );
        reports.push(node.run_round().await);
    }

    let roles: Vec<Role> = reports.iter().map(|r| r.role).collect();
    assert_eq!(roles[0], Role::ClusterHead);
    assert!(roles[1..].iter().all(|r| *r == Role::Station));

    for (i, report) in reports.iter().enumerate() {
        assert_eq!(report.state.round, i as u16);
        assert_eq!(report.state.ch_enable, i == 0);
        assert!(report.persisted);
    }
    // first boot finds no round file
    assert!(reports[0].state_error.is_some());
    assert_eq!(reports[1].state_error, None);
    assert!(reports.iter().all(|r| (r.probability - 1.0 / 7.0).abs() < 1e-12));

    // the last round's threshold reaches 1, but the node already headed
    assert!(reports[6].threshold.unwrap() > 0.9);

    assert_eq!(
        std::fs::read(dir.path().join(ROUND_FILE.trim_start_matches('/'))).unwrap(),
        b"00000001"
    );
    assert_eq!(reports[6].next_state, RoundState::default());

    // lone head has nobody to collect from; stations report straight to base
    assert_eq!(
        reports[0].outcome,
        RoleOutcome::ClusterHead(ClusterHeadOutcome::NothingCollected { invalid: 0 })
    );
    let inbox = medium.base_inbox();
    assert_eq!(inbox.len(), 6);
    assert!(inbox
        .iter()
        .all(|d| d.payload == b";5CCF7F123456:512".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn test_station_without_base_or_heads_still_advances() {
    let dir = tempdir().unwrap();
    let medium = SimMedium::new();
    let mut node = Node::new(
        NodeConfig::default(),
        medium.radio(node_id()),
        FileStore::new(dir.path()),
        ScriptedRandom::new(vec![0.99, 0.99]),
        FixedSensor::new(1),
        SimPower::new(),
    );

    let first = node.run_round().await;
    let second = node.run_round().await;

    assert_eq!(first.outcome, RoleOutcome::Station(StationOutcome::NoNetworks));
    assert_eq!(second.state, RoundState::new(1, true));
    assert_eq!(node.power().slept().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_fleet_rotates_heads_and_delivers_every_reading() {
    let medium = SimMedium::new();
    medium.add_base_station("BASE_STATION", SECRET);
    let config = NodeConfig::default()
        .with_epoch_length(5)
        .with_sleep_interval(Duration::from_secs(30));
    let sources = (0..5).map(RngSource::seeded).collect();
    let mut fleet = Fleet::new(medium, &config, sources).unwrap();

    let mut head_counts: HashMap<String, usize> = HashMap::new();
    for index in 0..5 {
        let round = fleet.run_round().await;
        assert_eq!(round.index, index);

        for report in &round.reports {
            assert_eq!(report.state.round, index as u16);
            if report.role == Role::ClusterHead {
                *head_counts.entry(report.node.clone()).or_default() += 1;
            }
        }

        // each station's reading reaches the base once, aggregated or direct
        let stations = round
            .reports
            .iter()
            .filter(|r| r.role == Role::Station)
            .count();
        let delivered: usize = round
            .uplinks
            .iter()
            .map(|u| AggregateBuffer::decode(u.as_bytes()).unwrap().len())
            .sum();
        assert_eq!(delivered, stations);
    }

    // every node headed exactly once in the epoch
    assert_eq!(head_counts.len(), 5);
    assert!(head_counts.values().all(|&n| n == 1));
    assert!(fleet
        .nodes()
        .iter()
        .all(|n| n.store().inner().file(ROUND_FILE) == Some(&b"00000001"[..])));
}
