//! Per-player serialization under concurrent writers.
//!
//! The store sleeps inside every read, so an unserialized read-modify-write
//! would lose updates or hit version conflicts.

mod common;

use common::{with_players, FaultyStore};
use roster_integrity_core::{
    field::Field,
    orchestrator::{CancelToken, UpdateOrchestrator},
    store::SqliteStore,
    update::{UpdateRequest, UpdateSource},
};
use std::{
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

fn slow_store() -> FaultyStore {
    FaultyStore { load_delay: Some(Duration::from_millis(5)), ..FaultyStore::new() }
}

#[test]
fn concurrent_updates_to_one_player_are_serialized() {
    let orch = slow_store().orchestrator(&["p1"]);
    let writers = 8;

    std::thread::scope(|scope| {
        for i in 0..writers {
            let orch = &orch;
            scope.spawn(move || {
                let request = UpdateRequest::new("p1", UpdateSource::ManualValueOverride, "admin")
                    .with_change("weeklyWage", 3_000 + i * 100);
                let result = orch.submit(&request);
                assert!(result.success, "writer {i} failed: {:?}", result.failure);
            });
        }
    });

    let record = orch.player("p1").unwrap();
    assert_eq!(record.version, 1 + writers as u64);
    assert!(orch.verify_player("p1").unwrap().is_empty());
    let history = orch.history("p1", Some(100)).unwrap();
    let wage_changes = history.iter().filter(|e| e.field == Field::WeeklyWage).count();
    assert_eq!(wage_changes, writers as usize);
}

#[test]
fn different_players_proceed_in_parallel_batches() {
    let players = ["p1", "p2", "p3", "p4", "p5", "p6"];
    let orch = slow_store().orchestrator(&players);

    let rows: Vec<UpdateRequest> = (0..24)
        .map(|i| {
            UpdateRequest::new(players[i % players.len()], UpdateSource::CsvRow, "importer")
                .with_change("sessionsScheduled", 30)
                .with_change("sessionsAttended", i as u32)
        })
        .collect();
    let summary = orch.bulk_update(&rows, &CancelToken::new());
    assert_eq!(summary.successful, 24);

    // Each player's last row wins: rows 18..24.
    for (offset, p) in players.iter().enumerate() {
        let record = orch.player(p).unwrap();
        assert_eq!(record.number(Field::SessionsAttended), Some((18 + offset) as f64));
        assert_eq!(record.version, 5);
        assert!(orch.verify_player(p).unwrap().is_empty());
    }
}

/// Run every job on its own thread and fail, rather than hang, when they do
/// not all finish in time.
fn finish_within(limit: Duration, jobs: Vec<Box<dyn FnOnce() + Send>>) {
    let (done, finished) = mpsc::channel();
    let count = jobs.len();
    for job in jobs {
        let done = done.clone();
        thread::spawn(move || {
            job();
            let _ = done.send(());
        });
    }
    for _ in 0..count {
        finished
            .recv_timeout(limit)
            .expect("a concurrent job panicked or never finished");
    }
}

fn csv_rows(players: &[&str], count: usize) -> Vec<UpdateRequest> {
    (0..count)
        .map(|i| {
            UpdateRequest::new(players[i % players.len()], UpdateSource::CsvRow, "importer")
                .with_change("sessionsScheduled", 30)
                .with_change("sessionsAttended", (i % 30) as u32)
        })
        .collect()
}

fn sync_rows(players: &[&str], round: usize) -> Vec<UpdateRequest> {
    players
        .iter()
        .map(|p| {
            UpdateRequest::new(*p, UpdateSource::ExternalSync, "vendor")
                .with_change("aiRiskScore", round as f64 / 100.0)
        })
        .collect()
}

#[test]
fn bulk_and_sync_over_the_same_players_both_finish() {
    let players = ["a", "b"];
    let orch: Arc<UpdateOrchestrator<SqliteStore>> = Arc::new(with_players(&players));
    let rounds = 10;

    for round in 1..=rounds {
        let bulk = {
            let orch = Arc::clone(&orch);
            Box::new(move || {
                let summary = orch.bulk_update(&csv_rows(&["a", "b"], 100), &CancelToken::new());
                assert_eq!(summary.successful, 100);
            }) as Box<dyn FnOnce() + Send>
        };
        let sync = {
            let orch = Arc::clone(&orch);
            Box::new(move || {
                let summary = orch.sync_external(&sync_rows(&["a", "b"], round), &CancelToken::new());
                assert_eq!(summary.successful, 2, "{:?}", summary.results);
            }) as Box<dyn FnOnce() + Send>
        };
        finish_within(Duration::from_secs(30), vec![bulk, sync]);
    }

    for p in players {
        let record = orch.player(p).unwrap();
        // Onboarding, then 50 bulk rows and one sync row per round.
        assert_eq!(record.version, 1 + rounds as u64 * 51);
        assert_eq!(record.number(Field::AiRiskScore), Some(rounds as f64 / 100.0));
        assert!(orch.verify_player(p).unwrap().is_empty());
    }
}

#[test]
fn submits_and_syncs_interleave_without_lost_writes() {
    let players = ["p1", "p2", "p3"];
    let orch: Arc<UpdateOrchestrator<FaultyStore>> = Arc::new(slow_store().orchestrator(&players));
    let writers = 4;
    let syncs = 3;

    let mut jobs: Vec<Box<dyn FnOnce() + Send>> = Vec::new();
    for i in 0..writers {
        let orch = Arc::clone(&orch);
        jobs.push(Box::new(move || {
            let player = if i % 2 == 0 { "p1" } else { "p2" };
            let request = UpdateRequest::new(player, UpdateSource::ManualValueOverride, "admin")
                .with_change("weeklyWage", 4_000 + i * 100);
            let result = orch.submit(&request);
            assert!(result.success, "writer {i}: {:?}", result.failure);
        }));
    }
    for round in 1..=syncs {
        let orch = Arc::clone(&orch);
        jobs.push(Box::new(move || {
            let summary = orch.sync_external(&sync_rows(&["p1", "p2", "p3"], round), &CancelToken::new());
            assert_eq!(summary.successful, 3, "{:?}", summary.results);
        }));
    }
    finish_within(Duration::from_secs(30), jobs);

    let versions: Vec<u64> = players.iter().map(|p| orch.player(p).unwrap().version).collect();
    assert_eq!(versions, vec![1 + 2 + syncs as u64, 1 + 2 + syncs as u64, 1 + syncs as u64]);
    for p in players {
        assert!(orch.verify_player(p).unwrap().is_empty());
    }
}
