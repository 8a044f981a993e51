//! Bulk updates and external-sync batches: per-row isolation.

mod common;

use common::{with_players, FaultyStore};
use roster_integrity_core::{
    field::Field,
    orchestrator::CancelToken,
    store::StoreOp,
    update::{UpdateRequest, UpdateSource},
};

fn attendance(player: &str, scheduled: u32, attended: u32) -> UpdateRequest {
    UpdateRequest::new(player, UpdateSource::TrainingAttendance, "coach")
        .with_change("sessionsScheduled", scheduled)
        .with_change("sessionsAttended", attended)
}

/// Scenario 5: one malformed row out of ten.
#[test]
fn bulk_isolates_a_malformed_row() {
    let players = ["p1", "p2", "p3", "p4"];
    let orch = with_players(&players);

    let mut rows: Vec<UpdateRequest> = (0..10)
        .map(|i| attendance(players[i % players.len()], 20, 10 + i as u32))
        .collect();
    rows[6] = UpdateRequest::new("p3", UpdateSource::TrainingAttendance, "coach")
        .with_change("sessionsScheduled", "twenty")
        .with_change("sessionsAttended", 12);

    let summary = orch.bulk_update(&rows, &CancelToken::new());
    assert_eq!(summary.processed, 10);
    assert_eq!(summary.successful, 9);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.cancelled, 0);

    let rows_seen: Vec<usize> = summary.results.iter().map(|r| r.row).collect();
    assert_eq!(rows_seen, (0..10).collect::<Vec<_>>());
    assert!(!summary.results[6].success);
    assert_eq!(summary.results[6].failure.as_ref().unwrap().code, "validation_error");

    // p3's last good row (row 2) still stands; row 6 had no effect.
    let p3 = orch.player("p3").unwrap();
    assert_eq!(p3.number(Field::SessionsAttended), Some(12.0));
    assert_eq!(p3.number(Field::TrainingAttendanceRate), Some(0.6));
    for p in players {
        assert!(orch.verify_player(p).unwrap().is_empty(), "{p} has stale fields");
    }
}

#[test]
fn bulk_keeps_input_order_within_a_player() {
    let orch = with_players(&["p1", "p2"]);
    let rows = vec![
        attendance("p1", 20, 5),
        attendance("p2", 20, 19),
        attendance("p1", 20, 15),
        attendance("p1", 20, 20),
    ];
    let summary = orch.bulk_update(&rows, &CancelToken::new());
    assert_eq!(summary.successful, 4);
    assert_eq!(orch.player("p1").unwrap().number(Field::TrainingAttendanceRate), Some(1.0));
    assert_eq!(orch.player("p2").unwrap().number(Field::TrainingAttendanceRate), Some(0.95));
}

#[test]
fn cancelled_batch_reports_remaining_rows() {
    let orch = with_players(&["p1"]);
    let rows = vec![attendance("p1", 20, 10), attendance("p1", 20, 11)];
    let cancel = CancelToken::new();
    cancel.cancel();

    let summary = orch.bulk_update(&rows, &cancel);
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.cancelled, 2);
    assert!(summary.results.iter().all(|r| r.is_cancelled()));
    assert_eq!(orch.player("p1").unwrap().number(Field::SessionsAttended), Some(23.0));
}

#[test]
fn sync_chains_rows_of_one_player_and_audits_them() {
    let orch = with_players(&["p1", "p2"]);
    let audit_before = orch.store().audit_count("p1").unwrap();
    let rows = vec![
        UpdateRequest::new("p1", UpdateSource::ExternalSync, "vendor")
            .with_change("gpsTotalDistance", 4200),
        UpdateRequest::new("p2", UpdateSource::ExternalSync, "vendor")
            .with_change("aiRiskScore", 0.2),
        UpdateRequest::new("p1", UpdateSource::ExternalSync, "vendor")
            .with_change("aiRiskScore", 0.9),
        UpdateRequest::new("ghost", UpdateSource::ExternalSync, "vendor")
            .with_change("aiRiskScore", 0.1),
    ];

    let summary = orch.sync_external(&rows, &CancelToken::new());
    assert_eq!(summary.successful, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.results[3].failure.as_ref().unwrap().code, "player_not_found");
    assert_eq!(summary.chunks.len(), 1);

    let p1 = orch.player("p1").unwrap();
    assert_eq!(p1.number(Field::FitnessRating), Some(6.2));
    assert_eq!(p1.number(Field::AiRiskScore), Some(0.9));
    assert_eq!(p1.version, 3);
    assert!(orch.verify_player("p1").unwrap().is_empty());
    // Row 0: distance, fitness, flag, risk. Row 2: ai score only (risk already medium).
    assert_eq!(orch.store().audit_count("p1").unwrap(), audit_before + 5);
}

#[test]
fn failed_sync_chunk_leaves_other_chunks_committed() {
    fn upserts_p5(op: &StoreOp) -> bool {
        matches!(op, StoreOp::UpsertFields { player_id, .. } if player_id == "p5")
    }
    let players = ["p1", "p2", "p3", "p4", "p5", "p6"];
    let store = FaultyStore::failing_commits(upserts_p5);
    let orch = store.orchestrator(&players);

    let rows: Vec<UpdateRequest> = players.iter().map(|p| attendance(p, 20, 10)).collect();
    let summary = orch.sync_external(&rows, &CancelToken::new());

    // Batch size 4: chunk 0 holds p1..p4, chunk 1 holds p5 and p6.
    assert_eq!(summary.chunks.len(), 2);
    assert!(summary.chunks[0].committed());
    assert!(!summary.chunks[1].committed());
    assert_eq!(summary.successful, 4);
    assert_eq!(summary.failed, 2);
    for result in &summary.results[4..] {
        let failure = result.failure.as_ref().unwrap();
        assert_eq!(failure.code, "persistence_error");
        assert!(failure.retryable);
        assert!(result.update_id.is_none());
    }
    assert_eq!(orch.player("p1").unwrap().number(Field::SessionsAttended), Some(10.0));
    assert_eq!(orch.player("p6").unwrap().number(Field::SessionsAttended), Some(23.0));
}

#[test]
fn sync_never_splits_a_row_across_chunks() {
    fn is_sub_record(op: &StoreOp) -> bool {
        matches!(op, StoreOp::AppendSubRecord { .. })
    }
    let players = ["p1", "p2", "p3", "p4"];
    let store = FaultyStore::failing_commits(is_sub_record);
    let orch = store.orchestrator(&players);
    let audit_before = orch.store().inner.audit_count("p4").unwrap();

    // Three single-op rows, then a severe injury (field merge + injuries row).
    // Op-count chunking would put the merge in chunk 0 and its sub-record in
    // chunk 1; the injury row must move to chunk 1 as a whole.
    let rows = vec![
        attendance("p1", 20, 10),
        attendance("p2", 20, 10),
        attendance("p3", 20, 10),
        UpdateRequest::new("p4", UpdateSource::Injury, "medic")
            .with_change("injuryType", "knee")
            .with_change("injurySeverity", "severe"),
    ];
    let summary = orch.sync_external(&rows, &CancelToken::new());

    assert_eq!(summary.chunks.len(), 2);
    assert_eq!(summary.chunks[0].op_count, 3);
    assert!(summary.chunks[0].committed());
    assert_eq!(summary.chunks[1].op_count, 2);
    assert!(!summary.chunks[1].committed());
    assert_eq!(summary.successful, 3);

    let failed = &summary.results[3];
    assert!(!failed.success);
    assert_eq!(failed.failure.as_ref().unwrap().code, "persistence_error");

    // No field of the failed row reached the store, and nothing went unaudited.
    let p4 = orch.player("p4").unwrap();
    assert_eq!(p4.text(Field::InjurySeverity), None);
    assert_eq!(p4.text(Field::MedicalStatus).as_deref(), Some("available"));
    assert_eq!(p4.version, 1);
    assert_eq!(orch.store().inner.audit_count("p4").unwrap(), audit_before);
}
