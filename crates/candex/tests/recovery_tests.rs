//! Idempotency, admission control, timeout recovery and isolation
//! policy behavior across repeated orchestrator invocations.

mod common;

use chrono::{Duration, Utc};

use candex::config::schema::IsolationPolicy;
use candex::gateway::{BatchRecord, BatchStatus, FileStatus};

use common::{cv_content, test_config, Harness};

#[test]
fn rerun_of_completed_batch_is_a_no_op() {
    let h = Harness::new();
    h.seed_batch("b1", 1);
    h.write_file("b1", "cv.pdf", &cv_content("a@x.com"));

    let first = h.run("b1");
    assert_eq!(first.status, BatchStatus::Complete);

    let calls_before = h.capability_calls();
    let second = h.run("b1");

    assert!(second.skipped);
    assert_eq!(second.status, BatchStatus::Complete);
    assert_eq!(second.files_total, 1);
    assert_eq!(second.files_skipped, 1);
    // Zero external calls on the re-run.
    assert_eq!(h.capability_calls(), calls_before);
    assert_eq!(h.crm.created.borrow().len(), 1);
}

#[test]
fn awaiting_input_batch_is_not_reprocessed() {
    let h = Harness::new();
    h.seed_batch("b1", 1);
    h.write_file("b1", "letter.pdf", "email: a@x.com\nCover letter body text only.\n");

    let first = h.run("b1");
    assert_eq!(first.status, BatchStatus::AwaitingInput);

    let calls_before = h.capability_calls();
    let second = h.run("b1");

    assert!(second.skipped);
    assert_eq!(h.capability_calls(), calls_before);
    // No duplicate hold entries from the second invocation.
    assert_eq!(h.holds("b1").len(), 1);
}

#[test]
fn pending_batch_with_settled_files_completes_without_capability_calls() {
    let h = Harness::new();
    h.seed_batch("b1", 1);
    h.write_file("b1", "cv.pdf", &cv_content("a@x.com"));
    let first = h.run("b1");
    assert_eq!(first.status, BatchStatus::Complete);

    // Simulate a crash after the files settled but before the batch did.
    h.stores
        .database()
        .with_conn(|conn| {
            conn.execute(
                "UPDATE batches SET status = 'pending', started_at = NULL WHERE id = 'b1'",
                [],
            )?;
            Ok(())
        })
        .unwrap();

    let calls_before = h.capability_calls();
    let second = h.run("b1");

    assert!(!second.skipped);
    assert_eq!(second.status, BatchStatus::Complete);
    assert_eq!(second.files_skipped, 1);
    assert_eq!(h.capability_calls(), calls_before, "settled files re-invoke nothing");
    assert_eq!(h.crm.created.borrow().len(), 1, "no second contact");
}

#[test]
fn healthy_processing_batch_is_not_reentered() {
    let h = Harness::new();
    let mut record = BatchRecord::new("b1", 1, Utc::now());
    record.status = BatchStatus::Processing;
    record.started_at = Some(Utc::now());
    h.seed_batch_record(&record);
    h.write_file("b1", "cv.pdf", &cv_content("a@x.com"));

    let report = h.run("b1");

    assert!(report.skipped);
    assert_eq!(h.capability_calls(), 0);
    assert_eq!(h.batch("b1").status, BatchStatus::Processing);
}

#[test]
fn timed_out_processing_batch_is_recovered() {
    let h = Harness::new();
    let started = Utc::now() - Duration::hours(2);
    let mut record = BatchRecord::new("b1", 1, started);
    record.status = BatchStatus::Processing;
    record.started_at = Some(started);
    record.updated_at = started;
    h.seed_batch_record(&record);
    h.write_file("b1", "cv.pdf", &cv_content("a@x.com"));

    let report = h.run("b1");

    assert!(!report.skipped);
    assert_eq!(report.status, BatchStatus::Complete);
    assert_eq!(report.candidates_created, 1);

    let batch = h.batch("b1");
    assert!(batch.recovered_at.is_some(), "recovery marker written");
}

#[test]
fn admission_denial_fails_batch_before_reading_files() {
    let mut config = test_config();
    config.cost.daily_call_ceiling = 100;
    let h = Harness::with_config(config);
    h.seed_batch("big", 1000);

    let report = h.run("big");

    assert_eq!(report.status, BatchStatus::Failed);
    assert_eq!(report.files_total, 1000);
    assert_eq!(report.files_completed, 0);
    assert_eq!(h.capability_calls(), 0, "zero files read");

    let batch = h.batch("big");
    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch.error.as_deref().unwrap().contains("call ceiling"));
    assert_eq!(batch.processed_count, 0);
}

#[test]
fn failed_batch_stays_terminal() {
    let mut config = test_config();
    config.cost.daily_call_ceiling = 100;
    let h = Harness::with_config(config);
    h.seed_batch("big", 1000);
    h.run("big");

    let second = h.run("big");
    assert!(second.skipped);
    assert_eq!(second.status, BatchStatus::Failed);
}

#[test]
fn usage_is_recorded_per_completed_operation() {
    let h = Harness::new();
    h.seed_batch("b1", 1);
    h.write_file("b1", "cv.pdf", &cv_content("a@x.com"));
    h.run("b1");

    let usage = candex::gateway::UsageLedger::usage_for(&h.stores, Utc::now().date_naive())
        .unwrap();
    // extract + classify + quick parse + full parse.
    assert_eq!(usage.calls, 4);
    assert!(usage.cost > 0.0);
}

#[test]
fn fail_fast_isolation_fails_the_whole_batch() {
    let mut config = test_config();
    config.isolation = IsolationPolicy::FailFast;
    let h = Harness::with_config(config);
    h.seed_batch("b1", 2);
    h.write_file("b1", "broken.pdf", "EXTRACT_FAIL with some padding characters.\n");
    h.write_file("b1", "cv.pdf", &cv_content("a@x.com"));

    let report = h.run("b1");

    assert_eq!(report.status, BatchStatus::Failed);
    assert!(report.error.as_deref().unwrap().contains("broken.pdf"));

    let batch = h.batch("b1");
    assert_eq!(batch.status, BatchStatus::Failed);
    // The later file never ran.
    assert_eq!(report.candidates_created, 0);
}

#[test]
fn continue_on_error_processes_remaining_files() {
    let h = Harness::new(); // default isolation
    h.seed_batch("b1", 2);
    h.write_file("b1", "broken.pdf", "EXTRACT_FAIL with some padding characters.\n");
    h.write_file("b1", "cv.pdf", &cv_content("a@x.com"));

    let report = h.run("b1");

    assert_eq!(report.status, BatchStatus::Complete);
    assert_eq!(report.candidates_created, 1);
    assert_eq!(h.file("b1", "broken.pdf").status, FileStatus::Failed);
    assert_eq!(h.file("b1", "cv.pdf").status, FileStatus::Complete);
}

#[test]
fn failed_files_are_retried_on_a_recovered_run() {
    let h = Harness::new();
    h.seed_batch("b1", 1);
    // First run: extraction keeps failing, file ends up failed.
    h.write_file("b1", "cv.pdf", "EXTRACT_FAIL padded body for the extractor.\n");
    let first = h.run("b1");
    assert_eq!(first.status, BatchStatus::Complete);
    assert_eq!(h.file("b1", "cv.pdf").status, FileStatus::Failed);

    // Host re-opens the batch (new attempt) after fixing the upload.
    h.write_file("b1", "cv.pdf", &cv_content("a@x.com"));
    h.stores
        .database()
        .with_conn(|conn| {
            conn.execute("UPDATE batches SET status = 'pending' WHERE id = 'b1'", [])?;
            Ok(())
        })
        .unwrap();

    let second = h.run("b1");
    assert_eq!(second.status, BatchStatus::Complete);
    // Failed (not settled) files are eligible again.
    assert_eq!(h.file("b1", "cv.pdf").status, FileStatus::Complete);
    assert_eq!(second.candidates_created, 1);
}
