//! Single-job lifecycle, leasing and queue scanning against the in-memory store.

mod common;

use async_trait::async_trait;
use beacon_jobs::{
    EmailJobData, JobContext, JobError, JobPayload, JobProcessor, JobResult, JobStatus,
    MemoryRecordStore, QueueScanner, RecordStore, TypedJobHandler, JOB_TYPE_EMAIL,
};
use chrono::Utc;
use common::{config, pooled, queue, queue_payload, Sleep, Succeed};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn sequential(store: &Arc<MemoryRecordStore>) -> JobProcessor {
    JobProcessor::sequential(store.clone(), config(1))
}

#[tokio::test]
async fn test_success_deletes_record() {
    let store = Arc::new(MemoryRecordStore::new());
    let processor = sequential(&store);
    processor.register_handler(Arc::new(Succeed("A"))).unwrap();

    let mut record = queue(&store, "A").await;
    processor.process_job(&mut record).await.unwrap();

    assert!(store.is_empty());
    assert_eq!(processor.status(&record.id).await.unwrap(), JobStatus::Completed);
}

#[tokio::test]
async fn test_missing_type_fails_once() {
    let store = Arc::new(MemoryRecordStore::new());
    let processor = sequential(&store);

    let mut record = queue_payload(&store, r#"{"data":{"n":1}}"#).await;
    let err = processor.process_job(&mut record).await.unwrap_err();
    assert!(matches!(err, JobError::InvalidPayload(_)));

    let stored = store.get(&record.id).unwrap();
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.reserved_at, "");
    assert_eq!(stored, record);
}

#[tokio::test]
async fn test_invalid_json_fails_instead_of_crashing() {
    let store = Arc::new(MemoryRecordStore::new());
    let processor = sequential(&store);

    let mut record = queue_payload(&store, "not json at all").await;
    assert!(processor.process_job(&mut record).await.is_err());
    assert_eq!(store.get(&record.id).unwrap().attempts, 1);
}

#[tokio::test]
async fn test_retries_accumulate_attempts() {
    let store = Arc::new(MemoryRecordStore::new());
    let processor = sequential(&store);

    let record = queue(&store, "unknown").await;
    for expected in 1..=3 {
        let mut current = store.get(&record.id).unwrap();
        let err = processor.process_job(&mut current).await.unwrap_err();
        assert!(matches!(err, JobError::NoHandler(_)));
        assert_eq!(store.get(&record.id).unwrap().attempts, expected);
    }
}

#[tokio::test]
async fn test_fresh_lease_blocks_claim_until_expired() {
    let store = Arc::new(MemoryRecordStore::new());
    let processor = sequential(&store);
    processor.register_handler(Arc::new(Succeed("A"))).unwrap();

    let mut record = queue(&store, "A").await;
    record.reserve(Utc::now());
    store.save(&record).await.unwrap();
    assert_eq!(processor.status(&record.id).await.unwrap(), JobStatus::Processing);

    let err = processor.process_job(&mut record).await.unwrap_err();
    assert!(matches!(err, JobError::AlreadyReserved { .. }));
    assert_eq!(store.get(&record.id).unwrap(), record);

    // lease older than the five minute window
    record.reserve(Utc::now() - chrono::Duration::minutes(6));
    store.save(&record).await.unwrap();
    assert_eq!(processor.status(&record.id).await.unwrap(), JobStatus::Queued);

    processor.process_job(&mut record).await.unwrap();
    assert!(store.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_second_processor_cannot_claim_in_flight_job() {
    let store = Arc::new(MemoryRecordStore::new());
    let first = Arc::new(sequential(&store));
    first
        .register_handler(Arc::new(Sleep {
            job_type: "slow",
            duration: Duration::from_millis(300),
        }))
        .unwrap();
    let second = sequential(&store);
    second.register_handler(Arc::new(Succeed("slow"))).unwrap();

    let record = queue(&store, "slow").await;
    let in_flight = {
        let first = first.clone();
        let mut record = record.clone();
        tokio::spawn(async move { first.process_job(&mut record).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut seen = store.get(&record.id).unwrap();
    assert!(!seen.reserved_at.is_empty());

    let err = second.process_job(&mut seen).await.unwrap_err();
    assert!(matches!(err, JobError::AlreadyReserved { .. }));

    in_flight.await.unwrap().unwrap();
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_sequential_batch() {
    let store = Arc::new(MemoryRecordStore::new());
    let processor = sequential(&store);
    processor.register_handler(Arc::new(Succeed("A"))).unwrap();

    let a = queue(&store, "A").await;
    let z = queue(&store, "Z").await;

    let results = processor.process_jobs(vec![a, z.clone()]).await;
    assert!(results[0].is_ok());
    assert!(matches!(&results[1], Err(JobError::NoHandler(_))));
    assert_eq!(store.len(), 1);
    assert_eq!(store.get(&z.id).unwrap().attempts, 1);
}

#[tokio::test]
async fn test_enqueue_and_status() {
    let store = Arc::new(MemoryRecordStore::new());
    let processor = sequential(&store);

    let record = processor
        .enqueue("report", "nightly report", &json!({"type": "A", "options": {"priority": 1}}))
        .await
        .unwrap();

    assert_eq!(record.attempts, 0);
    assert_eq!(record.reserved_at, "");
    assert_eq!(processor.status(&record.id).await.unwrap(), JobStatus::Queued);

    let err = processor
        .enqueue("broken", "", &json!({"type": "A", "data": [1, 2]}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("'data' field must be an object"));
    assert_eq!(store.len(), 1);
}

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

struct MailerHandler(Arc<RecordingMailer>);

#[async_trait]
impl TypedJobHandler for MailerHandler {
    const JOB_TYPE: &'static str = JOB_TYPE_EMAIL;
    type Data = EmailJobData;
    type Options = beacon_jobs::JobOptions;

    async fn execute(&self, ctx: &JobContext, payload: JobPayload<EmailJobData>) -> JobResult<()> {
        payload.data.validate()?;
        self.0
            .sent
            .lock()
            .push((ctx.correlation_id.clone(), payload.data.to));
        Ok(())
    }
}

#[tokio::test]
async fn test_typed_handler_through_processor() {
    let store = Arc::new(MemoryRecordStore::new());
    let processor = sequential(&store);
    let mailer = Arc::new(RecordingMailer::default());
    processor.register_typed(MailerHandler(mailer.clone())).unwrap();

    let mut good = processor
        .enqueue(
            "welcome",
            "",
            &json!({
                "type": "email",
                "data": {"to": "user@example.com", "subject": "Hi", "template": "welcome"}
            }),
        )
        .await
        .unwrap();
    let mut bad = processor
        .enqueue(
            "welcome",
            "",
            &json!({
                "type": "email",
                "data": {"to": "nobody", "subject": "Hi", "template": "welcome"}
            }),
        )
        .await
        .unwrap();

    processor.process_job(&mut good).await.unwrap();
    assert!(processor.process_job(&mut bad).await.is_err());

    let sent = mailer.sent.lock().clone();
    assert_eq!(sent, vec![(good.id.clone(), "user@example.com".to_string())]);
    assert_eq!(store.get(&bad.id).unwrap().attempts, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scan_once_processes_available_jobs() {
    let store = Arc::new(MemoryRecordStore::new());
    let processor = Arc::new(pooled(&store, config(2)));
    processor.register_handler(Arc::new(Succeed("A"))).unwrap();

    queue(&store, "A").await;
    queue(&store, "A").await;
    let orphan = queue(&store, "nobody-handles-this").await;
    let mut leased = queue(&store, "A").await;
    leased.reserve(Utc::now());
    store.save(&leased).await.unwrap();

    let scanner = QueueScanner::new(processor.clone()).unwrap();
    let report = scanner.scan_once().await.unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.successful, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(store.len(), 2);
    assert_eq!(store.get(&orphan.id).unwrap().attempts, 1);
    assert!(store.get(&leased.id).is_some());

    // the failed job is immediately available again, the leased one is not
    let report = scanner.scan_once().await.unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(store.get(&orphan.id).unwrap().attempts, 2);

    processor.shutdown(Duration::from_secs(5)).await.unwrap();
}
