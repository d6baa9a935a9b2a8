//! Integration tests exercising `PgRecordStore` against a disposable Postgres
//! instance. Skipped when no local Postgres binaries are available.

use pipeline_core::{JobType, PipelineError, ProcessingStep, RecordStatus, RecordStore};
use pipeline_store::PgRecordStore;
use sqlx::postgres::PgPoolOptions;

async fn store() -> Option<(PgRecordStore, pipeline_test_support::TestDatabase)> {
    let db = match pipeline_test_support::start_postgres() {
        Ok(db) => db,
        Err(err) => {
            eprintln!("skipping pipeline-store integration test: {err}");
            return None;
        }
    };
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(db.connection_string())
        .await
        .expect("connect to disposable postgres");
    let store = PgRecordStore::new(pool)
        .await
        .expect("run record store migrations");
    Some((store, db))
}

#[tokio::test]
async fn full_lifecycle_reaches_done_with_all_artifacts() {
    let Some((store, _db)) = store().await else {
        return;
    };

    let record = store
        .create_uploaded("lecture.wav", Some("uploads/lecture.wav"), Some("media"), None)
        .await
        .unwrap();
    assert_eq!(record.status, RecordStatus::Uploaded);

    store.start_processing(record.id).await.unwrap();
    store
        .set_step(record.id, ProcessingStep::Transcription, 40)
        .await
        .unwrap();
    store
        .save_transcript(record.id, "hello world", None)
        .await
        .unwrap();

    let after_transcript = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(after_transcript.status, RecordStatus::Transcribed);
    assert_eq!(after_transcript.transcript_text.as_deref(), Some("hello world"));

    store.start_processing(record.id).await.unwrap();
    store.save_summary(record.id, "a short summary").await.unwrap();
    store.start_processing(record.id).await.unwrap();
    store.save_article(record.id, "# Article").await.unwrap();

    let done = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(done.status, RecordStatus::Done);
    assert_eq!(done.processing_progress, Some(100));
    assert!(done.error.is_none());
}

#[tokio::test]
async fn start_processing_rejects_from_transcribed_status() {
    let Some((store, _db)) = store().await else {
        return;
    };

    let record = store
        .create_uploaded("clip.mp4", None, None, Some("https://example.com/clip.mp4"))
        .await
        .unwrap();
    store.start_processing(record.id).await.unwrap();
    store.save_transcript(record.id, "text", None).await.unwrap();

    let err = store.start_processing(record.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::StaleState { .. }));
}

#[tokio::test]
async fn error_transition_clears_on_retry() {
    let Some((store, _db)) = store().await else {
        return;
    };

    let record = store
        .create_uploaded("clip.mp4", Some("uploads/clip.mp4"), Some("media"), None)
        .await
        .unwrap();
    store.start_processing(record.id).await.unwrap();
    store
        .record_error(record.id, "speech adapter unavailable", Some(ProcessingStep::Transcription))
        .await
        .unwrap();

    let errored = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(errored.status, RecordStatus::Error);
    assert!(errored.error.is_some());

    let resumed = store.start_processing(record.id).await.unwrap();
    assert_eq!(resumed.status, RecordStatus::Processing);
    assert!(resumed.error.is_none());
    assert!(resumed.processing_step.is_none());
}

#[tokio::test]
async fn begin_stage_resumes_from_the_prior_stages_terminal_status() {
    let Some((store, _db)) = store().await else {
        return;
    };

    let record = store
        .create_uploaded("clip.mp4", Some("uploads/clip.mp4"), Some("media"), None)
        .await
        .unwrap();
    store.start_processing(record.id).await.unwrap();
    store.save_transcript(record.id, "text", None).await.unwrap();

    let resumed = store.begin_stage(record.id, JobType::Summary).await.unwrap();
    assert_eq!(resumed.status, RecordStatus::Processing);
    assert_eq!(resumed.processing_progress, Some(5));
    assert!(resumed.processing_step.is_none());
}

#[tokio::test]
async fn begin_stage_rejects_skipping_the_prior_stage() {
    let Some((store, _db)) = store().await else {
        return;
    };

    let record = store
        .create_uploaded("clip.mp4", Some("uploads/clip.mp4"), Some("media"), None)
        .await
        .unwrap();

    let err = store.begin_stage(record.id, JobType::Article).await.unwrap_err();
    assert!(matches!(err, PipelineError::StaleState { .. }));
}

#[tokio::test]
async fn begin_stage_allows_sweeper_reclaimed_processing_records() {
    let Some((store, _db)) = store().await else {
        return;
    };

    let record = store
        .create_uploaded("clip.mp4", Some("uploads/clip.mp4"), Some("media"), None)
        .await
        .unwrap();
    store.start_processing(record.id).await.unwrap();

    let resumed = store
        .begin_stage(record.id, JobType::Transcription)
        .await
        .unwrap();
    assert_eq!(resumed.status, RecordStatus::Processing);
}

#[tokio::test]
async fn gc_stale_uploads_deletes_only_unfinished_old_records() {
    let Some((store, _db)) = store().await else {
        return;
    };

    let stale = store
        .create_uploaded("old.wav", Some("uploads/old.wav"), Some("media"), None)
        .await
        .unwrap();
    sqlx::query("UPDATE records SET created_at = now() - interval '2 days' WHERE id = $1")
        .bind(stale.id)
        .execute(store.pool())
        .await
        .unwrap();

    let fresh = store
        .create_uploaded("new.wav", Some("uploads/new.wav"), Some("media"), None)
        .await
        .unwrap();

    let deleted = store.gc_stale_uploads(chrono::Duration::hours(24)).await.unwrap();
    assert_eq!(deleted, 1);
    assert!(store.get(stale.id).await.unwrap().is_none());
    assert!(store.get(fresh.id).await.unwrap().is_some());
}
