use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::tasks::grading::{GradingPipeline, RUN_ABORTED_FEEDBACK};

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum DispatchError {
    #[error("grading run already in progress")]
    AlreadyRunning,
    #[error("grading queue is full")]
    QueueFull,
    #[error("grading workers are shutting down")]
    ShuttingDown,
}

impl DispatchError {
    fn reason(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "already_running",
            Self::QueueFull => "queue_full",
            Self::ShuttingDown => "shutting_down",
        }
    }
}

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Reservation of a grading id; dropping it frees the id.
#[derive(Debug)]
pub(crate) struct Claim {
    id: String,
    in_flight: InFlight,
}

impl Claim {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.id);
    }
}

/// Bounded pool of pipeline workers with at most one run per grading id.
#[derive(Clone)]
pub(crate) struct GradingDispatcher {
    sender: mpsc::Sender<Claim>,
    in_flight: InFlight,
}

impl GradingDispatcher {
    pub(crate) fn start(
        pipeline: GradingPipeline,
        workers: usize,
        capacity: usize,
        shutdown: watch::Receiver<bool>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|worker_id| {
                tokio::spawn(worker(
                    worker_id,
                    pipeline.clone(),
                    receiver.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        (Self { sender, in_flight: Arc::default() }, handles)
    }

    /// Reserves `id`, failing when a run for it is already queued or active.
    pub(crate) fn claim(&self, id: &str) -> Result<Claim, DispatchError> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(id.to_string()) {
            drop(in_flight);
            return Err(self.rejected(DispatchError::AlreadyRunning));
        }

        Ok(Claim { id: id.to_string(), in_flight: self.in_flight.clone() })
    }

    /// Enqueues a claimed run without waiting for a worker.
    pub(crate) fn submit(&self, claim: Claim) -> Result<(), DispatchError> {
        self.sender.try_send(claim).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => self.rejected(DispatchError::QueueFull),
            mpsc::error::TrySendError::Closed(_) => self.rejected(DispatchError::ShuttingDown),
        })
    }

    #[cfg(test)]
    pub(crate) fn dispatch(&self, id: &str) -> Result<(), DispatchError> {
        let claim = self.claim(id)?;
        self.submit(claim)
    }

    #[cfg(test)]
    pub(crate) fn is_in_flight(&self, id: &str) -> bool {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).contains(id)
    }

    fn rejected(&self, err: DispatchError) -> DispatchError {
        metrics::counter!("grading_dispatch_rejected_total", "reason" => err.reason()).increment(1);
        err
    }
}

async fn worker(
    worker_id: usize,
    pipeline: GradingPipeline,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Claim>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                claim = receiver.recv() => claim,
                _ = shutdown.changed() => None,
            }
        };

        let Some(claim) = next else {
            break;
        };

        // Runs on its own task so a panic ends the run, not the worker.
        let grading_id = claim.id().to_string();
        let run = tokio::spawn({
            let pipeline = pipeline.clone();
            let grading_id = grading_id.clone();
            async move { pipeline.run(&grading_id).await }
        });

        match run.await {
            Ok(Ok(outcome)) => {
                tracing::debug!(worker_id, grading_id = %grading_id, ?outcome, "Grading run finished");
            }
            Ok(Err(err)) => {
                tracing::error!(worker_id, grading_id = %grading_id, error = %err, "Grading run aborted");
            }
            Err(err) => {
                tracing::error!(worker_id, grading_id = %grading_id, error = %err, "Grading run panicked");
                if let Err(err) = pipeline.abort(&grading_id, RUN_ABORTED_FEEDBACK).await {
                    tracing::error!(
                        worker_id,
                        grading_id = %grading_id,
                        error = %err,
                        "Failed to mark aborted grading failed"
                    );
                }
            }
        }
        drop(claim);
    }

    tracing::debug!(worker_id, "Grading worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::core::time::now_utc;
    use crate::db::models::{GradingRecord, NewGrading};
    use crate::db::types::GradingStatus;
    use crate::repositories::gradings::{GradingRepository, InMemoryGradingRepository};
    use crate::services::ai_scoring::{Scorer, ScoringRequest};
    use crate::services::baidu_ocr::TextExtractor;
    use crate::services::error::ServiceError;
    use crate::services::scoring_parse::{parse_unstructured, ParseOutcome};
    use crate::services::storage::{FileStore, StorageError};

    struct AnyFile;

    #[async_trait]
    impl FileStore for AnyFile {
        async fn read(&self, _relative_path: &str) -> Result<Vec<u8>, StorageError> {
            Ok(b"1+1=2".to_vec())
        }
    }

    /// Blocks each extraction until released.
    struct GatedExtractor {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl TextExtractor for GatedExtractor {
        async fn extract_text(&self, image: &[u8]) -> Result<String, ServiceError> {
            self.gate.notified().await;
            Ok(String::from_utf8_lossy(image).into_owned())
        }
    }

    /// Panics on the first extraction, then echoes.
    #[derive(Default)]
    struct PanicsOnce {
        fired: AtomicBool,
    }

    #[async_trait]
    impl TextExtractor for PanicsOnce {
        async fn extract_text(&self, image: &[u8]) -> Result<String, ServiceError> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                panic!("extractor blew up");
            }
            Ok(String::from_utf8_lossy(image).into_owned())
        }
    }

    struct FixedScorer;

    #[async_trait]
    impl Scorer for FixedScorer {
        async fn score(&self, _request: &ScoringRequest) -> Result<ParseOutcome, ServiceError> {
            Ok(parse_unstructured("80分"))
        }
    }

    async fn seeded_repo(ids: &[&str]) -> Arc<InMemoryGradingRepository> {
        let repo = Arc::new(InMemoryGradingRepository::new());
        for id in ids {
            let record = GradingRecord::new(NewGrading {
                id: id.to_string(),
                subject: None,
                images: vec!["papers/a.png".to_string()],
                paper_image: None,
                answer_image: None,
                description: None,
                owner_username: "alice".to_string(),
                owner_role: "parent".to_string(),
                now: now_utc(),
            });
            repo.upsert(&record).await.expect("seed");
        }
        repo
    }

    fn pipeline(repo: Arc<InMemoryGradingRepository>, gate: Arc<Notify>) -> GradingPipeline {
        GradingPipeline::new(
            repo,
            Arc::new(AnyFile),
            Arc::new(GatedExtractor { gate }),
            Arc::new(FixedScorer),
        )
    }

    async fn wait_for_status(repo: &InMemoryGradingRepository, id: &str, status: GradingStatus) {
        for _ in 0..200 {
            let record = repo.find_by_id(id).await.expect("find").expect("record");
            if record.status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("record {id} never reached {status:?}");
    }

    #[tokio::test]
    async fn second_trigger_for_same_id_is_rejected_while_running() {
        let repo = seeded_repo(&["g-1"]).await;
        let gate = Arc::new(Notify::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatcher, _handles) =
            GradingDispatcher::start(pipeline(repo.clone(), gate.clone()), 2, 8, shutdown_rx);

        dispatcher.dispatch("g-1").expect("first dispatch");
        assert_eq!(dispatcher.dispatch("g-1"), Err(DispatchError::AlreadyRunning));

        gate.notify_one();
        wait_for_status(&repo, "g-1", GradingStatus::Completed).await;
        for _ in 0..200 {
            if !dispatcher.is_in_flight("g-1") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(!dispatcher.is_in_flight("g-1"));
        dispatcher.dispatch("g-1").expect("dispatch after completion");
        gate.notify_one();
    }

    #[tokio::test]
    async fn full_queue_rejects_and_releases_claim() {
        let repo = seeded_repo(&["a", "b", "c"]).await;
        let gate = Arc::new(Notify::new());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatcher, _handles) =
            GradingDispatcher::start(pipeline(repo, gate.clone()), 1, 1, shutdown_rx);

        dispatcher.dispatch("a").expect("a");
        // Let the single worker pick up "a" so "b" occupies the queue slot.
        for _ in 0..200 {
            if dispatcher.sender.capacity() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        dispatcher.dispatch("b").expect("b");

        assert_eq!(dispatcher.dispatch("c"), Err(DispatchError::QueueFull));
        assert!(!dispatcher.is_in_flight("c"));
        gate.notify_waiters();
    }

    #[tokio::test]
    async fn dropped_claim_frees_the_id() {
        let repo = seeded_repo(&[]).await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dispatcher, _handles) =
            GradingDispatcher::start(pipeline(repo, Arc::new(Notify::new())), 1, 1, shutdown_rx);

        let claim = dispatcher.claim("x").expect("claim");
        assert!(dispatcher.is_in_flight("x"));
        drop(claim);

        assert!(!dispatcher.is_in_flight("x"));
    }

    #[tokio::test]
    async fn panicking_run_fails_record_and_keeps_worker_alive() {
        let repo = seeded_repo(&["a", "b"]).await;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let pipeline = GradingPipeline::new(
            repo.clone(),
            Arc::new(AnyFile),
            Arc::new(PanicsOnce::default()),
            Arc::new(FixedScorer),
        );
        let (dispatcher, handles) = GradingDispatcher::start(pipeline, 1, 4, shutdown_rx);

        dispatcher.dispatch("a").expect("a");
        wait_for_status(&repo, "a", GradingStatus::Failed).await;
        let record = repo.find_by_id("a").await.expect("find").expect("record");
        assert_eq!(record.feedback.as_deref(), Some(RUN_ABORTED_FEEDBACK));

        dispatcher.dispatch("b").expect("b");
        wait_for_status(&repo, "b", GradingStatus::Completed).await;

        for _ in 0..200 {
            if !dispatcher.is_in_flight("a") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!dispatcher.is_in_flight("a"));
        assert!(handles.iter().all(|handle| !handle.is_finished()));
    }

    #[tokio::test]
    async fn workers_exit_on_shutdown() {
        let repo = seeded_repo(&[]).await;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_dispatcher, handles) =
            GradingDispatcher::start(pipeline(repo, Arc::new(Notify::new())), 3, 4, shutdown_rx);

        shutdown_tx.send(true).expect("send shutdown");

        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .expect("worker stopped")
                .expect("join");
        }
    }
}
