//! Request manager implementation.
//!
//! The manager owns the table of tracked requests. Each provider call runs
//! on its own spawned task. Status transitions are applied while holding the
//! table entry, and subscriptions are taken under the same entry, so a
//! subscriber never misses or duplicates a transition. Each subscriber owns
//! an unbounded queue; a request emits at most one terminal status after a
//! strictly increasing run of progress reports, so the queue stays finite.
//!
//! Finished requests are retained for inspection and evicted once they
//! exceed `ManagerConfig::max_finished` or outlive
//! `ManagerConfig::retain_finished`.

use super::status::{RequestStatus, StatusEvent, StatusKind};
use crate::error::AiError;
use crate::provider::Provider;
use crate::types::*;
use dashmap::DashMap;
use futures::{FutureExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

/// Stream of status updates for one request
pub type StatusStream = Pin<Box<dyn Stream<Item = RequestStatus> + Send>>;

/// Request manager configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Maximum number of provider calls a batch runs at once
    pub batch_concurrency: usize,
    /// Buffer of the manager-wide event feed
    pub event_buffer: usize,
    /// Most finished requests kept in the table; `None` keeps all of them
    pub max_finished: Option<usize>,
    /// How long a finished request is kept; `None` keeps it until evicted by count
    pub retain_finished: Option<Duration>,
}

impl ManagerConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self {
            batch_concurrency: 8,
            event_buffer: 256,
            max_finished: Some(1024),
            retain_finished: None,
        }
    }

    /// Set batch concurrency
    pub fn with_batch_concurrency(mut self, batch_concurrency: usize) -> Self {
        self.batch_concurrency = batch_concurrency;
        self
    }

    /// Set how many finished requests are kept
    pub fn with_max_finished(mut self, max_finished: Option<usize>) -> Self {
        self.max_finished = max_finished;
        self
    }

    /// Set how long finished requests are kept
    pub fn with_retain_finished(mut self, retain_finished: Option<Duration>) -> Self {
        self.retain_finished = retain_finished;
        self
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate view of the tracked requests
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestStatistics {
    pub total: usize,
    pub pending: usize,
    pub executing: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean time from execution start to terminal state
    pub average_duration: Option<Duration>,
    /// Completed requests over all finished requests, 0.0 when none finished
    pub success_rate: f64,
}

#[derive(Debug)]
struct TrackedRequest {
    request: Request,
    status: RequestStatus,
    subscribers: Vec<mpsc::UnboundedSender<RequestStatus>>,
    started_at: Option<Instant>,
    finished_at: Option<Instant>,
    abort: Option<AbortHandle>,
}

#[derive(Debug)]
struct ManagerInner {
    requests: DashMap<RequestId, TrackedRequest>,
    events: broadcast::Sender<StatusEvent>,
    config: ManagerConfig,
}

/// Tracks requests through their lifecycle.
///
/// Cheap to clone; clones share the same request table.
#[derive(Debug, Clone)]
pub struct RequestManager {
    inner: Arc<ManagerInner>,
}

impl RequestManager {
    /// Create a manager with the default configuration
    pub fn new() -> Self {
        Self::with_config(ManagerConfig::default())
    }

    /// Create a manager with a custom configuration
    pub fn with_config(config: ManagerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            inner: Arc::new(ManagerInner {
                requests: DashMap::new(),
                events,
                config,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Start tracking a request in the pending state
    pub fn submit(&self, request: Request) -> Result<RequestId, AiError> {
        use dashmap::mapref::entry::Entry;

        let id = request.id;
        match self.inner.requests.entry(id) {
            Entry::Occupied(_) => Err(AiError::invalid_request(format!(
                "request {} is already tracked",
                id
            ))),
            Entry::Vacant(slot) => {
                tracing::debug!(
                    "[Requests] submitted: id={}, provider={}",
                    id,
                    request.provider_id
                );
                slot.insert(TrackedRequest {
                    request,
                    status: RequestStatus::Pending,
                    subscribers: Vec::new(),
                    started_at: None,
                    finished_at: None,
                    abort: None,
                });
                let _ = self.inner.events.send(StatusEvent {
                    request_id: id,
                    status: RequestStatus::Pending,
                });
                Ok(id)
            }
        }
    }

    /// Run the provider call for a submitted request on a background task.
    ///
    /// Provider errors and panics become a `Failed` status and are returned
    /// inside the envelope, not as `Err`. `Err` means the manager could not
    /// run the request: unknown id, already started, or cancelled.
    pub async fn execute_in_background<F, Fut>(
        &self,
        id: RequestId,
        call: F,
    ) -> Result<ResponseEnvelope, AiError>
    where
        F: FnOnce(Request) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Generation, AiError>> + Send + 'static,
    {
        let request = self.begin(id)?;

        let manager = self.clone();
        let task = tokio::spawn(async move {
            let provider_id = request.provider_id.clone();
            let started = Instant::now();
            let call_request = request.clone();
            let outcome = AssertUnwindSafe(async move { call(call_request).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    Err(AiError::provider(format!(
                        "provider call panicked: {}",
                        panic_message(panic.as_ref())
                    )))
                });

            let envelope = ResponseEnvelope::from_generation(&request, outcome);
            let next = match envelope.error() {
                None => RequestStatus::Completed(envelope.clone()),
                Some(err) => {
                    tracing::error!(
                        "[Requests] provider call failed: id={}, provider={}, error={}, \
                         elapsed={:?}",
                        id,
                        provider_id,
                        err,
                        started.elapsed()
                    );
                    RequestStatus::Failed(err.clone())
                }
            };

            manager.finish(id, next)?;
            Ok::<_, AiError>(envelope)
        });

        self.attach_abort_handle(id, task.abort_handle());

        match task.await {
            Ok(result) => result,
            Err(join_err) if join_err.is_cancelled() => Err(AiError::Cancelled),
            Err(join_err) => Err(AiError::other(format!(
                "request task for {} failed: {}",
                id, join_err
            ))),
        }
    }

    /// Run a submitted request against a provider
    pub async fn execute_with_provider<P: Provider + ?Sized>(
        &self,
        id: RequestId,
        provider: Arc<P>,
    ) -> Result<ResponseEnvelope, AiError> {
        self.execute_in_background(id, move |request| async move {
            provider.generate(&request.prompt, &request.parameters).await
        })
        .await
    }

    /// Submit and run many requests, returning results in input order.
    ///
    /// A failed provider call yields `Err` at its index and never affects
    /// the other requests.
    pub async fn execute_batch<F, Fut>(
        &self,
        requests: Vec<Request>,
        call: F,
    ) -> Vec<Result<ResponseEnvelope, AiError>>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Generation, AiError>> + Send + 'static,
    {
        let call = Arc::new(call);
        let total = requests.len();

        let jobs = requests.into_iter().map(|request| {
            let call = call.clone();
            let manager = self.clone();
            async move {
                let id = manager.submit(request)?;
                let envelope: ResponseEnvelope = manager
                    .execute_in_background(id, move |request| (*call)(request))
                    .await?;
                match envelope.error() {
                    Some(err) => Err(err.clone()),
                    None => Ok(envelope),
                }
            }
        });

        let results: Vec<Result<ResponseEnvelope, AiError>> = futures::stream::iter(jobs)
            .buffered(self.inner.config.batch_concurrency.max(1))
            .collect()
            .await;

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        tracing::info!(
            "[Requests] batch finished: total={}, succeeded={}, failed={}",
            total,
            succeeded,
            total - succeeded
        );
        results
    }

    /// Cancel a request that has not reached a terminal state.
    ///
    /// Returns `Ok(false)` if the request had already finished; its status is
    /// left untouched.
    pub fn cancel(&self, id: RequestId) -> Result<bool, AiError> {
        {
            let mut entry = self
                .inner
                .requests
                .get_mut(&id)
                .ok_or_else(|| AiError::request_not_found(id.to_string()))?;

            if entry.status.is_terminal() {
                tracing::debug!(
                    "[Requests] cancel ignored: id={}, status={}",
                    id,
                    entry.status.kind()
                );
                return Ok(false);
            }

            self.apply(id, &mut entry, RequestStatus::Cancelled)?;
            if let Some(handle) = entry.abort.take() {
                handle.abort();
            }
        }
        self.enforce_retention();
        Ok(true)
    }

    /// Report progress of an executing request as a fraction in `[0, 1]`
    pub fn report_progress(&self, id: RequestId, fraction: f32) -> Result<(), AiError> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(AiError::invalid_request(format!(
                "progress {} is outside [0, 1]",
                fraction
            )));
        }
        self.transition(
            id,
            RequestStatus::Executing {
                progress: Some(fraction),
            },
        )
    }

    /// Observe a request: its current status, then every later transition,
    /// ending after the terminal one
    pub fn status_stream(&self, id: RequestId) -> Result<StatusStream, AiError> {
        let (current, mut updates) = {
            let mut entry = self
                .inner
                .requests
                .get_mut(&id)
                .ok_or_else(|| AiError::request_not_found(id.to_string()))?;
            let (tx, rx) = mpsc::unbounded_channel();
            if !entry.status.is_terminal() {
                entry.subscribers.push(tx);
            }
            (entry.status.clone(), rx)
        };

        Ok(Box::pin(async_stream::stream! {
            let finished = current.is_terminal();
            yield current;

            if !finished {
                while let Some(status) = updates.recv().await {
                    let terminal = status.is_terminal();
                    yield status;
                    if terminal {
                        break;
                    }
                }
            }
        }))
    }

    /// Feed of every status change across all requests, from now on
    pub fn subscribe_all(&self) -> impl Stream<Item = StatusEvent> + Send + 'static {
        BroadcastStream::new(self.inner.events.subscribe())
            .filter_map(|event| async move { event.ok() })
    }

    /// Current status of a request
    pub fn status(&self, id: RequestId) -> Option<RequestStatus> {
        self.inner.requests.get(&id).map(|entry| entry.status.clone())
    }

    /// The request as submitted
    pub fn request(&self, id: RequestId) -> Option<Request> {
        self.inner.requests.get(&id).map(|entry| entry.request.clone())
    }

    /// Ids of requests that are pending or executing
    pub fn active_requests(&self) -> Vec<RequestId> {
        self.inner
            .requests
            .iter()
            .filter(|entry| !entry.status.is_terminal())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Drop finished requests whose terminal transition is at least `max_age` old
    pub fn prune_finished(&self, max_age: Duration) -> usize {
        let before = self.inner.requests.len();
        self.inner.requests.retain(|_, tracked| {
            !(tracked.status.is_terminal()
                && tracked
                    .finished_at
                    .map_or(true, |finished| finished.elapsed() >= max_age))
        });
        let pruned = before.saturating_sub(self.inner.requests.len());
        if pruned > 0 {
            tracing::debug!("[Requests] pruned {} finished requests", pruned);
        }
        pruned
    }

    /// Counts per state, average duration and success rate
    pub fn statistics(&self) -> RequestStatistics {
        let mut stats = RequestStatistics::default();
        let mut total_duration = Duration::ZERO;
        let mut timed = 0u32;

        for entry in self.inner.requests.iter() {
            stats.total += 1;
            match entry.status.kind() {
                StatusKind::Pending => stats.pending += 1,
                StatusKind::Executing => stats.executing += 1,
                StatusKind::Completed => stats.completed += 1,
                StatusKind::Failed => stats.failed += 1,
                StatusKind::Cancelled => stats.cancelled += 1,
            }
            if let (Some(started), Some(finished)) = (entry.started_at, entry.finished_at) {
                total_duration += finished.duration_since(started);
                timed += 1;
            }
        }

        if timed > 0 {
            stats.average_duration = Some(total_duration / timed);
        }
        let finished = stats.completed + stats.failed + stats.cancelled;
        if finished > 0 {
            stats.success_rate = stats.completed as f64 / finished as f64;
        }
        stats
    }

    fn begin(&self, id: RequestId) -> Result<Request, AiError> {
        let mut entry = self
            .inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| AiError::request_not_found(id.to_string()))?;

        match entry.status {
            RequestStatus::Pending => {}
            RequestStatus::Cancelled => return Err(AiError::Cancelled),
            _ => {
                return Err(AiError::invalid_request(format!(
                    "request {} was already started",
                    id
                )))
            }
        }

        self.apply(id, &mut entry, RequestStatus::Executing { progress: None })?;
        Ok(entry.request.clone())
    }

    // A cancel may land between `begin` and here; the task is then aborted at once.
    fn attach_abort_handle(&self, id: RequestId, handle: AbortHandle) {
        match self.inner.requests.get_mut(&id) {
            Some(mut entry) if !entry.status.is_terminal() => entry.abort = Some(handle),
            Some(entry) if matches!(entry.status, RequestStatus::Cancelled) => handle.abort(),
            // Gone or finished: the task has already returned.
            Some(_) | None => {}
        }
    }

    fn finish(&self, id: RequestId, next: RequestStatus) -> Result<(), AiError> {
        {
            let mut entry = self
                .inner
                .requests
                .get_mut(&id)
                .ok_or_else(|| AiError::request_not_found(id.to_string()))?;

            if matches!(entry.status, RequestStatus::Cancelled) {
                return Err(AiError::Cancelled);
            }
            entry.abort = None;
            self.apply(id, &mut entry, next)?;
        }
        self.enforce_retention();
        Ok(())
    }

    // Must be called without holding a table entry.
    fn enforce_retention(&self) {
        if let Some(max_age) = self.inner.config.retain_finished {
            self.prune_finished(max_age);
        }
        let Some(max_finished) = self.inner.config.max_finished else {
            return;
        };

        let mut finished: Vec<(Instant, RequestId)> = self
            .inner
            .requests
            .iter()
            .filter(|entry| entry.status.is_terminal())
            .filter_map(|entry| entry.finished_at.map(|at| (at, *entry.key())))
            .collect();
        if finished.len() <= max_finished {
            return;
        }

        finished.sort_unstable_by_key(|(at, _)| *at);
        let excess = finished.len() - max_finished;
        let evicted = finished
            .into_iter()
            .take(excess)
            .filter(|(_, id)| {
                self.inner
                    .requests
                    .remove_if(id, |_, tracked| tracked.status.is_terminal())
                    .is_some()
            })
            .count();
        if evicted > 0 {
            tracing::debug!("[Requests] evicted {} finished requests", evicted);
        }
    }

    fn transition(&self, id: RequestId, next: RequestStatus) -> Result<(), AiError> {
        let mut entry = self
            .inner
            .requests
            .get_mut(&id)
            .ok_or_else(|| AiError::request_not_found(id.to_string()))?;
        self.apply(id, &mut entry, next)
    }

    fn apply(
        &self,
        id: RequestId,
        tracked: &mut TrackedRequest,
        next: RequestStatus,
    ) -> Result<(), AiError> {
        if !tracked.status.can_transition_to(&next) {
            return Err(AiError::invalid_request(format!(
                "request {} cannot move from {} to {}",
                id,
                tracked.status.kind(),
                next.kind()
            )));
        }

        let now = Instant::now();
        match next.kind() {
            StatusKind::Executing if tracked.started_at.is_none() => {
                tracked.started_at = Some(now)
            }
            StatusKind::Completed | StatusKind::Failed | StatusKind::Cancelled => {
                tracked.finished_at = Some(now)
            }
            _ => {}
        }

        tracing::debug!(
            "[Requests] transition: id={}, {} -> {}",
            id,
            tracked.status.kind(),
            next.kind()
        );
        tracked.status = next.clone();
        tracked
            .subscribers
            .retain(|subscriber| subscriber.send(next.clone()).is_ok());
        if next.is_terminal() {
            tracked.subscribers.clear();
        }
        let _ = self.inner.events.send(StatusEvent {
            request_id: id,
            status: next,
        });
        Ok(())
    }
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
