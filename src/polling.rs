use std::{future::Future, time::Duration};

use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, warn};
use web_time::Instant;

use crate::client::{ApiError, BackendClient, InferenceSummary, RequestContext};

/// Anything that can produce the current inference list.
pub trait InferenceFeed: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<Vec<InferenceSummary>, ApiError>> + Send;
}

/// Feed backed by the REST backend.
pub struct BackendFeed {
    client: BackendClient,
    ctx: RequestContext,
}

impl BackendFeed {
    pub fn new(client: BackendClient, ctx: RequestContext) -> Self {
        Self { client, ctx }
    }
}

impl InferenceFeed for BackendFeed {
    async fn fetch(&self) -> Result<Vec<InferenceSummary>, ApiError> {
        self.client.list_inferences(&self.ctx).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct InferenceSnapshot {
    pub inferences: Vec<InferenceSummary>,
    pub fetched_at: Option<Instant>,
    pub refreshes: u64,
}

/// Periodically refreshes the inference list until stopped or dropped.
///
/// A failed refresh keeps the previous list.
pub struct InferencePoller {
    task: Option<JoinHandle<()>>,
    snapshot: watch::Receiver<InferenceSnapshot>,
}

impl InferencePoller {
    /// Spawn the refresh task on the current tokio runtime. The first refresh
    /// happens immediately.
    pub fn start<F: InferenceFeed>(feed: F, period: Duration) -> Self {
        let (sender, snapshot) = watch::channel(InferenceSnapshot::default());
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match feed.fetch().await {
                    Ok(inferences) => {
                        debug!(count = inferences.len(), "inference list refreshed");
                        sender.send_modify(|snapshot| {
                            snapshot.inferences = inferences;
                            snapshot.fetched_at = Some(Instant::now());
                            snapshot.refreshes += 1;
                        });
                    }
                    Err(err) => warn!("Refreshing inference list failed: {err}"),
                }
                if sender.is_closed() {
                    break;
                }
            }
        });
        Self {
            task: Some(task),
            snapshot,
        }
    }

    pub fn snapshot(&self) -> InferenceSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<InferenceSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("stopping inference poller");
            task.abort();
        }
    }
}

impl Drop for InferencePoller {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{InferenceStatus, RemoteId, ServiceDescriptor, UserDescriptor};
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    struct CountingFeed {
        calls: Arc<AtomicUsize>,
        fail_after: usize,
    }

    impl InferenceFeed for CountingFeed {
        async fn fetch(&self) -> Result<Vec<InferenceSummary>, ApiError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.fail_after {
                return Err(ApiError::Auth("expired".into()));
            }
            Ok(vec![InferenceSummary {
                id: RemoteId::Number(call as i64),
                service: ServiceDescriptor {
                    name: "angiovision".into(),
                },
                user: UserDescriptor {
                    username: "doc".into(),
                },
                created_at: String::new(),
                status: InferenceStatus::Pending,
            }])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn polls_until_stopped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut poller = InferencePoller::start(
            CountingFeed {
                calls: Arc::clone(&calls),
                fail_after: usize::MAX,
            },
            Duration::from_secs(5),
        );

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(poller.snapshot().refreshes, 3);
        assert_eq!(poller.snapshot().inferences[0].id, RemoteId::Number(2));

        poller.stop();
        assert!(!poller.is_running());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_keeps_previous_list() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = InferencePoller::start(
            CountingFeed {
                calls: Arc::clone(&calls),
                fail_after: 1,
            },
            Duration::from_secs(5),
        );

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        let snapshot = poller.snapshot();
        assert_eq!(snapshot.refreshes, 1);
        assert_eq!(snapshot.inferences[0].id, RemoteId::Number(0));
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_handle_stops_polling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let poller = InferencePoller::start(
            CountingFeed {
                calls: Arc::clone(&calls),
                fail_after: usize::MAX,
            },
            Duration::from_secs(5),
        );
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(poller);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
