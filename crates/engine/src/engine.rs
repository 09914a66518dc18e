//! The consumer-facing engine.
//!
//! [`GenerationEngine`] owns the job store and the two background
//! producers (poll reconciler and push channel), and exposes the
//! operations the presentation layer uses: `submit`, `get`, `list`,
//! `delete`, `export` and a change-notification subscription.
//!
//! Created once via [`GenerationEngine::start`]; the returned `Arc` can be
//! cheaply cloned into whatever needs it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cadenza_core::job::GenerationJob;
use cadenza_core::request::GenerationRequest;
use cadenza_core::types::JobId;
use cadenza_events::{EventBus, JobChanged};
use tokio::io::AsyncWrite;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{GenerationApi, GenerationService, GenreInfo, HealthResponse};
use crate::client::PushClient;
use crate::config::EngineConfig;
use crate::coordinator::CreationCoordinator;
use crate::error::EngineResult;
use crate::lifecycle::Lifecycle;
use crate::poller::PollReconciler;
use crate::push::PushChannel;
use crate::store::JobStore;

/// How long shutdown waits for each background task.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct GenerationEngine {
    store: Arc<JobStore>,
    service: Arc<dyn GenerationService>,
    coordinator: CreationCoordinator,
    lifecycle: Lifecycle,
    push: Option<Arc<PushChannel>>,
    /// Master cancellation token -- cancelled during shutdown.
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl GenerationEngine {
    /// Build the HTTP and push clients from `config` and start the
    /// background tasks. Must be called from within a Tokio runtime.
    pub fn start(config: &EngineConfig) -> EngineResult<Arc<Self>> {
        let api = GenerationApi::new(config.api_url.clone(), config.request_timeout)?;
        let push_client = PushClient::new(config.ws_url.clone());
        Ok(Self::start_with(config, Arc::new(api), Some(push_client)))
    }

    /// Start with an explicit service implementation. Without a push
    /// client the engine relies on polling alone.
    pub fn start_with(
        config: &EngineConfig,
        service: Arc<dyn GenerationService>,
        push_client: Option<PushClient>,
    ) -> Arc<Self> {
        let events = Arc::new(EventBus::new(config.event_capacity));
        let store = Arc::new(JobStore::new(events));
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        let poller = PollReconciler::new(
            Arc::clone(&service),
            Arc::clone(&store),
            config.poll_interval,
            config.tombstone_retention,
        );
        tasks.push(tokio::spawn(poller.run(cancel.child_token())));

        let push = push_client.map(|client| {
            let channel = Arc::new(PushChannel::new(
                client,
                Arc::clone(&store),
                config.reconnect_config(),
            ));
            tasks.push(tokio::spawn(
                Arc::clone(&channel).run(cancel.child_token()),
            ));
            channel
        });

        tracing::info!(
            push_enabled = push.is_some(),
            poll_interval_secs = config.poll_interval.as_secs_f64(),
            "Generation engine started",
        );

        Arc::new(Self {
            coordinator: CreationCoordinator::new(Arc::clone(&service), Arc::clone(&store)),
            lifecycle: Lifecycle::new(Arc::clone(&service), Arc::clone(&store)),
            store,
            service,
            push,
            cancel,
            tasks: Mutex::new(tasks),
        })
    }

    /// Submit a new generation job and return its id.
    pub async fn submit(&self, request: &GenerationRequest) -> EngineResult<JobId> {
        self.coordinator.submit(request).await
    }

    /// Current record, `None` when unknown or deleted.
    pub async fn get(&self, id: &str) -> Option<GenerationJob> {
        self.store.get(id).await
    }

    /// All live records, oldest first.
    pub async fn list(&self) -> Vec<GenerationJob> {
        self.store.list().await
    }

    pub async fn delete(&self, id: &str) -> EngineResult<()> {
        self.lifecycle.delete(id).await
    }

    pub async fn export(
        &self,
        id: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> EngineResult<u64> {
        self.lifecycle.export(id, sink).await
    }

    pub async fn export_to_dir(&self, id: &str, dir: &Path) -> EngineResult<PathBuf> {
        self.lifecycle.export_to_dir(id, dir).await
    }

    /// Reconcile one job against `GET /status/{id}` right now.
    pub async fn refresh(&self, id: &str) -> EngineResult<Option<GenerationJob>> {
        self.lifecycle.refresh(id).await
    }

    pub async fn health(&self) -> EngineResult<HealthResponse> {
        Ok(self.service.health().await?)
    }

    pub async fn genres(&self) -> EngineResult<Vec<GenreInfo>> {
        Ok(self.service.genres().await?)
    }

    /// Receive a [`JobChanged`] for every mutation the store accepts.
    pub fn subscribe(&self) -> broadcast::Receiver<JobChanged> {
        self.store.subscribe()
    }

    /// Push connection state, `None` when the engine runs without push.
    pub fn watch_push_connected(&self) -> Option<watch::Receiver<bool>> {
        self.push.as_ref().map(|push| push.watch_connected())
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Stop the background tasks.
    ///
    /// Cancels the master token, then waits up to 5 seconds per task.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down generation engine");
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                tracing::warn!("Background task did not stop within grace period");
            }
        }

        tracing::info!("Generation engine shut down complete");
    }
}
