use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use logship_config::shared::PipelineConfig;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinError;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, ExportResult};
use crate::pipeline::{ExportPipeline, PipelineSettings, PipelineStats};
use crate::sink::factory::SinkFactory;
use crate::source::LogSourceFactory;
use crate::topology::TopologyEvent;
use crate::types::{TenantDescriptor, TenantId};
use crate::{bail, export_error};

/// Lifecycle of a registered pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Registered, sink and source still being built.
    Starting,
    Running,
    /// Cancellation was signalled and the pipeline is draining.
    Stopping,
}

#[derive(Debug)]
struct PipelineHandle {
    generation: u64,
    shutdown_tx: ShutdownTx,
    state: PipelineState,
    /// Tenant to start again once this pipeline unregistered.
    restart_with: Option<TenantDescriptor>,
}

#[derive(Debug, Default)]
struct SupervisorInner {
    pipelines: HashMap<TenantId, PipelineHandle>,
    next_generation: u64,
    shutting_down: bool,
}

/// Owns the registry of running tenant pipelines.
///
/// The registry is guarded by a single lock that is never held across an await point. A
/// tenant is registered before its sink is built, so concurrent starts stay idempotent and a
/// stop arriving during construction silently aborts the start. Every pipeline runs on its
/// own task; a fault or panic unregisters that tenant only.
pub struct PipelineSupervisor<F, L> {
    inner: Arc<Mutex<SupervisorInner>>,
    registry_update: Arc<Notify>,
    sink_factory: Arc<F>,
    source_factory: Arc<L>,
    config: Arc<PipelineConfig>,
    cluster_dir: Arc<PathBuf>,
    restart_tx: mpsc::UnboundedSender<TenantDescriptor>,
    restart_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<TenantDescriptor>>>>,
}

impl<F, L> Clone for PipelineSupervisor<F, L> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            registry_update: self.registry_update.clone(),
            sink_factory: self.sink_factory.clone(),
            source_factory: self.source_factory.clone(),
            config: self.config.clone(),
            cluster_dir: self.cluster_dir.clone(),
            restart_tx: self.restart_tx.clone(),
            restart_rx: self.restart_rx.clone(),
        }
    }
}

impl<F, L> PipelineSupervisor<F, L>
where
    F: SinkFactory,
    L: LogSourceFactory,
{
    pub fn new(
        sink_factory: F,
        source_factory: L,
        config: PipelineConfig,
        cluster_dir: impl Into<PathBuf>,
    ) -> Self {
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();

        Self {
            inner: Arc::new(Mutex::new(SupervisorInner::default())),
            registry_update: Arc::new(Notify::new()),
            sink_factory: Arc::new(sink_factory),
            source_factory: Arc::new(source_factory),
            config: Arc::new(config),
            cluster_dir: Arc::new(cluster_dir.into()),
            restart_tx,
            restart_rx: Arc::new(Mutex::new(Some(restart_rx))),
        }
    }

    /// Starts the pipeline of `tenant`.
    ///
    /// Returns `Ok(true)` if a pipeline was launched and `Ok(false)` if the tenant was already
    /// registered, is not in the legacy log format, or was stopped while starting.
    pub async fn start(&self, tenant: TenantDescriptor) -> ExportResult<bool> {
        let Some((generation, shutdown_rx)) = self.register(&tenant) else {
            return Ok(false);
        };

        self.launch(tenant, generation, shutdown_rx).await
    }

    /// Signals cancellation to the pipeline of `id`.
    ///
    /// Returns `false` if no pipeline is registered for it. The handle is removed by the
    /// pipeline task once it drained.
    pub fn stop(&self, id: TenantId) -> bool {
        let mut inner = self.lock();
        let Some(handle) = inner.pipelines.get_mut(&id) else {
            debug!(tenant_id = %id, "stop ignored, tenant has no pipeline");
            return false;
        };

        handle.restart_with = None;
        if handle.state != PipelineState::Stopping {
            handle.state = PipelineState::Stopping;
            let _ = handle.shutdown_tx.shutdown();
            info!(tenant_id = %id, "stopping pipeline");
        }

        true
    }

    /// Consumes topology events until `shutdown_rx` fires.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<TopologyEvent>,
        mut shutdown_rx: ShutdownRx,
    ) -> ExportResult<()> {
        let Some(mut restart_rx) = self
            .restart_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            bail!(
                ErrorKind::InvalidState,
                "The supervisor event loop is already running"
            );
        };

        let mut events_open = true;
        loop {
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    info!("shutdown signal received, supervisor stops consuming events");
                    break;
                }
                Some(tenant) = restart_rx.recv() => {
                    info!(tenant_id = %tenant.id, "restarting pipeline");
                    self.start_detached(tenant);
                }
                event = events.recv(), if events_open => match event {
                    Some(TopologyEvent::TenantAdded(tenant)) => self.start_detached(tenant),
                    Some(TopologyEvent::TenantRemoved { id, name }) => {
                        info!(tenant_id = %id, tenant = %name, "tenant removed from cluster");
                        self.stop(id);
                    }
                    None => {
                        warn!("topology watcher stopped, no further tenant changes are tracked");
                        events_open = false;
                    }
                },
            }
        }

        *self
            .restart_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(restart_rx);

        Ok(())
    }

    /// Cancels every pipeline and waits up to `grace` for all of them to drain.
    ///
    /// Returns `false` if some pipelines were still registered when the grace period ended.
    pub async fn shutdown_and_wait(&self, grace: Duration) -> bool {
        {
            let mut inner = self.lock();
            inner.shutting_down = true;
            for (id, handle) in inner.pipelines.iter_mut() {
                handle.restart_with = None;
                handle.state = PipelineState::Stopping;
                let _ = handle.shutdown_tx.shutdown();
                debug!(tenant_id = %id, "signalled pipeline shutdown");
            }
        }

        let drained = self.wait_idle(grace).await;
        if drained {
            info!("all pipelines drained");
        } else {
            warn!(
                remaining = ?self.active_tenants(),
                "grace period elapsed before all pipelines drained"
            );
        }

        drained
    }

    /// Waits up to `timeout` for the registry to become empty.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait_until_idle())
            .await
            .is_ok()
    }

    /// Waits until no pipeline is registered.
    pub async fn wait_until_idle(&self) {
        loop {
            let notified = self.registry_update.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.lock().pipelines.is_empty() {
                return;
            }

            notified.await;
        }
    }

    /// Tenants that currently have a registered pipeline, sorted by id.
    pub fn active_tenants(&self) -> Vec<TenantId> {
        let mut tenants: Vec<TenantId> = self.lock().pipelines.keys().copied().collect();
        tenants.sort();

        tenants
    }

    pub fn is_running(&self, id: TenantId) -> bool {
        self.pipeline_state(id) == Some(PipelineState::Running)
    }

    pub fn pipeline_state(&self, id: TenantId) -> Option<PipelineState> {
        self.lock().pipelines.get(&id).map(|handle| handle.state)
    }

    fn lock(&self) -> MutexGuard<'_, SupervisorInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a placeholder for `tenant`, or records a restart if it is draining.
    ///
    /// Recorded restarts are served by [`PipelineSupervisor::run`].
    fn register(&self, tenant: &TenantDescriptor) -> Option<(u64, ShutdownRx)> {
        let mut inner = self.lock();
        if inner.shutting_down {
            debug!(tenant_id = %tenant.id, "start ignored, supervisor is shutting down");
            return None;
        }

        if let Some(handle) = inner.pipelines.get_mut(&tenant.id) {
            if handle.state == PipelineState::Stopping {
                info!(
                    tenant_id = %tenant.id,
                    "pipeline is draining, it will be restarted once stopped"
                );
                handle.restart_with = Some(tenant.clone());
            } else {
                debug!(tenant_id = %tenant.id, "start ignored, pipeline already registered");
            }
            return None;
        }

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        inner.pipelines.insert(
            tenant.id,
            PipelineHandle {
                generation,
                shutdown_tx,
                state: PipelineState::Starting,
                restart_with: None,
            },
        );

        Some((generation, shutdown_rx))
    }

    /// Registers `tenant` right away and builds its pipeline on a separate task.
    ///
    /// A [`PipelineSupervisor::stop`] issued after this call returns always applies to the
    /// new pipeline. Start failures are logged.
    pub fn start_detached(&self, tenant: TenantDescriptor) {
        let Some((generation, shutdown_rx)) = self.register(&tenant) else {
            return;
        };

        let supervisor = self.clone();
        tokio::spawn(async move {
            let id = tenant.id;
            if let Err(err) = supervisor.launch(tenant, generation, shutdown_rx).await {
                error!(
                    critical = true,
                    tenant_id = %id,
                    error = %err,
                    "failed to start pipeline, tenant is not exported until it is added again"
                );
            }
        });
    }

    async fn launch(
        &self,
        tenant: TenantDescriptor,
        generation: u64,
        shutdown_rx: ShutdownRx,
    ) -> ExportResult<bool> {
        match self.build_and_spawn(&tenant, generation, shutdown_rx).await {
            Ok(launched) => {
                if !launched {
                    self.unregister(tenant.id, generation);
                }
                Ok(launched)
            }
            Err(err) if err.kind() == ErrorKind::TenantRemoved => {
                debug!(tenant_id = %tenant.id, "tenant stopped while its pipeline was starting");
                self.unregister(tenant.id, generation);
                Ok(false)
            }
            Err(err) => {
                self.unregister(tenant.id, generation);
                Err(err)
            }
        }
    }

    async fn build_and_spawn(
        &self,
        tenant: &TenantDescriptor,
        generation: u64,
        shutdown_rx: ShutdownRx,
    ) -> ExportResult<bool> {
        let settings = PipelineSettings::for_tenant(&self.config, &self.cluster_dir, tenant)?;

        if !self.source_factory.is_supported(&settings.log_folder) {
            info!(
                tenant_id = %tenant.id,
                tenant = %tenant.display_name,
                log_folder = %settings.log_folder.display(),
                "skipping tenant, event log is not in the legacy format"
            );
            return Ok(false);
        }

        let sink = self.sink_factory.create_sink(tenant, &settings).await?;
        let source = self.source_factory.open(&settings)?;

        {
            let mut inner = self.lock();
            match inner.pipelines.get_mut(&tenant.id) {
                Some(handle)
                    if handle.generation == generation
                        && handle.state == PipelineState::Starting =>
                {
                    handle.state = PipelineState::Running;
                }
                _ => bail!(
                    ErrorKind::TenantRemoved,
                    "Tenant was stopped while its pipeline was starting"
                ),
            }
        }

        let span = info_span!(
            "export_pipeline",
            tenant_id = %tenant.id,
            tenant = %tenant.display_name
        );
        let pipeline =
            ExportPipeline::new(tenant.clone(), settings, sink, source, shutdown_rx);
        let task = tokio::spawn(pipeline.run().instrument(span));

        let supervisor = self.clone();
        let exiting = tenant.clone();
        tokio::spawn(async move {
            let result = task.await;
            supervisor.on_pipeline_exit(&exiting, generation, result);
        });

        info!(tenant_id = %tenant.id, tenant = %tenant.display_name, "pipeline started");

        Ok(true)
    }

    fn on_pipeline_exit(
        &self,
        tenant: &TenantDescriptor,
        generation: u64,
        result: Result<ExportResult<PipelineStats>, JoinError>,
    ) {
        match result {
            Ok(Ok(stats)) => {
                info!(
                    tenant_id = %tenant.id,
                    records = stats.records_exported,
                    batches = stats.batches_written,
                    "pipeline exited"
                );
            }
            Ok(Err(err)) => {
                error!(
                    critical = true,
                    tenant_id = %tenant.id,
                    tenant = %tenant.display_name,
                    error = %err,
                    "pipeline failed, tenant is no longer exported"
                );
            }
            Err(err) => {
                let err = if err.is_panic() {
                    export_error!(ErrorKind::PipelinePanic, "Pipeline task panicked")
                } else {
                    export_error!(ErrorKind::PipelinePanic, "Pipeline task was aborted")
                };
                error!(
                    critical = true,
                    tenant_id = %tenant.id,
                    tenant = %tenant.display_name,
                    error = %err,
                    "pipeline terminated abnormally"
                );
            }
        }

        self.unregister(tenant.id, generation);
    }

    /// Removes the handle of `generation` and schedules a pending restart.
    fn unregister(&self, id: TenantId, generation: u64) {
        let restart = {
            let mut inner = self.lock();
            let owned = inner
                .pipelines
                .get(&id)
                .is_some_and(|handle| handle.generation == generation);
            if !owned {
                return;
            }

            let restart = inner
                .pipelines
                .remove(&id)
                .and_then(|handle| handle.restart_with);
            if inner.shutting_down { None } else { restart }
        };

        self.registry_update.notify_waiters();

        if let Some(tenant) = restart {
            let _ = self.restart_tx.send(tenant);
        }
    }
}
