//! Service Manager
//!
//! Owns service tasks: spawning, tick scheduling and graceful shutdown.
//! Events services emit go out on a broadcast bus for observers.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{
    Event, EventPublisher, Service, ServiceCommand, ServiceContext, ServiceError, ServiceHandle,
    ServiceResult, ServiceSpec, ServiceState,
};

struct RunningService {
    handle: ServiceHandle,
    join_handle: JoinHandle<ServiceResult<()>>,
    spec: ServiceSpec,
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Manager
// ─────────────────────────────────────────────────────────────────────────────

/// Central manager for all bridge services
pub struct ServiceManager {
    services: DashMap<String, RunningService>,

    shutdown_tx: broadcast::Sender<()>,

    event_tx: broadcast::Sender<Event>,
}

impl Default for ServiceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let (event_tx, _) = broadcast::channel(1024);

        Self {
            services: DashMap::new(),
            shutdown_tx,
            event_tx,
        }
    }

    /// Receive every event published on the bus from now on
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Spawn a service; ids are unique among running services
    pub async fn spawn<S: Service>(&self, service: S) -> ServiceResult<ServiceHandle> {
        let spec = service.spec();
        let service_id = spec.id.clone();

        if self.services.contains_key(&service_id) {
            return Err(ServiceError::AlreadyRunning(service_id));
        }

        let (command_tx, command_rx) = mpsc::channel(64);
        let state = Arc::new(AtomicU8::new(ServiceState::Starting as u8));
        let handle = ServiceHandle::new(service_id.clone(), command_tx, Arc::clone(&state));

        let ctx = ServiceContext::new(service_id.clone(), EventPublisher::new(self.event_tx.clone()));

        let parts = LoopParts {
            command_rx,
            shutdown_rx: self.shutdown_tx.subscribe(),
            state,
            tick_interval: spec.tick_interval,
            shutdown_timeout: spec.shutdown_timeout,
        };

        let join_handle = tokio::spawn(run_service_loop(service, ctx, parts));

        self.services.insert(
            service_id,
            RunningService {
                handle: handle.clone(),
                join_handle,
                spec,
            },
        );

        Ok(handle)
    }

    /// Stop one service and wait for its task
    pub async fn stop(&self, service_id: &str) -> ServiceResult<()> {
        let (_, running) = self
            .services
            .remove(service_id)
            .ok_or_else(|| ServiceError::NotRunning(service_id.to_string()))?;

        let _ = running.handle.shutdown().await;
        join_service(service_id, running).await
    }

    /// Signal every service to stop and wait for all of them
    pub async fn shutdown_all(&self) -> ServiceResult<()> {
        tracing::info!("Initiating shutdown of all services");

        let _ = self.shutdown_tx.send(());

        let ids: Vec<String> = self.services.iter().map(|e| e.key().clone()).collect();
        let mut result = Ok(());

        for service_id in ids {
            if let Some((_, running)) = self.services.remove(&service_id) {
                if let Err(e) = join_service(&service_id, running).await {
                    result = Err(e);
                }
            }
        }

        result
    }

    pub fn list(&self) -> Vec<(String, ServiceState)> {
        self.services
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().handle.state()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Wait for a service task, allowing `on_stop` its full timeout plus a margin
async fn join_service(service_id: &str, running: RunningService) -> ServiceResult<()> {
    let timeout = running.spec.shutdown_timeout + Duration::from_secs(1);

    match tokio::time::timeout(timeout, running.join_handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::error!(service_id, error = ?e, "Service task panicked");
            Err(ServiceError::Internal(format!("Task panicked: {:?}", e)))
        }
        Err(_) => {
            tracing::warn!(service_id, "Service shutdown timed out");
            Err(ServiceError::ShutdownTimeout)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Service Task Loop
// ─────────────────────────────────────────────────────────────────────────────

struct LoopParts {
    command_rx: mpsc::Receiver<ServiceCommand>,
    shutdown_rx: broadcast::Receiver<()>,
    state: Arc<AtomicU8>,
    tick_interval: Option<Duration>,
    shutdown_timeout: Duration,
}

async fn run_service_loop<S: Service>(
    mut service: S,
    ctx: ServiceContext,
    parts: LoopParts,
) -> ServiceResult<()> {
    let LoopParts {
        mut command_rx,
        mut shutdown_rx,
        state,
        tick_interval,
        shutdown_timeout,
    } = parts;

    if let Err(e) = service.on_start(&ctx).await {
        tracing::error!(service_id = %ctx.service_id, error = %e, "Service failed to start");
        state.store(ServiceState::Failed as u8, Ordering::SeqCst);
        return Err(e);
    }

    state.store(ServiceState::Running as u8, Ordering::SeqCst);
    tracing::info!(service_id = %ctx.service_id, "Service started");

    // A slow tick must not be followed by a burst of catch-up ticks
    let mut tick_timer = tick_interval.map(|period| {
        let mut timer = tokio::time::interval(period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    });

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!(service_id = %ctx.service_id, "Received global shutdown signal");
                break;
            }

            cmd = command_rx.recv() => {
                match cmd {
                    None | Some(ServiceCommand::Shutdown) => {
                        tracing::debug!(service_id = %ctx.service_id, "Received shutdown command");
                        break;
                    }
                    Some(ServiceCommand::ForceTick(done)) => {
                        if let Err(e) = service.on_tick(&ctx).await {
                            tracing::warn!(service_id = %ctx.service_id, error = %e, "Error during forced tick");
                        }
                        let _ = done.send(());
                    }
                }
            }

            _ = async {
                match tick_timer.as_mut() {
                    Some(timer) => timer.tick().await,
                    None => std::future::pending::<tokio::time::Instant>().await,
                }
            } => {
                if let Err(e) = service.on_tick(&ctx).await {
                    tracing::warn!(service_id = %ctx.service_id, error = %e, "Error during tick");
                }
            }
        }
    }

    state.store(ServiceState::Stopping as u8, Ordering::SeqCst);
    tracing::debug!(service_id = %ctx.service_id, "Service stopping");

    match tokio::time::timeout(shutdown_timeout, service.on_stop(&ctx)).await {
        Ok(Ok(())) => {
            state.store(ServiceState::Stopped as u8, Ordering::SeqCst);
            tracing::info!(service_id = %ctx.service_id, "Service stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            state.store(ServiceState::Failed as u8, Ordering::SeqCst);
            tracing::error!(service_id = %ctx.service_id, error = %e, "Service stop failed");
            Err(e)
        }
        Err(_) => {
            state.store(ServiceState::Failed as u8, Ordering::SeqCst);
            tracing::error!(service_id = %ctx.service_id, "Service stop timed out");
            Err(ServiceError::ShutdownTimeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counters {
        starts: AtomicUsize,
        stops: AtomicUsize,
        ticks: AtomicUsize,
    }

    struct CountingService {
        id: String,
        tick_interval: Option<Duration>,
        counters: Arc<Counters>,
    }

    impl CountingService {
        fn new(id: &str) -> (Self, Arc<Counters>) {
            let counters = Arc::new(Counters::default());
            let service = Self {
                id: id.to_string(),
                tick_interval: None,
                counters: Arc::clone(&counters),
            };
            (service, counters)
        }
    }

    #[async_trait::async_trait]
    impl Service for CountingService {
        fn spec(&self) -> ServiceSpec {
            let spec = ServiceSpec::new(&self.id, "Counting Service");
            match self.tick_interval {
                Some(interval) => spec.with_tick_interval(interval),
                None => spec,
            }
        }

        async fn on_start(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_stop(&mut self, _ctx: &ServiceContext) -> ServiceResult<()> {
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_tick(&mut self, ctx: &ServiceContext) -> ServiceResult<()> {
            let tick = self.counters.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            ctx.emit(crate::topics::OBJECT_CHANGED, serde_json::json!({"tick": tick}));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_spawn_and_stop_service() {
        let manager = ServiceManager::new();
        let (service, counters) = CountingService::new("counting");

        let handle = manager.spawn(service).await.unwrap();
        handle.force_tick().await.unwrap();
        assert_eq!(handle.state(), ServiceState::Running);
        assert_eq!(manager.list(), vec![("counting".to_string(), ServiceState::Running)]);
        assert_eq!(counters.starts.load(Ordering::SeqCst), 1);

        manager.stop("counting").await.unwrap();
        assert_eq!(counters.stops.load(Ordering::SeqCst), 1);
        assert!(handle.is_terminal());
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_force_tick_runs_immediately() {
        let manager = ServiceManager::new();
        let (service, counters) = CountingService::new("ticker");

        let handle = manager.spawn(service).await.unwrap();
        handle.force_tick().await.unwrap();
        handle.force_tick().await.unwrap();

        assert_eq!(counters.ticks.load(Ordering::SeqCst), 2);
        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_interval_ticks() {
        let manager = ServiceManager::new();
        let (mut service, counters) = CountingService::new("interval");
        service.tick_interval = Some(Duration::from_millis(20));

        manager.spawn(service).await.unwrap();
        tokio::time::sleep(Duration::from_millis(110)).await;

        assert!(counters.ticks.load(Ordering::SeqCst) >= 2);
        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_tick_events_reach_bus_subscribers() {
        let manager = ServiceManager::new();
        let mut rx = manager.subscribe();
        let (service, _) = CountingService::new("emitter");

        let handle = manager.spawn(service).await.unwrap();
        handle.force_tick().await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, crate::topics::OBJECT_CHANGED);
        assert_eq!(event.source, "emitter");
        assert_eq!(event.data["tick"], serde_json::json!(1));
        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let manager = ServiceManager::new();
        let (first, _) = CountingService::new("bridge");
        let (second, _) = CountingService::new("bridge");

        manager.spawn(first).await.unwrap();
        let result = manager.spawn(second).await;
        assert!(matches!(result, Err(ServiceError::AlreadyRunning(_))));

        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_unknown_service() {
        let manager = ServiceManager::new();
        assert!(matches!(
            manager.stop("nope").await,
            Err(ServiceError::NotRunning(_))
        ));
    }
}
