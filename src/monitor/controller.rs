use std::sync::Arc;

use chrono::Utc;
use log::{error, info, warn};
use tokio::sync::{broadcast, watch, Mutex};
use uuid::Uuid;

use super::aggregator::{AggregatorHandle, AggregatorLinks};
use super::alert::{AlertDispatcher, AlertSink};
use super::state::{ControllerState, MonitorEvent, MonitorSnapshot, MonitorStatus, StopOutcome};
use crate::db::SessionStore;
use crate::error::{EngineError, EngineResult};
use crate::models::{RecordStatus, RecordUpdate, Session, SessionCounters, SessionRecord};
use crate::sensing::{Classifier, CycleRunner, ImageSource, SamplingScheduler};
use crate::settings::EngineConfig;

const EVENT_CAPACITY: usize = 256;

/// External capabilities the controller drives.
pub struct Collaborators {
    pub source: Arc<dyn ImageSource>,
    pub classifier: Arc<dyn Classifier>,
    pub store: Arc<dyn SessionStore>,
    pub alert_sink: Arc<dyn AlertSink>,
}

struct ActiveRun {
    scheduler: SamplingScheduler,
    aggregator: AggregatorHandle,
}

struct ControllerInner {
    state: ControllerState,
    run: Option<ActiveRun>,
}

/// Owns the Idle/Active lifecycle of monitoring sessions.
///
/// All transitions go through one async mutex, so `start` and `stop` are
/// serialized and a `stop` that is persisting blocks the next `start`.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Mutex<ControllerInner>>,
    config: EngineConfig,
    runner: CycleRunner,
    store: Arc<dyn SessionStore>,
    alerts: AlertDispatcher,
    snapshot_tx: Arc<watch::Sender<MonitorSnapshot>>,
    events_tx: broadcast::Sender<MonitorEvent>,
}

impl SessionController {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> EngineResult<Self> {
        config.validate()?;

        let Collaborators {
            source,
            classifier,
            store,
            alert_sink,
        } = collaborators;

        let (snapshot_tx, _) = watch::channel(MonitorSnapshot::idle(0));
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(Mutex::new(ControllerInner {
                state: ControllerState::new(),
                run: None,
            })),
            runner: CycleRunner::new(source, classifier, config.cycle_timeout()),
            config,
            store,
            alerts: AlertDispatcher::new(alert_sink),
            snapshot_tx: Arc::new(snapshot_tx),
            events_tx,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn snapshot(&self) -> MonitorSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events_tx.subscribe()
    }

    pub async fn status(&self) -> MonitorStatus {
        self.inner.lock().await.state.status
    }

    pub async fn active_session(&self) -> EngineResult<Session> {
        self.inner
            .lock()
            .await
            .state
            .session
            .clone()
            .ok_or(EngineError::NotActive)
    }

    /// Opens a new session and starts sampling. The first tick fires one
    /// full interval after this returns.
    pub async fn start(&self) -> EngineResult<Session> {
        let mut inner = self.inner.lock().await;
        if inner.state.status == MonitorStatus::Active {
            return Err(EngineError::AlreadyActive);
        }

        let generation = inner.state.next_generation();
        let session = Session::new(
            Uuid::new_v4().to_string(),
            generation,
            Utc::now(),
            self.config.sample_interval_ms,
        );

        self.snapshot_tx.send_replace(MonitorSnapshot::active(&session));

        let (aggregator, outcomes) =
            AggregatorHandle::spawn(session.clone(), self.config.alert_threshold, self.links());

        let mut scheduler = SamplingScheduler::new();
        if let Err(err) = scheduler.start(
            generation,
            self.config.sample_interval(),
            self.runner.clone(),
            outcomes,
        ) {
            if let Err(finalize_err) = aggregator.finalize().await {
                warn!("Failed to shut down aggregator after scheduler error: {finalize_err:#}");
            }
            self.snapshot_tx.send_replace(MonitorSnapshot::idle(generation));
            return Err(EngineError::Scheduler(format!("{err:#}")));
        }

        inner.state.begin_session(session.clone());
        inner.run = Some(ActiveRun {
            scheduler,
            aggregator,
        });

        info!(
            "Session {} started (generation {}, every {}ms)",
            session.id, generation, self.config.sample_interval_ms
        );
        let _ = self.events_tx.send(MonitorEvent::SessionStarted {
            session_id: session.id.clone(),
            generation,
            start_time: session.start_time,
        });

        Ok(session)
    }

    /// Ends the active session. Returns `Ok(None)` when already idle.
    ///
    /// A record that fails to persist stays queued; see [`Self::retry_persist`].
    pub async fn stop(&self) -> EngineResult<Option<StopOutcome>> {
        let mut inner = self.inner.lock().await;
        if inner.state.status == MonitorStatus::Idle {
            info!("Stop requested while idle; nothing to do");
            return Ok(None);
        }

        let counters = match inner.run.take() {
            Some(run) => self.drain_run(run).await,
            None => self.last_counters(),
        };

        let end_time = Utc::now();
        let Some(session) = inner.state.end_session(end_time) else {
            self.snapshot_tx
                .send_replace(MonitorSnapshot::idle(inner.state.generation));
            return Ok(None);
        };

        let record = SessionRecord::finalize(&session, end_time, counters, RecordStatus::Completed);
        self.snapshot_tx
            .send_replace(MonitorSnapshot::idle(session.generation));

        if !record.meets_minimum(self.config.min_persist_minutes) {
            info!(
                "Discarding session {} ({:.2} min < {} min)",
                record.id, record.total_elapsed_minutes, self.config.min_persist_minutes
            );
            self.clear_checkpoint(&record.id).await;
            let _ = self.events_tx.send(MonitorEvent::SessionDiscarded {
                record: record.clone(),
            });
            return Ok(Some(StopOutcome::Discarded(record)));
        }

        match self.store.persist(&record).await {
            Ok(()) => {
                info!(
                    "Session {} persisted: {}/{} engaged ({:.1}%)",
                    record.id, record.effective_ticks, record.total_ticks, record.efficiency
                );
                self.clear_checkpoint(&record.id).await;
                let _ = self.events_tx.send(MonitorEvent::SessionFinalized {
                    record: record.clone(),
                });
                Ok(Some(StopOutcome::Persisted(record)))
            }
            Err(err) => {
                error!("Failed to persist session {}: {err:#}", record.id);
                inner.state.pending.push_back(record);
                Err(EngineError::Persist(err))
            }
        }
    }

    /// Retries records whose persist step failed, oldest first. Stops at the
    /// first failure and leaves it (and everything after it) queued.
    pub async fn retry_persist(&self) -> EngineResult<Vec<SessionRecord>> {
        let mut inner = self.inner.lock().await;
        let mut persisted = Vec::new();

        while let Some(record) = inner.state.pending.pop_front() {
            if let Err(err) = self.store.persist(&record).await {
                error!("Retry failed for session {}: {err:#}", record.id);
                inner.state.pending.push_front(record);
                return Err(EngineError::Persist(err));
            }
            info!("Session {} persisted on retry", record.id);
            self.clear_checkpoint(&record.id).await;
            let _ = self.events_tx.send(MonitorEvent::SessionFinalized {
                record: record.clone(),
            });
            persisted.push(record);
        }

        Ok(persisted)
    }

    pub async fn pending_records(&self) -> Vec<SessionRecord> {
        self.inner.lock().await.state.pending.iter().cloned().collect()
    }

    /// Finalizes a session left behind by a crash as `Interrupted`, using its
    /// last checkpoint. Only allowed while idle.
    pub async fn recover_interrupted(&self) -> EngineResult<Option<SessionRecord>> {
        let inner = self.inner.lock().await;
        if inner.state.status == MonitorStatus::Active {
            return Err(EngineError::AlreadyActive);
        }

        let checkpoint = match self.store.load_checkpoint().await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return Ok(None),
            Err(err) => return Err(EngineError::Persist(err)),
        };

        // A failed stop keeps its checkpoint until the retry lands; the
        // queued Completed record owns that session id.
        if inner
            .state
            .pending
            .iter()
            .any(|record| record.id == checkpoint.session_id)
        {
            info!(
                "Checkpoint for session {} belongs to a record awaiting retry; leaving it",
                checkpoint.session_id
            );
            return Ok(None);
        }

        let record = checkpoint.into_interrupted_record();
        warn!(
            "Recovering interrupted session {} ({} ticks)",
            record.id, record.total_ticks
        );

        if !record.meets_minimum(self.config.min_persist_minutes) {
            info!(
                "Interrupted session {} too short to keep; dropping checkpoint",
                record.id
            );
            self.clear_checkpoint(&record.id).await;
            return Ok(None);
        }

        self.store
            .persist(&record)
            .await
            .map_err(EngineError::Persist)?;
        self.clear_checkpoint(&record.id).await;
        let _ = self.events_tx.send(MonitorEvent::SessionFinalized {
            record: record.clone(),
        });

        Ok(Some(record))
    }

    pub async fn latest_record(&self) -> EngineResult<Option<SessionRecord>> {
        self.store.latest().await.map_err(EngineError::Persist)
    }

    pub async fn update_record(
        &self,
        record_id: &str,
        update: RecordUpdate,
    ) -> EngineResult<SessionRecord> {
        self.store
            .update(record_id, update)
            .await
            .map_err(EngineError::Persist)
    }

    /// Stops ticking, then drains the aggregator. Outcomes still in flight
    /// after this point are dropped by the closed channel.
    async fn drain_run(&self, mut run: ActiveRun) -> SessionCounters {
        if let Err(err) = run.scheduler.stop().await {
            error!("Sampling loop did not stop cleanly: {err:#}");
        }
        let ticks_fired = run.scheduler.ticks_fired();

        let counters = match run.aggregator.finalize().await {
            Ok(counters) => counters,
            Err(err) => {
                error!("Aggregator finalize failed, using last snapshot: {err:#}");
                self.last_counters()
            }
        };

        if counters.total_ticks > ticks_fired {
            warn!(
                "Folded {} outcomes but only {} ticks fired",
                counters.total_ticks, ticks_fired
            );
        }
        counters
    }

    fn last_counters(&self) -> SessionCounters {
        self.snapshot_tx.borrow().counters
    }

    fn links(&self) -> AggregatorLinks {
        AggregatorLinks {
            alerts: self.alerts.clone(),
            store: Arc::clone(&self.store),
            snapshot_tx: Arc::clone(&self.snapshot_tx),
            events_tx: self.events_tx.clone(),
            checkpoint_every_ticks: self.config.checkpoint_every_ticks,
        }
    }

    async fn clear_checkpoint(&self, session_id: &str) {
        if let Err(err) = self.store.clear_checkpoint(session_id).await {
            warn!("Failed to clear checkpoint for session {session_id}: {err:#}");
        }
    }
}
