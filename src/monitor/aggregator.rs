use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::alert::{AlertDispatcher, AlertKind};
use super::state::{MonitorEvent, MonitorSnapshot};
use crate::db::SessionStore;
use crate::models::{ActiveCheckpoint, Outcome, Session, SessionCounters, TaggedOutcome};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Raised when the failure streak reaches the alert threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertTrigger {
    pub consecutive_failures: u32,
}

/// Folds per-tick outcomes into session counters.
#[derive(Debug, Clone)]
pub struct ClassificationAggregator {
    counters: SessionCounters,
    alert_threshold: u32,
    last_outcome: Option<Outcome>,
}

impl ClassificationAggregator {
    pub fn new(alert_threshold: u32) -> Self {
        Self {
            counters: SessionCounters::default(),
            alert_threshold: alert_threshold.max(1),
            last_outcome: None,
        }
    }

    /// Applies one outcome. The streak resets to zero whenever an alert is
    /// returned, so an unbroken lapse re-alerts every `alert_threshold` ticks.
    pub fn apply(&mut self, outcome: Outcome) -> Option<AlertTrigger> {
        self.counters.total_ticks += 1;
        self.last_outcome = Some(outcome);

        if outcome.is_engaged() {
            self.counters.effective_ticks += 1;
            self.counters.consecutive_failures = 0;
            return None;
        }

        self.counters.consecutive_failures += 1;
        if self.counters.consecutive_failures >= self.alert_threshold {
            let trigger = AlertTrigger {
                consecutive_failures: self.counters.consecutive_failures,
            };
            self.counters.consecutive_failures = 0;
            return Some(trigger);
        }
        None
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    pub fn last_outcome(&self) -> Option<Outcome> {
        self.last_outcome
    }

    pub fn current_efficiency(&self) -> f64 {
        self.counters.efficiency()
    }
}

pub enum AggregatorMessage {
    Outcome(TaggedOutcome),
    /// Stop boundary: reply with the final counters and stop consuming.
    Finalize(oneshot::Sender<SessionCounters>),
}

/// Collaborators the aggregator task notifies while folding.
#[derive(Clone)]
pub(crate) struct AggregatorLinks {
    pub alerts: AlertDispatcher,
    pub store: Arc<dyn SessionStore>,
    pub snapshot_tx: Arc<watch::Sender<MonitorSnapshot>>,
    pub events_tx: broadcast::Sender<MonitorEvent>,
    pub checkpoint_every_ticks: u32,
}

/// Controller-side handle of a running aggregator task.
pub(crate) struct AggregatorHandle {
    tx: mpsc::UnboundedSender<AggregatorMessage>,
    task: JoinHandle<()>,
}

impl AggregatorHandle {
    pub fn spawn(
        session: Session,
        alert_threshold: u32,
        links: AggregatorLinks,
    ) -> (Self, mpsc::UnboundedSender<AggregatorMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_aggregator(
            session,
            ClassificationAggregator::new(alert_threshold),
            links,
            rx,
        ));
        (
            Self {
                tx: tx.clone(),
                task,
            },
            tx,
        )
    }

    /// Everything queued before this call is folded; nothing after it is.
    pub async fn finalize(self) -> Result<SessionCounters> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(AggregatorMessage::Finalize(reply_tx))
            .map_err(|_| anyhow!("aggregator task already exited"))?;
        let counters = reply_rx
            .await
            .map_err(|_| anyhow!("aggregator task dropped the finalize reply"))?;
        if let Err(err) = self.task.await {
            log_warn!("aggregator task failed to join: {err}");
        }
        Ok(counters)
    }
}

async fn run_aggregator(
    session: Session,
    mut aggregator: ClassificationAggregator,
    links: AggregatorLinks,
    mut rx: mpsc::UnboundedReceiver<AggregatorMessage>,
) {
    let mut checkpoint_task: Option<JoinHandle<()>> = None;

    while let Some(message) = rx.recv().await {
        let tagged = match message {
            AggregatorMessage::Outcome(tagged) => tagged,
            AggregatorMessage::Finalize(reply) => {
                // Let a queued checkpoint land before the controller clears it.
                if let Some(handle) = checkpoint_task.take() {
                    let _ = handle.await;
                }
                let _ = reply.send(aggregator.counters());
                log_info!(
                    "aggregator for session {} finalized at {:?}",
                    session.id,
                    aggregator.counters()
                );
                return;
            }
        };

        if tagged.generation != session.generation {
            log_warn!(
                "discarding {:?} from stale generation {} (current {})",
                tagged.outcome,
                tagged.generation,
                session.generation
            );
            continue;
        }

        let trigger = aggregator.apply(tagged.outcome);
        let counters = aggregator.counters();
        log_debug!(
            "tick {} -> {:?}; {}/{} engaged ({:.1}%)",
            tagged.tick,
            tagged.outcome,
            counters.effective_ticks,
            counters.total_ticks,
            aggregator.current_efficiency()
        );

        links.snapshot_tx.send_modify(|snapshot| {
            snapshot.counters = counters;
            snapshot.efficiency = counters.efficiency();
            snapshot.last_outcome = Some(tagged.outcome);
        });
        let _ = links.events_tx.send(MonitorEvent::OutcomeRecorded {
            generation: tagged.generation,
            tick: tagged.tick,
            outcome: tagged.outcome,
            counters,
        });

        if let Some(trigger) = trigger {
            log_info!(
                "attention lapse in session {}: {} consecutive non-engaged ticks",
                session.id,
                trigger.consecutive_failures
            );
            links.alerts.dispatch(AlertKind::AttentionLapse {
                session_id: session.id.clone(),
                consecutive_failures: trigger.consecutive_failures,
            });
            let _ = links.events_tx.send(MonitorEvent::AlertFired {
                generation: tagged.generation,
                consecutive_failures: trigger.consecutive_failures,
            });
        }

        if should_checkpoint(links.checkpoint_every_ticks, counters.total_ticks) {
            let busy = checkpoint_task
                .as_ref()
                .map(|handle| !handle.is_finished())
                .unwrap_or(false);
            if busy {
                log_debug!("previous checkpoint still in flight; skipping");
            } else {
                checkpoint_task = Some(spawn_checkpoint(&links, &session, counters));
            }
        }
    }
}

fn should_checkpoint(every: u32, total_ticks: u64) -> bool {
    every > 0 && total_ticks > 0 && total_ticks % u64::from(every) == 0
}

fn spawn_checkpoint(links: &AggregatorLinks, session: &Session, counters: SessionCounters) -> JoinHandle<()> {
    let store = Arc::clone(&links.store);
    let checkpoint = ActiveCheckpoint {
        session_id: session.id.clone(),
        start_time: session.start_time,
        sample_interval_ms: session.sample_interval_ms,
        counters,
        updated_at: Utc::now(),
    };
    tokio::spawn(async move {
        if let Err(err) = store.save_checkpoint(&checkpoint).await {
            log_warn!(
                "failed to checkpoint session {}: {err:#}",
                checkpoint.session_id
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::state::MonitorStatus;
    use crate::testing::{MemoryStore, RecordingAlertSink};
    use crate::models::Outcome::{ClassificationFailure as Fail, Engaged as On, NotEngaged as Off};

    fn fold(threshold: u32, outcomes: &[Outcome]) -> (ClassificationAggregator, usize) {
        let mut aggregator = ClassificationAggregator::new(threshold);
        let alerts = outcomes
            .iter()
            .filter_map(|outcome| aggregator.apply(*outcome))
            .count();
        (aggregator, alerts)
    }

    #[test]
    fn empty_aggregator_has_zero_efficiency() {
        let aggregator = ClassificationAggregator::new(5);
        assert_eq!(aggregator.current_efficiency(), 0.0);
        assert_eq!(aggregator.counters(), SessionCounters::default());
        assert_eq!(aggregator.last_outcome(), None);
    }

    #[test]
    fn seven_of_ten_engaged_without_alert() {
        let mut outcomes = vec![On; 7];
        outcomes.extend([Off; 3]);
        let (aggregator, alerts) = fold(5, &outcomes);

        let counters = aggregator.counters();
        assert_eq!(counters.total_ticks, 10);
        assert_eq!(counters.effective_ticks, 7);
        assert_eq!(counters.consecutive_failures, 3);
        assert_eq!(aggregator.current_efficiency(), 70.0);
        assert_eq!(alerts, 0);
    }

    #[test]
    fn threshold_fires_once_and_resets_streak() {
        let mut aggregator = ClassificationAggregator::new(5);
        for _ in 0..3 {
            assert_eq!(aggregator.apply(On), None);
        }
        for _ in 0..4 {
            assert_eq!(aggregator.apply(Off), None);
        }
        assert_eq!(
            aggregator.apply(Off),
            Some(AlertTrigger {
                consecutive_failures: 5
            })
        );
        assert_eq!(aggregator.counters().consecutive_failures, 0);

        assert_eq!(aggregator.apply(On), None);
        assert_eq!(aggregator.apply(On), None);
        assert_eq!(aggregator.counters().total_ticks, 10);
        assert_eq!(aggregator.counters().effective_ticks, 5);
    }

    #[test]
    fn failures_count_toward_the_streak() {
        let (_, alerts) = fold(3, &[Off, Fail, Fail]);
        assert_eq!(alerts, 1);
    }

    #[test]
    fn engaged_resets_any_streak() {
        let mut aggregator = ClassificationAggregator::new(10);
        for _ in 0..9 {
            aggregator.apply(Fail);
        }
        assert_eq!(aggregator.counters().consecutive_failures, 9);
        aggregator.apply(On);
        assert_eq!(aggregator.counters().consecutive_failures, 0);
    }

    #[test]
    fn long_lapse_realerts_every_threshold() {
        let (aggregator, alerts) = fold(5, &[Off; 12]);
        assert_eq!(alerts, 2);
        assert_eq!(aggregator.counters().consecutive_failures, 2);
    }

    #[test]
    fn counters_stay_consistent_for_mixed_streams() {
        let pattern = [On, Off, Fail, On, On, Fail, Off, Off, Fail, Fail, On];
        let mut aggregator = ClassificationAggregator::new(2);
        for (i, outcome) in pattern.iter().cycle().take(200).enumerate() {
            aggregator.apply(*outcome);
            let counters = aggregator.counters();
            assert_eq!(counters.total_ticks, i as u64 + 1);
            assert!(counters.effective_ticks <= counters.total_ticks);
            assert!(counters.consecutive_failures < 2);
            let efficiency = aggregator.current_efficiency();
            assert!((0.0..=100.0).contains(&efficiency));
        }
    }

    fn links(sink: Arc<RecordingAlertSink>, store: Arc<MemoryStore>, every: u32) -> AggregatorLinks {
        let (snapshot_tx, _) = watch::channel(MonitorSnapshot::idle(0));
        let (events_tx, _) = broadcast::channel(64);
        AggregatorLinks {
            alerts: AlertDispatcher::new(sink),
            store,
            snapshot_tx: Arc::new(snapshot_tx),
            events_tx,
            checkpoint_every_ticks: every,
        }
    }

    fn tagged(generation: u64, tick: u64, outcome: Outcome) -> AggregatorMessage {
        AggregatorMessage::Outcome(TaggedOutcome {
            generation,
            tick,
            outcome,
        })
    }

    #[tokio::test]
    async fn task_discards_stale_generations_and_post_finalize_outcomes() {
        let sink = Arc::new(RecordingAlertSink::default());
        let store = Arc::new(MemoryStore::default());
        let session = Session::new("s1".into(), 2, Utc::now(), 1000);
        let links = links(sink, store, 0);
        let snapshot_rx = links.snapshot_tx.subscribe();

        let (handle, tx) = AggregatorHandle::spawn(session, 5, links);
        tx.send(tagged(2, 1, On)).unwrap();
        tx.send(tagged(1, 1, On)).unwrap();
        tx.send(tagged(2, 2, Off)).unwrap();

        let counters = handle.finalize().await.unwrap();
        assert_eq!(counters.total_ticks, 2);
        assert_eq!(counters.effective_ticks, 1);

        assert!(tx.send(tagged(2, 3, On)).is_err());
        let snapshot = snapshot_rx.borrow().clone();
        assert_eq!(snapshot.counters, counters);
        assert_eq!(snapshot.status, MonitorStatus::Idle);
        assert_eq!(snapshot.last_outcome, Some(Off));
    }

    #[tokio::test]
    async fn task_dispatches_alerts_and_checkpoints() {
        let sink = Arc::new(RecordingAlertSink::default());
        let store = Arc::new(MemoryStore::default());
        let session = Session::new("s1".into(), 1, Utc::now(), 1000);
        let links = links(Arc::clone(&sink), Arc::clone(&store), 2);

        let (handle, tx) = AggregatorHandle::spawn(session, 3, links);
        for tick in 1..=3 {
            tx.send(tagged(1, tick, Off)).unwrap();
        }
        tx.send(tagged(1, 4, On)).unwrap();
        handle.finalize().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(sink.fired().len(), 1);
        let checkpoint = store.checkpoint().expect("checkpoint saved");
        assert_eq!(checkpoint.session_id, "s1");
        assert_eq!(checkpoint.counters.total_ticks % 2, 0);
    }
}
