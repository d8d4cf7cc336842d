use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{classifier::Classifier, source::ImageSource};
use crate::models::{Outcome, TaggedOutcome};
use crate::monitor::aggregator::AggregatorMessage;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

// Import the logging macros (exported at crate root)
use crate::{log_debug, log_info, log_warn};

/// One capture + classify cycle, shared by every tick of a session.
#[derive(Clone)]
pub struct CycleRunner {
    source: Arc<dyn ImageSource>,
    classifier: Arc<dyn Classifier>,
    timeout: Duration,
}

impl CycleRunner {
    pub fn new(source: Arc<dyn ImageSource>, classifier: Arc<dyn Classifier>, timeout: Duration) -> Self {
        Self {
            source,
            classifier,
            timeout,
        }
    }

    /// Never fails: capture errors, classifier errors and timeouts all come
    /// back as `ClassificationFailure`.
    pub async fn run(&self, tick: u64) -> Outcome {
        let cycle_start = Instant::now();
        let fut = async {
            let frame = self
                .source
                .capture()
                .await
                .map_err(|err| format!("capture failed: {err}"))?;
            self.classifier
                .classify(&frame)
                .await
                .map_err(|err| format!("classification failed: {err}"))
        };

        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(judgment)) => {
                log_debug!(
                    "tick {} classified {:?} in {}ms",
                    tick,
                    judgment,
                    cycle_start.elapsed().as_millis()
                );
                Outcome::from(judgment)
            }
            Ok(Err(reason)) => {
                log_warn!("tick {} {}", tick, reason);
                Outcome::ClassificationFailure
            }
            Err(_) => {
                log_warn!(
                    "tick {} cycle timeout (> {}ms)",
                    tick,
                    self.timeout.as_millis()
                );
                Outcome::ClassificationFailure
            }
        }
    }
}

/// Fires one tick per `period` on a fixed grid anchored at the loop start and
/// dispatches each cycle as its own task, so a slow classifier never shifts
/// the next tick. The first tick fires one full period after start.
pub async fn sampling_loop(
    generation: u64,
    period: Duration,
    runner: CycleRunner,
    outcomes: mpsc::UnboundedSender<AggregatorMessage>,
    ticks_fired: Arc<AtomicU64>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    // Ticks missed while the process was suspended are dropped, not replayed.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("sampling loop for generation {} shutting down", generation);
                break;
            }
            _ = ticker.tick() => {
                let tick = ticks_fired.fetch_add(1, Ordering::SeqCst) + 1;
                let runner = runner.clone();
                let outcomes = outcomes.clone();
                tokio::spawn(async move {
                    let outcome = runner.run(tick).await;
                    let message = AggregatorMessage::Outcome(TaggedOutcome {
                        generation,
                        tick,
                        outcome,
                    });
                    if outcomes.send(message).is_err() {
                        log_debug!(
                            "dropping {:?} for tick {} of closed generation {}",
                            outcome,
                            tick,
                            generation
                        );
                    }
                });
            }
        }
    }
}
