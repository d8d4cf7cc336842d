use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use anyhow::{bail, Context, Result};
use log::info;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::loop_worker::{sampling_loop, CycleRunner};
use crate::monitor::aggregator::AggregatorMessage;

/// Owns the tick loop of one session.
pub struct SamplingScheduler {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    ticks_fired: Arc<AtomicU64>,
}

impl Default for SamplingScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl SamplingScheduler {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
            ticks_fired: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn start(
        &mut self,
        generation: u64,
        interval: Duration,
        runner: CycleRunner,
        outcomes: mpsc::UnboundedSender<AggregatorMessage>,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("sampling already active");
        }
        if interval.is_zero() {
            bail!("sampling interval must be greater than zero");
        }

        let cancel_token = CancellationToken::new();
        self.ticks_fired.store(0, Ordering::SeqCst);

        let handle = tokio::spawn(sampling_loop(
            generation,
            interval,
            runner,
            outcomes,
            Arc::clone(&self.ticks_fired),
            cancel_token.clone(),
        ));

        info!(
            "Sampling started for generation {} every {}ms",
            generation,
            interval.as_millis()
        );

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn ticks_fired(&self) -> u64 {
        self.ticks_fired.load(Ordering::SeqCst)
    }

    /// Cancels future ticks and waits for the loop to exit. Cycles already
    /// dispatched keep running on their own tasks.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("sampling loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Judgment;
    use crate::testing::{ScriptedClassifier, StaticSource};

    fn runner() -> CycleRunner {
        CycleRunner::new(
            Arc::new(StaticSource),
            Arc::new(ScriptedClassifier::new(vec![Some(Judgment::Engaged); 16])),
            Duration::from_secs(10),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn no_ticks_after_stop_returns() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut scheduler = SamplingScheduler::new();
        scheduler
            .start(1, Duration::from_millis(1000), runner(), tx)
            .unwrap();
        assert!(scheduler.is_running());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.ticks_fired(), 2);

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(scheduler.ticks_fired(), 2);
    }

    #[tokio::test]
    async fn double_start_is_refused() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut scheduler = SamplingScheduler::new();
        scheduler
            .start(1, Duration::from_secs(60), runner(), tx.clone())
            .unwrap();
        assert!(scheduler
            .start(1, Duration::from_secs(60), runner(), tx)
            .is_err());
        scheduler.stop().await.unwrap();
        scheduler.stop().await.unwrap();
    }
}
