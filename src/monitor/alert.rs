use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use log::warn;
use serde::Serialize;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_warn};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AlertKind {
    /// The failure streak crossed the alert threshold.
    AttentionLapse {
        session_id: String,
        consecutive_failures: u32,
    },
}

impl AlertKind {
    pub fn message(&self) -> String {
        match self {
            AlertKind::AttentionLapse {
                consecutive_failures,
                ..
            } => format!(
                "No pen detected for {consecutive_failures} samples in a row. Back to studying?"
            ),
        }
    }
}

/// A user-visible side effect (sound, notification, vibration).
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn fire(&self, alert: &AlertKind) -> Result<()>;
}

/// Fire-and-forget bridge from the aggregator to an [`AlertSink`].
#[derive(Clone)]
pub struct AlertDispatcher {
    sink: Arc<dyn AlertSink>,
}

impl AlertDispatcher {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self { sink }
    }

    /// Runs the sink on its own task; failures are logged and dropped.
    pub fn dispatch(&self, alert: AlertKind) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            match sink.fire(&alert).await {
                Ok(()) => log_debug!("alert delivered: {:?}", alert),
                Err(err) => log_warn!("alert dispatch failed for {:?}: {err:#}", alert),
            }
        });
    }
}

/// Surfaces alerts as warning log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn fire(&self, alert: &AlertKind) -> Result<()> {
        warn!("{}", alert.message());
        Ok(())
    }
}

/// Fires every inner sink; one failing sink does not stop the others.
pub struct FanoutAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutAlertSink {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AlertSink for FanoutAlertSink {
    async fn fire(&self, alert: &AlertKind) -> Result<()> {
        let mut failures = Vec::new();
        for sink in &self.sinks {
            if let Err(err) = sink.fire(alert).await {
                failures.push(format!("{err:#}"));
            }
        }
        if !failures.is_empty() {
            bail!(
                "{} of {} alert sinks failed: {}",
                failures.len(),
                self.sinks.len(),
                failures.join("; ")
            );
        }
        Ok(())
    }
}
