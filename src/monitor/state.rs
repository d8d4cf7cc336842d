use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{Outcome, Session, SessionCounters, SessionRecord};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum MonitorStatus {
    #[default]
    Idle,
    Active,
}

/// Read-only view of the engine, refreshed after every folded outcome and on
/// every transition.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub status: MonitorStatus,
    pub generation: u64,
    pub session_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub counters: SessionCounters,
    pub efficiency: f64,
    pub last_outcome: Option<Outcome>,
}

impl MonitorSnapshot {
    pub fn idle(generation: u64) -> Self {
        Self {
            status: MonitorStatus::Idle,
            generation,
            session_id: None,
            started_at: None,
            counters: SessionCounters::default(),
            efficiency: 0.0,
            last_outcome: None,
        }
    }

    pub fn active(session: &Session) -> Self {
        Self {
            status: MonitorStatus::Active,
            generation: session.generation,
            session_id: Some(session.id.clone()),
            started_at: Some(session.start_time),
            counters: SessionCounters::default(),
            efficiency: 0.0,
            last_outcome: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MonitorEvent {
    SessionStarted {
        session_id: String,
        generation: u64,
        start_time: DateTime<Utc>,
    },
    OutcomeRecorded {
        generation: u64,
        tick: u64,
        outcome: Outcome,
        counters: SessionCounters,
    },
    AlertFired {
        generation: u64,
        consecutive_failures: u32,
    },
    SessionFinalized {
        record: SessionRecord,
    },
    /// Shorter than the minimum persist length; never handed to the store.
    SessionDiscarded {
        record: SessionRecord,
    },
}

/// What `stop()` did with the closed session.
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Persisted(SessionRecord),
    Discarded(SessionRecord),
}

impl StopOutcome {
    pub fn record(&self) -> &SessionRecord {
        match self {
            StopOutcome::Persisted(record) | StopOutcome::Discarded(record) => record,
        }
    }
}

/// Controller bookkeeping. Counters live in the aggregator, not here.
#[derive(Debug, Default)]
pub struct ControllerState {
    pub status: MonitorStatus,
    pub generation: u64,
    pub session: Option<Session>,
    /// Finalized records whose persist step failed, oldest first.
    pub pending: VecDeque<SessionRecord>,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    pub fn begin_session(&mut self, session: Session) {
        self.status = MonitorStatus::Active;
        self.generation = session.generation;
        self.session = Some(session);
    }

    /// Closes and hands back the active session, leaving the state `Idle`.
    pub fn end_session(&mut self, end_time: DateTime<Utc>) -> Option<Session> {
        self.status = MonitorStatus::Idle;
        let mut session = self.session.take()?;
        session.close(end_time);
        Some(session)
    }
}
