//! Finalized session records and the crash-recovery checkpoint.

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::session::{efficiency_percent, ticks_to_minutes, Session, SessionCounters};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RecordStatus {
    /// Finalized by an explicit `stop()`.
    Completed,
    /// Rebuilt from a checkpoint left behind by a process that never stopped.
    Interrupted,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Completed => "Completed",
            RecordStatus::Interrupted => "Interrupted",
        }
    }
}

/// Immutable snapshot of a closed session, apart from the label and a
/// corrected duration applied through [`RecordUpdate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    /// Local calendar day of `start_time`.
    pub date: NaiveDate,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_ticks: u64,
    pub effective_ticks: u64,
    pub sample_interval_ms: u64,
    pub duration_minutes: f64,
    pub total_elapsed_minutes: f64,
    pub efficiency: f64,
    pub label: Option<String>,
    pub status: RecordStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn finalize(
        session: &Session,
        end_time: DateTime<Utc>,
        counters: SessionCounters,
        status: RecordStatus,
    ) -> Self {
        Self::from_parts(
            session.id.clone(),
            session.start_time,
            end_time,
            session.sample_interval_ms,
            counters,
            status,
        )
    }

    fn from_parts(
        id: String,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        sample_interval_ms: u64,
        counters: SessionCounters,
        status: RecordStatus,
    ) -> Self {
        let effective_ticks = counters.effective_ticks.min(counters.total_ticks);
        Self {
            id,
            date: start_time.with_timezone(&Local).date_naive(),
            start_time,
            end_time,
            total_ticks: counters.total_ticks,
            effective_ticks,
            sample_interval_ms,
            duration_minutes: ticks_to_minutes(effective_ticks, sample_interval_ms),
            total_elapsed_minutes: ticks_to_minutes(counters.total_ticks, sample_interval_ms),
            efficiency: efficiency_percent(effective_ticks, counters.total_ticks),
            label: None,
            status,
            created_at: end_time,
            updated_at: end_time,
        }
    }

    /// Whether this record clears the minimum-length policy.
    pub fn meets_minimum(&self, min_persist_minutes: u32) -> bool {
        self.total_elapsed_minutes >= f64::from(min_persist_minutes)
    }
}

/// Fields that may be corrected after a record has been persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RecordUpdate {
    /// `Some(None)` clears the label.
    pub label: Option<Option<String>>,
    pub duration_minutes: Option<f64>,
}

impl RecordUpdate {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.duration_minutes.is_none()
    }
}

/// Periodic snapshot of an active session so a crash does not lose it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCheckpoint {
    pub session_id: String,
    pub start_time: DateTime<Utc>,
    pub sample_interval_ms: u64,
    pub counters: SessionCounters,
    pub updated_at: DateTime<Utc>,
}

impl ActiveCheckpoint {
    pub fn into_interrupted_record(self) -> SessionRecord {
        SessionRecord::from_parts(
            self.session_id,
            self.start_time,
            self.updated_at,
            self.sample_interval_ms,
            self.counters,
            RecordStatus::Interrupted,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(total: u64, effective: u64) -> SessionCounters {
        SessionCounters {
            total_ticks: total,
            effective_ticks: effective,
            consecutive_failures: 0,
        }
    }

    #[test]
    fn finalize_derives_minutes_and_efficiency() {
        let start = Utc::now();
        let session = Session::new("abc".into(), 3, start, 60_000);
        let end = start + chrono::Duration::minutes(10);

        let record = SessionRecord::finalize(&session, end, counters(10, 7), RecordStatus::Completed);

        assert_eq!(record.total_elapsed_minutes, 10.0);
        assert_eq!(record.duration_minutes, 7.0);
        assert_eq!(record.efficiency, 70.0);
        assert!(record.duration_minutes <= record.total_elapsed_minutes);
        assert_eq!(record.label, None);
        assert!(record.meets_minimum(1));
    }

    #[test]
    fn empty_session_is_below_minimum() {
        let start = Utc::now();
        let session = Session::new("abc".into(), 1, start, 60_000);
        let record = SessionRecord::finalize(&session, start, counters(0, 0), RecordStatus::Completed);

        assert_eq!(record.efficiency, 0.0);
        assert!(!record.meets_minimum(1));
        assert!(record.meets_minimum(0));
    }

    #[test]
    fn checkpoint_becomes_interrupted_record() {
        let start = Utc::now();
        let checkpoint = ActiveCheckpoint {
            session_id: "xyz".into(),
            start_time: start,
            sample_interval_ms: 60_000,
            counters: counters(4, 2),
            updated_at: start + chrono::Duration::minutes(4),
        };

        let record = checkpoint.clone().into_interrupted_record();
        assert_eq!(record.status, RecordStatus::Interrupted);
        assert_eq!(record.end_time, checkpoint.updated_at);
        assert_eq!(record.efficiency, 50.0);
    }
}
