use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Running counters of one session. Only the aggregator mutates these.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionCounters {
    pub total_ticks: u64,
    pub effective_ticks: u64,
    /// Non-engaged or failed cycles since the last engaged result or alert.
    pub consecutive_failures: u32,
}

impl SessionCounters {
    pub fn efficiency(&self) -> f64 {
        efficiency_percent(self.effective_ticks, self.total_ticks)
    }
}

/// `effective / total * 100`, or 0 for an empty session.
pub fn efficiency_percent(effective_ticks: u64, total_ticks: u64) -> f64 {
    if total_ticks == 0 {
        return 0.0;
    }
    let ratio = effective_ticks.min(total_ticks) as f64 / total_ticks as f64;
    (ratio * 100.0).clamp(0.0, 100.0)
}

pub fn ticks_to_minutes(ticks: u64, sample_interval_ms: u64) -> f64 {
    (ticks as f64 * sample_interval_ms as f64) / 60_000.0
}

/// The unit of monitoring, bracketed by one `start()` / `stop()` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub generation: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub sample_interval_ms: u64,
}

impl Session {
    pub fn new(id: String, generation: u64, start_time: DateTime<Utc>, sample_interval_ms: u64) -> Self {
        Self {
            id,
            generation,
            start_time,
            end_time: None,
            sample_interval_ms,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Sets the end time once; later calls keep the first value.
    pub fn close(&mut self, end_time: DateTime<Utc>) {
        if self.end_time.is_none() {
            self.end_time = Some(end_time);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn efficiency_is_zero_without_ticks() {
        assert_eq!(efficiency_percent(0, 0), 0.0);
        assert_eq!(SessionCounters::default().efficiency(), 0.0);
    }

    #[test]
    fn efficiency_is_a_percentage_of_ticks() {
        assert_eq!(efficiency_percent(7, 10), 70.0);
        assert_eq!(efficiency_percent(10, 10), 100.0);
        assert_eq!(efficiency_percent(0, 4), 0.0);
    }

    #[test]
    fn minutes_scale_with_interval() {
        assert_eq!(ticks_to_minutes(3, 60_000), 3.0);
        assert_eq!(ticks_to_minutes(30, 1_000), 0.5);
    }

    #[test]
    fn close_is_write_once() {
        let start = Utc::now();
        let mut session = Session::new("s".into(), 1, start, 60_000);
        let first = start + chrono::Duration::minutes(5);
        session.close(first);
        session.close(first + chrono::Duration::minutes(5));
        assert_eq!(session.end_time, Some(first));
        assert!(session.is_closed());
    }
}
