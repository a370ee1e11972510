use crate::context::ZoneContext;
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, serde::Serialize)]
pub struct State {
    pub context: ZoneContext,
    pub started_at_unix: i64,
    pub last_collect_timestamp_seconds: i64,
    pub collectors: BTreeMap<String, CollectorStatus>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CollectorStatus {
    pub ok: bool,
    pub last_error: Option<String>,
    pub last_success_unix: Option<i64>,
    pub duration_ms: u64,
    pub observations: usize,
    pub skipped_rows: usize,
}

impl State {
    pub fn new(context: ZoneContext, now_unix: i64) -> Self {
        Self {
            context,
            started_at_unix: now_unix,
            last_collect_timestamp_seconds: 0,
            collectors: BTreeMap::new(),
        }
    }

    pub fn record_success(
        &mut self,
        collector: &str,
        captured_at_unix: i64,
        duration_ms: u64,
        observations: usize,
        skipped_rows: usize,
    ) {
        let status = self.collectors.entry(collector.to_string()).or_default();
        status.ok = true;
        status.last_error = None;
        status.last_success_unix = Some(captured_at_unix);
        status.duration_ms = duration_ms;
        status.observations = observations;
        status.skipped_rows = skipped_rows;
    }

    pub fn record_failure(&mut self, collector: &str, error: String, duration_ms: u64) {
        let status = self.collectors.entry(collector.to_string()).or_default();
        status.ok = false;
        status.last_error = Some(error);
        status.duration_ms = duration_ms;
        status.observations = 0;
        status.skipped_rows = 0;
    }
}

pub fn now_unix() -> i64 {
    unix_seconds(SystemTime::now())
}

pub fn unix_seconds(at: SystemTime) -> i64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
