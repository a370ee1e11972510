use super::Source;
use crate::observation::{labels, MetricDesc, Observation};
use crate::parse::{collect_atomic, extract_float, tokenize, ParseError, Parsed};
use crate::runner::CommandSpec;
use std::collections::HashMap;
use std::sync::Mutex;

//   ---- errors ---
//   s/w h/w trn tot device
const SOFT: usize = 0;
const HARD: usize = 1;
const TRANSPORT: usize = 2;
const DEVICE: usize = 4;
const HEADER_LINES: usize = 2;

pub const DISK_ERRORS: MetricDesc = MetricDesc::counter(
    "smartos_disk_errs_total",
    "Number of hardware disk errors.",
    &["device", "error_type"],
);

const METRICS: &[MetricDesc] = &[DISK_ERRORS];

type Totals = HashMap<(String, String), f64>;

#[derive(Debug, Default)]
pub struct DiskErrorsSource {
    last_totals: Mutex<Totals>,
    pending: Mutex<Option<Totals>>,
}

impl Source for DiskErrorsSource {
    fn name(&self) -> &'static str {
        "iostat"
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("iostat", ["-en"])
    }

    fn metrics(&self) -> &'static [MetricDesc] {
        METRICS
    }

    fn parse(&self, text: &str) -> Result<Parsed, ParseError> {
        let mut parsed = parse_iostat(text)?;
        self.replace_totals_with_increases(&mut parsed.observations);
        Ok(parsed)
    }

    fn commit(&self) {
        let pending = self.pending.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(totals) = pending {
            self.last_totals
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend(totals);
        }
    }
}

impl DiskErrorsSource {
    // the baseline only moves on commit, once the registry took the batch
    fn replace_totals_with_increases(&self, observations: &mut [Observation]) {
        let last = self.last_totals.lock().unwrap_or_else(|e| e.into_inner());
        let mut totals = Totals::with_capacity(observations.len());
        for obs in observations {
            let key = (
                obs.label("device").unwrap_or_default().to_string(),
                obs.label("error_type").unwrap_or_default().to_string(),
            );
            let total = obs.value;
            obs.value = match last.get(&key) {
                Some(&previous) if total >= previous => total - previous,
                // first sighting or the device counters were reset
                _ => total,
            };
            totals.insert(key, total);
        }
        *self.pending.lock().unwrap_or_else(|e| e.into_inner()) = Some(totals);
    }
}

pub fn parse_iostat(text: &str) -> Result<Parsed, ParseError> {
    collect_atomic(tokenize(text, HEADER_LINES, 0), |row| {
        let device = row.token(DEVICE)?;
        let soft = extract_float(row, SOFT)?;
        let hard = extract_float(row, HARD)?;
        let transport = extract_float(row, TRANSPORT)?;

        Ok([("soft", soft), ("hard", hard), ("trn", transport)]
            .into_iter()
            .map(|(error_type, value)| {
                DISK_ERRORS.observe(
                    labels([("device", device), ("error_type", error_type)]),
                    value,
                )
            })
            .collect())
    })
}
