use super::Source;
use crate::observation::{labels, MetricDesc};
use crate::parse::{
    collect_atomic, extract_percent, extract_unit_stripped, tokenize, ParseError, Parsed,
};
use crate::runner::CommandSpec;

// Filesystem  Size  Used  Avail  Use%  Mounted on
const DEVICE: usize = 0;
const SIZE: usize = 1;
const USED: usize = 2;
const AVAILABLE: usize = 3;
const USE_PERCENT: usize = 4;
const MOUNTPOINT: usize = 5;
const HEADER_LINES: usize = 1;

const LABELS: &[&str] = &["device", "mountpoint"];

pub const SIZE_BYTES: MetricDesc =
    MetricDesc::gauge("smartos_df_size_bytes", "disk size in bytes.", LABELS);
pub const USED_BYTES: MetricDesc =
    MetricDesc::gauge("smartos_df_used_bytes", "disk used space in bytes.", LABELS);
pub const AVAILABLE_BYTES: MetricDesc = MetricDesc::gauge(
    "smartos_df_available_bytes",
    "disk available space in bytes.",
    LABELS,
);
pub const USE_PERCENTS: MetricDesc = MetricDesc::gauge(
    "smartos_df_use_percents",
    "disk used space in percents.",
    LABELS,
);

const METRICS: &[MetricDesc] = &[SIZE_BYTES, USED_BYTES, AVAILABLE_BYTES, USE_PERCENTS];

#[derive(Debug, Clone, Copy, Default)]
pub struct DfSource;

impl Source for DfSource {
    fn name(&self) -> &'static str {
        "df"
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("df", Vec::<String>::new())
    }

    fn metrics(&self) -> &'static [MetricDesc] {
        METRICS
    }

    fn parse(&self, text: &str) -> Result<Parsed, ParseError> {
        parse_df(text)
    }
}

/// Sizes are reported in whatever unit `df` printed; a trailing unit letter
/// is dropped, never applied.
pub fn parse_df(text: &str) -> Result<Parsed, ParseError> {
    collect_atomic(tokenize(text, HEADER_LINES, 0), |row| {
        let device = row.token(DEVICE)?;
        row.token(MOUNTPOINT)?;
        // mount points may contain spaces
        let mountpoint = row.tokens[MOUNTPOINT..].join(" ");
        let size = extract_unit_stripped(row, SIZE)?;
        let used = extract_unit_stripped(row, USED)?;
        let available = extract_unit_stripped(row, AVAILABLE)?;
        let use_percent = extract_percent(row, USE_PERCENT)?;

        let labels = labels([("device", device), ("mountpoint", mountpoint.as_str())]);
        Ok(vec![
            SIZE_BYTES.observe(labels.clone(), size),
            USED_BYTES.observe(labels.clone(), used),
            AVAILABLE_BYTES.observe(labels.clone(), available),
            USE_PERCENTS.observe(labels, use_percent),
        ])
    })
}
