use super::Source;
use crate::observation::{labels, MetricDesc};
use crate::parse::{
    collect_atomic, extract_float, extract_percent, tokenize, ParseError, Parsed,
};
use crate::runner::CommandSpec;

// NAME SIZE ALLOC FREE EXPANDSZ FRAG CAP DEDUP HEALTH ALTROOT
const NAME: usize = 0;
const SIZE: usize = 1;
const ALLOC: usize = 2;
const FREE: usize = 3;
const FRAG: usize = 5;
const CAP: usize = 6;
const HEALTH: usize = 8;
const HEADER_LINES: usize = 1;

const HEALTHY: &str = "ONLINE";
const LABELS: &[&str] = &["pool"];

pub const SIZE_BYTES: MetricDesc =
    MetricDesc::gauge("smartos_zpool_size_bytes", "ZFS zpool size in bytes.", LABELS);
pub const ALLOC_BYTES: MetricDesc = MetricDesc::gauge(
    "smartos_zpool_alloc_bytes",
    "ZFS zpool allocated space in bytes.",
    LABELS,
);
pub const FREE_BYTES: MetricDesc = MetricDesc::gauge(
    "smartos_zpool_free_bytes",
    "ZFS zpool free space in bytes.",
    LABELS,
);
pub const FRAG_PERCENTS: MetricDesc = MetricDesc::gauge(
    "smartos_zpool_frag_percents",
    "ZFS zpool fragmentation in percents.",
    LABELS,
);
pub const CAP_PERCENTS: MetricDesc = MetricDesc::gauge(
    "smartos_zpool_cap_percents",
    "ZFS zpool capacity in percents.",
    LABELS,
);
pub const FAULTS: MetricDesc = MetricDesc::gauge(
    "smartos_zpool_faults",
    "ZFS zpool health status; 0 when ONLINE, 1 otherwise.",
    LABELS,
);

const METRICS: &[MetricDesc] = &[
    SIZE_BYTES,
    ALLOC_BYTES,
    FREE_BYTES,
    FRAG_PERCENTS,
    CAP_PERCENTS,
    FAULTS,
];

#[derive(Debug, Clone, Default)]
pub struct ZpoolSource {
    pools: Vec<String>,
}

impl ZpoolSource {
    pub fn new(pools: Vec<String>) -> Self {
        Self { pools }
    }
}

impl Source for ZpoolSource {
    fn name(&self) -> &'static str {
        "zpool"
    }

    fn command(&self) -> CommandSpec {
        let args = ["list", "-p"]
            .into_iter()
            .chain(self.pools.iter().map(String::as_str));
        CommandSpec::new("zpool", args)
    }

    fn metrics(&self) -> &'static [MetricDesc] {
        METRICS
    }

    fn parse(&self, text: &str) -> Result<Parsed, ParseError> {
        parse_zpool(text)
    }
}

pub fn parse_zpool(text: &str) -> Result<Parsed, ParseError> {
    collect_atomic(tokenize(text, HEADER_LINES, 0), |row| {
        let pool = row.token(NAME)?;
        let size = extract_float(row, SIZE)?;
        let alloc = extract_float(row, ALLOC)?;
        let free = extract_float(row, FREE)?;
        let frag = extract_percent(row, FRAG)?;
        let cap = extract_percent(row, CAP)?;
        let health = row.token(HEALTH)?;
        let faults = if health == HEALTHY { 0.0 } else { 1.0 };

        let labels = labels([("pool", pool)]);
        Ok(vec![
            SIZE_BYTES.observe(labels.clone(), size),
            ALLOC_BYTES.observe(labels.clone(), alloc),
            FREE_BYTES.observe(labels.clone(), free),
            FRAG_PERCENTS.observe(labels.clone(), frag),
            CAP_PERCENTS.observe(labels.clone(), cap),
            FAULTS.observe(labels, faults),
        ])
    })
}
