use super::Source;
use crate::observation::{labels, MetricDesc};
use crate::parse::{collect_atomic, extract_float, tokenize, ParseError, Parsed};
use crate::runner::CommandSpec;

//  r b w   swap  free  re  mf pi po fr de sr ...
const SWAP: usize = 3;
const FREE: usize = 4;
// two header lines and the since-boot sample
const HEADER_LINES: usize = 3;

pub const FREE_BYTES: MetricDesc = MetricDesc::gauge(
    "smartos_gz_memory_free_bytes",
    "Free memory of the global zone.",
    &["memory"],
);

const METRICS: &[MetricDesc] = &[FREE_BYTES];

#[derive(Debug, Clone, Copy, Default)]
pub struct FreeMemorySource;

impl Source for FreeMemorySource {
    fn name(&self) -> &'static str {
        "vmstat"
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("vmstat", ["1", "2"])
    }

    fn metrics(&self) -> &'static [MetricDesc] {
        METRICS
    }

    fn parse(&self, text: &str) -> Result<Parsed, ParseError> {
        parse_vmstat(text)
    }
}

pub fn parse_vmstat(text: &str) -> Result<Parsed, ParseError> {
    collect_atomic(tokenize(text, HEADER_LINES, 0), |row| {
        let swap = extract_float(row, SWAP)?;
        let free = extract_float(row, FREE)?;
        Ok(vec![
            FREE_BYTES.observe(labels([("memory", "swap")]), swap),
            FREE_BYTES.observe(labels([("memory", "ram")]), free),
        ])
    })
}
