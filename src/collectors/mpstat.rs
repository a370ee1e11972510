use super::Source;
use crate::observation::{labels, MetricDesc};
use crate::parse::{collect_atomic, extract_float, tokenize, ParseError, ParsedRow, Parsed};
use crate::runner::CommandSpec;

// CPU minf mjf xcal intr ithr csw icsw migr smtx srw syscl usr sys st idl
const CPU: usize = 0;
const USER: usize = 12;
const SYSTEM: usize = 13;
const IDLE: usize = 15;
const HEADER: &str = "CPU";

pub const CPU_USAGE_PERCENTS: MetricDesc = MetricDesc::gauge(
    "smartos_gz_cpu_usage_percents",
    "CPU utilization of the global zone in percents.",
    &["cpu", "mode"],
);

const METRICS: &[MetricDesc] = &[CPU_USAGE_PERCENTS];

#[derive(Debug, Clone, Copy, Default)]
pub struct CpuUsageSource;

impl Source for CpuUsageSource {
    fn name(&self) -> &'static str {
        "mpstat"
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("mpstat", ["1", "2"])
    }

    fn metrics(&self) -> &'static [MetricDesc] {
        METRICS
    }

    fn parse(&self, text: &str) -> Result<Parsed, ParseError> {
        parse_mpstat(text)
    }
}

fn last_block(rows: Vec<ParsedRow<'_>>) -> Vec<ParsedRow<'_>> {
    match rows.iter().rposition(|row| row.tokens[0] == HEADER) {
        Some(header) => rows.into_iter().skip(header + 1).collect(),
        None => rows.into_iter().skip(1).collect(),
    }
}

pub fn parse_mpstat(text: &str) -> Result<Parsed, ParseError> {
    collect_atomic(last_block(tokenize(text, 0, 0)), |row| {
        let cpu = row.token(CPU)?;
        let user = extract_float(row, USER)?;
        let system = extract_float(row, SYSTEM)?;
        let idle = extract_float(row, IDLE)?;

        Ok([("user", user), ("system", system), ("idle", idle)]
            .into_iter()
            .map(|(mode, value)| {
                CPU_USAGE_PERCENTS.observe(labels([("cpu", cpu), ("mode", mode)]), value)
            })
            .collect())
    })
}
