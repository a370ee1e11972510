use super::Source;
use crate::observation::{MetricDesc, Observation};
use crate::parse::{coerce, ParseError, Parsed};
use crate::runner::CommandSpec;
use regex::Regex;
use std::sync::OnceLock;

const PATTERN: &str =
    r"load averages?:\s*(\d+(?:\.\d+)?),?\s+(\d+(?:\.\d+)?),?\s+(\d+(?:\.\d+)?)";

pub const LOAD1: MetricDesc = MetricDesc::gauge("smartos_cpu_load1", "CPU load average 1 minute.", &[]);
pub const LOAD5: MetricDesc = MetricDesc::gauge("smartos_cpu_load5", "CPU load average 5 minutes.", &[]);
pub const LOAD15: MetricDesc =
    MetricDesc::gauge("smartos_cpu_load15", "CPU load average 15 minutes.", &[]);

const METRICS: &[MetricDesc] = &[LOAD1, LOAD5, LOAD15];

fn load_average() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PATTERN).ok()).as_ref()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadAverageSource;

impl Source for LoadAverageSource {
    fn name(&self) -> &'static str {
        "uptime"
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("uptime", Vec::<String>::new())
    }

    fn metrics(&self) -> &'static [MetricDesc] {
        METRICS
    }

    fn parse(&self, text: &str) -> Result<Parsed, ParseError> {
        parse_uptime(text)
    }
}

pub fn parse_uptime(text: &str) -> Result<Parsed, ParseError> {
    let re = load_average().ok_or(ParseError::Pattern { pattern: PATTERN })?;
    let Some((line, caps)) = text
        .lines()
        .enumerate()
        .find_map(|(idx, line)| re.captures(line).map(|caps| (idx + 1, caps)))
    else {
        return Err(ParseError::Pattern { pattern: PATTERN });
    };

    let mut observations: Vec<Observation> = Vec::with_capacity(METRICS.len());
    for (group, desc) in METRICS.iter().enumerate() {
        let token = caps.get(group + 1).map_or("", |m| m.as_str());
        match coerce(token, line, group) {
            Ok(value) => observations.push(desc.observe(Default::default(), value)),
            Err(first) => return Err(ParseError::NoValidRows { rows: 1, first }),
        }
    }

    Ok(Parsed {
        observations,
        skipped: Vec::new(),
    })
}
