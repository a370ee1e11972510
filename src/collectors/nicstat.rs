use super::Source;
use crate::observation::{labels, MetricDesc};
use crate::parse::{collect_atomic, extract_float, tokenize, ParseError, Parsed};
use crate::runner::CommandSpec;

//     Time      Int   rKB/s   wKB/s   rPk/s   wPk/s    rAvs    wAvs %Util    Sat
const DEVICE: usize = 1;
const READ_KB: usize = 2;
const WRITE_KB: usize = 3;
// header plus the since-boot sample
const HEADER_LINES: usize = 2;

pub const RECEIVE_KILOBYTES: MetricDesc = MetricDesc::gauge(
    "smartos_network_mlag_receive_kilobytes",
    "Kilobytes per second received on the uplink.",
    &["device"],
);
pub const TRANSMIT_KILOBYTES: MetricDesc = MetricDesc::gauge(
    "smartos_network_mlag_transmit_kilobytes",
    "Kilobytes per second transmitted on the uplink.",
    &["device"],
);

const METRICS: &[MetricDesc] = &[RECEIVE_KILOBYTES, TRANSMIT_KILOBYTES];

#[derive(Debug, Clone)]
pub struct NicRateSource {
    interface: String,
}

impl NicRateSource {
    pub fn new(interface: String) -> Self {
        Self { interface }
    }
}

impl Source for NicRateSource {
    fn name(&self) -> &'static str {
        "nicstat"
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("nicstat", ["-i", self.interface.as_str(), "1", "2"])
    }

    fn metrics(&self) -> &'static [MetricDesc] {
        METRICS
    }

    fn parse(&self, text: &str) -> Result<Parsed, ParseError> {
        parse_nicstat(text)
    }
}

pub fn parse_nicstat(text: &str) -> Result<Parsed, ParseError> {
    collect_atomic(tokenize(text, HEADER_LINES, 0), |row| {
        let device = row.token(DEVICE)?;
        let read = extract_float(row, READ_KB)?;
        let write = extract_float(row, WRITE_KB)?;

        let labels = labels([("device", device)]);
        Ok(vec![
            RECEIVE_KILOBYTES.observe(labels.clone(), read),
            TRANSMIT_KILOBYTES.observe(labels, write),
        ])
    })
}
