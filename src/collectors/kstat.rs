use super::Source;
use crate::observation::{labels, MetricDesc, Observation};
use crate::parse::{coerce, collect_atomic, tokenize, FieldError, ParseError, Parsed};
use crate::runner::CommandSpec;
use std::collections::{BTreeMap, BTreeSet};

const KEY: usize = 0;
const VALUE: usize = 1;

const ZONENAME: &str = "zonename";

#[derive(Debug, Clone, Copy)]
struct Stat<'a> {
    line: usize,
    value: &'a str,
}

#[derive(Debug, Default)]
struct KstatTable<'a> {
    stats: BTreeMap<(&'a str, &'a str), Stat<'a>>,
}

impl<'a> KstatTable<'a> {
    // `module:instance:name:statistic<TAB>value`; the key splits on its last
    // `:` into entity and field, so each entity is visited once.
    fn parse(text: &'a str) -> Self {
        let mut stats = BTreeMap::new();
        for row in tokenize(text, 0, 0) {
            let Some((entity, field)) = row.tokens[KEY].rsplit_once(':') else {
                continue;
            };
            let value = row.tokens.get(VALUE).copied().unwrap_or_default();
            stats.insert(
                (entity, field),
                Stat {
                    line: row.line,
                    value,
                },
            );
        }
        Self { stats }
    }

    fn entities(&self) -> BTreeSet<&'a str> {
        self.stats.keys().map(|(entity, _)| *entity).collect()
    }

    fn stat(&self, entity: &'a str, field: &'static str) -> Result<Stat<'a>, FieldError> {
        self.stats
            .get(&(entity, field))
            .copied()
            .ok_or_else(|| FieldError::Absent {
                entity: entity.to_string(),
                field,
            })
    }

    fn text(&self, entity: &'a str, field: &'static str) -> Result<&'a str, FieldError> {
        self.stat(entity, field).map(|stat| stat.value)
    }

    fn number(&self, entity: &'a str, field: &'static str) -> Result<f64, FieldError> {
        let stat = self.stat(entity, field)?;
        coerce(stat.value, stat.line, VALUE)
    }

    fn per_entity<F>(&self, mut emit: F) -> Result<Parsed, ParseError>
    where
        F: FnMut(&'a str) -> Result<Vec<Observation>, FieldError>,
    {
        collect_atomic(self.entities(), |entity| emit(*entity))
    }
}

const ZONE_LABELS: &[&str] = &["zonename"];
const LINK_LABELS: &[&str] = &["zonename", "device"];

pub const CPU_BASELINE: MetricDesc = MetricDesc::gauge(
    "smartos_cpu_baseline",
    "A soft limit on the number of CPU cycles a hosted application can consume.",
    ZONE_LABELS,
);
pub const CPU_CAP: MetricDesc = MetricDesc::gauge(
    "smartos_cpu_cap",
    "The maximum number of CPU cycles that are allocated to a zone.",
    ZONE_LABELS,
);
pub const CPU_MAX_USAGE: MetricDesc = MetricDesc::gauge(
    "smartos_cpu_maxusage",
    "The maximum percentage of CPU used.",
    ZONE_LABELS,
);
pub const CPU_USAGE: MetricDesc = MetricDesc::gauge(
    "smartos_cpu_usage",
    "The current percentage of CPU used.",
    ZONE_LABELS,
);

const CPU_METRICS: &[MetricDesc] = &[CPU_BASELINE, CPU_CAP, CPU_MAX_USAGE, CPU_USAGE];

#[derive(Debug, Clone, Copy, Default)]
pub struct ZoneCpuSource;

impl Source for ZoneCpuSource {
    fn name(&self) -> &'static str {
        "kstat_cpu"
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("kstat", ["-p", "-c", "zone_caps", "-n", "cpucaps_zone*"])
    }

    fn metrics(&self) -> &'static [MetricDesc] {
        CPU_METRICS
    }

    fn parse(&self, text: &str) -> Result<Parsed, ParseError> {
        parse_zone_cpu(text)
    }
}

pub fn parse_zone_cpu(text: &str) -> Result<Parsed, ParseError> {
    let table = KstatTable::parse(text);
    table.per_entity(|entity| {
        let zonename = table.text(entity, ZONENAME)?;
        let baseline = table.number(entity, "baseline")?;
        // the cap itself is published as "value"
        let cap = table.number(entity, "value")?;
        let max_usage = table.number(entity, "maxusage")?;
        let usage = table.number(entity, "usage")?;

        let labels = labels([("zonename", zonename)]);
        Ok(vec![
            CPU_BASELINE.observe(labels.clone(), baseline),
            CPU_CAP.observe(labels.clone(), cap),
            CPU_MAX_USAGE.observe(labels.clone(), max_usage),
            CPU_USAGE.observe(labels, usage),
        ])
    })
}

pub const MEM_CAP: MetricDesc = MetricDesc::gauge(
    "smartos_memory_cap_bytes",
    "The physical memory limit in bytes.",
    ZONE_LABELS,
);
pub const MEM_FREE: MetricDesc = MetricDesc::gauge(
    "smartos_memory_free_bytes",
    "Free memory available in bytes.",
    ZONE_LABELS,
);
pub const MEM_NOVER: MetricDesc = MetricDesc::gauge(
    "smartos_memory_nover_total",
    "The number of times the zone has gone over its cap.",
    ZONE_LABELS,
);
pub const MEM_PAGED_OUT: MetricDesc = MetricDesc::gauge(
    "smartos_memory_pagedout_bytes",
    "Total amount of memory that has been paged out when the zone has gone over its cap.",
    ZONE_LABELS,
);
pub const MEM_RSS: MetricDesc = MetricDesc::gauge(
    "smartos_memory_rss_bytes",
    "Entire amount of allocated memory.",
    ZONE_LABELS,
);
pub const SWAP_CAP: MetricDesc = MetricDesc::gauge(
    "smartos_memory_swap_cap_bytes",
    "The SWAP limit in bytes.",
    ZONE_LABELS,
);
pub const SWAP_FREE: MetricDesc = MetricDesc::gauge(
    "smartos_memory_swap_free_bytes",
    "Free SWAP available in bytes.",
    ZONE_LABELS,
);
pub const SWAP_USED: MetricDesc = MetricDesc::gauge(
    "smartos_memory_swap_used_bytes",
    "Used SWAP in bytes.",
    ZONE_LABELS,
);

const MEMORY_METRICS: &[MetricDesc] = &[
    MEM_CAP,
    MEM_FREE,
    MEM_NOVER,
    MEM_PAGED_OUT,
    MEM_RSS,
    SWAP_CAP,
    SWAP_FREE,
    SWAP_USED,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ZoneMemorySource;

impl Source for ZoneMemorySource {
    fn name(&self) -> &'static str {
        "kstat_memory"
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("kstat", ["-p", "-c", "zone_memory_cap"])
    }

    fn metrics(&self) -> &'static [MetricDesc] {
        MEMORY_METRICS
    }

    fn parse(&self, text: &str) -> Result<Parsed, ParseError> {
        parse_zone_memory(text)
    }
}

pub fn parse_zone_memory(text: &str) -> Result<Parsed, ParseError> {
    let table = KstatTable::parse(text);
    table.per_entity(|entity| {
        let zonename = table.text(entity, ZONENAME)?;
        let cap = table.number(entity, "physcap")?;
        let rss = table.number(entity, "rss")?;
        let nover = table.number(entity, "nover")?;
        let paged_out = table.number(entity, "pagedout")?;
        let swap_cap = table.number(entity, "swapcap")?;
        let swap_used = table.number(entity, "swap")?;

        let labels = labels([("zonename", zonename)]);
        Ok(vec![
            MEM_CAP.observe(labels.clone(), cap),
            MEM_FREE.observe(labels.clone(), cap - rss),
            MEM_NOVER.observe(labels.clone(), nover),
            MEM_PAGED_OUT.observe(labels.clone(), paged_out),
            MEM_RSS.observe(labels.clone(), rss),
            SWAP_CAP.observe(labels.clone(), swap_cap),
            SWAP_FREE.observe(labels.clone(), swap_cap - swap_used),
            SWAP_USED.observe(labels, swap_used),
        ])
    })
}

pub const NIC_COLLISIONS: MetricDesc = MetricDesc::gauge(
    "smartos_network_collisions",
    "Entire amount of collisions.",
    LINK_LABELS,
);
pub const NIC_RECEIVE_ERRORS: MetricDesc = MetricDesc::gauge(
    "smartos_network_receive_errs_total",
    "Received errors.",
    LINK_LABELS,
);
pub const NIC_RECEIVE_PACKETS: MetricDesc = MetricDesc::gauge(
    "smartos_network_receive_packets_total",
    "Frames received successfully.",
    LINK_LABELS,
);
pub const NIC_RECEIVE_BYTES: MetricDesc = MetricDesc::gauge(
    "smartos_network_receive_bytes_total",
    "Bytes (octets) received successfully.",
    LINK_LABELS,
);
pub const NIC_TRANSMIT_ERRORS: MetricDesc = MetricDesc::gauge(
    "smartos_network_transmit_errs_total",
    "Transmit errors.",
    LINK_LABELS,
);
pub const NIC_TRANSMIT_PACKETS: MetricDesc = MetricDesc::gauge(
    "smartos_network_transmit_packets_total",
    "Frames successfully transmitted.",
    LINK_LABELS,
);
pub const NIC_TRANSMIT_BYTES: MetricDesc = MetricDesc::gauge(
    "smartos_network_transmit_bytes_total",
    "Bytes (octets) transmitted successfully.",
    LINK_LABELS,
);
pub const NIC_LINK_STATE: MetricDesc = MetricDesc::gauge(
    "smartos_network_link_state",
    "Link state; 0 for down, 1 for up.",
    LINK_LABELS,
);

const NIC_FIELDS: &[(&str, MetricDesc)] = &[
    ("collisions", NIC_COLLISIONS),
    ("ierrors", NIC_RECEIVE_ERRORS),
    ("ipackets64", NIC_RECEIVE_PACKETS),
    ("rbytes64", NIC_RECEIVE_BYTES),
    ("oerrors", NIC_TRANSMIT_ERRORS),
    ("opackets64", NIC_TRANSMIT_PACKETS),
    ("obytes64", NIC_TRANSMIT_BYTES),
    ("link_state", NIC_LINK_STATE),
];

const NIC_METRICS: &[MetricDesc] = &[
    NIC_COLLISIONS,
    NIC_RECEIVE_ERRORS,
    NIC_RECEIVE_PACKETS,
    NIC_RECEIVE_BYTES,
    NIC_TRANSMIT_ERRORS,
    NIC_TRANSMIT_PACKETS,
    NIC_TRANSMIT_BYTES,
    NIC_LINK_STATE,
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ZoneNicSource;

impl Source for ZoneNicSource {
    fn name(&self) -> &'static str {
        "kstat_nic"
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new("kstat", ["-p", "-m", "link"])
    }

    fn metrics(&self) -> &'static [MetricDesc] {
        NIC_METRICS
    }

    fn parse(&self, text: &str) -> Result<Parsed, ParseError> {
        parse_zone_nics(text)
    }
}

pub fn parse_zone_nics(text: &str) -> Result<Parsed, ParseError> {
    let table = KstatTable::parse(text);
    table.per_entity(|entity| {
        let device = entity.rsplit_once(':').map_or(entity, |(_, name)| name);
        let zonename = table.text(entity, ZONENAME)?;
        let values = NIC_FIELDS
            .iter()
            .map(|&(field, desc)| table.number(entity, field).map(|v| (desc, v)))
            .collect::<Result<Vec<_>, _>>()?;

        let labels = labels([("zonename", zonename), ("device", device)]);
        Ok(values
            .into_iter()
            .map(|(desc, value)| desc.observe(labels.clone(), value))
            .collect())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::find;

    const CPU_SAMPLE: &str = "\
caps:0:cpucaps_zone_1:above_base_sec\t0
caps:0:cpucaps_zone_1:baseline\t100
caps:0:cpucaps_zone_1:class\tzone_caps
caps:0:cpucaps_zone_1:maxusage\t173
caps:0:cpucaps_zone_1:usage\t42
caps:0:cpucaps_zone_1:value\t400
caps:0:cpucaps_zone_1:zonename\t0c7a5e2c-web
caps:0:cpucaps_zone_2:baseline\t50
caps:0:cpucaps_zone_2:maxusage\t60
caps:0:cpucaps_zone_2:usage\t7
caps:0:cpucaps_zone_2:value\t200
caps:0:cpucaps_zone_2:zonename\tdb-zone
";

    const MEMORY_SAMPLE: &str = "\
memory_cap:1:0c7a5e2c-web:class\tzone_memory_cap
memory_cap:1:0c7a5e2c-web:nover\t3
memory_cap:1:0c7a5e2c-web:pagedout\t4096
memory_cap:1:0c7a5e2c-web:physcap\t1073741824
memory_cap:1:0c7a5e2c-web:rss\t268435456
memory_cap:1:0c7a5e2c-web:swap\t300000000
memory_cap:1:0c7a5e2c-web:swapcap\t2147483648
memory_cap:1:0c7a5e2c-web:zonename\t0c7a5e2c-web
memory_cap:2:db-zone:nover\t0
memory_cap:2:db-zone:pagedout\t0
memory_cap:2:db-zone:physcap\t4096
memory_cap:2:db-zone:rss\tbroken
memory_cap:2:db-zone:swap\t1
memory_cap:2:db-zone:swapcap\t2
memory_cap:2:db-zone:zonename\tdb-zone
";

    const NIC_SAMPLE: &str = "\
link:0:net0:collisions\t0
link:0:net0:ierrors\t1
link:0:net0:ipackets64\t1000
link:0:net0:link_state\t1
link:0:net0:obytes64\t2000
link:0:net0:oerrors\t2
link:0:net0:opackets64\t900
link:0:net0:rbytes64\t5000
link:0:net0:zonename\tweb
link:0:net1:collisions\t5
link:0:net1:ierrors\t0
link:0:net1:ipackets64\t10
link:0:net1:link_state\t0
link:0:net1:obytes64\t20
link:0:net1:oerrors\t0
link:0:net1:opackets64\t30
link:0:net1:rbytes64\t40
link:0:net1:zonename\tdb
";

    #[test]
    fn kstat_key_is_split_on_last_colon() {
        let table = KstatTable::parse("a:0:b:c\t1\nno-colon 2\nx:1:y:z\n");
        let entities: Vec<_> = table.entities().into_iter().collect();
        assert_eq!(entities, vec!["a:0:b", "x:1:y"]);
        assert_eq!(table.number("a:0:b", "c"), Ok(1.0));
        assert_eq!(table.text("x:1:y", "z"), Ok(""));
        assert!(matches!(
            table.number("a:0:b", "missing"),
            Err(FieldError::Absent { .. })
        ));
    }

    #[test]
    fn cpu_caps_per_zone() {
        let parsed = parse_zone_cpu(CPU_SAMPLE).unwrap();
        assert_eq!(parsed.observations.len(), 8);
        let web = [("zonename", "0c7a5e2c-web")];
        assert_eq!(find(&parsed.observations, "smartos_cpu_baseline", &web).unwrap().value, 100.0);
        assert_eq!(find(&parsed.observations, "smartos_cpu_cap", &web).unwrap().value, 400.0);
        assert_eq!(find(&parsed.observations, "smartos_cpu_maxusage", &web).unwrap().value, 173.0);
        assert_eq!(find(&parsed.observations, "smartos_cpu_usage", &web).unwrap().value, 42.0);
        let db = [("zonename", "db-zone")];
        assert_eq!(find(&parsed.observations, "smartos_cpu_usage", &db).unwrap().value, 7.0);
    }

    #[test]
    fn memory_free_is_cap_minus_rss() {
        let parsed = parse_zone_memory(MEMORY_SAMPLE).unwrap();
        let web: &[(&str, &str)] = &[("zonename", "0c7a5e2c-web")];
        let get = |metric: &str| find(&parsed.observations, metric, web).unwrap().value;

        assert_eq!(
            get("smartos_memory_free_bytes"),
            get("smartos_memory_cap_bytes") - get("smartos_memory_rss_bytes")
        );
        assert_eq!(get("smartos_memory_free_bytes"), 805306368.0);
        assert_eq!(get("smartos_memory_swap_free_bytes"), 2147483648.0 - 300000000.0);
        assert_eq!(get("smartos_memory_swap_used_bytes"), 300000000.0);
        assert_eq!(get("smartos_memory_nover_total"), 3.0);
        assert_eq!(get("smartos_memory_pagedout_bytes"), 4096.0);
    }

    #[test]
    fn zone_with_malformed_field_is_dropped_whole() {
        let parsed = parse_zone_memory(MEMORY_SAMPLE).unwrap();
        assert_eq!(parsed.observations.len(), 8);
        assert_eq!(parsed.skipped.len(), 1);
        assert!(parsed
            .observations
            .iter()
            .all(|o| o.label("zonename") == Some("0c7a5e2c-web")));
    }

    #[test]
    fn nic_stats_are_keyed_by_link() {
        let parsed = parse_zone_nics(NIC_SAMPLE).unwrap();
        assert_eq!(parsed.observations.len(), 16);
        let net0: &[(&str, &str)] = &[("zonename", "web"), ("device", "net0")];
        let net1: &[(&str, &str)] = &[("zonename", "db"), ("device", "net1")];
        let get = |metric, labels: &[(&str, &str)]| {
            find(&parsed.observations, metric, labels).unwrap().value
        };
        assert_eq!(get("smartos_network_receive_packets_total", net0), 1000.0);
        assert_eq!(get("smartos_network_transmit_bytes_total", net0), 2000.0);
        assert_eq!(get("smartos_network_receive_bytes_total", net0), 5000.0);
        assert_eq!(get("smartos_network_transmit_errs_total", net0), 2.0);
        assert_eq!(get("smartos_network_link_state", net1), 0.0);
        assert_eq!(get("smartos_network_collisions", net1), 5.0);
    }

    #[test]
    fn link_without_zonename_emits_nothing() {
        let text = NIC_SAMPLE.replace("link:0:net1:zonename\tdb\n", "");
        let parsed = parse_zone_nics(&text).unwrap();
        assert_eq!(parsed.observations.len(), 8);
        assert!(parsed.observations.iter().all(|o| o.label("device") == Some("net0")));
    }

    #[test]
    fn empty_kstat_output_is_no_data() {
        let parsed = parse_zone_cpu("").unwrap();
        assert!(parsed.observations.is_empty());
    }

    #[test]
    fn all_entities_broken_is_an_error() {
        let err = parse_zone_cpu("caps:0:cpucaps_zone_1:usage\t1\n").unwrap_err();
        assert!(matches!(err, ParseError::NoValidRows { rows: 1, .. }));
    }
}
