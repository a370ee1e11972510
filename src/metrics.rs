use crate::observation::{MetricDesc, MetricKind, Observation};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("metric {metric} is not declared")]
    Unknown { metric: String },
    #[error("metric {metric} is declared as {declared:?} but observed as {observed:?}")]
    KindMismatch {
        metric: String,
        declared: MetricKind,
        observed: MetricKind,
    },
    #[error("metric {metric} expects labels {expected:?}, got {got:?}")]
    Labels {
        metric: String,
        expected: &'static [&'static str],
        got: Vec<String>,
    },
    #[error("counter {metric} cannot move by {value}")]
    NegativeCounter { metric: String, value: f64 },
}

#[derive(Clone)]
enum Family {
    Gauge(GaugeVec),
    Counter(CounterVec),
}

struct Declared {
    desc: MetricDesc,
    family: Family,
}

struct Update<'a> {
    family: &'a Family,
    values: Vec<&'a str>,
    value: f64,
}

pub struct MetricRegistry {
    registry: Registry,
    families: HashMap<&'static str, Declared>,
    write_lock: Mutex<()>,
    started: Instant,
    scrapes_total: Counter,
    collect_errors_total: CounterVec,
    collector_success: GaugeVec,
    collector_duration_seconds: GaugeVec,
    last_collect_timestamp_seconds: Gauge,
    uptime_seconds: Gauge,
}

impl MetricRegistry {
    pub fn new<'a>(
        descs: impl IntoIterator<Item = &'a MetricDesc>,
    ) -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let mut families = HashMap::new();
        for desc in descs {
            let family = match desc.kind {
                MetricKind::Gauge => {
                    let vec = GaugeVec::new(opts!(desc.name, desc.help), desc.labels)?;
                    register(&registry, &vec)?;
                    Family::Gauge(vec)
                }
                MetricKind::Counter => {
                    let vec = CounterVec::new(opts!(desc.name, desc.help), desc.labels)?;
                    register(&registry, &vec)?;
                    Family::Counter(vec)
                }
            };
            families.insert(desc.name, Declared { desc: *desc, family });
        }

        let scrapes_total = Counter::with_opts(opts!(
            "smartos_exporter_scrapes_total",
            "Number of /metrics scrapes"
        ))?;
        let collect_errors_total = CounterVec::new(
            opts!(
                "smartos_exporter_collect_errors_total",
                "Collector failures total by collector"
            ),
            &["collector"],
        )?;
        let collector_success = GaugeVec::new(
            opts!(
                "smartos_exporter_collector_success",
                "Whether the last run of a collector succeeded"
            ),
            &["collector"],
        )?;
        let collector_duration_seconds = GaugeVec::new(
            opts!(
                "smartos_exporter_collector_duration_seconds",
                "Duration of the last run of a collector"
            ),
            &["collector"],
        )?;
        let last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "smartos_exporter_last_collect_timestamp_seconds",
            "Unix timestamp of the last collection"
        ))?;
        let uptime_seconds = Gauge::with_opts(opts!(
            "smartos_exporter_uptime_seconds",
            "Exporter uptime in seconds"
        ))?;

        register(&registry, &scrapes_total)?;
        register(&registry, &collect_errors_total)?;
        register(&registry, &collector_success)?;
        register(&registry, &collector_duration_seconds)?;
        register(&registry, &last_collect_timestamp_seconds)?;
        register(&registry, &uptime_seconds)?;

        Ok(Arc::new(Self {
            registry,
            families,
            write_lock: Mutex::new(()),
            started: Instant::now(),
            scrapes_total,
            collect_errors_total,
            collector_success,
            collector_duration_seconds,
            last_collect_timestamp_seconds,
            uptime_seconds,
        }))
    }

    /// Applies one source's batch. Every observation is checked before any
    /// cell is touched; a single bad one rejects the batch.
    pub fn apply(&self, observations: &[Observation]) -> Result<usize, RegistryError> {
        let updates = observations
            .iter()
            .map(|obs| self.resolve(obs))
            .collect::<Result<Vec<_>, _>>()?;

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        for update in &updates {
            match update.family {
                Family::Gauge(vec) => vec.with_label_values(&update.values).set(update.value),
                Family::Counter(vec) => vec.with_label_values(&update.values).inc_by(update.value),
            }
        }
        Ok(updates.len())
    }

    fn resolve<'a>(&'a self, obs: &'a Observation) -> Result<Update<'a>, RegistryError> {
        let declared = self
            .families
            .get(obs.metric)
            .ok_or_else(|| RegistryError::Unknown {
                metric: obs.metric.to_string(),
            })?;
        let desc = &declared.desc;

        if desc.kind != obs.kind {
            return Err(RegistryError::KindMismatch {
                metric: obs.metric.to_string(),
                declared: desc.kind,
                observed: obs.kind,
            });
        }

        let values: Option<Vec<&str>> = desc.labels.iter().map(|key| obs.label(key)).collect();
        let values = match values {
            Some(values) if obs.labels.len() == desc.labels.len() => values,
            _ => {
                return Err(RegistryError::Labels {
                    metric: obs.metric.to_string(),
                    expected: desc.labels,
                    got: obs.labels.keys().map(|k| k.to_string()).collect(),
                })
            }
        };

        if desc.kind == MetricKind::Counter && (obs.value < 0.0 || obs.value.is_nan()) {
            return Err(RegistryError::NegativeCounter {
                metric: obs.metric.to_string(),
                value: obs.value,
            });
        }

        Ok(Update {
            family: &declared.family,
            values,
            value: obs.value,
        })
    }

    pub fn inc_scrape_count(&self) {
        self.scrapes_total.inc();
    }

    pub fn record_collector(&self, collector: &str, ok: bool, duration: Duration) {
        self.collector_success
            .with_label_values(&[collector])
            .set(if ok { 1.0 } else { 0.0 });
        self.collector_duration_seconds
            .with_label_values(&[collector])
            .set(duration.as_secs_f64());
        if !ok {
            self.collect_errors_total
                .with_label_values(&[collector])
                .inc();
        }
    }

    pub fn set_last_collect(&self, unix_seconds: i64) {
        self.last_collect_timestamp_seconds.set(unix_seconds as f64);
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.uptime_seconds
            .set(self.started.elapsed().as_secs_f64().floor());
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    #[cfg(test)]
    pub fn sample(&self, metric: &str, pairs: &[(&str, &str)]) -> Option<f64> {
        use prometheus::proto::MetricType;

        self.registry
            .gather()
            .into_iter()
            .filter(|mf| mf.get_name() == metric)
            .find_map(|mf| {
                let kind = mf.get_field_type();
                mf.get_metric()
                    .iter()
                    .find(|m| {
                        let labels = m.get_label();
                        labels.len() == pairs.len()
                            && pairs.iter().all(|(k, v)| {
                                labels
                                    .iter()
                                    .any(|l| l.get_name() == *k && l.get_value() == *v)
                            })
                    })
                    .map(|m| match kind {
                        MetricType::COUNTER => m.get_counter().get_value(),
                        _ => m.get_gauge().get_value(),
                    })
            })
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
