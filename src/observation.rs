use std::collections::BTreeMap;

pub type Labels = BTreeMap<&'static str, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Gauge,
    Counter,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricDesc {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
    pub kind: MetricKind,
}

impl MetricDesc {
    pub const fn gauge(
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            help,
            labels,
            kind: MetricKind::Gauge,
        }
    }

    pub const fn counter(
        name: &'static str,
        help: &'static str,
        labels: &'static [&'static str],
    ) -> Self {
        Self {
            name,
            help,
            labels,
            kind: MetricKind::Counter,
        }
    }

    pub fn observe(&self, labels: Labels, value: f64) -> Observation {
        Observation {
            metric: self.name,
            labels,
            value,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub metric: &'static str,
    pub labels: Labels,
    pub value: f64,
    pub kind: MetricKind,
}

impl Observation {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

pub fn labels<const N: usize>(pairs: [(&'static str, &str); N]) -> Labels {
    pairs
        .into_iter()
        .map(|(key, value)| (key, value.to_string()))
        .collect()
}

#[cfg(test)]
pub(crate) fn find<'a>(
    observations: &'a [Observation],
    metric: &str,
    pairs: &[(&str, &str)],
) -> Option<&'a Observation> {
    observations.iter().find(|o| {
        o.metric == metric
            && o.labels.len() == pairs.len()
            && pairs.iter().all(|(k, v)| o.label(k) == Some(*v))
    })
}
