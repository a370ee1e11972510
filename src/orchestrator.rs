use crate::collectors::Source;
use crate::metrics::{MetricRegistry, RegistryError};
use crate::parse::{FieldError, ParseError};
use crate::runner::{CommandRunner, ExecError, RawSample};
use crate::state::{now_unix, unix_seconds, State};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("rejected by registry: {0}")]
    Registry(#[from] RegistryError),
    #[error("collector task aborted: {0}")]
    Join(String),
}

struct Collected {
    name: &'static str,
    elapsed: Duration,
    outcome: Result<Batch, SourceError>,
}

struct Batch {
    captured_at_unix: i64,
    applied: usize,
    skipped: Vec<FieldError>,
}

pub struct Orchestrator<R: CommandRunner> {
    runner: Arc<R>,
    sources: Vec<Arc<dyn Source>>,
    registry: Arc<MetricRegistry>,
    state: Arc<RwLock<State>>,
    timeout: Duration,
    cycle: Mutex<()>,
}

impl<R: CommandRunner> Orchestrator<R> {
    pub fn new(
        runner: Arc<R>,
        sources: Vec<Arc<dyn Source>>,
        state: Arc<RwLock<State>>,
        timeout: Duration,
    ) -> Result<Self, prometheus::Error> {
        let registry = MetricRegistry::new(sources.iter().flat_map(|s| s.metrics()))?;
        Ok(Self {
            runner,
            sources,
            registry,
            state,
            timeout,
            cycle: Mutex::new(()),
        })
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn state(&self) -> &Arc<RwLock<State>> {
        &self.state
    }

    pub async fn scrape(&self) -> Result<Vec<u8>, prometheus::Error> {
        self.registry.inc_scrape_count();
        self.collect().await;
        self.registry.encode_metrics()
    }

    pub async fn collect(&self) {
        let _cycle = self.cycle.lock().await;

        let mut tasks = JoinSet::new();
        for source in &self.sources {
            let source = Arc::clone(source);
            let runner = Arc::clone(&self.runner);
            let registry = Arc::clone(&self.registry);
            let timeout = self.timeout;
            tasks.spawn(async move {
                let started = Instant::now();
                let outcome = collect_one(runner.as_ref(), source.as_ref(), &registry, timeout).await;
                Collected {
                    name: source.name(),
                    elapsed: started.elapsed(),
                    outcome,
                }
            });
        }

        let mut results = Vec::with_capacity(self.sources.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(collected) => results.push(collected),
                Err(err) => warn!(error = %err, "collector task failed to complete"),
            }
        }
        // a panicked task never reports its own name
        for source in &self.sources {
            if !results.iter().any(|c| c.name == source.name()) {
                results.push(Collected {
                    name: source.name(),
                    elapsed: Duration::ZERO,
                    outcome: Err(SourceError::Join("task panicked".to_string())),
                });
            }
        }

        let now = now_unix();
        let mut state = self.state.write().await;
        for collected in results {
            let duration_ms = collected.elapsed.as_millis() as u64;
            match collected.outcome {
                Ok(batch) => {
                    if !batch.skipped.is_empty() {
                        debug!(
                            collector = collected.name,
                            skipped = batch.skipped.len(),
                            first = %batch.skipped[0],
                            "rows skipped"
                        );
                    }
                    self.registry
                        .record_collector(collected.name, true, collected.elapsed);
                    state.record_success(
                        collected.name,
                        batch.captured_at_unix,
                        duration_ms,
                        batch.applied,
                        batch.skipped.len(),
                    );
                }
                Err(err) => {
                    warn!(collector = collected.name, error = %err, "collector failed");
                    self.registry
                        .record_collector(collected.name, false, collected.elapsed);
                    state.record_failure(collected.name, err.to_string(), duration_ms);
                }
            }
        }
        state.last_collect_timestamp_seconds = now;
        self.registry.set_last_collect(now);
    }
}

async fn collect_one<R: CommandRunner>(
    runner: &R,
    source: &dyn Source,
    registry: &MetricRegistry,
    timeout: Duration,
) -> Result<Batch, SourceError> {
    let command = source.command();
    let sample = RawSample::capture(source.name(), runner.run(&command, timeout).await);
    let captured_at_unix = unix_seconds(sample.captured_at);
    debug!(collector = sample.source, command = %command, "command finished");
    let text = sample.into_text()?;

    let parsed = source.parse(&text)?;
    let applied = registry.apply(&parsed.observations)?;
    source.commit();
    Ok(Batch {
        captured_at_unix,
        applied,
        skipped: parsed.skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{df::DfSource, iostat::DiskErrorsSource, sources_for, zpool::ZpoolSource};
    use crate::config::Config;
    use crate::context::ZoneContext;
    use crate::runner::fake::{Canned, FakeRunner};

    const DF: &str = "\
Filesystem Size Used Avail Use% Mounted on
nvme0 100G 40G 60G 40% /data
";
    const ZPOOL: &str = "\
NAME SIZE ALLOC FREE EXPANDSZ FRAG CAP DEDUP HEALTH ALTROOT
zones 1000 400 600 - 8 12 - ONLINE -
";

    fn orchestrator(runner: FakeRunner, sources: Vec<Arc<dyn Source>>) -> Orchestrator<FakeRunner> {
        let state = Arc::new(RwLock::new(State::new(ZoneContext::Global, 0)));
        Orchestrator::new(Arc::new(runner), sources, state, Duration::from_secs(1))
            .expect("orchestrator")
    }

    #[tokio::test]
    async fn failing_source_leaves_others_updated() {
        let runner = FakeRunner::default()
            .with("df", Canned::Stdout(DF.to_string()))
            .with("zpool", Canned::Exit(1));
        let orch = orchestrator(
            runner,
            vec![Arc::new(DfSource), Arc::new(ZpoolSource::new(vec!["zones".into()]))],
        );

        orch.collect().await;

        let reg = orch.registry();
        let data = [("device", "nvme0"), ("mountpoint", "/data")];
        assert_eq!(reg.sample("smartos_df_size_bytes", &data), Some(100.0));
        assert_eq!(reg.sample("smartos_df_use_percents", &data), Some(40.0));
        assert_eq!(reg.sample("smartos_zpool_size_bytes", &[("pool", "zones")]), None);
        assert_eq!(
            reg.sample("smartos_exporter_collect_errors_total", &[("collector", "zpool")]),
            Some(1.0)
        );
        assert_eq!(
            reg.sample("smartos_exporter_collector_success", &[("collector", "df")]),
            Some(1.0)
        );

        let state = orch.state().read().await;
        assert!(state.collectors["df"].ok);
        assert_eq!(state.collectors["df"].observations, 4);
        assert!(!state.collectors["zpool"].ok);
        assert!(state.last_collect_timestamp_seconds > 0);
    }

    #[tokio::test]
    async fn stale_values_survive_a_failed_cycle() {
        let runner = FakeRunner::default().with("zpool", Canned::Stdout(ZPOOL.to_string()));
        let orch = orchestrator(runner, vec![Arc::new(ZpoolSource::new(vec!["zones".into()]))]);
        let pool = [("pool", "zones")];

        orch.collect().await;
        assert_eq!(orch.registry().sample("smartos_zpool_alloc_bytes", &pool), Some(400.0));

        orch.runner.set("zpool", Canned::Stdout("NAME SIZE\nzones broken\n".to_string()));
        orch.collect().await;
        assert_eq!(orch.registry().sample("smartos_zpool_alloc_bytes", &pool), Some(400.0));
        assert_eq!(orch.registry().sample("smartos_zpool_faults", &pool), Some(0.0));

        let state = orch.state().read().await;
        let status = &state.collectors["zpool"];
        assert!(!status.ok);
        assert!(status.last_success_unix.is_some());
        assert!(status.last_error.as_deref().unwrap_or_default().contains("none of 1 rows"));
    }

    #[tokio::test]
    async fn disk_error_counter_tracks_device_totals_across_cycles() {
        let iostat = |sd0: &str| {
            Canned::Stdout(format!("  ---- errors ---\n s/w h/w trn tot device\n{sd0} sd0\n"))
        };
        let runner = FakeRunner::default().with("iostat", iostat("   2   0   0   2"));
        let orch = orchestrator(runner, vec![Arc::new(DiskErrorsSource::default())]);
        let soft = [("device", "sd0"), ("error_type", "soft")];

        orch.collect().await;
        orch.collect().await;
        assert_eq!(orch.registry().sample("smartos_disk_errs_total", &soft), Some(2.0));

        orch.runner.set("iostat", iostat("   5   0   0   5"));
        orch.collect().await;
        assert_eq!(orch.registry().sample("smartos_disk_errs_total", &soft), Some(5.0));
    }

    #[tokio::test]
    async fn scrape_returns_exposition_text() {
        let runner = FakeRunner::default().with("df", Canned::Stdout(DF.to_string()));
        let orch = orchestrator(runner, vec![Arc::new(DfSource)]);

        let text = String::from_utf8(orch.scrape().await.unwrap()).unwrap();
        assert!(text.contains(
            "smartos_df_available_bytes{device=\"nvme0\",mountpoint=\"/data\"} 60"
        ));
        assert!(text.contains("smartos_exporter_scrapes_total 1"));
        assert_eq!(orch.runner.calls(), vec!["df".to_string()]);
    }

    #[tokio::test]
    async fn global_context_runs_every_host_utility() {
        let runner = FakeRunner::default();
        let sources = sources_for(ZoneContext::Global, &Config::default());
        let orch = orchestrator(runner, sources);

        orch.collect().await;

        let mut calls = orch.runner.calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                "iostat -en",
                "kstat -p -c zone_caps -n cpucaps_zone*",
                "kstat -p -c zone_memory_cap",
                "kstat -p -m link",
                "mpstat 1 2",
                "nicstat -i aggr0 1 2",
                "uptime",
                "vmstat 1 2",
                "zpool list -p zones",
            ]
        );
        let state = orch.state().read().await;
        assert_eq!(state.collectors.len(), 9);
        assert!(state.collectors.values().all(|s| !s.ok));
    }
}
