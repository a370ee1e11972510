pub mod df;
pub mod iostat;
pub mod kstat;
pub mod mpstat;
pub mod nicstat;
pub mod uptime;
pub mod vmstat;
pub mod zpool;

use crate::config::Config;
use crate::context::ZoneContext;
use crate::observation::MetricDesc;
use crate::parse::{ParseError, Parsed};
use crate::runner::CommandSpec;
use std::sync::Arc;

pub trait Source: Send + Sync {
    fn name(&self) -> &'static str;
    fn command(&self) -> CommandSpec;
    fn metrics(&self) -> &'static [MetricDesc];
    fn parse(&self, text: &str) -> Result<Parsed, ParseError>;

    // called once the registry accepted the batch from the last parse
    fn commit(&self) {}
}

pub fn sources_for(context: ZoneContext, cfg: &Config) -> Vec<Arc<dyn Source>> {
    match context {
        ZoneContext::Guest => vec![Arc::new(df::DfSource)],
        ZoneContext::Global => vec![
            Arc::new(iostat::DiskErrorsSource::default()),
            Arc::new(kstat::ZoneCpuSource),
            Arc::new(kstat::ZoneMemorySource),
            Arc::new(kstat::ZoneNicSource),
            Arc::new(mpstat::CpuUsageSource),
            Arc::new(nicstat::NicRateSource::new(cfg.nic_interface.clone())),
            Arc::new(vmstat::FreeMemorySource),
            Arc::new(uptime::LoadAverageSource),
            Arc::new(zpool::ZpoolSource::new(cfg.zpools.clone())),
        ],
    }
}
