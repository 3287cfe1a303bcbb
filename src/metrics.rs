//! Maintaining and outputting metrics.
//!
//! Relevant sources for selecting metrics, metric names, and labels:
//! - https://prometheus.io/docs/practices/naming/
//! - https://prometheus.io/docs/instrumenting/writing_exporters/#labels
//! - https://prometheus.io/docs/practices/instrumentation/

use core::sync::atomic::AtomicU64;
use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use domain::base::Name;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::info::Info;
use prometheus_client::registry::{Metric, Registry, Unit};

use crate::manager::Manager;

/// The application prefix to use in the names of Prometheus metrics.
const PROMETHEUS_PREFIX: &str = "zonecore";

//------------ MetricsCollection ---------------------------------------------

#[derive(Debug)]
pub struct MetricsCollection {
    /// The metrics registry for the whole core.
    pub registry: Registry,

    /// Time taken to assemble the last metrics snapshot.
    assemble_time_metric: Gauge<u64, AtomicU64>,

    state_metrics: StateMetrics,
}

impl MetricsCollection {
    pub fn new() -> Self {
        let mut col = Self {
            registry: Registry::with_prefix(PROMETHEUS_PREFIX),
            assemble_time_metric: Default::default(),
            state_metrics: Default::default(),
        };

        let version = Info::new(vec![("version", clap::crate_version!())]);
        col.registry.register("build", "zone management core build information", version);

        col.registry.register_with_unit(
            "metrics_assemble_duration",
            "The time taken in milliseconds to assemble the last metric snapshot",
            Unit::Other("milliseconds".into()),
            col.assemble_time_metric.clone(),
        );

        col.state_metrics.register_metrics(&mut col.registry);

        col
    }

    /// Refresh the state-derived gauges from the live [`Manager`] and render
    /// the whole registry to the Prometheus text exposition format.
    pub fn assemble(&self, manager: &Manager) -> Result<String, fmt::Error> {
        let start_time = Instant::now();
        let metrics = &self.state_metrics;

        metrics.zone_refresh_failures.clear();

        let db = manager.database().snapshot();
        metrics.zones_configured.set(db.len() as i64);

        let mut stubs = 0i64;
        for record in db.records() {
            if record.is_stub() {
                stubs += 1;
            }
        }
        metrics.zones_stubbed.set(stubs);
        metrics.zones_loaded.set(db.len() as i64 - stubs);

        let assemble_ms = start_time.elapsed().as_millis() as u64;
        self.assemble_time_metric.set(assemble_ms);

        String::try_from(self)
    }

    pub fn register<N: Into<String>, H: Into<String>>(&mut self, name: N, help: H, metric: impl Metric) {
        self.registry.register(name, help, metric)
    }

    pub fn register_with_unit<N: Into<String>, H: Into<String>>(
        &mut self,
        name: N,
        help: H,
        unit: Unit,
        metric: impl Metric,
    ) {
        self.registry.register_with_unit(name, help, unit, metric)
    }

    /// Record a successful REFRESH/RETRY cycle outcome for a zone (S2/S3).
    pub fn record_refresh_outcome(&self, zone: &Name<Bytes>, outcome: RefreshOutcome) {
        if outcome == RefreshOutcome::Failed {
            self.state_metrics
                .zone_refresh_failures
                .get_or_create(&ZoneLabel { zone: StoredName(zone.clone()) })
                .inc();
        }
    }

    /// Record a NOTIFY delivery outcome (S6).
    pub fn record_notify_outcome(&self, sent: bool) {
        if sent {
            self.state_metrics.notifies_sent.inc();
        } else {
            self.state_metrics.notifies_exhausted.inc();
        }
    }

    /// Record a journal write outcome (S3/S4).
    pub fn record_journal_write(&self, recovered_from_out_of_space: bool) {
        self.state_metrics.journal_writes.inc();
        if recovered_from_out_of_space {
            self.state_metrics.journal_out_of_space_recoveries.inc();
        }
    }
}

impl TryFrom<&MetricsCollection> for String {
    type Error = fmt::Error;

    fn try_from(metrics: &MetricsCollection) -> Result<Self, Self::Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &metrics.registry)?;
        Ok(buffer)
    }
}

impl Default for MetricsCollection {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    NoChange,
    TransferApplied,
    Failed,
}

//------------ StoredName ----------------------------------------------------

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct StoredName(Name<Bytes>);

impl EncodeLabelValue for StoredName {
    fn encode(&self, encoder: &mut prometheus_client::encoding::LabelValueEncoder) -> Result<(), std::fmt::Error> {
        encoder.write_str(&self.0.to_string())
    }
}

#[derive(Debug, Clone, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ZoneLabel {
    zone: StoredName,
}

//------------ StateMetrics --------------------------------------------------

#[derive(Debug, Default)]
struct StateMetrics {
    zones_configured: Gauge,
    zones_loaded: Gauge,
    zones_stubbed: Gauge,
    zone_refresh_failures: Family<ZoneLabel, Gauge>,
    notifies_sent: Counter,
    notifies_exhausted: Counter,
    journal_writes: Counter,
    journal_out_of_space_recoveries: Counter,
}

impl StateMetrics {
    fn register_metrics(&self, reg: &mut Registry) {
        reg.register("zones_configured", "Number of zones known to the core", self.zones_configured.clone());
        reg.register("zones_loaded", "Number of zones with contents loaded", self.zones_loaded.clone());
        reg.register("zones_stubbed", "Number of zones awaiting bootstrap AXFR", self.zones_stubbed.clone());
        reg.register("zone_refresh_failures", "REFRESH/RETRY cycles that did not obtain a valid SOA response", self.zone_refresh_failures.clone());
        reg.register("notifies_sent", "NOTIFY messages successfully delivered", self.notifies_sent.clone());
        reg.register("notifies_exhausted", "NOTIFY events that exhausted their retry budget", self.notifies_exhausted.clone());
        reg.register("journal_writes", "Changeset entries written to zone journals", self.journal_writes.clone());
        reg.register("journal_out_of_space_recoveries", "Journal writes that needed an out-of-space recovery cycle", self.journal_out_of_space_recoveries.clone());
    }
}
