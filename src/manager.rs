//! The composition root tying reload, timers, the dispatcher and metrics
//! together (the "nameserver" of §6 EXTERNAL INTERFACES).
//!
//! Grounded on `center.rs`'s `Center`/`State` composition: one struct owns
//! the long-lived, shared handles (database, engine, metrics) that every
//! other module borrows, constructed once at startup and handed around as
//! `Arc<Manager>`.

use std::sync::Arc;

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::CoreError;
use crate::metrics::MetricsCollection;
use crate::reload::{self, ReloadReport};
use crate::timers;
use crate::util::AbortOnDrop;
use crate::xfr::XfrEngine;
use crate::zone::database::PublishedZoneDatabase;
use crate::zoneio::ZoneIo;

//----------- Manager --------------------------------------------------------------

/// Owns the live zone database and the collaborators every operation in
/// this crate needs: the (external) xfr engine, zone IO, and metrics.
pub struct Manager {
    config: Config,
    database: Arc<PublishedZoneDatabase>,
    engine: Arc<dyn XfrEngine>,
    zoneio: Arc<dyn ZoneIo>,
    metrics: Arc<MetricsCollection>,
}

impl Manager {
    pub fn new(config: Config, engine: Arc<dyn XfrEngine>, zoneio: Arc<dyn ZoneIo>) -> Arc<Self> {
        Arc::new(Self {
            config,
            database: Arc::new(PublishedZoneDatabase::default()),
            engine,
            zoneio,
            metrics: Arc::new(MetricsCollection::new()),
        })
    }

    pub fn database(&self) -> &PublishedZoneDatabase {
        &self.database
    }

    pub fn metrics(&self) -> &Arc<MetricsCollection> {
        &self.metrics
    }

    /// Run one reload pass (§4.9): rebuild the zone database from
    /// `self.config` and publish it.
    pub async fn reload(&self) -> Result<ReloadReport, CoreError> {
        reload::reload(&self.config, &self.database, self.zoneio.as_ref(), &self.engine, &self.metrics).await
    }

    /// Build a [`Dispatcher`] bound to this manager's live collaborators.
    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(self.database.clone(), self.engine.clone(), self.metrics.clone())
    }

    /// Arm the periodic zonefile-sync timer for every zone currently in the
    /// database (§4.5 Zonefile-sync event: "rearmed unconditionally on
    /// every fire").
    pub fn spawn_sync_timers(self: &Arc<Self>) {
        for record in self.database.snapshot().records() {
            self.arm_sync_timer(record.clone());
        }
    }

    fn arm_sync_timer(self: &Arc<Self>, zone: Arc<crate::zone::ZoneRecord>) {
        let delay = zone.lock().config.dbsync_timeout;
        let manager = self.clone();
        let handle = tokio::spawn({
            let zone = zone.clone();
            async move {
                tokio::time::sleep(delay).await;
                manager.fire_sync(zone).await;
            }
        });
        zone.lock().sync_timer = Some(AbortOnDrop::from(handle));
    }

    async fn fire_sync(self: Arc<Self>, zone: Arc<crate::zone::ZoneRecord>) {
        let zoneio = self.zoneio.clone();
        let metrics = self.metrics.clone();
        let zone_for_blocking = zone.clone();
        let result = tokio::task::spawn_blocking(move || crate::sync::zonefile_sync(&zone_for_blocking, zoneio.as_ref(), &metrics)).await;

        match result {
            Ok(Ok(_outcome)) => {}
            Ok(Err(err)) => tracing::warn!(zone = %zone.name, %err, "zonefile sync failed"),
            Err(join_err) => tracing::warn!(zone = %zone.name, %join_err, "zonefile sync task panicked"),
        }

        self.arm_sync_timer(zone);
    }

    /// Cancel every zone's REFRESH/RETRY and EXPIRE timers, e.g. before
    /// shutting down (§4.4 Destruction).
    pub async fn shutdown(&self) {
        for record in self.database.snapshot().records() {
            timers::cancel_all(record).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xfr::NullXfrEngine;
    use crate::zoneio::FileZoneIo;
    use std::collections::HashMap;

    fn config() -> Config {
        Config {
            journal_dir: "j".into(),
            compiled_zone_dir: "c".into(),
            zone_file_dir: "z".into(),
            zones: HashMap::new(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn reload_with_no_zones_publishes_empty_database() {
        let manager = Manager::new(config(), Arc::new(NullXfrEngine), Arc::new(FileZoneIo));
        let report = manager.reload().await.unwrap();
        assert_eq!(report.configured, 0);
        assert_eq!(manager.database().snapshot().len(), 0);
    }
}
