//! The NOTIFY-send event and its cancellation protocol (§4.5 NOTIFY-send
//! event, §4.7 NOTIFY cancellation protocol).
//!
//! Grounded on `original_source/zones.c: zones_notify_send` for the
//! retry/reschedule loop, and on the debounced-task idiom in
//! `zone/mod.rs`'s `mark_dirty` (spawn a task, hold an [`AbortOnDrop`]
//! handle, race-check on wake) for how a cancellable recurring timer is
//! expressed as a plain `tokio::spawn`+`sleep` loop instead of a scheduler
//! object.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::metrics::MetricsCollection;
use crate::util::AbortOnDrop;
use crate::xfr::{XfrEngine, XfrRequest, XfrRequestKind};
use crate::zone::ZoneRecord;

static NEXT_NOTIFY_ID: AtomicU64 = AtomicU64::new(1);

//----------- NotifyEvent --------------------------------------------------------

/// A single pending NOTIFY delivery (§3 `notify_pending`).
#[derive(Debug)]
pub struct NotifyEvent {
    /// Opaque id used to find this event again in `notify_pending` (§4.7
    /// step 3), since the source's intrusive list node has no Rust
    /// equivalent (§9 design note "Replacing inline intrusive lists").
    pub id: u64,
    pub target: SocketAddr,
    retries_left: i32,
    timeout: Duration,
}

impl NotifyEvent {
    fn new(target: SocketAddr, retries: u8, timeout: Duration) -> Self {
        Self { id: NEXT_NOTIFY_ID.fetch_add(1, Ordering::Relaxed), target, retries_left: retries as i32, timeout }
    }
}

/// Schedule a NOTIFY for `zone` to be sent to `target`, firing for the
/// first time after `30 + uniform[0,30)` seconds (§5 Timeouts), and
/// returns the handle the caller stores as `notify_pending`'s timer field.
///
/// The returned [`AbortOnDrop`] aborts the background task when dropped,
/// but §4.7's protocol must still be followed by callers that want to
/// observe whether the abort raced with a final retry.
pub fn schedule_notify(
    zone: Arc<ZoneRecord>,
    target: SocketAddr,
    retries: u8,
    timeout: Duration,
    engine: Arc<dyn XfrEngine>,
    metrics: Arc<MetricsCollection>,
) -> (u64, AbortOnDrop) {
    let event = NotifyEvent::new(target, retries, timeout);
    let id = event.id;
    {
        let mut state = zone.lock();
        state.notify_pending.push(event);
    }

    let initial_delay = Duration::from_secs(30) + Duration::from_secs(rand::rng().random_range(0..30));
    let handle = tokio::spawn(async move {
        tokio::time::sleep(initial_delay).await;
        loop {
            let should_continue = {
                let mut state = zone.lock();
                let Some(event) = state.notify_pending.iter_mut().find(|e| e.id == id) else {
                    // Already cancelled out from under us.
                    return;
                };
                event.retries_left -= 1;
                if event.retries_left < 0 {
                    tracing::info!(zone = %zone.name, "NOTIFY retries exhausted for {}", event.target);
                    state.notify_pending.retain(|e| e.id != id);
                    false
                } else {
                    true
                }
            };

            if !should_continue {
                metrics.record_notify_outcome(false);
                return;
            }

            let request = XfrRequest {
                addr: target,
                kind: XfrRequestKind::NotifyOut,
                zone: zone.name.clone(),
                data: None,
            };
            let sent = engine.request(request).await.is_ok();
            metrics.record_notify_outcome(sent);

            tokio::time::sleep(timeout).await;
        }
    });

    (id, AbortOnDrop::from(handle))
}

/// `cancel_notify(zd, ev)` (§4.7). The caller must already hold the
/// zone's lock and pass the event id plus the timer handle taken out of
/// `notify_pending` / the timer field.
///
/// Protocol: release the lock before blocking on cancellation (so the
/// handler, which also needs the lock to check `retries_left`, cannot
/// deadlock against us), then re-acquire it to remove any trace of the
/// event that the handler did not already clean up itself.
pub async fn cancel_notify(zone: &Arc<ZoneRecord>, id: u64, timer: AbortOnDrop) {
    timer.cancel().await;

    let mut state = zone.lock();
    state.notify_pending.retain(|e| e.id != id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xfr::NullXfrEngine;
    use bytes::Bytes;
    use domain::base::Name;

    fn name(s: &str) -> Name<Bytes> {
        Name::from_str_relaxed(s).unwrap().octets_into()
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_removes_pending_event() {
        let zone = Arc::new(ZoneRecord::new_stub(name("example.")));
        let engine: Arc<dyn XfrEngine> = Arc::new(NullXfrEngine);
        let metrics = Arc::new(MetricsCollection::new());
        let target: SocketAddr = "192.0.2.1:53".parse().unwrap();

        let (id, timer) = schedule_notify(zone.clone(), target, 5, Duration::from_secs(1), engine, metrics);
        assert_eq!(zone.lock().notify_pending.len(), 1);

        cancel_notify(&zone, id, timer).await;
        assert!(zone.lock().notify_pending.is_empty());
    }
}
