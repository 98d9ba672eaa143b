//! Tracking scheduler — the periodic tasks behind live pickup tracking.
//!
//! * One **tracking loop** per en-route donation. Every tick it asks the
//!   [`LocationSource`] for the acceptor's position and applies
//!   `UpdateLocation` through the store's atomic update. It ends on its own
//!   once the donation is gone or no longer en route.
//! * Any number of **pending-refresh loops**, one per acceptor-side observer,
//!   recomputing the nearby-pending view on a coarser cadence and publishing
//!   it over a `watch` channel.
//!
//! Both kinds are cancelled through [`CancellationToken`]s that are children
//! of the scheduler's root token, so [`TrackingScheduler::shutdown`] stops
//! everything. The token is checked at the top of each tick and again just
//! before a location is written.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use chrono::Utc;
use foodlink_lifecycle::lifecycle::apply;
use foodlink_lifecycle::projections::{nearby_pending, NearbyDonation};
use foodlink_lifecycle::{
    DonationError, DonationEvent, DonationId, DonationRecord, DonationStatus, GeoPoint,
};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::Stream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::location::LocationSource;
use crate::store::DonationStore;

/// Buffered record updates per subscriber before the slowest one lags.
const UPDATE_CHANNEL_CAPACITY: usize = 256;
const DONATION_WATCH_CAPACITY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Continue,
    Stop,
}

struct LoopEntry {
    generation: u64,
    token: CancellationToken,
}

pub struct TrackingScheduler {
    store: Arc<dyn DonationStore>,
    locations: Arc<dyn LocationSource>,
    tracking_interval: Duration,
    refresh_interval: Duration,
    loops: Mutex<HashMap<DonationId, LoopEntry>>,
    next_generation: Mutex<u64>,
    updates: broadcast::Sender<DonationRecord>,
    root: CancellationToken,
}

/// Handle to a running pending-refresh loop. Dropping it stops the loop.
pub struct PendingWatch {
    pub updates: watch::Receiver<Vec<NearbyDonation>>,
    token: CancellationToken,
    _guard: DropGuard,
}

impl PendingWatch {
    fn new(updates: watch::Receiver<Vec<NearbyDonation>>, token: CancellationToken) -> Self {
        Self {
            updates,
            _guard: token.clone().drop_guard(),
            token,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Every snapshot published from now on. The loop stops with the stream.
    pub fn into_stream(self) -> PendingStream {
        let PendingWatch {
            updates, _guard, ..
        } = self;
        PendingStream {
            changes: WatchStream::from_changes(updates),
            _guard,
        }
    }
}

/// Stream form of [`PendingWatch`]; owns the loop's cancellation guard.
pub struct PendingStream {
    changes: WatchStream<Vec<NearbyDonation>>,
    _guard: DropGuard,
}

impl Stream for PendingStream {
    type Item = Vec<NearbyDonation>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.changes).poll_next(cx)
    }
}

impl TrackingScheduler {
    pub fn new(
        store: Arc<dyn DonationStore>,
        locations: Arc<dyn LocationSource>,
        tracking_interval: Duration,
        refresh_interval: Duration,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            store,
            locations,
            tracking_interval,
            refresh_interval,
            loops: Mutex::new(HashMap::new()),
            next_generation: Mutex::new(0),
            updates,
            root: CancellationToken::new(),
        }
    }

    /// Receive every record the scheduler or the service commits.
    pub fn subscribe(&self) -> broadcast::Receiver<DonationRecord> {
        self.updates.subscribe()
    }

    /// Fan a committed record out to subscribers. Having none is fine.
    pub fn publish(&self, record: &DonationRecord) {
        let _ = self.updates.send(record.clone());
    }

    /// Forward committed changes of one donation until the receiver is
    /// dropped or the scheduler shuts down.
    pub fn watch_donation(&self, id: DonationId) -> mpsc::Receiver<DonationRecord> {
        let (tx, rx) = mpsc::channel(DONATION_WATCH_CAPACITY);
        let mut updates = self.subscribe();
        let token = self.root.child_token();
        tokio::spawn(async move {
            loop {
                let record = tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tx.closed() => break,
                    received = updates.recv() => match received {
                        Ok(record) => record,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Watcher of donation {id} lagged by {skipped} updates");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                };
                if record.id == id && tx.send(record).await.is_err() {
                    break;
                }
            }
        });
        rx
    }

    pub fn is_tracking(&self, id: DonationId) -> bool {
        self.loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .is_some_and(|entry| !entry.token.is_cancelled())
    }

    /// Start the tracking loop for `id`. Returns `false` if one is already running.
    pub fn start_tracking(self: &Arc<Self>, id: DonationId) -> bool {
        if self.root.is_cancelled() {
            return false;
        }
        let generation = {
            let mut next = self
                .next_generation
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *next += 1;
            *next
        };

        let token = {
            let mut loops = self.loops.lock().unwrap_or_else(PoisonError::into_inner);
            if loops.get(&id).is_some_and(|e| !e.token.is_cancelled()) {
                return false;
            }
            let token = self.root.child_token();
            loops.insert(
                id,
                LoopEntry {
                    generation,
                    token: token.clone(),
                },
            );
            token
        };

        info!("Tracking started for donation {id}");
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.run_tracking(id, token).await;
            scheduler.forget(id, generation);
        });
        true
    }

    /// Stop the tracking loop for `id`. Idempotent; returns whether a loop was running.
    pub fn stop_tracking(&self, id: DonationId) -> bool {
        let entry = self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match entry {
            Some(entry) if !entry.token.is_cancelled() => {
                entry.token.cancel();
                info!("Tracking stopped for donation {id}");
                true
            }
            _ => false,
        }
    }

    /// Start a pending-refresh loop for an acceptor observing from `observer`.
    ///
    /// The first snapshot is computed immediately; later ones only when the
    /// set of donations, their revisions or their expiry flags change.
    pub fn start_pending_refresh(
        self: &Arc<Self>,
        observer: GeoPoint,
        radius_km: f64,
    ) -> Result<PendingWatch> {
        // Reject bad input up front rather than inside the loop.
        nearby_pending(&[], &observer, radius_km, Utc::now())?;

        let (tx, rx) = watch::channel(Vec::new());
        let token = self.root.child_token();
        let loop_token = token.clone();
        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler
                .run_pending_refresh(observer, radius_km, tx, loop_token)
                .await;
        });

        Ok(PendingWatch::new(rx, token))
    }

    /// Cancel every loop. New loops are refused afterwards.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!("Tracking scheduler shut down");
    }

    fn forget(&self, id: DonationId, generation: u64) {
        let mut loops = self.loops.lock().unwrap_or_else(PoisonError::into_inner);
        if loops.get(&id).is_some_and(|e| e.generation == generation) {
            loops.remove(&id);
        }
    }

    async fn run_tracking(&self, id: DonationId, token: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.tracking_interval, self.tracking_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.track_once(id, &token).await {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Stop) => break,
                Err(e) => warn!("Tracking tick for donation {id} skipped: {e}"),
            }
        }
        token.cancel();
        debug!("Tracking loop for donation {id} exited");
    }

    /// Perform a single tracking tick.
    async fn track_once(&self, id: DonationId, token: &CancellationToken) -> Result<TickOutcome> {
        if token.is_cancelled() {
            return Ok(TickOutcome::Stop);
        }

        let record = match self.store.get(id).await {
            Ok(record) => record,
            Err(e) if e.as_donation().is_some_and(|d| d.ends_tracking()) => {
                return Ok(TickOutcome::Stop)
            }
            Err(e) => return Err(e),
        };
        if record.status != DonationStatus::EnRoute {
            debug!("Donation {id} is {}; tracking ends", record.status);
            return Ok(TickOutcome::Stop);
        }

        let location = self.locations.next_location(&record).await?;
        if token.is_cancelled() {
            return Ok(TickOutcome::Stop);
        }
        if record.acceptor_location == Some(location) {
            debug!("Donation {id} acceptor has not moved; nothing to write");
            return Ok(TickOutcome::Continue);
        }

        // Checked again inside the store's atomic section, so a stop that
        // lands while the write is queued still wins.
        let write_token = token.clone();
        let updated = match self
            .store
            .update(
                id,
                Box::new(move |r: &mut DonationRecord| {
                    if write_token.is_cancelled() {
                        return Err(DonationError::TrackingStopped(r.id));
                    }
                    apply(r, DonationEvent::UpdateLocation(location))
                }),
            )
            .await
        {
            Ok(updated) => updated,
            Err(e) if e.as_donation().is_some_and(|d| d.ends_tracking()) => {
                return Ok(TickOutcome::Stop)
            }
            Err(e) => return Err(e),
        };

        debug!(
            "Donation {id} acceptor at ({:.5}, {:.5}), revision {}",
            location.lat, location.lng, updated.revision
        );
        self.publish(&updated);
        Ok(TickOutcome::Continue)
    }

    async fn run_pending_refresh(
        &self,
        observer: GeoPoint,
        radius_km: f64,
        tx: watch::Sender<Vec<NearbyDonation>>,
        token: CancellationToken,
    ) {
        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last: Option<Vec<(DonationId, u64, bool)>> = None;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tx.closed() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = match self.store.list_by_status(DonationStatus::Pending).await {
                Ok(pending) => nearby_pending(&pending, &observer, radius_km, Utc::now()),
                Err(e) => {
                    warn!("Pending refresh skipped: {e}");
                    continue;
                }
            };
            let snapshot = match snapshot {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Pending refresh skipped: {e}");
                    continue;
                }
            };

            let fingerprint: Vec<(DonationId, u64, bool)> = snapshot
                .iter()
                .map(|n| (n.donation.id, n.donation.revision, n.expired))
                .collect();
            if last.as_ref() == Some(&fingerprint) {
                continue;
            }
            debug!("Pending view changed: {} donations nearby", snapshot.len());
            last = Some(fingerprint);
            tx.send_replace(snapshot);
        }
        debug!("Pending refresh loop exited");
    }
}

impl Drop for TrackingScheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
