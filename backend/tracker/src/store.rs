//! The authoritative donation store.
//!
//! [`DonationStore`] is the only mutation gate for donation records. Its
//! `update` is atomic per id: the mutator sees the latest committed record,
//! and a mutator error leaves nothing written. Concurrent transitions on the
//! same id are therefore observed in admission order, and the loser of a race
//! sees the winner's state.
//!
//! Two implementations exist: [`InMemoryDonationStore`] (tests, demos) and
//! [`crate::db::SqliteDonationStore`].

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use foodlink_lifecycle::invariants::check_record;
use foodlink_lifecycle::{DonationError, DonationId, DonationRecord, DonationStatus, NewDonation};

use crate::errors::{Result, TrackerError};

/// In-place edit of a record, run inside the store's atomic section.
pub type Mutator =
    Box<dyn FnOnce(&mut DonationRecord) -> std::result::Result<(), DonationError> + Send>;

#[async_trait]
pub trait DonationStore: Send + Sync {
    /// Persist a new pending donation and return it with its assigned id.
    async fn create(&self, donation: NewDonation) -> Result<DonationRecord>;

    /// Fetch a donation; `DonationError::NotFound` when the id is unknown.
    async fn get(&self, id: DonationId) -> Result<DonationRecord>;

    /// Atomically apply `mutator` to the record.
    ///
    /// On success the revision is incremented, `updated_at` refreshed and
    /// record invariants checked before the write is committed.
    async fn update(&self, id: DonationId, mutator: Mutator) -> Result<DonationRecord>;

    /// Donations in `status`, oldest first.
    async fn list_by_status(&self, status: DonationStatus) -> Result<Vec<DonationRecord>>;

    /// Every donation, oldest first.
    async fn list_all(&self) -> Result<Vec<DonationRecord>>;
}

/// Apply `mutator` to a copy of `current` and stamp the result.
///
/// Shared by every store so revision and invariant handling cannot drift.
pub(crate) fn mutate_copy(current: &DonationRecord, mutator: Mutator) -> Result<DonationRecord> {
    let mut next = current.clone();
    mutator(&mut next)?;
    next.revision = current.revision + 1;
    next.updated_at = Utc::now().max(current.updated_at);
    check_record(&next)?;
    Ok(next)
}

fn oldest_first(records: &mut [DonationRecord]) {
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

fn poison_err<T>(_: PoisonError<T>) -> TrackerError {
    TrackerError::Store("lock poisoned".to_string())
}

#[derive(Debug, Default)]
struct Inner {
    next_id: DonationId,
    records: HashMap<DonationId, DonationRecord>,
}

/// Process-local store backed by a `RwLock<HashMap>`.
///
/// The write lock spans the whole read-mutate-write of `update`, which is
/// what makes it atomic. Not shared across processes and not persistent.
#[derive(Debug, Default)]
pub struct InMemoryDonationStore {
    inner: RwLock<Inner>,
}

impl InMemoryDonationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DonationStore for InMemoryDonationStore {
    async fn create(&self, donation: NewDonation) -> Result<DonationRecord> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        inner.next_id += 1;
        let record = DonationRecord::from_new(inner.next_id, donation);
        check_record(&record)?;
        inner.records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: DonationId) -> Result<DonationRecord> {
        let inner = self.inner.read().map_err(poison_err)?;
        inner
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| DonationError::NotFound(id).into())
    }

    async fn update(&self, id: DonationId, mutator: Mutator) -> Result<DonationRecord> {
        let mut inner = self.inner.write().map_err(poison_err)?;
        let current = inner
            .records
            .get(&id)
            .ok_or(DonationError::NotFound(id))?;
        let next = mutate_copy(current, mutator)?;
        inner.records.insert(id, next.clone());
        Ok(next)
    }

    async fn list_by_status(&self, status: DonationStatus) -> Result<Vec<DonationRecord>> {
        let inner = self.inner.read().map_err(poison_err)?;
        let mut out: Vec<DonationRecord> = inner
            .records
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        oldest_first(&mut out);
        Ok(out)
    }

    async fn list_all(&self) -> Result<Vec<DonationRecord>> {
        let inner = self.inner.read().map_err(poison_err)?;
        let mut out: Vec<DonationRecord> = inner.records.values().cloned().collect();
        oldest_first(&mut out);
        Ok(out)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use foodlink_lifecycle::lifecycle::apply;
    use foodlink_lifecycle::{DonationEvent, EventKind, GeoPoint};

    use super::*;

    pub(crate) fn rice(donor: &str) -> NewDonation {
        NewDonation::new(
            donor,
            None,
            "Rice",
            15,
            None,
            3,
            "123 Main St, New Delhi",
            GeoPoint::new(28.6139, 77.2090),
            Utc::now(),
        )
        .unwrap()
    }

    pub(crate) fn accept_by(acceptor: &str) -> Mutator {
        let acceptor = acceptor.to_string();
        Box::new(move |r: &mut DonationRecord| {
            apply(
                r,
                DonationEvent::Accept {
                    acceptor_name: acceptor.clone(),
                    acceptor_id: acceptor,
                    location: GeoPoint::new(28.5, 77.3),
                },
            )
        })
    }

    /// Behaviour every [`DonationStore`] must share.
    pub(crate) async fn exercise_store(store: Arc<dyn DonationStore>) {
        let a = store.create(rice("donor-1")).await.unwrap();
        let b = store.create(rice("donor-2")).await.unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.revision, 0);
        assert_eq!(store.get(a.id).await.unwrap(), a);

        let missing = store.get(9_999).await.unwrap_err();
        assert!(matches!(
            missing.as_donation(),
            Some(DonationError::NotFound(9_999))
        ));

        let accepted = store.update(a.id, accept_by("ngo-1")).await.unwrap();
        assert_eq!(accepted.revision, 1);
        assert_eq!(accepted.status, DonationStatus::Accepted);
        assert_eq!(store.get(a.id).await.unwrap(), accepted);

        // A rejected mutator writes nothing.
        let err = store.update(a.id, accept_by("ngo-2")).await.unwrap_err();
        assert!(matches!(
            err.as_donation(),
            Some(DonationError::InvalidTransition {
                from: DonationStatus::Accepted,
                event: EventKind::Accept,
            })
        ));
        assert_eq!(store.get(a.id).await.unwrap(), accepted);

        // Mutators that break invariants are refused too.
        let err = store
            .update(
                b.id,
                Box::new(|r: &mut DonationRecord| {
                    r.acceptor_location = Some(GeoPoint::new(1.0, 1.0));
                    Ok(())
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err.as_donation(),
            Some(DonationError::IntegrityViolation(_))
        ));
        assert_eq!(store.get(b.id).await.unwrap().revision, 0);

        let pending = store.list_by_status(DonationStatus::Pending).await.unwrap();
        assert_eq!(pending.iter().map(|r| r.id).collect::<Vec<_>>(), vec![b.id]);
        let accepted = store.list_by_status(DonationStatus::Accepted).await.unwrap();
        assert_eq!(accepted.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a.id]);
        assert_eq!(store.list_all().await.unwrap().len(), 2);

        let err = store.update(9_999, accept_by("ngo-1")).await.unwrap_err();
        assert!(matches!(err.as_donation(), Some(DonationError::NotFound(_))));
    }

    /// Two acceptors racing for one pending donation: exactly one wins.
    pub(crate) async fn exercise_accept_race(store: Arc<dyn DonationStore>) {
        for _ in 0..20 {
            let d = store.create(rice("donor-race")).await.unwrap();
            let s1 = store.clone();
            let s2 = store.clone();
            let first = tokio::spawn(async move { s1.update(d.id, accept_by("ngo-a")).await });
            let second = tokio::spawn(async move { s2.update(d.id, accept_by("ngo-b")).await });
            let results = [first.await.unwrap(), second.await.unwrap()];

            let winners: Vec<&DonationRecord> =
                results.iter().filter_map(|r| r.as_ref().ok()).collect();
            assert_eq!(winners.len(), 1);
            let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
            assert!(matches!(
                loser.as_donation(),
                Some(DonationError::InvalidTransition {
                    from: DonationStatus::Accepted,
                    event: EventKind::Accept,
                })
            ));

            let stored = store.get(d.id).await.unwrap();
            assert_eq!(stored.revision, 1);
            assert_eq!(stored.acceptor_id, winners[0].acceptor_id);
        }
    }

    #[tokio::test]
    async fn in_memory_store_contract() {
        exercise_store(Arc::new(InMemoryDonationStore::new())).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_memory_accept_race_has_one_winner() {
        exercise_accept_race(Arc::new(InMemoryDonationStore::new())).await;
    }
}
