//! Database layer — migrations, row mapping and the SQLite-backed store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foodlink_lifecycle::invariants::check_record;
use foodlink_lifecycle::{DonationError, DonationId, DonationRecord, DonationStatus, GeoPoint, NewDonation};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::errors::{Result, TrackerError};
use crate::store::{mutate_copy, DonationStore, Mutator};

/// Establish a SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    // In-memory databases are per-connection, so keep a single one.
    let max_connections = if url.contains(":memory:") { 1 } else { 5 };

    let options = SqliteConnectOptions::from_str(&url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────

const SELECT_COLUMNS: &str = r#"
    SELECT id, donor_id, donor_name, donor_lat, donor_lng, location_text,
           food_type, quantity, unit, expires_at, status,
           acceptor_id, acceptor_name, acceptor_lat, acceptor_lng,
           created_at, updated_at, revision
    FROM   donations
"#;

/// A donation row as stored in / read from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct DonationRow {
    id: i64,
    donor_id: String,
    donor_name: Option<String>,
    donor_lat: f64,
    donor_lng: f64,
    location_text: String,
    food_type: String,
    quantity: i64,
    unit: String,
    expires_at: DateTime<Utc>,
    status: String,
    acceptor_id: Option<String>,
    acceptor_name: Option<String>,
    acceptor_lat: Option<f64>,
    acceptor_lng: Option<f64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    revision: i64,
}

impl TryFrom<DonationRow> for DonationRecord {
    type Error = TrackerError;

    fn try_from(row: DonationRow) -> Result<Self> {
        let status = DonationStatus::parse(&row.status).ok_or_else(|| {
            TrackerError::Store(format!("donation {} has unknown status {}", row.id, row.status))
        })?;
        let acceptor_location = match (row.acceptor_lat, row.acceptor_lng) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            (None, None) => None,
            _ => {
                return Err(DonationError::IntegrityViolation(format!(
                    "donation {} has a half-written acceptor location",
                    row.id
                ))
                .into())
            }
        };
        let quantity = u32::try_from(row.quantity).map_err(|_| {
            TrackerError::Store(format!("donation {} has quantity {}", row.id, row.quantity))
        })?;

        Ok(DonationRecord {
            id: row.id,
            donor_id: row.donor_id,
            donor_name: row.donor_name,
            donor_location: GeoPoint::new(row.donor_lat, row.donor_lng),
            location_text: row.location_text,
            food_type: row.food_type,
            quantity,
            unit: row.unit,
            expires_at: row.expires_at,
            status,
            acceptor_id: row.acceptor_id,
            acceptor_name: row.acceptor_name,
            acceptor_location,
            created_at: row.created_at,
            updated_at: row.updated_at,
            revision: row.revision.max(0) as u64,
        })
    }
}

fn into_records(rows: Vec<DonationRow>) -> Result<Vec<DonationRecord>> {
    rows.into_iter().map(DonationRecord::try_from).collect()
}

// ─────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────

/// [`DonationStore`] over a SQLite pool.
///
/// `update` opens a transaction whose first statement is a write on the
/// target row, so SQLite's reserved lock is held from before the read until
/// commit. The final `UPDATE` is additionally guarded by the revision read
/// inside the transaction.
#[derive(Debug, Clone)]
pub struct SqliteDonationStore {
    pool: SqlitePool,
}

impl SqliteDonationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DonationStore for SqliteDonationStore {
    async fn create(&self, donation: NewDonation) -> Result<DonationRecord> {
        let draft = DonationRecord::from_new(0, donation);
        check_record(&draft)?;

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO donations
                (donor_id, donor_name, donor_lat, donor_lng, location_text,
                 food_type, quantity, unit, expires_at, status,
                 created_at, updated_at, revision)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0)
            RETURNING id
            "#,
        )
        .bind(&draft.donor_id)
        .bind(&draft.donor_name)
        .bind(draft.donor_location.lat)
        .bind(draft.donor_location.lng)
        .bind(&draft.location_text)
        .bind(&draft.food_type)
        .bind(i64::from(draft.quantity))
        .bind(&draft.unit)
        .bind(draft.expires_at)
        .bind(draft.status.as_str())
        .bind(draft.created_at)
        .bind(draft.updated_at)
        .fetch_one(&self.pool)
        .await?;

        debug!("Inserted donation {id}");
        Ok(DonationRecord { id, ..draft })
    }

    async fn get(&self, id: DonationId) -> Result<DonationRecord> {
        let row = sqlx::query_as::<_, DonationRow>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => row.try_into(),
            None => Err(DonationError::NotFound(id).into()),
        }
    }

    async fn update(&self, id: DonationId, mutator: Mutator) -> Result<DonationRecord> {
        let mut tx = self.pool.begin().await?;

        // Take the write lock before reading.
        let locked = sqlx::query("UPDATE donations SET revision = revision WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if locked == 0 {
            return Err(DonationError::NotFound(id).into());
        }

        let row = sqlx::query_as::<_, DonationRow>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
        let current = DonationRecord::try_from(row)?;
        // On error the transaction is dropped and rolled back.
        let next = mutate_copy(&current, mutator)?;

        let written = sqlx::query(
            r#"
            UPDATE donations
            SET    food_type = ?1, quantity = ?2, unit = ?3, expires_at = ?4,
                   status = ?5, acceptor_id = ?6, acceptor_name = ?7,
                   acceptor_lat = ?8, acceptor_lng = ?9,
                   updated_at = ?10, revision = ?11
            WHERE  id = ?12 AND revision = ?13
            "#,
        )
        .bind(&next.food_type)
        .bind(i64::from(next.quantity))
        .bind(&next.unit)
        .bind(next.expires_at)
        .bind(next.status.as_str())
        .bind(&next.acceptor_id)
        .bind(&next.acceptor_name)
        .bind(next.acceptor_location.map(|p| p.lat))
        .bind(next.acceptor_location.map(|p| p.lng))
        .bind(next.updated_at)
        .bind(next.revision as i64)
        .bind(id)
        .bind(current.revision as i64)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if written == 0 {
            return Err(TrackerError::Conflict(id));
        }

        tx.commit().await?;
        Ok(next)
    }

    async fn list_by_status(&self, status: DonationStatus) -> Result<Vec<DonationRecord>> {
        let rows = sqlx::query_as::<_, DonationRow>(&format!(
            "{SELECT_COLUMNS} WHERE status = ?1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        into_records(rows)
    }

    async fn list_all(&self) -> Result<Vec<DonationRecord>> {
        let rows = sqlx::query_as::<_, DonationRow>(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at ASC, id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        into_records(rows)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use foodlink_lifecycle::{lifecycle, DonationEvent};

    use super::*;
    use crate::store::tests::{accept_by, exercise_accept_race, exercise_store, rice};

    async fn memory_store() -> SqliteDonationStore {
        SqliteDonationStore::new(init_pool("sqlite::memory:").await.unwrap())
    }

    #[tokio::test]
    async fn sqlite_store_contract() {
        exercise_store(Arc::new(memory_store().await)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sqlite_accept_race_has_one_winner() {
        exercise_accept_race(Arc::new(memory_store().await)).await;
    }

    /// A database file shared by the full production-sized pool.
    async fn file_store(dir: &tempfile::TempDir) -> SqliteDonationStore {
        let url = format!("sqlite:{}", dir.path().join("foodlink.db").display());
        SqliteDonationStore::new(init_pool(&url).await.unwrap())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn file_backed_accept_race_has_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        exercise_accept_race(Arc::new(file_store(&dir).await)).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn file_backed_concurrent_updates_are_never_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(file_store(&dir).await);
        let d = store.create(rice("donor-1")).await.unwrap();
        store.update(d.id, accept_by("ngo-1")).await.unwrap();
        let start = store
            .update(
                d.id,
                Box::new(|r: &mut DonationRecord| {
                    lifecycle::apply(r, DonationEvent::StartPickup)
                }),
            )
            .await
            .unwrap();

        let writers: Vec<_> = (0..10)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let point = GeoPoint::new(28.5 + f64::from(i) * 0.001, 77.3);
                    store
                        .update(
                            d.id,
                            Box::new(move |r: &mut DonationRecord| {
                                lifecycle::apply(r, DonationEvent::UpdateLocation(point))
                            }),
                        )
                        .await
                })
            })
            .collect();
        let mut revisions = Vec::new();
        for writer in writers {
            revisions.push(writer.await.unwrap().unwrap().revision);
        }

        revisions.sort_unstable();
        let expected: Vec<u64> = (1..=10).map(|n| start.revision + n).collect();
        assert_eq!(revisions, expected);
        assert_eq!(store.get(d.id).await.unwrap().revision, start.revision + 10);
    }

    #[tokio::test]
    async fn sqlite_round_trips_every_field() {
        let store = memory_store().await;
        let created = store.create(rice("donor-1")).await.unwrap();
        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched.food_type, "Rice");
        assert_eq!(fetched.quantity, 15);
        assert_eq!(fetched.donor_location, created.donor_location);
        assert_eq!(fetched.expires_at, created.expires_at);
        assert_eq!(fetched.created_at, created.created_at);

        let accepted = store.update(created.id, accept_by("ngo-1")).await.unwrap();
        let fetched = store.get(created.id).await.unwrap();
        assert_eq!(fetched, accepted);
        assert_eq!(fetched.acceptor_location, Some(GeoPoint::new(28.5, 77.3)));
    }
}
