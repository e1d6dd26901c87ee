mod migrations;

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tokio::task;

use tickethive_schema::{
    AdminAnnotation, CollectedEntry, Error, IncidentRecord, IncidentStatus, Result,
};

use migrations::run_migrations;

/// How often a conflicted write is re-read and reapplied before giving up.
const MAX_UPDATE_ATTEMPTS: usize = 3;

/// Durable incident records over SQLite. Concurrent reads are fine; writes
/// to the same record are serialized optimistically via the revision column.
#[derive(Clone)]
pub struct IncidentStore {
    db: Arc<Mutex<Connection>>,
}

impl IncidentStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| Error::Internal(e.into()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::Internal(e.into()))?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::Internal(e.into()))?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert a fresh record. The stored copy starts at revision 1.
    pub async fn create(&self, mut record: IncidentRecord) -> Result<IncidentRecord> {
        record.revision = 1;
        let db = Arc::clone(&self.db);
        let stored = record.clone();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let collected = serde_json::to_string(&record.collected_information)?;
            let admin = serde_json::to_string(&record.admin_messages)?;
            conn.execute(
                r#"
                INSERT INTO incidents (
                    incident_id, user_demand, status, kb_reference,
                    collected_information, admin_messages, created_on, updated_on, revision
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    record.incident_id,
                    record.user_demand,
                    record.status.as_str(),
                    record.kb_reference,
                    collected,
                    admin,
                    record.created_on.to_rfc3339(),
                    record.updated_on.to_rfc3339(),
                    record.revision,
                ],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await
        .map_err(|e| Error::Internal(e.into()))??;

        Ok(stored)
    }

    pub async fn load(&self, incident_id: &str) -> Result<Option<IncidentRecord>> {
        let db = Arc::clone(&self.db);
        let incident_id = incident_id.to_owned();
        let record = task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                r#"
                SELECT incident_id, user_demand, status, kb_reference,
                       collected_information, admin_messages, created_on, updated_on, revision
                FROM incidents
                WHERE incident_id = ?1
                LIMIT 1
                "#,
            )?;
            let mut rows = stmt.query(params![incident_id])?;
            if let Some(row) = rows.next()? {
                return Ok::<Option<IncidentRecord>, anyhow::Error>(Some(row_to_record(row)?));
            }
            Ok::<Option<IncidentRecord>, anyhow::Error>(None)
        })
        .await
        .map_err(|e| Error::Internal(e.into()))??;

        Ok(record)
    }

    /// Optimistic save: succeeds only against the revision the caller read.
    /// A stale revision means someone else committed in between.
    pub async fn save(&self, mut record: IncidentRecord) -> Result<IncidentRecord> {
        let expected_revision = record.revision;
        record.revision += 1;
        let db = Arc::clone(&self.db);
        let stored = record.clone();
        let updated = task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let collected = serde_json::to_string(&record.collected_information)?;
            let admin = serde_json::to_string(&record.admin_messages)?;
            let updated = conn.execute(
                r#"
                UPDATE incidents SET
                    user_demand = ?2,
                    status = ?3,
                    kb_reference = ?4,
                    collected_information = ?5,
                    admin_messages = ?6,
                    updated_on = ?7,
                    revision = ?8
                WHERE incident_id = ?1 AND revision = ?9
                "#,
                params![
                    record.incident_id,
                    record.user_demand,
                    record.status.as_str(),
                    record.kb_reference,
                    collected,
                    admin,
                    record.updated_on.to_rfc3339(),
                    record.revision,
                    expected_revision,
                ],
            )?;
            Ok::<usize, anyhow::Error>(updated)
        })
        .await
        .map_err(|e| Error::Internal(e.into()))??;

        if updated == 0 {
            return match self.load(&stored.incident_id).await? {
                Some(_) => Err(Error::conflict(format!(
                    "incident {} was modified concurrently",
                    stored.incident_id
                ))),
                None => Err(Error::not_found(format!(
                    "incident {} does not exist",
                    stored.incident_id
                ))),
            };
        }

        Ok(stored)
    }

    /// Re-read-and-reapply loop for conflicted writes: the mutation closure
    /// runs against the freshly loaded record on every attempt, never a
    /// blind overwrite.
    pub async fn update_with<F>(&self, incident_id: &str, mut mutate: F) -> Result<IncidentRecord>
    where
        F: FnMut(&mut IncidentRecord) -> Result<()>,
    {
        for attempt in 0..MAX_UPDATE_ATTEMPTS {
            let mut record = self
                .load(incident_id)
                .await?
                .ok_or_else(|| Error::not_found(format!("incident {incident_id} does not exist")))?;
            mutate(&mut record)?;
            match self.save(record).await {
                Ok(stored) => return Ok(stored),
                Err(Error::Conflict(_)) if attempt + 1 < MAX_UPDATE_ATTEMPTS => {
                    tracing::debug!(incident_id, attempt, "conflicted write, reapplying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::conflict(format!(
            "incident {incident_id} kept conflicting after {MAX_UPDATE_ATTEMPTS} attempts"
        )))
    }

    pub async fn list(&self, status: Option<IncidentStatus>) -> Result<Vec<IncidentRecord>> {
        let db = Arc::clone(&self.db);
        let records = task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let base = r#"
                SELECT incident_id, user_demand, status, kb_reference,
                       collected_information, admin_messages, created_on, updated_on, revision
                FROM incidents
            "#;
            let mut records = Vec::new();
            match status {
                Some(filter) => {
                    let mut stmt = conn
                        .prepare(&format!("{base} WHERE status = ?1 ORDER BY updated_on DESC"))?;
                    let rows = stmt.query_map(params![filter.as_str()], row_to_record)?;
                    for row in rows {
                        records.push(row?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!("{base} ORDER BY updated_on DESC"))?;
                    let rows = stmt.query_map([], row_to_record)?;
                    for row in rows {
                        records.push(row?);
                    }
                }
            }
            Ok::<Vec<IncidentRecord>, anyhow::Error>(records)
        })
        .await
        .map_err(|e| Error::Internal(e.into()))??;

        Ok(records)
    }

    /// Per-status counts for the admin dashboard.
    pub async fn status_counts(&self) -> Result<Vec<(IncidentStatus, i64)>> {
        let db = Arc::clone(&self.db);
        let counts = task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let mut stmt = conn.prepare(
                "SELECT status, COUNT(1) FROM incidents GROUP BY status ORDER BY COUNT(1) DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            let mut counts = Vec::new();
            for row in rows {
                let (status_raw, count) = row?;
                if let Some(status) = IncidentStatus::parse(&status_raw) {
                    counts.push((status, count));
                }
            }
            Ok::<Vec<(IncidentStatus, i64)>, anyhow::Error>(counts)
        })
        .await
        .map_err(|e| Error::Internal(e.into()))??;

        Ok(counts)
    }
}

fn parse_datetime_sql(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<IncidentRecord> {
    let status_raw: String = row.get(2)?;
    let collected_raw: String = row.get(4)?;
    let admin_raw: String = row.get(5)?;
    let created_raw: String = row.get(6)?;
    let updated_raw: String = row.get(7)?;

    let collected: Vec<CollectedEntry> = serde_json::from_str(&collected_raw).unwrap_or_default();
    let admin: Vec<AdminAnnotation> = serde_json::from_str(&admin_raw).unwrap_or_default();

    Ok(IncidentRecord {
        incident_id: row.get(0)?,
        user_demand: row.get(1)?,
        status: IncidentStatus::parse(&status_raw).unwrap_or(IncidentStatus::PendingAdminReview),
        kb_reference: row.get(3)?,
        collected_information: collected,
        admin_messages: admin,
        created_on: parse_datetime_sql(&created_raw)?,
        updated_on: parse_datetime_sql(&updated_raw)?,
        revision: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(demand: &str) -> IncidentRecord {
        let mut record = IncidentRecord::new(demand);
        record.set_status(IncidentStatus::GatheringInfo);
        record
    }

    #[tokio::test]
    async fn create_and_load_roundtrip() {
        let store = IncidentStore::open_in_memory().unwrap();
        let mut record = make_record("VPN will not connect");
        record.bind_kb_reference("KB_VPN_01").unwrap();
        record.append_collected("OS version", "Windows 11");

        let stored = store.create(record).await.unwrap();
        assert_eq!(stored.revision, 1);

        let loaded = store.load(&stored.incident_id).await.unwrap().unwrap();
        assert_eq!(loaded.user_demand, "VPN will not connect");
        assert_eq!(loaded.status, IncidentStatus::GatheringInfo);
        assert_eq!(loaded.kb_reference.as_deref(), Some("KB_VPN_01"));
        assert_eq!(loaded.collected_information.len(), 1);
        assert_eq!(loaded.revision, 1);
    }

    #[tokio::test]
    async fn load_missing_returns_none() {
        let store = IncidentStore::open_in_memory().unwrap();
        assert!(store.load("INC_NOPE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_bumps_revision() {
        let store = IncidentStore::open_in_memory().unwrap();
        let stored = store.create(make_record("printer")).await.unwrap();

        let mut updated = stored.clone();
        updated.set_status(IncidentStatus::Open);
        let saved = store.save(updated).await.unwrap();
        assert_eq!(saved.revision, 2);

        let loaded = store.load(&saved.incident_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, IncidentStatus::Open);
        assert_eq!(loaded.revision, 2);
    }

    #[tokio::test]
    async fn stale_revision_conflicts() {
        let store = IncidentStore::open_in_memory().unwrap();
        let stored = store.create(make_record("wifi")).await.unwrap();

        // Two readers take the same revision
        let mut first = stored.clone();
        let mut second = stored.clone();

        first.set_status(IncidentStatus::Open);
        store.save(first).await.unwrap();

        second.set_status(IncidentStatus::Resolved);
        let err = store.save(second).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // The first write survived unchanged
        let loaded = store.load(&stored.incident_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, IncidentStatus::Open);
    }

    #[tokio::test]
    async fn save_of_missing_record_is_not_found() {
        let store = IncidentStore::open_in_memory().unwrap();
        let record = make_record("ghost");
        let err = store.save(record).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn update_with_reapplies_after_conflict() {
        let store = IncidentStore::open_in_memory().unwrap();
        let stored = store.create(make_record("slow laptop")).await.unwrap();
        let id = stored.incident_id.clone();

        // Sabotage the first attempt: once the closure has run, commit a
        // competing write so the save sees a stale revision.
        let mut raced = false;
        let store_for_race = store.clone();
        let stored_for_race = stored.clone();

        let result = store
            .update_with(&id, |record| {
                if !raced {
                    raced = true;
                    let store = store_for_race.clone();
                    let mut competing = stored_for_race.clone();
                    // commit the competing write synchronously on a blocking thread
                    let handle = tokio::runtime::Handle::current();
                    std::thread::spawn(move || {
                        handle.block_on(async move {
                            competing.append_collected("model", "XPS 13");
                            store.save(competing).await.unwrap();
                        });
                    })
                    .join()
                    .unwrap();
                }
                record.set_status(IncidentStatus::Open);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(result.status, IncidentStatus::Open);
        // The competing write was not lost
        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.collected_information.len(), 1);
        assert_eq!(loaded.status, IncidentStatus::Open);
        assert_eq!(loaded.revision, 3);
    }

    #[tokio::test]
    async fn update_with_missing_record_is_not_found() {
        let store = IncidentStore::open_in_memory().unwrap();
        let err = store
            .update_with("INC_GHOST", |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_by_status_and_orders_by_update() {
        let store = IncidentStore::open_in_memory().unwrap();
        let a = store.create(make_record("a")).await.unwrap();
        let b = store.create(make_record("b")).await.unwrap();

        let mut resolved = a.clone();
        resolved.set_status(IncidentStatus::Resolved);
        store.save(resolved).await.unwrap();

        let all = store.list(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let gathering = store
            .list(Some(IncidentStatus::GatheringInfo))
            .await
            .unwrap();
        assert_eq!(gathering.len(), 1);
        assert_eq!(gathering[0].incident_id, b.incident_id);

        let resolved = store.list(Some(IncidentStatus::Resolved)).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].incident_id, a.incident_id);
    }

    #[tokio::test]
    async fn status_counts_groups_by_status() {
        let store = IncidentStore::open_in_memory().unwrap();
        store.create(make_record("a")).await.unwrap();
        store.create(make_record("b")).await.unwrap();
        let c = store.create(make_record("c")).await.unwrap();

        let mut open = c.clone();
        open.set_status(IncidentStatus::Open);
        store.save(open).await.unwrap();

        let counts = store.status_counts().await.unwrap();
        let gathering = counts
            .iter()
            .find(|(s, _)| *s == IncidentStatus::GatheringInfo)
            .unwrap();
        assert_eq!(gathering.1, 2);
        let open = counts
            .iter()
            .find(|(s, _)| *s == IncidentStatus::Open)
            .unwrap();
        assert_eq!(open.1, 1);
    }

    #[tokio::test]
    async fn open_on_disk_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incidents.db");
        let path_str = path.to_str().unwrap();

        let id = {
            let store = IncidentStore::open(path_str).unwrap();
            let stored = store.create(make_record("persistent")).await.unwrap();
            stored.incident_id
        };

        let store = IncidentStore::open(path_str).unwrap();
        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.user_demand, "persistent");
    }
}
