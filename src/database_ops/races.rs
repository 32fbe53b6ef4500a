//! Keyed updates of the `races` table.
//!
//! A race row can be located by its internal id, its chat room, its start.gg set
//! or one of the three async room slots. Every supplied key gets one `UPDATE`,
//! and all of them share a single transaction.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument, warn};

use crate::database_ops::db::Db;
use crate::database_ops::ootr::error::{SeedError, SeedResult};
use crate::database_ops::ootr::reconcile::SeedMetadataRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AsyncSlot {
    One,
    Two,
    Three,
}

impl TryFrom<u8> for AsyncSlot {
    type Error = SeedError;

    fn try_from(n: u8) -> SeedResult<Self> {
        match n {
            1 => Ok(AsyncSlot::One),
            2 => Ok(AsyncSlot::Two),
            3 => Ok(AsyncSlot::Three),
            other => Err(SeedError::parse(format!("async slot must be 1, 2 or 3, got {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CorrelationKey {
    /// Race id as seen outside the database (unsigned).
    RaceId(u64),
    Room(String),
    StartggSet(String),
    AsyncRoom { slot: AsyncSlot, room: String },
}

impl CorrelationKey {
    pub fn column(&self) -> &'static str {
        match self {
            CorrelationKey::RaceId(_) => "id",
            CorrelationKey::Room(_) => "room",
            CorrelationKey::StartggSet(_) => "startgg_set",
            CorrelationKey::AsyncRoom { slot: AsyncSlot::One, .. } => "async_room1",
            CorrelationKey::AsyncRoom { slot: AsyncSlot::Two, .. } => "async_room2",
            CorrelationKey::AsyncRoom { slot: AsyncSlot::Three, .. } => "async_room3",
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::RaceId(id) => write!(f, "id={id}"),
            CorrelationKey::Room(room) => write!(f, "room={room}"),
            CorrelationKey::StartggSet(set) => write!(f, "startgg_set={set}"),
            CorrelationKey::AsyncRoom { room, .. } => write!(f, "{}={room}", self.column()),
        }
    }
}

/// Race ids are handed out as unsigned 64-bit values but stored in a BIGINT
/// column; values at or above 2^63 wrap to their two's-complement equivalent.
pub fn race_id_key(id: u64) -> i64 {
    id as i64
}

/// Rows updated for one key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyUpdate {
    pub key: CorrelationKey,
    pub rows: u64,
}

/// Target of the persisted metadata.
#[async_trait]
pub trait RaceStore: Send + Sync {
    /// Apply `record` to the rows of every key, all or nothing.
    async fn apply(
        &self,
        record: &SeedMetadataRecord,
        keys: &[CorrelationKey],
    ) -> SeedResult<Vec<KeyUpdate>>;
}

#[derive(Clone)]
pub struct PgRaceStore {
    db: Db,
    hash_type: Option<String>,
}

impl PgRaceStore {
    pub fn new(db: Db) -> Self {
        Self {
            db,
            hash_type: None,
        }
    }

    /// Cast hash parameters to this Postgres type (e.g. an icon enum) instead of binding text.
    pub fn with_hash_type(mut self, hash_type: Option<String>) -> SeedResult<Self> {
        if let Some(ty) = hash_type.as_deref() {
            let valid = !ty.is_empty()
                && ty
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
            if !valid {
                return Err(SeedError::parse(format!("invalid hash column type {ty:?}")));
            }
        }
        self.hash_type = hash_type;
        Ok(self)
    }

    fn update_sql(&self, key: &CorrelationKey) -> String {
        let cast = self
            .hash_type
            .as_deref()
            .map(|t| format!("::{t}"))
            .unwrap_or_default();
        format!(
            "UPDATE races SET
                web_id = $1,
                web_gen_time = $2,
                file_stem = $3,
                hash1 = $4{cast},
                hash2 = $5{cast},
                hash3 = $6{cast},
                hash4 = $7{cast},
                hash5 = $8{cast}
            WHERE {} = $9",
            key.column()
        )
    }

    async fn update_key(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &SeedMetadataRecord,
        key: &CorrelationKey,
    ) -> SeedResult<u64> {
        let web_id = i64::try_from(record.seed_id)
            .map_err(|_| SeedError::parse(format!("seed id {} out of range", record.seed_id)))?;
        let sql = self.update_sql(key);
        let hash = |i: usize| record.hashes.as_ref().and_then(|h| h.get(i));
        let query = sqlx::query(&sql)
            .persistent(false)
            .bind(web_id)
            .bind(record.creation_timestamp)
            .bind(&record.file_stem)
            .bind(hash(0))
            .bind(hash(1))
            .bind(hash(2))
            .bind(hash(3))
            .bind(hash(4));
        let query = match key {
            CorrelationKey::RaceId(id) => query.bind(race_id_key(*id)),
            CorrelationKey::Room(v)
            | CorrelationKey::StartggSet(v)
            | CorrelationKey::AsyncRoom { room: v, .. } => query.bind(v.as_str()),
        };
        let done = query.execute(&mut **tx).await?;
        Ok(done.rows_affected())
    }
}

#[async_trait]
impl RaceStore for PgRaceStore {
    #[instrument(skip(self, record, keys), fields(seed_id = record.seed_id, keys = keys.len()))]
    async fn apply(
        &self,
        record: &SeedMetadataRecord,
        keys: &[CorrelationKey],
    ) -> SeedResult<Vec<KeyUpdate>> {
        let mut tx = self.db.pool.begin().await?;
        let mut updates = Vec::with_capacity(keys.len());
        for key in keys {
            match self.update_key(&mut tx, record, key).await {
                Ok(rows) => {
                    if rows == 0 {
                        warn!(%key, "no race row matched");
                    }
                    updates.push(KeyUpdate {
                        key: key.clone(),
                        rows,
                    });
                }
                Err(e) => {
                    if let Err(rb) = tx.rollback().await {
                        warn!(error = %rb, "rollback failed");
                    }
                    warn!(%key, error = %e, "race update failed; rolled back");
                    return Err(e);
                }
            }
        }
        tx.commit().await?;
        info!(keys = updates.len(), "race updates committed");
        Ok(updates)
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use std::sync::Mutex;

    use chrono::{DateTime, Utc};

    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct RaceRow {
        pub id: i64,
        pub room: Option<String>,
        pub startgg_set: Option<String>,
        pub async_room1: Option<String>,
        pub async_room2: Option<String>,
        pub async_room3: Option<String>,
        pub web_id: Option<i64>,
        pub web_gen_time: Option<DateTime<Utc>>,
        pub file_stem: Option<String>,
        pub hashes: [Option<String>; 5],
    }

    impl RaceRow {
        fn matches(&self, key: &CorrelationKey) -> bool {
            match key {
                CorrelationKey::RaceId(id) => self.id == race_id_key(*id),
                CorrelationKey::Room(r) => self.room.as_ref() == Some(r),
                CorrelationKey::StartggSet(s) => self.startgg_set.as_ref() == Some(s),
                CorrelationKey::AsyncRoom { slot, room } => {
                    let col = match slot {
                        AsyncSlot::One => &self.async_room1,
                        AsyncSlot::Two => &self.async_room2,
                        AsyncSlot::Three => &self.async_room3,
                    };
                    col.as_ref() == Some(room)
                }
            }
        }
    }

    /// Transactional in-memory `races` table; updates for `fail_on` error out.
    #[derive(Default)]
    pub struct MemoryRaceStore {
        pub rows: Mutex<Vec<RaceRow>>,
        pub fail_on: Option<CorrelationKey>,
    }

    impl MemoryRaceStore {
        pub fn new(rows: Vec<RaceRow>) -> Self {
            Self {
                rows: Mutex::new(rows),
                fail_on: None,
            }
        }

        pub fn snapshot(&self) -> Vec<RaceRow> {
            self.rows.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RaceStore for MemoryRaceStore {
        async fn apply(
            &self,
            record: &SeedMetadataRecord,
            keys: &[CorrelationKey],
        ) -> SeedResult<Vec<KeyUpdate>> {
            let mut guard = self.rows.lock().unwrap();
            let mut working = guard.clone();
            let mut updates = Vec::new();
            for key in keys {
                if self.fail_on.as_ref() == Some(key) {
                    return Err(SeedError::Store(format!("update failed for {key}")));
                }
                let mut rows = 0;
                for row in working.iter_mut().filter(|r| r.matches(key)) {
                    row.web_id = Some(record.seed_id as i64);
                    row.web_gen_time = Some(record.creation_timestamp);
                    row.file_stem = Some(record.file_stem.clone());
                    for (i, slot) in row.hashes.iter_mut().enumerate() {
                        *slot = record
                            .hashes
                            .as_ref()
                            .and_then(|h| h.get(i))
                            .map(str::to_string);
                    }
                    rows += 1;
                }
                updates.push(KeyUpdate {
                    key: key.clone(),
                    rows,
                });
            }
            *guard = working;
            Ok(updates)
        }
    }
}
