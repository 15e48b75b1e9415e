//! In-memory lookup of stored reference data by remote id.
//!
//! A bulk run loads every kind once and resolves post relations against the
//! index. Single-object runs use [`RefIndex::empty`] and resolve through the
//! store instead.

use anyhow::Result;
use std::collections::HashMap;
use tracing::debug;

use crate::db::{self, Pool, RefRecord};
use crate::model::RefKind;

#[derive(Debug, Default)]
pub struct RefIndex {
    bulk: bool,
    records: HashMap<RefKind, HashMap<i64, RefRecord>>,
}

impl RefIndex {
    /// No cached records. Lookups miss and callers fall through to the store.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Index of every reference kind stored for the site.
    pub async fn load(pool: &Pool, site_id: i64) -> Result<Self> {
        let mut index = Self::empty();
        for kind in RefKind::ALL {
            index.load_kind(pool, site_id, kind).await?;
        }
        Ok(index)
    }

    /// Replaces the cached records of one kind with a fresh table scan and
    /// switches the index to bulk mode.
    pub async fn load_kind(&mut self, pool: &Pool, site_id: i64, kind: RefKind) -> Result<()> {
        let rows = db::list_refs(pool, site_id, kind).await?;
        debug!(kind = kind.as_str(), count = rows.len(), "reference index loaded");
        let by_wp_id = rows.into_iter().map(|r| (r.wp_id, r)).collect();
        self.records.insert(kind, by_wp_id);
        self.bulk = true;
        Ok(())
    }

    /// Whether lookups are served from memory (bulk mode).
    pub fn is_bulk(&self) -> bool {
        self.bulk
    }

    pub fn get(&self, kind: RefKind, wp_id: i64) -> Option<&RefRecord> {
        self.records.get(&kind)?.get(&wp_id)
    }

    pub fn contains(&self, kind: RefKind, wp_id: i64) -> bool {
        self.get(kind, wp_id).is_some()
    }

    pub fn register(&mut self, record: RefRecord) {
        self.records
            .entry(record.kind)
            .or_default()
            .insert(record.wp_id, record);
    }

    pub fn len(&self, kind: RefKind) -> usize {
        self.records.get(&kind).map_or(0, HashMap::len)
    }
}
