//! Insert-or-update of reference records and posts against the local store.
//!
//! Reference records are compared field by field and written only when
//! something changed. Post scalar columns are rebuilt from the payload and
//! replaced as a whole; relation sets are converged with a minimal add/remove
//! delta. New rows are either written immediately or buffered for a batch
//! insert at the end of the page.

use anyhow::Result;
use serde_json::Value;
use sqlx::sqlite::SqliteConnection;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use crate::db::{self, NewPost, RefRecord, RelationSets};
use crate::mapping::{self, Fields};
use crate::model::{RefKind, Relation};
use crate::refindex::RefIndex;
use crate::wp::model::{relation_members, remote_id};

/// Result of [`upsert_reference`].
#[derive(Debug, Clone, PartialEq)]
pub enum Upserted {
    /// New record queued in a [`PendingRefs`] buffer.
    Buffered,
    Created(RefRecord),
    Updated(RefRecord),
    Unchanged(RefRecord),
    /// The payload carried no usable remote id.
    Skipped,
}

impl Upserted {
    pub fn record(&self) -> Option<&RefRecord> {
        match self {
            Upserted::Created(r) | Upserted::Updated(r) | Upserted::Unchanged(r) => Some(r),
            Upserted::Buffered | Upserted::Skipped => None,
        }
    }
}

/// New reference records of one kind waiting for a batch insert.
#[derive(Debug)]
pub struct PendingRefs {
    kind: RefKind,
    rows: BTreeMap<i64, Fields>,
}

impl PendingRefs {
    pub fn new(kind: RefKind) -> Self {
        Self {
            kind,
            rows: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Creates or refreshes one reference record from its payload.
///
/// The record is looked up in `index` when it is in bulk mode and in the
/// store otherwise. A missing record is queued in `pending` when given, or
/// written immediately and registered in `index`.
pub async fn upsert_reference(
    conn: &mut SqliteConnection,
    site_id: i64,
    kind: RefKind,
    payload: &Value,
    index: &mut RefIndex,
    pending: Option<&mut PendingRefs>,
) -> Result<Upserted> {
    let Some(wp_id) = remote_id(payload) else {
        warn!(kind = kind.as_str(), "payload without remote id; skipped");
        return Ok(Upserted::Skipped);
    };

    let existing = if index.is_bulk() {
        index.get(kind, wp_id).cloned()
    } else {
        db::find_ref(conn, site_id, kind, wp_id).await?
    };

    if let Some(mut record) = existing {
        let outcome = refresh(conn, &mut record, payload).await?;
        index.register(record);
        return Ok(outcome);
    }

    if let Some(pending) = pending {
        debug_assert_eq!(pending.kind, kind);
        pending.rows.insert(wp_id, mapping::build(kind, payload));
        return Ok(Upserted::Buffered);
    }

    let defaults = mapping::build(kind, payload);
    let (mut record, created) = db::get_or_create_ref(conn, site_id, kind, wp_id, &defaults).await?;
    let outcome = if created {
        debug!(kind = kind.as_str(), wp_id, "reference created");
        Upserted::Created(record.clone())
    } else {
        // Another run inserted it since the lookup.
        refresh(conn, &mut record, payload).await?
    };
    index.register(record);
    Ok(outcome)
}

/// Applies changed fields to a stored record, writing only when needed.
async fn refresh(
    conn: &mut SqliteConnection,
    record: &mut RefRecord,
    payload: &Value,
) -> Result<Upserted> {
    if mapping::diff_and_apply(record.kind, &mut record.fields, payload) {
        db::update_ref(conn, record).await?;
        debug!(kind = record.kind.as_str(), wp_id = record.wp_id, "reference updated");
        Ok(Upserted::Updated(record.clone()))
    } else {
        Ok(Upserted::Unchanged(record.clone()))
    }
}

/// Inserts every pending record, then registers the stored rows in `index`.
/// Returns the number of rows inserted.
pub async fn flush_references(
    conn: &mut SqliteConnection,
    site_id: i64,
    pending: &mut PendingRefs,
    index: &mut RefIndex,
) -> Result<u64> {
    if pending.is_empty() {
        return Ok(0);
    }
    let rows: Vec<(i64, Fields)> = std::mem::take(&mut pending.rows).into_iter().collect();
    let inserted = db::bulk_insert_refs(conn, site_id, pending.kind, &rows).await?;
    let wp_ids: Vec<i64> = rows.iter().map(|(wp_id, _)| *wp_id).collect();
    for record in db::find_refs_by_wp_ids(conn, site_id, pending.kind, &wp_ids).await? {
        index.register(record);
    }
    Ok(inserted)
}

/// `(desired - current, current - desired)`.
pub fn resolve_set_delta(
    desired: &BTreeSet<i64>,
    current: &BTreeSet<i64>,
) -> (BTreeSet<i64>, BTreeSet<i64>) {
    let to_add = desired.difference(current).copied().collect();
    let to_remove = current.difference(desired).copied().collect();
    (to_add, to_remove)
}

/// Local author id for a post payload. In bulk mode an author missing from
/// the index is created on the spot, since listings of site users do not
/// include guest bylines.
pub async fn resolve_author(
    conn: &mut SqliteConnection,
    site_id: i64,
    payload: &Value,
    index: &mut RefIndex,
) -> Result<Option<i64>> {
    let Some(author) = payload.get("author").filter(|a| remote_id(a).is_some()) else {
        return Ok(None);
    };
    let outcome = upsert_reference(conn, site_id, RefKind::Author, author, index, None).await?;
    Ok(outcome.record().map(|r| r.id))
}

/// Local ids of the categories, tags and attachments named in a post payload.
///
/// Bulk mode resolves through the index only and omits members it does not
/// know. Single-object mode creates or refreshes each member in the store.
pub async fn resolve_relations(
    conn: &mut SqliteConnection,
    site_id: i64,
    payload: &Value,
    index: &mut RefIndex,
) -> Result<RelationSets> {
    let mut sets = RelationSets::default();
    for relation in Relation::ALL {
        let kind = relation.kind();
        for member in relation_members(payload, relation.payload_key()) {
            let Some(wp_id) = remote_id(member) else {
                continue;
            };
            let local_id = if index.is_bulk() {
                index.get(kind, wp_id).map(|r| r.id)
            } else {
                upsert_reference(conn, site_id, kind, member, index, None)
                    .await?
                    .record()
                    .map(|r| r.id)
            };
            match local_id {
                Some(id) => {
                    sets.get_mut(relation).insert(id);
                }
                None => debug!(kind = kind.as_str(), wp_id, "relation member not stored; omitted"),
            }
        }
    }
    Ok(sets)
}

/// Result of [`upsert_post`]; carries the local id when one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Buffered,
    Created(i64),
    /// Scalar columns or relation sets changed.
    Updated(i64),
    Unchanged(i64),
    Skipped,
}

/// Posts waiting for a batch insert, with their full relation sets.
#[derive(Debug, Default)]
pub struct PostBatch {
    posts: Vec<NewPost>,
}

impl PostBatch {
    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    fn push(&mut self, post: NewPost) {
        match self.posts.iter_mut().find(|p| p.wp_id == post.wp_id) {
            Some(slot) => *slot = post,
            None => self.posts.push(post),
        }
    }
}

/// Creates or refreshes one post. Relations are resolved by the caller.
///
/// An existing post has its scalar columns replaced when they differ and each
/// relation converged to exactly `relations`. A new post goes to `batch` when
/// given, else it is inserted and related immediately.
pub async fn upsert_post(
    conn: &mut SqliteConnection,
    site_id: i64,
    payload: &Value,
    author_id: Option<i64>,
    relations: RelationSets,
    batch: Option<&mut PostBatch>,
) -> Result<PostOutcome> {
    let Some(wp_id) = remote_id(payload) else {
        warn!("post payload without remote id; skipped");
        return Ok(PostOutcome::Skipped);
    };
    let fields = mapping::post_fields(payload, author_id);

    if let Some(existing) = db::find_post(conn, site_id, wp_id).await? {
        let mut changed = false;
        if existing.fields != fields {
            db::update_post(conn, existing.id, &fields).await?;
            changed = true;
        }
        changed |= apply_relation_deltas(conn, existing.id, &relations).await?;
        return Ok(if changed {
            PostOutcome::Updated(existing.id)
        } else {
            PostOutcome::Unchanged(existing.id)
        });
    }

    let post = NewPost {
        wp_id,
        fields,
        relations,
    };
    if let Some(batch) = batch {
        batch.push(post);
        return Ok(PostOutcome::Buffered);
    }

    let id = db::insert_post(conn, site_id, wp_id, &post.fields).await?;
    // An upsert may have hit a row created concurrently, so converge rather
    // than blindly add.
    apply_relation_deltas(conn, id, &post.relations).await?;
    Ok(PostOutcome::Created(id))
}

/// Brings each relation of a stored post to the desired set. Returns true if
/// any membership changed.
async fn apply_relation_deltas(
    conn: &mut SqliteConnection,
    post_id: i64,
    desired: &RelationSets,
) -> Result<bool> {
    let mut changed = false;
    for relation in Relation::ALL {
        let current = db::relation_members(conn, relation, post_id).await?;
        let (to_add, to_remove) = resolve_set_delta(desired.get(relation), &current);
        if to_add.is_empty() && to_remove.is_empty() {
            continue;
        }
        db::add_relation_members(conn, relation, post_id, &to_add).await?;
        db::remove_relation_members(conn, relation, post_id, &to_remove).await?;
        changed = true;
    }
    Ok(changed)
}

/// Inserts every buffered post in one pass, then looks the rows up again by
/// remote id and attaches their relation sets. Returns the number inserted.
pub async fn flush_batch(
    conn: &mut SqliteConnection,
    site_id: i64,
    batch: &mut PostBatch,
) -> Result<u64> {
    if batch.is_empty() {
        return Ok(0);
    }
    let posts = std::mem::take(&mut batch.posts);
    let inserted = db::bulk_insert_posts(conn, site_id, &posts).await?;

    let wp_ids: Vec<i64> = posts.iter().map(|p| p.wp_id).collect();
    let ids = db::post_ids_by_wp_id(conn, site_id, &wp_ids).await?;
    for post in &posts {
        let Some(&post_id) = ids.get(&post.wp_id) else {
            warn!(wp_id = post.wp_id, "batched post missing after insert");
            continue;
        };
        for relation in Relation::ALL {
            db::add_relation_members(conn, relation, post_id, post.relations.get(relation))
                .await?;
        }
    }
    Ok(inserted)
}
