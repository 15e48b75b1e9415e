//! Database entity models returned by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::mapping::Fields;
use crate::model::{RefKind, Relation};

/// A stored author, category, tag or media row. The mapped columns live in
/// `fields`, keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct RefRecord {
    pub id: i64,
    pub kind: RefKind,
    pub site_id: i64,
    pub wp_id: i64,
    pub fields: Fields,
    pub updated_at: DateTime<Utc>,
}

impl RefRecord {
    pub fn text(&self, column: &str) -> Option<&str> {
        self.fields.get(column).and_then(Value::as_str)
    }
}

/// Every scalar column of a post. Replaced as a whole on each sync.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PostFields {
    pub author_id: Option<i64>,
    pub post_date: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub short_url: Option<String>,
    pub content: Option<String>,
    pub excerpt: Option<String>,
    pub slug: Option<String>,
    pub guid: Option<String>,
    pub status: Option<String>,
    pub sticky: bool,
    pub password: Option<String>,
    /// `false` for top-level posts, else an object carrying the parent `ID`.
    pub parent: Value,
    pub post_type: Option<String>,
    pub likes_enabled: Option<bool>,
    pub sharing_enabled: Option<bool>,
    pub like_count: Option<i64>,
    pub global_id: Option<String>,
    pub featured_image: Option<String>,
    pub format: Option<String>,
    pub menu_order: Option<i64>,
    pub metadata: Value,
    pub post_thumbnail: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: i64,
    pub site_id: i64,
    pub wp_id: i64,
    pub fields: PostFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Local ids of the members of each post relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationSets {
    pub categories: BTreeSet<i64>,
    pub tags: BTreeSet<i64>,
    pub attachments: BTreeSet<i64>,
}

impl RelationSets {
    pub fn get(&self, relation: Relation) -> &BTreeSet<i64> {
        match relation {
            Relation::Categories => &self.categories,
            Relation::Tags => &self.tags,
            Relation::Attachments => &self.attachments,
        }
    }

    pub fn get_mut(&mut self, relation: Relation) -> &mut BTreeSet<i64> {
        match relation {
            Relation::Categories => &mut self.categories,
            Relation::Tags => &mut self.tags,
            Relation::Attachments => &mut self.attachments,
        }
    }
}

/// A post waiting for batch insertion, with the relation members to attach
/// once it has a local id.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub wp_id: i64,
    pub fields: PostFields,
    pub relations: RelationSets,
}
