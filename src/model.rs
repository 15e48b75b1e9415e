use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub const POST_TYPE_ATTACHMENT: &str = "attachment";
pub const POST_TYPE_POST: &str = "post";
pub const POST_TYPE_PAGE: &str = "page";

/// Reference data that posts point at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RefKind {
    Category,
    Tag,
    Author,
    Media,
}

impl RefKind {
    /// Order in which a site load walks the reference endpoints.
    pub const ALL: [RefKind; 4] = [RefKind::Category, RefKind::Tag, RefKind::Author, RefKind::Media];

    pub fn as_str(&self) -> &'static str {
        match self {
            RefKind::Category => "category",
            RefKind::Tag => "tag",
            RefKind::Author => "author",
            RefKind::Media => "media",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            RefKind::Category => "categories",
            RefKind::Tag => "tags",
            RefKind::Author => "authors",
            RefKind::Media => "media",
        }
    }

    /// Listing endpoint under `sites/{site_id}/`. The same word keys the item
    /// list in the response body.
    pub fn endpoint(&self) -> &'static str {
        match self {
            RefKind::Category => "categories",
            RefKind::Tag => "tags",
            RefKind::Author => "users",
            RefKind::Media => "media",
        }
    }
}

/// Many-to-many relations carried by a post.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Relation {
    Categories,
    Tags,
    Attachments,
}

impl Relation {
    pub const ALL: [Relation; 3] = [Relation::Categories, Relation::Tags, Relation::Attachments];

    pub fn kind(&self) -> RefKind {
        match self {
            Relation::Categories => RefKind::Category,
            Relation::Tags => RefKind::Tag,
            Relation::Attachments => RefKind::Media,
        }
    }

    pub fn join_table(&self) -> &'static str {
        match self {
            Relation::Categories => "post_categories",
            Relation::Tags => "post_tags",
            Relation::Attachments => "post_attachments",
        }
    }

    pub fn member_column(&self) -> &'static str {
        match self {
            Relation::Categories => "category_id",
            Relation::Tags => "tag_id",
            Relation::Attachments => "media_id",
        }
    }

    /// Key of the relation inside a post payload.
    pub fn payload_key(&self) -> &'static str {
        match self {
            Relation::Categories => "categories",
            Relation::Tags => "tags",
            Relation::Attachments => "attachments",
        }
    }
}

/// What a site load processes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ValueEnum)]
pub enum LoadScope {
    #[default]
    All,
    #[value(name = "ref_data")]
    RefData,
    Attachment,
    Post,
    Page,
}

impl LoadScope {
    pub fn includes_ref_data(&self) -> bool {
        matches!(self, LoadScope::All | LoadScope::RefData)
    }

    /// Post types to crawl, in processing order.
    pub fn post_types(&self) -> &'static [&'static str] {
        match self {
            LoadScope::All => &[POST_TYPE_ATTACHMENT, POST_TYPE_POST, POST_TYPE_PAGE],
            LoadScope::RefData => &[],
            LoadScope::Attachment => &[POST_TYPE_ATTACHMENT],
            LoadScope::Post => &[POST_TYPE_POST],
            LoadScope::Page => &[POST_TYPE_PAGE],
        }
    }
}

/// Remote post status filter. Anything but `publish` needs an auth token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ValueEnum)]
pub enum PostStatus {
    #[default]
    Publish,
    Private,
    Draft,
    Pending,
    Future,
    Trash,
    Any,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Publish => "publish",
            PostStatus::Private => "private",
            PostStatus::Draft => "draft",
            PostStatus::Pending => "pending",
            PostStatus::Future => "future",
            PostStatus::Trash => "trash",
            PostStatus::Any => "any",
        }
    }

    /// Local status filter for watermark queries; `any` matches every row.
    pub fn as_filter(&self) -> Option<&'static str> {
        match self {
            PostStatus::Any => None,
            other => Some(other.as_str()),
        }
    }
}
