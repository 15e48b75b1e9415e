use super::model::{NewPost, Post, PostFields, RefRecord};
use crate::mapping::{fields_for, ColumnType, Fields};
use crate::model::{RefKind, Relation, POST_TYPE_ATTACHMENT};
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::query_builder::Separated;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

/// Upper bound on bind parameters per statement.
const MAX_BINDS: usize = 32766;
/// Ids per `IN (...)` list.
const ID_CHUNK: usize = 500;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let options = SqliteConnectOptions::from_str(&normalized)
        .with_context(|| format!("invalid database url: {normalized}"))?
        .create_if_missing(true)
        .foreign_keys(true)
        // Enable WAL and stricter durability.
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Full);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the parent
/// directory exists. Leaves in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    // Pass through non-sqlite schemes
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    // Strip prefix and optional //
    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    // Separate query string if any
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    // Expand leading ~/ to HOME
    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    // Ensure parent directory exists if any
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Rebuild URL, prefer sqlite:// form
    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// A bindable column value. Booleans are stored as integers and timestamps as
/// RFC 3339 text, which is what the sqlx chrono decoders read back.
enum SqlValue {
    Int(Option<i64>),
    Text(Option<String>),
}

impl SqlValue {
    fn from_field(column: ColumnType, value: Option<&Value>) -> Self {
        let value = value.unwrap_or(&Value::Null);
        match column {
            ColumnType::Text => SqlValue::Text(value.as_str().map(str::to_string)),
            ColumnType::Integer => SqlValue::Int(value.as_i64()),
            ColumnType::Json => SqlValue::Text(json_text(value)),
        }
    }

    fn bool(value: Option<bool>) -> Self {
        SqlValue::Int(value.map(i64::from))
    }

    fn time(value: Option<DateTime<Utc>>) -> Self {
        SqlValue::Text(value.map(|ts| ts.to_rfc3339_opts(SecondsFormat::AutoSi, false)))
    }
}

fn json_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn json_value(raw: Option<String>) -> Value {
    match raw {
        None => Value::Null,
        Some(raw) => match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(_) => Value::String(raw),
        },
    }
}

fn push_value(sep: &mut Separated<'_, '_, Sqlite, &'static str>, value: SqlValue) {
    match value {
        SqlValue::Int(v) => sep.push_bind(v),
        SqlValue::Text(v) => sep.push_bind(v),
    };
}

fn push_assignment(sep: &mut Separated<'_, '_, Sqlite, &'static str>, column: &str, value: SqlValue) {
    sep.push(format!("{column} = "));
    match value {
        SqlValue::Int(v) => sep.push_bind_unseparated(v),
        SqlValue::Text(v) => sep.push_bind_unseparated(v),
    };
}

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

fn read_ref(kind: RefKind, row: &SqliteRow) -> Result<RefRecord> {
    let mut fields = Fields::new();
    for spec in fields_for(kind) {
        let value = match spec.column {
            ColumnType::Text => row
                .try_get::<Option<String>, _>(spec.local)?
                .map(Value::String)
                .unwrap_or(Value::Null),
            ColumnType::Integer => row
                .try_get::<Option<i64>, _>(spec.local)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            ColumnType::Json => json_value(row.try_get(spec.local)?),
        };
        fields.insert(spec.local, value);
    }
    Ok(RefRecord {
        id: row.try_get("id")?,
        kind,
        site_id: row.try_get("site_id")?,
        wp_id: row.try_get("wp_id")?,
        fields,
        updated_at: row.try_get("updated_at")?,
    })
}

#[instrument(skip_all, fields(kind = kind.as_str()))]
pub async fn list_refs(pool: &Pool, site_id: i64, kind: RefKind) -> Result<Vec<RefRecord>> {
    let rows = sqlx::query(&format!("SELECT * FROM {} WHERE site_id = ?", kind.table()))
        .bind(site_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(|row| read_ref(kind, row)).collect()
}

pub async fn find_ref(
    conn: &mut SqliteConnection,
    site_id: i64,
    kind: RefKind,
    wp_id: i64,
) -> Result<Option<RefRecord>> {
    let row = sqlx::query(&format!(
        "SELECT * FROM {} WHERE site_id = ? AND wp_id = ?",
        kind.table()
    ))
    .bind(site_id)
    .bind(wp_id)
    .fetch_optional(&mut *conn)
    .await?;
    row.map(|row| read_ref(kind, &row)).transpose()
}

pub async fn find_refs_by_wp_ids(
    conn: &mut SqliteConnection,
    site_id: i64,
    kind: RefKind,
    wp_ids: &[i64],
) -> Result<Vec<RefRecord>> {
    let mut found = Vec::with_capacity(wp_ids.len());
    for chunk in wp_ids.chunks(ID_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT * FROM {} WHERE site_id = ",
            kind.table()
        ));
        qb.push_bind(site_id);
        qb.push(" AND wp_id IN (");
        {
            let mut sep = qb.separated(", ");
            for id in chunk {
                sep.push_bind(*id);
            }
        }
        qb.push(")");
        let rows = qb.build().fetch_all(&mut *conn).await?;
        for row in &rows {
            found.push(read_ref(kind, row)?);
        }
    }
    Ok(found)
}

fn ref_insert_prefix(kind: RefKind) -> String {
    let columns: Vec<&str> = fields_for(kind).iter().map(|spec| spec.local).collect();
    format!(
        "INSERT INTO {} (site_id, wp_id, {}, created_at, updated_at) ",
        kind.table(),
        columns.join(", ")
    )
}

/// Inserts the row unless `(site_id, wp_id)` already exists, then returns the
/// stored row and whether this call created it.
#[instrument(skip_all, fields(kind = kind.as_str(), wp_id = wp_id))]
pub async fn get_or_create_ref(
    conn: &mut SqliteConnection,
    site_id: i64,
    kind: RefKind,
    wp_id: i64,
    defaults: &Fields,
) -> Result<(RefRecord, bool)> {
    let inserted = bulk_insert_refs(conn, site_id, kind, &[(wp_id, defaults.clone())]).await?;
    let record = find_ref(conn, site_id, kind, wp_id)
        .await?
        .with_context(|| format!("{} {} vanished after insert", kind.as_str(), wp_id))?;
    Ok((record, inserted == 1))
}

/// Multi-row insert. Rows whose `(site_id, wp_id)` already exist are skipped;
/// returns the number actually inserted.
pub async fn bulk_insert_refs(
    conn: &mut SqliteConnection,
    site_id: i64,
    kind: RefKind,
    rows: &[(i64, Fields)],
) -> Result<u64> {
    let specs = fields_for(kind);
    let per_row = specs.len() + 4;
    let now = Utc::now();
    let mut inserted = 0;
    for chunk in rows.chunks((MAX_BINDS / per_row).max(1)) {
        let mut qb = QueryBuilder::<Sqlite>::new(ref_insert_prefix(kind));
        qb.push_values(chunk, |mut sep, (wp_id, fields)| {
            sep.push_bind(site_id);
            sep.push_bind(*wp_id);
            for spec in specs {
                push_value(&mut sep, SqlValue::from_field(spec.column, fields.get(spec.local)));
            }
            sep.push_bind(now);
            sep.push_bind(now);
        });
        qb.push(" ON CONFLICT(site_id, wp_id) DO NOTHING");
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

/// Writes every mapped column of `record` and bumps `updated_at`.
pub async fn update_ref(conn: &mut SqliteConnection, record: &mut RefRecord) -> Result<()> {
    let now = Utc::now();
    let mut qb = QueryBuilder::<Sqlite>::new(format!("UPDATE {} SET ", record.kind.table()));
    {
        let mut sep = qb.separated(", ");
        for spec in fields_for(record.kind) {
            push_assignment(
                &mut sep,
                spec.local,
                SqlValue::from_field(spec.column, record.fields.get(spec.local)),
            );
        }
        sep.push("updated_at = ");
        sep.push_bind_unseparated(now);
    }
    qb.push(" WHERE id = ");
    qb.push_bind(record.id);
    qb.build().execute(&mut *conn).await?;
    record.updated_at = now;
    Ok(())
}

#[instrument(skip_all, fields(kind = kind.as_str()))]
pub async fn delete_refs(pool: &Pool, site_id: i64, kind: RefKind) -> Result<u64> {
    let res = sqlx::query(&format!("DELETE FROM {} WHERE site_id = ?", kind.table()))
        .bind(site_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

// ---------------------------------------------------------------------------
// Posts
// ---------------------------------------------------------------------------

const POST_COLUMNS: [&str; 24] = [
    "author_id",
    "post_date",
    "modified",
    "title",
    "url",
    "short_url",
    "content",
    "excerpt",
    "slug",
    "guid",
    "status",
    "sticky",
    "password",
    "parent",
    "post_type",
    "likes_enabled",
    "sharing_enabled",
    "like_count",
    "global_id",
    "featured_image",
    "format",
    "menu_order",
    "metadata",
    "post_thumbnail",
];

/// Values in `POST_COLUMNS` order.
fn post_values(f: &PostFields) -> [SqlValue; 24] {
    [
        SqlValue::Int(f.author_id),
        SqlValue::time(f.post_date),
        SqlValue::time(f.modified),
        SqlValue::Text(f.title.clone()),
        SqlValue::Text(f.url.clone()),
        SqlValue::Text(f.short_url.clone()),
        SqlValue::Text(f.content.clone()),
        SqlValue::Text(f.excerpt.clone()),
        SqlValue::Text(f.slug.clone()),
        SqlValue::Text(f.guid.clone()),
        SqlValue::Text(f.status.clone()),
        SqlValue::bool(Some(f.sticky)),
        SqlValue::Text(f.password.clone()),
        SqlValue::Text(json_text(&f.parent)),
        SqlValue::Text(f.post_type.clone()),
        SqlValue::bool(f.likes_enabled),
        SqlValue::bool(f.sharing_enabled),
        SqlValue::Int(f.like_count),
        SqlValue::Text(f.global_id.clone()),
        SqlValue::Text(f.featured_image.clone()),
        SqlValue::Text(f.format.clone()),
        SqlValue::Int(f.menu_order),
        SqlValue::Text(json_text(&f.metadata)),
        SqlValue::Text(json_text(&f.post_thumbnail)),
    ]
}

fn read_post(row: &SqliteRow) -> Result<Post> {
    let fields = PostFields {
        author_id: row.try_get("author_id")?,
        post_date: row.try_get("post_date")?,
        modified: row.try_get("modified")?,
        title: row.try_get("title")?,
        url: row.try_get("url")?,
        short_url: row.try_get("short_url")?,
        content: row.try_get("content")?,
        excerpt: row.try_get("excerpt")?,
        slug: row.try_get("slug")?,
        guid: row.try_get("guid")?,
        status: row.try_get("status")?,
        sticky: row.try_get("sticky")?,
        password: row.try_get("password")?,
        parent: json_value(row.try_get("parent")?),
        post_type: row.try_get("post_type")?,
        likes_enabled: row.try_get("likes_enabled")?,
        sharing_enabled: row.try_get("sharing_enabled")?,
        like_count: row.try_get("like_count")?,
        global_id: row.try_get("global_id")?,
        featured_image: row.try_get("featured_image")?,
        format: row.try_get("format")?,
        menu_order: row.try_get("menu_order")?,
        metadata: json_value(row.try_get("metadata")?),
        post_thumbnail: json_value(row.try_get("post_thumbnail")?),
    };
    Ok(Post {
        id: row.try_get("id")?,
        site_id: row.try_get("site_id")?,
        wp_id: row.try_get("wp_id")?,
        fields,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn find_post(
    conn: &mut SqliteConnection,
    site_id: i64,
    wp_id: i64,
) -> Result<Option<Post>> {
    let row = sqlx::query("SELECT * FROM posts WHERE site_id = ? AND wp_id = ?")
        .bind(site_id)
        .bind(wp_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(read_post).transpose()
}

/// Inserts a post, or overwrites the row if a concurrent run inserted the same
/// `(site_id, wp_id)` first. Returns the local id.
#[instrument(skip_all, fields(wp_id = wp_id))]
pub async fn insert_post(
    conn: &mut SqliteConnection,
    site_id: i64,
    wp_id: i64,
    fields: &PostFields,
) -> Result<i64> {
    let now = Utc::now();
    let mut qb = QueryBuilder::<Sqlite>::new(format!(
        "INSERT INTO posts (site_id, wp_id, {}, created_at, updated_at) VALUES (",
        POST_COLUMNS.join(", ")
    ));
    {
        let mut sep = qb.separated(", ");
        sep.push_bind(site_id);
        sep.push_bind(wp_id);
        for value in post_values(fields) {
            push_value(&mut sep, value);
        }
        sep.push_bind(now);
        sep.push_bind(now);
    }
    let updates: Vec<String> = POST_COLUMNS
        .iter()
        .chain(std::iter::once(&"updated_at"))
        .map(|c| format!("{c} = excluded.{c}"))
        .collect();
    qb.push(format!(
        ") ON CONFLICT(site_id, wp_id) DO UPDATE SET {} RETURNING id",
        updates.join(", ")
    ));
    let id: i64 = qb.build().fetch_one(&mut *conn).await?.try_get("id")?;
    Ok(id)
}

/// Overwrites every scalar column of a post and bumps `updated_at`.
pub async fn update_post(conn: &mut SqliteConnection, id: i64, fields: &PostFields) -> Result<()> {
    let mut qb = QueryBuilder::<Sqlite>::new("UPDATE posts SET ");
    {
        let mut sep = qb.separated(", ");
        for (column, value) in POST_COLUMNS.iter().zip(post_values(fields)) {
            push_assignment(&mut sep, column, value);
        }
        sep.push("updated_at = ");
        sep.push_bind_unseparated(Utc::now());
    }
    qb.push(" WHERE id = ");
    qb.push_bind(id);
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

/// Multi-row insert of buffered posts; rows that already exist are skipped.
pub async fn bulk_insert_posts(
    conn: &mut SqliteConnection,
    site_id: i64,
    posts: &[NewPost],
) -> Result<u64> {
    let per_row = POST_COLUMNS.len() + 4;
    let now = Utc::now();
    let mut inserted = 0;
    for chunk in posts.chunks((MAX_BINDS / per_row).max(1)) {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "INSERT INTO posts (site_id, wp_id, {}, created_at, updated_at) ",
            POST_COLUMNS.join(", ")
        ));
        qb.push_values(chunk, |mut sep, post| {
            sep.push_bind(site_id);
            sep.push_bind(post.wp_id);
            for value in post_values(&post.fields) {
                push_value(&mut sep, value);
            }
            sep.push_bind(now);
            sep.push_bind(now);
        });
        qb.push(" ON CONFLICT(site_id, wp_id) DO NOTHING");
        inserted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(inserted)
}

/// Local ids for the given remote post ids; unknown ids are absent from the map.
pub async fn post_ids_by_wp_id(
    conn: &mut SqliteConnection,
    site_id: i64,
    wp_ids: &[i64],
) -> Result<HashMap<i64, i64>> {
    let mut ids = HashMap::with_capacity(wp_ids.len());
    for chunk in wp_ids.chunks(ID_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new("SELECT id, wp_id FROM posts WHERE site_id = ");
        qb.push_bind(site_id);
        qb.push(" AND wp_id IN (");
        {
            let mut sep = qb.separated(", ");
            for id in chunk {
                sep.push_bind(*id);
            }
        }
        qb.push(")");
        for row in qb.build().fetch_all(&mut *conn).await? {
            ids.insert(row.try_get::<i64, _>("wp_id")?, row.try_get::<i64, _>("id")?);
        }
    }
    Ok(ids)
}

#[instrument(skip_all, fields(post_type = post_type))]
pub async fn delete_posts(pool: &Pool, site_id: i64, post_type: &str) -> Result<u64> {
    let res = sqlx::query("DELETE FROM posts WHERE site_id = ? AND post_type = ?")
        .bind(site_id)
        .bind(post_type)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Most recent `modified` among stored posts of a type, optionally of one status.
#[instrument(skip_all, fields(post_type = post_type))]
pub async fn latest_modified(
    pool: &Pool,
    site_id: i64,
    post_type: &str,
    status: Option<&str>,
) -> Result<Option<DateTime<Utc>>> {
    let latest: Option<DateTime<Utc>> = sqlx::query_scalar(
        "SELECT MAX(modified) FROM posts WHERE site_id = ? AND post_type = ? AND (? IS NULL OR status = ?)",
    )
    .bind(site_id)
    .bind(post_type)
    .bind(status)
    .bind(status)
    .fetch_one(pool)
    .await?;
    Ok(latest)
}

// ---------------------------------------------------------------------------
// Post relations
// ---------------------------------------------------------------------------

/// Local ids of the current members of `relation` for a post.
pub async fn relation_members(
    conn: &mut SqliteConnection,
    relation: Relation,
    post_id: i64,
) -> Result<BTreeSet<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(&format!(
        "SELECT {} FROM {} WHERE post_id = ?",
        relation.member_column(),
        relation.join_table()
    ))
    .bind(post_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().collect())
}

/// Remote ids of the current members of `relation` for a post.
pub async fn relation_member_wp_ids(
    pool: &Pool,
    relation: Relation,
    post_id: i64,
) -> Result<BTreeSet<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(&format!(
        "SELECT r.wp_id FROM {join} j JOIN {refs} r ON r.id = j.{col} WHERE j.post_id = ?",
        join = relation.join_table(),
        refs = relation.kind().table(),
        col = relation.member_column()
    ))
    .bind(post_id)
    .fetch_all(pool)
    .await?;
    Ok(ids.into_iter().collect())
}

pub async fn add_relation_members(
    conn: &mut SqliteConnection,
    relation: Relation,
    post_id: i64,
    member_ids: &BTreeSet<i64>,
) -> Result<()> {
    if member_ids.is_empty() {
        return Ok(());
    }
    let ids: Vec<i64> = member_ids.iter().copied().collect();
    for chunk in ids.chunks(ID_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "INSERT OR IGNORE INTO {} (post_id, {}) ",
            relation.join_table(),
            relation.member_column()
        ));
        qb.push_values(chunk, |mut sep, member| {
            sep.push_bind(post_id);
            sep.push_bind(*member);
        });
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

pub async fn remove_relation_members(
    conn: &mut SqliteConnection,
    relation: Relation,
    post_id: i64,
    member_ids: &BTreeSet<i64>,
) -> Result<()> {
    if member_ids.is_empty() {
        return Ok(());
    }
    let ids: Vec<i64> = member_ids.iter().copied().collect();
    for chunk in ids.chunks(ID_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "DELETE FROM {} WHERE post_id = ",
            relation.join_table()
        ));
        qb.push_bind(post_id);
        qb.push(format!(" AND {} IN (", relation.member_column()));
        {
            let mut sep = qb.separated(", ");
            for member in chunk {
                sep.push_bind(*member);
            }
        }
        qb.push(")");
        qb.build().execute(&mut *conn).await?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Attachment children
// ---------------------------------------------------------------------------

/// Remote ids of stored attachment posts whose parent is `parent_wp_id`.
pub async fn attachment_children(
    conn: &mut SqliteConnection,
    site_id: i64,
    parent_wp_id: i64,
) -> Result<BTreeSet<i64>> {
    let ids: Vec<i64> = sqlx::query_scalar(
        "SELECT wp_id FROM posts WHERE site_id = ? AND post_type = ? \
         AND json_valid(parent) AND json_extract(parent, '$.ID') = ?",
    )
    .bind(site_id)
    .bind(POST_TYPE_ATTACHMENT)
    .bind(parent_wp_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids.into_iter().collect())
}

pub async fn delete_attachment_children(
    conn: &mut SqliteConnection,
    site_id: i64,
    parent_wp_id: i64,
    wp_ids: &BTreeSet<i64>,
) -> Result<u64> {
    let ids: Vec<i64> = wp_ids.iter().copied().collect();
    let mut deleted = 0;
    for chunk in ids.chunks(ID_CHUNK) {
        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM posts WHERE site_id = ");
        qb.push_bind(site_id);
        qb.push(" AND post_type = ");
        qb.push_bind(POST_TYPE_ATTACHMENT);
        qb.push(" AND json_valid(parent) AND json_extract(parent, '$.ID') = ");
        qb.push_bind(parent_wp_id);
        qb.push(" AND wp_id IN (");
        {
            let mut sep = qb.separated(", ");
            for id in chunk {
                sep.push_bind(*id);
            }
        }
        qb.push(")");
        deleted += qb.build().execute(&mut *conn).await?.rows_affected();
    }
    Ok(deleted)
}
