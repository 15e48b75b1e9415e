#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use wp_mirror::config::SyncSettings;
use wp_mirror::db::Pool;
use wp_mirror::sync::SiteLoader;
use wp_mirror::wp::model::{as_int, parse_timestamp, timestamp_field};
use wp_mirror::wp::{ApiResponse, Params, WpTransport};

pub const SITE_ID: i64 = 42;

pub async fn setup_pool() -> Pool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub params: Params,
}

impl Call {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Remote content served by [`FakeWordPress`]. Tests edit it between runs.
#[derive(Debug, Default, Clone)]
pub struct SiteState {
    pub categories: Vec<Value>,
    pub tags: Vec<Value>,
    pub users: Vec<Value>,
    pub media: Vec<Value>,
    /// Every post type, attachments included.
    pub posts: Vec<Value>,
    /// Paths answered with a 500.
    pub failing: HashSet<String>,
    /// Every request errors before any response.
    pub unreachable: bool,
}

/// In-memory stand-in for the REST API that pages like the real one and
/// records every request.
#[derive(Clone, Default)]
pub struct FakeWordPress {
    state: Arc<Mutex<SiteState>>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl FakeWordPress {
    pub fn new(state: SiteState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn edit(&self, f: impl FnOnce(&mut SiteState)) {
        let mut guard = self.state.lock().await;
        f(&mut guard);
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn calls_to(&self, path: &str) -> Vec<Call> {
        self.calls
            .lock()
            .await
            .iter()
            .filter(|c| c.path == path)
            .cloned()
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.calls.lock().await.clear();
    }

    fn numbered(items: &[Value], key: &str, params: &Params) -> ApiResponse {
        let number = param_int(params, "number").unwrap_or(100).max(1) as usize;
        let page = param_int(params, "page").unwrap_or(1).max(1) as usize;
        let start = (page - 1) * number;
        page_body(items, key, start, number, None)
    }

    fn offset(items: &[Value], key: &str, params: &Params) -> ApiResponse {
        let number = param_int(params, "number").unwrap_or(100).max(1) as usize;
        let start = param_int(params, "offset").unwrap_or(0).max(0) as usize;
        page_body(items, key, start, number, None)
    }

    fn posts(state: &SiteState, params: &Params) -> ApiResponse {
        let ty = param(params, "type").unwrap_or("post");
        let status = param(params, "status").unwrap_or("publish");
        let after = param(params, "modified_after").and_then(parse_timestamp);
        let parent = param_int(params, "parent_id");
        let only_ids = param(params, "fields") == Some("ID");

        let matching: Vec<Value> = state
            .posts
            .iter()
            .filter(|p| p["type"] == ty)
            .filter(|p| status == "any" || p["status"] == status)
            .filter(|p| match after {
                Some(after) => timestamp_field(p, "modified").map_or(false, |m| m > after),
                None => true,
            })
            .filter(|p| match parent {
                Some(parent) => as_int(p["parent"].get("ID")) == Some(parent),
                None => true,
            })
            .map(|p| if only_ids { json!({"ID": p["ID"]}) } else { p.clone() })
            .collect();

        let number = param_int(params, "number").unwrap_or(20).max(1) as usize;
        let start = param(params, "page_handle")
            .and_then(|h| h.strip_prefix("from-"))
            .and_then(|h| h.parse::<usize>().ok())
            .unwrap_or(0);
        let next = (start + number < matching.len()).then(|| format!("from-{}", start + number));
        page_body(&matching, "posts", start, number, next)
    }
}

fn param<'p>(params: &'p Params, key: &str) -> Option<&'p str> {
    params
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn param_int(params: &Params, key: &str) -> Option<i64> {
    param(params, key).and_then(|v| v.parse().ok())
}

fn page_body(
    items: &[Value],
    key: &str,
    start: usize,
    number: usize,
    next: Option<String>,
) -> ApiResponse {
    let page: Vec<Value> = items.iter().skip(start).take(number).cloned().collect();
    let meta = match next {
        Some(handle) => json!({"next_page": handle}),
        None => json!({}),
    };
    let mut body = serde_json::Map::new();
    body.insert("found".into(), json!(items.len()));
    body.insert(key.to_string(), Value::Array(page));
    body.insert("meta".into(), meta);
    ApiResponse::ok(Value::Object(body).to_string())
}

#[async_trait]
impl WpTransport for FakeWordPress {
    async fn get(&self, path: &str, params: &[(String, String)]) -> Result<ApiResponse> {
        let params = params.to_vec();
        self.calls.lock().await.push(Call {
            path: path.to_string(),
            params: params.clone(),
        });

        let state = self.state.lock().await;
        if state.unreachable {
            return Err(anyhow!("connection refused"));
        }
        if state.failing.contains(path) {
            return Ok(ApiResponse::error(500, r#"{"error":"internal"}"#));
        }

        let prefix = format!("sites/{SITE_ID}/");
        let Some(rest) = path.strip_prefix(&prefix) else {
            return Ok(ApiResponse::error(404, r#"{"error":"unknown_blog"}"#));
        };
        let response = match rest {
            "categories" => Self::numbered(&state.categories, "categories", &params),
            "tags" => Self::numbered(&state.tags, "tags", &params),
            "users" => Self::offset(&state.users, "users", &params),
            "media" => {
                let after = param(&params, "after").and_then(parse_timestamp);
                let media: Vec<Value> = state
                    .media
                    .iter()
                    .filter(|m| match after {
                        Some(after) => timestamp_field(m, "date").map_or(false, |d| d > after),
                        None => true,
                    })
                    .cloned()
                    .collect();
                Self::numbered(&media, "media", &params)
            }
            "posts" | "posts/" => Self::posts(&state, &params),
            other => {
                let id = other.strip_prefix("posts/").and_then(|id| id.parse::<i64>().ok());
                match id.and_then(|id| state.posts.iter().find(|p| as_int(p.get("ID")) == Some(id))) {
                    Some(post) => ApiResponse::ok(post.to_string()),
                    None => ApiResponse::error(404, r#"{"error":"unknown_post"}"#),
                }
            }
        };
        Ok(response)
    }
}

pub fn loader(fake: &FakeWordPress, pool: &Pool) -> SiteLoader {
    loader_with(fake, pool, SyncSettings::default())
}

pub fn loader_with(fake: &FakeWordPress, pool: &Pool, settings: SyncSettings) -> SiteLoader {
    SiteLoader::new(Arc::new(fake.clone()), pool.clone(), SITE_ID, settings)
}

// ---------------------------------------------------------------------------
// Payload builders
// ---------------------------------------------------------------------------

pub fn category(id: i64, name: &str) -> Value {
    json!({
        "ID": id,
        "name": name,
        "slug": name.to_lowercase(),
        "description": "",
        "post_count": 1,
        "parent": 0
    })
}

pub fn tag(id: i64, name: &str) -> Value {
    json!({
        "ID": id,
        "name": name,
        "slug": name.to_lowercase(),
        "description": "",
        "post_count": 1
    })
}

pub fn author(id: i64, login: &str) -> Value {
    json!({
        "ID": id,
        "login": login,
        "email": false,
        "name": login,
        "nice_name": login,
        "URL": format!("https://{login}.example"),
        "avatar_URL": "https://gravatar.example/a.png",
        "profile_URL": format!("https://gravatar.example/{login}")
    })
}

pub fn media(id: i64, post_id: i64) -> Value {
    json!({
        "ID": id,
        "URL": format!("https://site.example/media/{id}.jpg"),
        "guid": format!("https://site.example/media/{id}.jpg"),
        "date": "2024-03-01T09:00:00+00:00",
        "post_ID": post_id,
        "file": format!("{id}.jpg"),
        "extension": "jpg",
        "mime_type": "image/jpeg",
        "width": 640,
        "height": 480,
        "title": "",
        "caption": "",
        "description": "",
        "alt": "",
        "exif": {"camera": "X100"}
    })
}

/// A post payload. `modified` doubles as `date`.
pub fn post(id: i64, post_type: &str, modified: &str) -> Value {
    json!({
        "ID": id,
        "site_ID": SITE_ID,
        "author": author(7, "editor"),
        "date": modified,
        "modified": modified,
        "title": format!("Post {id}"),
        "URL": format!("https://site.example/{id}"),
        "short_URL": format!("https://wp.me/p{id}"),
        "content": "<p>Body</p>",
        "excerpt": "",
        "slug": format!("post-{id}"),
        "guid": format!("https://site.example/?p={id}"),
        "status": "publish",
        "sticky": false,
        "password": "",
        "parent": false,
        "type": post_type,
        "likes_enabled": true,
        "sharing_enabled": true,
        "like_count": 0,
        "global_ID": format!("g{id}"),
        "featured_image": "",
        "post_thumbnail": null,
        "format": "standard",
        "menu_order": 0,
        "metadata": false,
        "categories": {},
        "tags": {},
        "attachments": {}
    })
}

/// An attachment post whose parent is `parent_id`.
pub fn attachment_post(id: i64, parent_id: i64, modified: &str) -> Value {
    let mut p = post(id, "attachment", modified);
    p["parent"] = json!({"ID": parent_id, "type": "post", "link": "", "title": ""});
    p
}

/// Replaces a relation of a post payload with members keyed by name or id,
/// the way the API embeds them.
pub fn with_relation(mut post: Value, key: &str, members: &[Value]) -> Value {
    let map: serde_json::Map<String, Value> = members
        .iter()
        .map(|m| {
            let k = m
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| m["ID"].to_string());
            (k, m.clone())
        })
        .collect();
    post[key] = Value::Object(map);
    post
}
