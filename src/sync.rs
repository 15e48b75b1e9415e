//! Site and single-post loading.
//!
//! [`SiteLoader::load_site`] walks the reference endpoints, then the post
//! listings of the requested types, one page at a time. Each page is stored
//! in one transaction; attachment sweeps for the page's posts run after the
//! commit and before the next page is requested.
//! [`SiteLoader::load_post`] refreshes a single post without any cached
//! reference data, so it can run alongside a site load.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteConnection;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{Config, SyncSettings};
use crate::db::{self, Pool, Post};
use crate::model::{LoadScope, PostStatus, RefKind, POST_TYPE_POST};
use crate::paginate::{Page, PageEnd, PageStyle, Paginator};
use crate::reconcile::{self, PendingRefs, PostBatch, PostOutcome, Upserted};
use crate::refindex::RefIndex;
use crate::sweep::{self, SweepOutcome};
use crate::wp::model::{as_int, remote_id};
use crate::wp::{Api, WpClient, WpTransport};

const POSTS_PAGE_SIZE: u32 = 100;
const POSTS_MAX_PAGES: u32 = 200;
/// Media uploads older than the watermark by more than this are not listed
/// outside full mode.
const MEDIA_LOOKBACK_DAYS: i64 = 90;

/// Listing parameters of a reference endpoint.
struct RefListing {
    page_size: u32,
    max_pages: u32,
    style: PageStyle,
    early_stop: bool,
}

fn ref_listing(kind: RefKind) -> RefListing {
    match kind {
        RefKind::Category => RefListing {
            page_size: 100,
            max_pages: 30,
            style: PageStyle::Numbered,
            early_stop: true,
        },
        RefKind::Tag => RefListing {
            page_size: 1000,
            max_pages: 30,
            style: PageStyle::Numbered,
            early_stop: true,
        },
        RefKind::Author => RefListing {
            page_size: 100,
            max_pages: 10,
            style: PageStyle::Offset,
            early_stop: true,
        },
        RefKind::Media => RefListing {
            page_size: 100,
            max_pages: 150,
            style: PageStyle::Numbered,
            early_stop: false,
        },
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Delete stored records of each processed kind before fetching it.
    pub purge: bool,
    /// Ignore watermarks and crawl the whole history.
    pub full: bool,
    /// Explicit lower bound for post `modified` timestamps.
    pub modified_after: Option<DateTime<Utc>>,
    pub scope: LoadScope,
    pub status: PostStatus,
    /// Overrides the `number` parameter of every listing.
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub enum SyncState {
    #[default]
    Idle,
    LoadingReferenceData,
    LoadingPosts(String),
    Done,
    Failed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Idle => write!(f, "idle"),
            SyncState::LoadingReferenceData => write!(f, "loading reference data"),
            SyncState::LoadingPosts(post_type) => write!(f, "loading posts ({post_type})"),
            SyncState::Done => write!(f, "done"),
            SyncState::Failed => write!(f, "failed"),
        }
    }
}

/// Counters for one site load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub refs_created: u64,
    pub refs_updated: u64,
    pub posts_created: u64,
    pub posts_updated: u64,
    pub posts_unchanged: u64,
    pub orphans_removed: u64,
    /// Items whose store writes failed; their siblings were still processed.
    pub failed_items: u64,
    /// Listings stopped by a non-ok response, an unreadable body or a page
    /// that could not be stored.
    pub failed_chains: u64,
    /// Listings stopped by their page budget.
    pub truncated_chains: u64,
    pub state: SyncState,
}

impl SyncReport {
    /// Rows inserted or rewritten. Zero for a run that found nothing new.
    pub fn writes(&self) -> u64 {
        self.refs_created
            + self.refs_updated
            + self.posts_created
            + self.posts_updated
            + self.orphans_removed
    }
}

/// Loads one remote site into the local store.
pub struct SiteLoader {
    transport: Arc<dyn WpTransport>,
    pool: Pool,
    site_id: i64,
    settings: SyncSettings,
}

impl SiteLoader {
    pub fn new(
        transport: Arc<dyn WpTransport>,
        pool: Pool,
        site_id: i64,
        settings: SyncSettings,
    ) -> Self {
        Self {
            transport,
            pool,
            site_id,
            settings,
        }
    }

    /// Loader for the configured site over the HTTP client. Fails on an
    /// invalid API base URL before any request is made.
    pub fn from_config(cfg: &Config, pool: Pool) -> Result<Self> {
        let client = WpClient::from_config(cfg)?;
        let api = Api::from_client(client);
        Ok(Self::new(
            Arc::new(api),
            pool,
            cfg.wordpress.site_id,
            cfg.sync.clone(),
        ))
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Runs a site load. Store failures before a listing starts (purge,
    /// watermark, index build) fail the call; everything else is reflected in
    /// the report.
    pub async fn load_site(&self, opts: LoadOptions) -> Result<SyncReport> {
        let span = info_span!("load_site", run_id = %Uuid::new_v4(), site_id = self.site_id);
        async move {
            info!(?opts, "site load started");
            let mut run = SyncRun::new(self, opts);
            match run.execute().await {
                Ok(()) => {
                    info!(report = ?run.report, "site load finished");
                    Ok(run.report)
                }
                Err(err) => {
                    error!(?err, state = %run.report.state, "site load failed");
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Fetches one post and stores it with its author and relations. Returns
    /// `None` when the source does not return the post.
    pub async fn load_post(&self, wp_post_id: i64) -> Result<Option<Post>> {
        let span = info_span!(
            "load_post",
            run_id = %Uuid::new_v4(),
            site_id = self.site_id,
            wp_post_id
        );
        async move {
            let path = format!("sites/{}/posts/{}", self.site_id, wp_post_id);
            let response = match self.transport.get(&path, &[]).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(?err, "Unable to load post");
                    return Ok(None);
                }
            };
            if !response.ok || !response.has_body() {
                warn!(status = response.status, body = %response.text, "Unable to load post");
                return Ok(None);
            }
            let payload = match response.json() {
                Ok(payload) if payload.is_object() => payload,
                _ => {
                    warn!(body = %response.text, "post response is not a JSON object");
                    return Ok(None);
                }
            };
            let Some(wp_id) = remote_id(&payload) else {
                warn!("post response carries no ID");
                return Ok(None);
            };

            let mut index = RefIndex::empty();
            let mut tx = self.pool.begin().await?;
            let outcome = store_post(&mut tx, self.site_id, &payload, &mut index, None).await?;
            tx.commit().await?;
            info!(?outcome, "post stored");

            if is_post_type(&payload) {
                self.sweep(wp_id).await;
            }

            let mut conn = self.pool.acquire().await?;
            db::find_post(&mut conn, self.site_id, wp_id).await
        }
        .instrument(span)
        .await
    }

    /// Orphan sweep for one parent. Failures are logged and never propagate.
    async fn sweep(&self, parent_wp_id: i64) -> u64 {
        match sweep::sweep_orphan_attachments(
            self.transport.as_ref(),
            &self.pool,
            self.site_id,
            parent_wp_id,
        )
        .await
        {
            Ok(SweepOutcome::Swept { removed }) => removed,
            Ok(_) => 0,
            Err(err) => {
                warn!(?err, parent_wp_id, "attachment sweep failed");
                0
            }
        }
    }
}

/// Resolves a post's author and relations, then upserts it.
async fn store_post(
    conn: &mut SqliteConnection,
    site_id: i64,
    payload: &Value,
    index: &mut RefIndex,
    batch: Option<&mut PostBatch>,
) -> Result<PostOutcome> {
    let author_id = reconcile::resolve_author(conn, site_id, payload, index).await?;
    let relations = reconcile::resolve_relations(conn, site_id, payload, index).await?;
    reconcile::upsert_post(conn, site_id, payload, author_id, relations, batch).await
}

fn is_post_type(payload: &Value) -> bool {
    payload.get("type").and_then(Value::as_str) == Some(POST_TYPE_POST)
}

/// State of one `load_site` call.
struct SyncRun<'a> {
    loader: &'a SiteLoader,
    opts: LoadOptions,
    index: RefIndex,
    report: SyncReport,
    /// The source could not be reached; stop without starting new listings.
    unreachable: bool,
}

impl<'a> SyncRun<'a> {
    fn new(loader: &'a SiteLoader, opts: LoadOptions) -> Self {
        Self {
            loader,
            opts,
            index: RefIndex::empty(),
            report: SyncReport::default(),
            unreachable: false,
        }
    }

    fn transition(&mut self, state: SyncState) {
        info!(from = %self.report.state, to = %state, "state");
        self.report.state = state;
    }

    async fn execute(&mut self) -> Result<()> {
        if self.opts.scope.includes_ref_data() {
            self.transition(SyncState::LoadingReferenceData);
            for kind in RefKind::ALL {
                self.load_references(kind).await?;
                if self.unreachable {
                    self.transition(SyncState::Failed);
                    return Ok(());
                }
            }
        }

        let post_types = self.opts.scope.post_types();
        if !post_types.is_empty() {
            self.index = RefIndex::load(&self.loader.pool, self.loader.site_id).await?;
            for post_type in post_types {
                self.transition(SyncState::LoadingPosts(post_type.to_string()));
                self.load_posts(post_type).await?;
                if self.unreachable {
                    self.transition(SyncState::Failed);
                    return Ok(());
                }
            }
        }

        self.transition(SyncState::Done);
        Ok(())
    }

    fn page_size(&self, default: u32) -> u32 {
        self.opts.page_size.unwrap_or(default)
    }

    /// Books how a listing ended.
    fn finish_chain(&mut self, path: &str, end: Option<&PageEnd>) {
        match end {
            Some(PageEnd::Failed { status: None, body }) => {
                error!(path, error = %body, "source unreachable");
                self.report.failed_chains += 1;
                self.unreachable = true;
            }
            Some(PageEnd::Failed { .. }) => self.report.failed_chains += 1,
            Some(PageEnd::BudgetReached) => self.report.truncated_chains += 1,
            _ => {}
        }
    }

    /// Lower bound of the media `after` window.
    fn media_after(&self) -> DateTime<Utc> {
        self.opts.modified_after.unwrap_or_else(Utc::now) - Duration::days(MEDIA_LOOKBACK_DAYS)
    }

    async fn load_references(&mut self, kind: RefKind) -> Result<()> {
        let loader = self.loader;
        let site_id = loader.site_id;
        if self.opts.purge {
            let purged = db::delete_refs(&loader.pool, site_id, kind).await?;
            info!(kind = kind.as_str(), purged, "purged");
        }
        self.index.load_kind(&loader.pool, site_id, kind).await?;

        let listing = ref_listing(kind);
        let mut pager = Paginator::new(
            loader.transport.as_ref(),
            format!("sites/{}/{}", site_id, kind.endpoint()),
            kind.endpoint(),
            listing.style,
        )
        .page_size(self.page_size(listing.page_size))
        .max_pages(listing.max_pages);
        if kind == RefKind::Media && !self.opts.full {
            pager = pager.param("after", self.media_after().to_rfc3339());
        }
        let early_stop = listing.early_stop
            && loader.settings.early_stop
            && !self.opts.full
            && !self.opts.purge;

        while let Some(page) = pager.next_page().await {
            let created = match self.store_reference_page(kind, &page).await {
                Ok(created) => created,
                Err(err) => {
                    warn!(?err, kind = kind.as_str(), page = page.number, "page not stored; listing stopped");
                    self.report.failed_chains += 1;
                    // Records registered by the rolled-back page are gone.
                    self.index.load_kind(&loader.pool, site_id, kind).await?;
                    return Ok(());
                }
            };
            if early_stop && created == 0 {
                info!(kind = kind.as_str(), page = page.number, "no new records on page; stopping");
                return Ok(());
            }
        }
        self.finish_chain(pager.path(), pager.outcome());
        Ok(())
    }

    /// Stores one page of reference records. Returns how many were new.
    async fn store_reference_page(&mut self, kind: RefKind, page: &Page) -> Result<u64> {
        let site_id = self.loader.site_id;
        let mut tx = self.loader.pool.begin().await?;
        let mut pending = PendingRefs::new(kind);
        let mut created = 0;

        for item in page.items() {
            if kind == RefKind::Media && as_int(item.get("post_ID")).unwrap_or(0) == 0 {
                continue;
            }
            let outcome = reconcile::upsert_reference(
                &mut tx,
                site_id,
                kind,
                item,
                &mut self.index,
                Some(&mut pending),
            )
            .await;
            match outcome {
                Ok(Upserted::Created(_)) => created += 1,
                Ok(Upserted::Updated(_)) => self.report.refs_updated += 1,
                Ok(_) => {}
                Err(err) => {
                    warn!(?err, kind = kind.as_str(), wp_id = ?remote_id(item), "reference not stored");
                    self.report.failed_items += 1;
                }
            }
        }

        created += reconcile::flush_references(&mut tx, site_id, &mut pending, &mut self.index).await?;
        tx.commit().await?;
        self.report.refs_created += created;
        info!(kind = kind.as_str(), page = page.number, created, "page stored");
        Ok(created)
    }

    /// Watermark for one post type: explicit, none in full mode, else the
    /// newest stored `modified` of that type and status.
    async fn watermark(&self, post_type: &str) -> Result<Option<DateTime<Utc>>> {
        if let Some(after) = self.opts.modified_after {
            return Ok(Some(after));
        }
        if self.opts.full {
            return Ok(None);
        }
        db::latest_modified(
            &self.loader.pool,
            self.loader.site_id,
            post_type,
            self.opts.status.as_filter(),
        )
        .await
    }

    async fn load_posts(&mut self, post_type: &str) -> Result<()> {
        let loader = self.loader;
        let site_id = loader.site_id;
        if self.opts.purge {
            let purged = db::delete_posts(&loader.pool, site_id, post_type).await?;
            info!(post_type, purged, "purged");
        }
        let watermark = self.watermark(post_type).await?;

        let mut pager = Paginator::new(
            loader.transport.as_ref(),
            format!("sites/{site_id}/posts"),
            "posts",
            PageStyle::Cursor,
        )
        .param("type", post_type)
        .param("status", self.opts.status.as_str())
        .page_size(self.page_size(POSTS_PAGE_SIZE))
        .max_pages(POSTS_MAX_PAGES);
        if let Some(after) = watermark {
            info!(post_type, modified_after = %after.to_rfc3339(), "getting posts after watermark");
            pager = pager.param("modified_after", after.to_rfc3339());
        }

        while let Some(page) = pager.next_page().await {
            let parents = match self.store_post_page(&page).await {
                Ok(parents) => parents,
                Err(err) => {
                    warn!(?err, post_type, page = page.number, "page not stored; listing stopped");
                    self.report.failed_chains += 1;
                    // Authors created by the rolled-back page are gone.
                    self.index = RefIndex::load(&loader.pool, site_id).await?;
                    return Ok(());
                }
            };
            for parent in parents {
                self.report.orphans_removed += loader.sweep(parent).await;
            }
        }
        self.finish_chain(pager.path(), pager.outcome());
        Ok(())
    }

    /// Stores one page of posts. Returns the remote ids of `post`-type items
    /// that need an attachment sweep.
    async fn store_post_page(&mut self, page: &Page) -> Result<Vec<i64>> {
        let site_id = self.loader.site_id;
        let mut tx = self.loader.pool.begin().await?;
        let mut batch = PostBatch::default();
        let mut parents = Vec::new();

        for item in page.items() {
            match store_post(&mut tx, site_id, item, &mut self.index, Some(&mut batch)).await {
                Ok(outcome) => {
                    match outcome {
                        PostOutcome::Created(_) => self.report.posts_created += 1,
                        PostOutcome::Updated(_) => self.report.posts_updated += 1,
                        PostOutcome::Unchanged(_) => self.report.posts_unchanged += 1,
                        PostOutcome::Buffered | PostOutcome::Skipped => {}
                    }
                    if outcome != PostOutcome::Skipped && is_post_type(item) {
                        parents.extend(remote_id(item));
                    }
                }
                Err(err) => {
                    warn!(?err, wp_id = ?remote_id(item), "post not stored");
                    self.report.failed_items += 1;
                }
            }
        }

        let inserted = reconcile::flush_batch(&mut tx, site_id, &mut batch).await?;
        tx.commit().await?;
        self.report.posts_created += inserted;
        info!(page = page.number, inserted, "page stored");
        Ok(parents)
    }
}
