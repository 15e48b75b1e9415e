//! Removal of attachment posts that the source no longer lists under their
//! parent.

use anyhow::Result;
use std::collections::BTreeSet;
use tracing::{info, instrument, warn};

use crate::db::{self, Pool};
use crate::model::POST_TYPE_ATTACHMENT;
use crate::paginate::{PageEnd, PageStyle, Paginator};
use crate::wp::model::remote_id;
use crate::wp::WpTransport;

const SWEEP_PAGE_SIZE: u32 = 100;
const SWEEP_MAX_PAGES: u32 = 10;

/// What a sweep did for one parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepOutcome {
    /// No stored children; the source was not asked.
    NoLocalChildren,
    /// The listing failed or was cut short by the page budget.
    Aborted(PageEnd),
    Swept { removed: u64 },
}

/// Deletes stored attachments of `parent_wp_id` that the source no longer
/// lists under it.
#[instrument(skip_all, fields(site_id = site_id, parent_wp_id = parent_wp_id))]
pub async fn sweep_orphan_attachments(
    transport: &dyn WpTransport,
    pool: &Pool,
    site_id: i64,
    parent_wp_id: i64,
) -> Result<SweepOutcome> {
    let local = {
        let mut conn = pool.acquire().await?;
        db::attachment_children(&mut conn, site_id, parent_wp_id).await?
    };
    if local.is_empty() {
        return Ok(SweepOutcome::NoLocalChildren);
    }

    let mut pager = Paginator::new(
        transport,
        format!("sites/{site_id}/posts/"),
        "posts",
        PageStyle::Cursor,
    )
    .param("type", POST_TYPE_ATTACHMENT)
    .param("parent_id", parent_wp_id)
    .param("fields", "ID")
    .page_size(SWEEP_PAGE_SIZE)
    .max_pages(SWEEP_MAX_PAGES);

    let mut remote = BTreeSet::new();
    while let Some(page) = pager.next_page().await {
        remote.extend(page.items().iter().filter_map(remote_id));
    }
    if let Some(end @ (PageEnd::Failed { .. } | PageEnd::BudgetReached)) = pager.outcome() {
        warn!(?end, "attachment listing incomplete; nothing deleted");
        return Ok(SweepOutcome::Aborted(end.clone()));
    }

    let orphans: BTreeSet<i64> = local.difference(&remote).copied().collect();
    if orphans.is_empty() {
        return Ok(SweepOutcome::Swept { removed: 0 });
    }
    let mut tx = pool.begin().await?;
    let removed = db::delete_attachment_children(&mut tx, site_id, parent_wp_id, &orphans).await?;
    tx.commit().await?;
    info!(removed, "orphaned attachments deleted");
    Ok(SweepOutcome::Swept { removed })
}
