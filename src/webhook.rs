//! Deferred single-post refresh for change notifications.
//!
//! The notifying side expects an immediate answer, so the refresh runs on a
//! spawned task after a short settle delay that lets the source's own API
//! catch up with the edit.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::db::Post;
use crate::sync::SiteLoader;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing post ID")]
    Missing,
    #[error("invalid post ID: {0}")]
    Invalid(String),
}

/// Parses the `ID` form field of a notification.
pub fn parse_post_id(form_value: Option<&str>) -> Result<i64, WebhookError> {
    let raw = form_value.map(str::trim).filter(|v| !v.is_empty()).ok_or(WebhookError::Missing)?;
    match raw.parse::<i64>() {
        Ok(id) if id >= 0 => Ok(id),
        _ => Err(WebhookError::Invalid(raw.to_string())),
    }
}

/// Settle delay from configuration.
pub fn settle_delay(loader: &SiteLoader) -> Duration {
    Duration::from_millis(loader.settings().webhook_delay_ms)
}

/// Spawns the refresh of one post and returns right away. The handle yields
/// the stored post, or `None` when the refresh did not produce one.
pub fn schedule_load_post(
    loader: Arc<SiteLoader>,
    wp_post_id: i64,
    delay: Duration,
) -> JoinHandle<Option<Post>> {
    info!(wp_post_id, delay_ms = delay.as_millis() as u64, "post refresh scheduled");
    tokio::spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match loader.load_post(wp_post_id).await {
            Ok(Some(post)) => {
                info!(wp_post_id, id = post.id, "Successfully loaded post");
                Some(post)
            }
            Ok(None) => {
                warn!(wp_post_id, "Error loading post");
                None
            }
            Err(err) => {
                error!(?err, wp_post_id, "Error loading post");
                None
            }
        }
    })
}
