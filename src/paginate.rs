//! Page-by-page traversal of a listing endpoint.
//!
//! A [`Paginator`] issues one request per [`Paginator::next_page`] call and
//! yields the decoded body while the listing has items. It never retries; when
//! it stops, [`Paginator::outcome`] says why.

use serde_json::Value;
use tracing::{info, warn};

use crate::wp::model::{list_items, next_page_handle};
use crate::wp::{Params, WpTransport};

/// How to ask for the next page when the response carries no continuation
/// token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStyle {
    /// `meta.next_page` echoed back as `page_handle`; no token ends the listing.
    Cursor,
    /// `page=1,2,3..`
    Numbered,
    /// `offset=n*number`, for endpoints without a page parameter.
    Offset,
}

/// Why a pagination chain stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEnd {
    /// Non-ok response, unreachable source, or a body that is not JSON.
    Failed { status: Option<u16>, body: String },
    EmptyBody,
    NoItems,
    /// The page budget was used up; more data may exist.
    BudgetReached,
    /// The source reported no further page.
    Exhausted,
}

impl PageEnd {
    pub fn is_failure(&self) -> bool {
        matches!(self, PageEnd::Failed { .. })
    }
}

/// One decoded listing page.
#[derive(Debug, Clone)]
pub struct Page {
    pub number: u32,
    pub body: Value,
    items_key: &'static str,
}

impl Page {
    pub fn items(&self) -> &[Value] {
        list_items(&self.body, self.items_key)
    }
}

pub struct Paginator<'a> {
    transport: &'a dyn WpTransport,
    path: String,
    params: Params,
    items_key: &'static str,
    style: PageStyle,
    page_size: u32,
    max_pages: u32,
    fetched: u32,
    end: Option<PageEnd>,
}

impl<'a> Paginator<'a> {
    pub fn new(
        transport: &'a dyn WpTransport,
        path: impl Into<String>,
        items_key: &'static str,
        style: PageStyle,
    ) -> Self {
        Self {
            transport,
            path: path.into(),
            params: Vec::new(),
            items_key,
            style,
            page_size: 100,
            max_pages: 10,
            fetched: 0,
            end: None,
        }
    }

    pub fn param(mut self, key: &str, value: impl ToString) -> Self {
        set_param(&mut self.params, key, value.to_string());
        self
    }

    /// Sets the `number` query parameter, also used as the offset step.
    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = size.max(1);
        set_param(&mut self.params, "number", self.page_size.to_string());
        self
    }

    pub fn max_pages(mut self, max: u32) -> Self {
        self.max_pages = max.max(1);
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn pages_fetched(&self) -> u32 {
        self.fetched
    }

    pub fn outcome(&self) -> Option<&PageEnd> {
        self.end.as_ref()
    }

    /// Fetches the next page. `None` once the chain has ended.
    pub async fn next_page(&mut self) -> Option<Page> {
        if self.end.is_some() {
            return None;
        }

        let response = match self.transport.get(&self.path, &self.params).await {
            Ok(response) => response,
            Err(err) => {
                warn!(path = %self.path, ?err, "request failed");
                self.end = Some(PageEnd::Failed {
                    status: None,
                    body: err.to_string(),
                });
                return None;
            }
        };
        self.fetched += 1;

        if !response.ok {
            warn!(
                path = %self.path,
                status = response.status,
                body = %response.text,
                "Response NOT OK"
            );
            self.end = Some(PageEnd::Failed {
                status: Some(response.status),
                body: response.text,
            });
            return None;
        }
        if !response.has_body() {
            self.end = Some(PageEnd::EmptyBody);
            return None;
        }
        let body = match response.json() {
            Ok(body) => body,
            Err(err) => {
                warn!(path = %self.path, ?err, "response body is not JSON");
                self.end = Some(PageEnd::Failed {
                    status: Some(response.status),
                    body: response.text,
                });
                return None;
            }
        };
        if list_items(&body, self.items_key).is_empty() {
            self.end = Some(PageEnd::NoItems);
            return None;
        }

        info!(path = %self.path, page = self.fetched, "page");
        if self.fetched >= self.max_pages {
            warn!(
                path = %self.path,
                max_pages = self.max_pages,
                "page budget reached; listing truncated"
            );
            self.end = Some(PageEnd::BudgetReached);
        } else {
            self.prepare_next(&body);
        }

        Some(Page {
            number: self.fetched,
            body,
            items_key: self.items_key,
        })
    }

    fn prepare_next(&mut self, body: &Value) {
        if let Some(handle) = next_page_handle(body) {
            set_param(&mut self.params, "page_handle", handle);
            return;
        }
        match self.style {
            PageStyle::Cursor => self.end = Some(PageEnd::Exhausted),
            PageStyle::Numbered => {
                set_param(&mut self.params, "page", (self.fetched + 1).to_string())
            }
            PageStyle::Offset => set_param(
                &mut self.params,
                "offset",
                (self.fetched * self.page_size).to_string(),
            ),
        }
    }
}

fn set_param(params: &mut Params, key: &str, value: String) {
    match params.iter_mut().find(|(k, _)| k == key) {
        Some((_, v)) => *v = value,
        None => params.push((key.to_string(), value)),
    }
}
