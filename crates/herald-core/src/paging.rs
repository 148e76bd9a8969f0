//! Stateless paging over roster tables.
//!
//! The page being shown lives entirely in the buttons' callback tokens. A press
//! decodes the token, fetches that slice through [`PagedQuery`] and renders it
//! (text plus navigation row) on the worker pool.

use std::sync::Arc;

use serde::Serialize;

use crate::{
    callback::{CallbackAction, CallbackCodec, CallbackToken},
    domain::EntityKind,
    errors::Error,
    executor::PoolRegistry,
    formatting::escape_html,
    messaging::types::{InlineButton, InlineKeyboard},
    Result,
};

/// One roster row, flattened for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub id: i64,
    pub fields: Vec<(String, String)>,
}

impl Record {
    /// Flatten a serializable row into display fields, in declaration order.
    pub fn from_row<T: Serialize>(id: i64, row: &T) -> Result<Self> {
        let value = serde_json::to_value(row)?;
        let serde_json::Value::Object(map) = value else {
            return Err(Error::InvalidRequest(
                "roster rows must serialize to objects".to_string(),
            ));
        };

        let fields = map
            .into_iter()
            .map(|(k, v)| {
                let shown = match v {
                    serde_json::Value::String(s) => format!("'{s}'"),
                    other => other.to_string(),
                };
                (k, shown)
            })
            .collect();
        Ok(Self { id, fields })
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `{ id=1, email='ops' }`
    pub fn display(&self) -> String {
        let mut parts = vec![format!("id={}", self.id)];
        parts.extend(
            self.fields
                .iter()
                .filter(|(k, _)| k != "id")
                .map(|(k, v)| format!("{k}={v}")),
        );
        format!("{{ {} }}", parts.join(", "))
    }
}

/// A slice of records plus the size of the whole result set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Page {
    pub records: Vec<Record>,
    pub total: usize,
}

/// Read side of the roster.
///
/// Results are ordered by record id, so repeating an offset returns the same
/// slice as long as nothing was written in between. Implementations may block;
/// callers run them on the worker pool.
pub trait PagedQuery: Send + Sync {
    fn fetch_page(&self, kind: EntityKind, offset: usize, limit: usize) -> Result<Page>;

    /// Records whose `field` contains `value` (case-insensitive).
    fn find(
        &self,
        kind: EntityKind,
        field: &str,
        value: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Page>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageWindow {
    pub offset: usize,
    pub limit: usize,
}

pub fn page_window(page_index: u32, page_size: usize) -> PageWindow {
    let limit = page_size.max(1);
    PageWindow {
        offset: (page_index as usize).saturating_mul(limit),
        limit,
    }
}

/// Number of pages needed for `total` records (an empty set still has one).
pub fn page_count(total: usize, page_size: usize) -> usize {
    total.div_ceil(page_size.max(1)).max(1)
}

/// Fetch the slice a View or Find token points at.
pub fn fetch_for_token(query: &dyn PagedQuery, token: &CallbackToken) -> Result<Page> {
    let window = page_window(token.page_index, token.entity.page_size());
    match token.action {
        CallbackAction::View => query.fetch_page(token.entity, window.offset, window.limit),
        CallbackAction::Find => {
            let (field, value) = token.parse_find_args().ok_or_else(|| {
                Error::InvalidRequest("search button without field=value".to_string())
            })?;
            query.find(token.entity, field, value, window.offset, window.limit)
        }
        other => Err(Error::InvalidRequest(format!(
            "{other:?} buttons do not show pages"
        ))),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedPage {
    pub html: String,
    pub keyboard: InlineKeyboard,
}

/// Render `page` as the view of `token`.
///
/// Records that would push the text over `max_chars` are left out and the
/// page says so. Navigation buttons whose token cannot be encoded are
/// dropped rather than truncated.
pub fn render_page(
    codec: &CallbackCodec,
    token: &CallbackToken,
    page: &Page,
    max_chars: usize,
) -> RenderedPage {
    let page_size = token.entity.page_size();
    let pages = page_count(page.total, page_size);
    let window = page_window(token.page_index, page_size);
    let table = token.entity.table_name();

    let title = match (token.action, token.parse_find_args()) {
        (CallbackAction::Find, Some((field, value))) => format!(
            "<b>Search in {table}</b> ({} ~ '{}')",
            escape_html(field),
            escape_html(value)
        ),
        _ => format!("<b>Table {table}</b>"),
    };

    if page.total == 0 {
        return RenderedPage {
            html: format!("{title}\n\nNo records."),
            keyboard: InlineKeyboard::default(),
        };
    }

    if page.records.is_empty() {
        let last = token.with_page((pages - 1) as u32);
        let keyboard = codec
            .encode(&last)
            .map(|data| InlineKeyboard::single(InlineButton::new("⏮ Last page", data)))
            .unwrap_or_default();
        return RenderedPage {
            html: format!(
                "{title}\n\n⚠️ Page {} no longer exists ({} pages now).",
                token.page_index + 1,
                pages
            ),
            keyboard,
        };
    }

    let first = window.offset + 1;
    let last = window.offset + page.records.len();
    let header = format!("{title}\nRecords {first}-{last} of {}\n\n", page.total);

    let mut body = String::new();
    let mut shown = 0usize;
    let budget = max_chars.saturating_sub(header.chars().count() + 32);
    for record in &page.records {
        let entry = escape_html(&record.display());
        let sep = if body.is_empty() { "" } else { "\n\n" };
        if body.chars().count() + sep.len() + entry.chars().count() > budget && shown > 0 {
            break;
        }
        body.push_str(sep);
        body.push_str(&entry);
        shown += 1;
    }
    if shown < page.records.len() {
        body.push_str(&format!("\n\n… {} more on this page", page.records.len() - shown));
    }

    RenderedPage {
        html: format!("{header}{body}"),
        keyboard: nav_keyboard(codec, token, pages),
    }
}

fn nav_keyboard(codec: &CallbackCodec, token: &CallbackToken, pages: usize) -> InlineKeyboard {
    if pages <= 1 {
        return InlineKeyboard::default();
    }

    let page = token.page_index as usize;
    let mut row = Vec::with_capacity(3);

    if page > 0 {
        push_button(&mut row, codec, "◀", &token.with_page(token.page_index - 1));
    }
    push_button(
        &mut row,
        codec,
        &format!("{}/{}", page + 1, pages),
        &CallbackToken::new(CallbackAction::Noop, token.entity, token.page_index, ""),
    );
    if page + 1 < pages {
        push_button(&mut row, codec, "▶", &token.with_page(token.page_index + 1));
    }

    InlineKeyboard::new(vec![row])
}

fn push_button(row: &mut Vec<InlineButton>, codec: &CallbackCodec, label: &str, token: &CallbackToken) {
    match codec.encode(token) {
        Ok(data) => row.push(InlineButton::new(label, data)),
        Err(e) => tracing::debug!(error = %e, label, "dropping navigation button"),
    }
}

/// Fetch and render the page of `token` on the worker pool.
pub async fn render_on_pool(
    pool: &PoolRegistry,
    query: Arc<dyn PagedQuery>,
    codec: CallbackCodec,
    token: CallbackToken,
    max_chars: usize,
) -> Result<RenderedPage> {
    let handle = pool.submit(move || -> Result<RenderedPage> {
        let page = fetch_for_token(query.as_ref(), &token)?;
        Ok(render_page(&codec, &token, &page, max_chars))
    })?;
    handle.await?
}
