//! Compact, validated inline-button payloads.
//!
//! A button press carries everything needed to rebuild the view that produced
//! it, so paging needs no server-side session. Wire form:
//!
//! ```text
//! h1|<action>|<entity>|<page>|<args>
//! ```
//!
//! `h1` is the schema tag, action and entity are one-letter codes, the page
//! index is canonical decimal and `args` is opaque (it is the last field, so it
//! may itself contain `|`).

use crate::domain::EntityKind;

/// Telegram's `callback_data` ceiling, in bytes.
pub const MAX_CALLBACK_DATA_LEN: usize = 64;

/// Largest page index a token can carry.
pub const MAX_PAGE_INDEX: u32 = 999_999;

const SCHEMA_TAG: &str = "h1";
const DELIMITER: char = '|';
const FIELD_COUNT: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallbackAction {
    /// Browse a table page.
    View,
    /// Browse a page of search results; args are `field=value`.
    Find,
    /// Confirm deletion of a record; args are the record id.
    Delete,
    /// Inert button (page counter).
    Noop,
}

impl CallbackAction {
    pub const ALL: [CallbackAction; 4] = [
        CallbackAction::View,
        CallbackAction::Find,
        CallbackAction::Delete,
        CallbackAction::Noop,
    ];

    fn code(self) -> &'static str {
        match self {
            CallbackAction::View => "v",
            CallbackAction::Find => "f",
            CallbackAction::Delete => "d",
            CallbackAction::Noop => "n",
        }
    }

    fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.code() == code)
    }
}

fn entity_code(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::ChatType => "t",
        EntityKind::Chat => "c",
        EntityKind::User => "u",
        EntityKind::Group => "g",
        EntityKind::Administrator => "a",
        EntityKind::NotificationType => "n",
        EntityKind::NotificationSubscriber => "s",
    }
}

fn entity_from_code(code: &str) -> Option<EntityKind> {
    EntityKind::ALL.into_iter().find(|k| entity_code(*k) == code)
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallbackToken {
    pub action: CallbackAction,
    pub entity: EntityKind,
    pub page_index: u32,
    pub args: String,
}

impl CallbackToken {
    pub fn new(
        action: CallbackAction,
        entity: EntityKind,
        page_index: u32,
        args: impl Into<String>,
    ) -> Self {
        Self {
            action,
            entity,
            page_index,
            args: args.into(),
        }
    }

    /// Same token pointing at another page.
    pub fn with_page(&self, page_index: u32) -> Self {
        Self {
            page_index,
            ..self.clone()
        }
    }

    /// Args of a [`CallbackAction::Find`] token.
    pub fn find_args(field: &str, value: &str) -> String {
        format!("{field}={value}")
    }

    /// `(field, value)` of a find token, if the args have that shape.
    pub fn parse_find_args(&self) -> Option<(&str, &str)> {
        let (field, value) = self.args.split_once('=')?;
        if field.is_empty() {
            return None;
        }
        Some((field, value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("page index {0} exceeds the maximum page index")]
    PageOutOfRange(u32),

    #[error("callback data is {len} bytes, limit is {limit}")]
    TooLong { len: usize, limit: usize },
}

/// Why a button payload was rejected.
///
/// Every variant means the same thing to the user: the button is invalid or
/// has expired.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed callback data: {0}")]
    Malformed(&'static str),

    #[error("stale callback schema {0:?}")]
    Stale(String),

    #[error("unknown action code {0:?}")]
    UnknownAction(String),

    #[error("unknown entity code {0:?}")]
    UnknownEntity(String),

    #[error("page index {0:?} is out of range")]
    OutOfRange(String),
}

#[derive(Clone, Copy, Debug)]
pub struct CallbackCodec {
    max_len: usize,
}

impl Default for CallbackCodec {
    fn default() -> Self {
        Self {
            max_len: MAX_CALLBACK_DATA_LEN,
        }
    }
}

impl CallbackCodec {
    /// Codec for a messenger with a different payload ceiling.
    pub fn with_limit(max_len: usize) -> Self {
        Self { max_len }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn encode(&self, token: &CallbackToken) -> Result<String, EncodeError> {
        if token.page_index > MAX_PAGE_INDEX {
            return Err(EncodeError::PageOutOfRange(token.page_index));
        }

        let encoded = format!(
            "{SCHEMA_TAG}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}",
            token.action.code(),
            entity_code(token.entity),
            token.page_index,
            token.args
        );

        if encoded.len() > self.max_len {
            return Err(EncodeError::TooLong {
                len: encoded.len(),
                limit: self.max_len,
            });
        }
        Ok(encoded)
    }

    pub fn decode(&self, raw: &str) -> Result<CallbackToken, DecodeError> {
        if raw.len() > self.max_len {
            return Err(DecodeError::Malformed("payload too long"));
        }

        let fields: Vec<&str> = raw.splitn(FIELD_COUNT, DELIMITER).collect();
        let [tag, action, entity, page, args] = fields.as_slice() else {
            return Err(DecodeError::Malformed("wrong field count"));
        };

        if *tag != SCHEMA_TAG {
            return Err(match tag.strip_prefix('h') {
                Some(v) if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) => {
                    DecodeError::Stale(tag.to_string())
                }
                _ => DecodeError::Malformed("missing schema tag"),
            });
        }

        let action = CallbackAction::from_code(action)
            .ok_or_else(|| DecodeError::UnknownAction(action.to_string()))?;
        let entity =
            entity_from_code(entity).ok_or_else(|| DecodeError::UnknownEntity(entity.to_string()))?;
        let page_index = parse_page_index(page)?;

        Ok(CallbackToken {
            action,
            entity,
            page_index,
            args: args.to_string(),
        })
    }
}

fn parse_page_index(raw: &str) -> Result<u32, DecodeError> {
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

    if raw.is_empty() {
        return Err(DecodeError::Malformed("empty page index"));
    }
    if let Some(neg) = raw.strip_prefix('-') {
        if all_digits(neg) {
            return Err(DecodeError::OutOfRange(raw.to_string()));
        }
    }
    if !all_digits(raw) {
        return Err(DecodeError::Malformed("page index is not a number"));
    }
    if raw.len() > 1 && raw.starts_with('0') {
        return Err(DecodeError::Malformed("non-canonical page index"));
    }

    // More digits than MAX_PAGE_INDEX has is out of range without parsing.
    if raw.len() > MAX_PAGE_INDEX.to_string().len() {
        return Err(DecodeError::OutOfRange(raw.to_string()));
    }
    match raw.parse::<u32>() {
        Ok(v) if v <= MAX_PAGE_INDEX => Ok(v),
        _ => Err(DecodeError::OutOfRange(raw.to_string())),
    }
}
