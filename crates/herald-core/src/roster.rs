//! In-memory roster of chats, users, groups and subscriptions.
//!
//! Stands in for the relational CRUD layer: simple create/read/delete keyed by
//! record ids, plus the read ports the fan-out engine needs.

use std::collections::BTreeMap;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::{
    domain::{ChatId, EntityKind, RecipientId, UserId},
    errors::Error,
    notify::SubscriberDirectory,
    paging::{Page, PagedQuery, Record},
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub const ALL: [ChatKind; 4] = [
        ChatKind::Private,
        ChatKind::Group,
        ChatKind::Supergroup,
        ChatKind::Channel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Supergroup => "supergroup",
            ChatKind::Channel => "channel",
        }
    }
}

#[derive(Clone, Debug)]
pub struct UserProfile {
    pub user_id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
}

#[derive(Clone, Debug)]
pub struct NewChat {
    pub id: ChatId,
    pub kind: ChatKind,
    pub title: String,
    /// Set for private chats.
    pub user: Option<UserProfile>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatStatus {
    pub id: ChatId,
    pub kind: String,
    pub title: String,
    pub subscriptions: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Subscription {
    Added,
    AlreadyPresent,
}

#[derive(Clone, Debug, Serialize)]
struct ChatTypeRow {
    #[serde(rename = "type")]
    name: String,
}

#[derive(Clone, Debug, Serialize)]
struct ChatRow {
    title: String,
    chat_type: String,
}

#[derive(Clone, Debug, Serialize)]
struct UserRow {
    chat_id: i64,
    first_name: String,
    last_name: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
struct GroupRow {
    chat_id: i64,
    title: String,
}

#[derive(Clone, Debug, Serialize)]
struct AdminRow {
    granted_by: i64,
    granted_at: String,
}

#[derive(Clone, Debug, Serialize)]
struct NotificationTypeRow {
    #[serde(rename = "type")]
    name: String,
    description: String,
}

#[derive(Clone, Debug, Serialize)]
struct SubscriberRow {
    chat_id: i64,
    notification_type: String,
    subscribed_by: i64,
    subscribed_at: String,
}

#[derive(Default)]
struct Tables {
    chat_types: BTreeMap<i64, ChatTypeRow>,
    chats: BTreeMap<i64, ChatRow>,
    users: BTreeMap<i64, UserRow>,
    groups: BTreeMap<i64, GroupRow>,
    administrators: BTreeMap<i64, AdminRow>,
    notification_types: BTreeMap<i64, NotificationTypeRow>,
    subscribers: BTreeMap<i64, SubscriberRow>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn notification_type_id(&self, name: &str) -> Option<i64> {
        let name = name.trim().to_lowercase();
        self.notification_types
            .iter()
            .find(|(_, row)| row.name == name)
            .map(|(id, _)| *id)
    }

    fn records(&self, kind: EntityKind) -> Result<Vec<Record>> {
        fn rows<T: Serialize>(table: &BTreeMap<i64, T>) -> Result<Vec<Record>> {
            table
                .iter()
                .map(|(id, row)| Record::from_row(*id, row))
                .collect()
        }

        match kind {
            EntityKind::ChatType => rows(&self.chat_types),
            EntityKind::Chat => rows(&self.chats),
            EntityKind::User => rows(&self.users),
            EntityKind::Group => rows(&self.groups),
            EntityKind::Administrator => rows(&self.administrators),
            EntityKind::NotificationType => rows(&self.notification_types),
            EntityKind::NotificationSubscriber => rows(&self.subscribers),
        }
    }
}

pub struct Roster {
    tables: RwLock<Tables>,
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl Roster {
    pub fn new() -> Self {
        let mut tables = Tables::default();
        for kind in ChatKind::ALL {
            let id = tables.next_id();
            tables.chat_types.insert(
                id,
                ChatTypeRow {
                    name: kind.as_str().to_string(),
                },
            );
        }
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Display fields of a table (besides `id`), usable in searches.
    pub fn field_names(kind: EntityKind) -> &'static [&'static str] {
        match kind {
            EntityKind::ChatType => &["type"],
            EntityKind::Chat => &["title", "chat_type"],
            EntityKind::User => &["chat_id", "first_name", "last_name"],
            EntityKind::Group => &["chat_id", "title"],
            EntityKind::Administrator => &["granted_by", "granted_at"],
            EntityKind::NotificationType => &["type", "description"],
            EntityKind::NotificationSubscriber => &[
                "chat_id",
                "notification_type",
                "subscribed_by",
                "subscribed_at",
            ],
        }
    }

    /// Returns `false` if the type already exists.
    pub fn add_notification_type(&self, name: &str, description: &str) -> bool {
        let name = name.trim().to_lowercase();
        let mut t = self.tables.write();
        if name.is_empty() || t.notification_type_id(&name).is_some() {
            return false;
        }
        let id = t.next_id();
        t.notification_types.insert(
            id,
            NotificationTypeRow {
                name,
                description: description.to_string(),
            },
        );
        true
    }

    /// `(type, description)` pairs, in creation order.
    pub fn notification_types(&self) -> Vec<(String, String)> {
        self.tables
            .read()
            .notification_types
            .values()
            .map(|row| (row.name.clone(), row.description.clone()))
            .collect()
    }

    /// Make a registered user an administrator. Returns `false` if they
    /// already are one.
    pub fn grant_admin(&self, user_id: UserId, granted_by: UserId) -> Result<bool> {
        let mut t = self.tables.write();
        if !t.users.contains_key(&user_id.0) {
            return Err(Error::NotFound(format!("user {}", user_id.0)));
        }
        if t.administrators.contains_key(&user_id.0) {
            return Ok(false);
        }
        t.administrators.insert(
            user_id.0,
            AdminRow {
                granted_by: granted_by.0,
                granted_at: Utc::now().to_rfc3339(),
            },
        );
        Ok(true)
    }

    /// Returns `false` if the user was not an administrator.
    pub fn revoke_admin(&self, user_id: UserId) -> bool {
        self.tables.write().administrators.remove(&user_id.0).is_some()
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.tables.read().administrators.contains_key(&user_id.0)
    }

    /// Register a chat. Returns `false` if it was already registered.
    pub fn register_chat(&self, chat: NewChat) -> bool {
        let mut t = self.tables.write();
        if t.chats.contains_key(&chat.id.0) {
            return false;
        }

        t.chats.insert(
            chat.id.0,
            ChatRow {
                title: chat.title.clone(),
                chat_type: chat.kind.as_str().to_string(),
            },
        );
        match (chat.kind, chat.user) {
            (ChatKind::Private, Some(user)) => {
                t.users.insert(
                    user.user_id.0,
                    UserRow {
                        chat_id: chat.id.0,
                        first_name: user.first_name,
                        last_name: user.last_name,
                    },
                );
            }
            (ChatKind::Private, None) => {}
            _ => {
                let id = t.next_id();
                t.groups.insert(
                    id,
                    GroupRow {
                        chat_id: chat.id.0,
                        title: chat.title,
                    },
                );
            }
        }
        true
    }

    /// Remove a chat with its user/group row, the user's administrator grant
    /// and the chat's subscriptions.
    pub fn remove_chat(&self, chat_id: ChatId) -> bool {
        let mut t = self.tables.write();
        if t.chats.remove(&chat_id.0).is_none() {
            return false;
        }
        let gone: Vec<i64> = t
            .users
            .iter()
            .filter(|(_, u)| u.chat_id == chat_id.0)
            .map(|(id, _)| *id)
            .collect();
        for user_id in gone {
            t.users.remove(&user_id);
            t.administrators.remove(&user_id);
        }
        t.groups.retain(|_, g| g.chat_id != chat_id.0);
        t.subscribers.retain(|_, s| s.chat_id != chat_id.0);
        true
    }

    pub fn chat_status(&self, chat_id: ChatId) -> Option<ChatStatus> {
        let t = self.tables.read();
        let chat = t.chats.get(&chat_id.0)?;
        let subscriptions = t
            .subscribers
            .values()
            .filter(|s| s.chat_id == chat_id.0)
            .map(|s| s.notification_type.clone())
            .collect();
        Some(ChatStatus {
            id: chat_id,
            kind: chat.chat_type.clone(),
            title: chat.title.clone(),
            subscriptions,
        })
    }

    pub fn subscribe(
        &self,
        chat_id: ChatId,
        notification_type: &str,
        by: UserId,
    ) -> Result<Subscription> {
        let mut t = self.tables.write();
        if !t.chats.contains_key(&chat_id.0) {
            return Err(Error::NotFound(format!("chat {}", chat_id.0)));
        }
        let type_id = t
            .notification_type_id(notification_type)
            .ok_or_else(|| Error::NotFound(format!("notification type '{notification_type}'")))?;
        let name = t.notification_types[&type_id].name.clone();

        if t
            .subscribers
            .values()
            .any(|s| s.chat_id == chat_id.0 && s.notification_type == name)
        {
            return Ok(Subscription::AlreadyPresent);
        }

        let id = t.next_id();
        t.subscribers.insert(
            id,
            SubscriberRow {
                chat_id: chat_id.0,
                notification_type: name,
                subscribed_by: by.0,
                subscribed_at: Utc::now().to_rfc3339(),
            },
        );
        Ok(Subscription::Added)
    }

    /// Returns `false` if the chat was not subscribed.
    pub fn unsubscribe(&self, chat_id: ChatId, notification_type: &str) -> Result<bool> {
        let mut t = self.tables.write();
        let type_id = t
            .notification_type_id(notification_type)
            .ok_or_else(|| Error::NotFound(format!("notification type '{notification_type}'")))?;
        let name = t.notification_types[&type_id].name.clone();

        let before = t.subscribers.len();
        t.subscribers
            .retain(|_, s| !(s.chat_id == chat_id.0 && s.notification_type == name));
        Ok(t.subscribers.len() < before)
    }
}

impl SubscriberDirectory for Roster {
    fn subscribers(&self, notification_type: &str) -> Result<Vec<RecipientId>> {
        let t = self.tables.read();
        let type_id = t
            .notification_type_id(notification_type)
            .ok_or_else(|| Error::NotFound(format!("notification type '{notification_type}'")))?;
        let name = &t.notification_types[&type_id].name;

        Ok(t
            .subscribers
            .values()
            .filter(|s| &s.notification_type == name)
            .map(|s| ChatId(s.chat_id))
            .collect())
    }
}

impl PagedQuery for Roster {
    fn fetch_page(&self, kind: EntityKind, offset: usize, limit: usize) -> Result<Page> {
        let records = self.tables.read().records(kind)?;
        let total = records.len();
        Ok(Page {
            records: records.into_iter().skip(offset).take(limit).collect(),
            total,
        })
    }

    fn find(
        &self,
        kind: EntityKind,
        field: &str,
        value: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Page> {
        if field != "id" && !Self::field_names(kind).contains(&field) {
            return Err(Error::InvalidRequest(format!(
                "table {} has no field '{field}'",
                kind.table_name()
            )));
        }

        let needle = value.to_lowercase();
        let matches: Vec<Record> = self
            .tables
            .read()
            .records(kind)?
            .into_iter()
            .filter(|r| {
                let shown = if field == "id" {
                    r.id.to_string()
                } else {
                    r.field(field).unwrap_or_default().trim_matches('\'').to_string()
                };
                shown.to_lowercase().contains(&needle)
            })
            .collect();

        let total = matches.len();
        Ok(Page {
            records: matches.into_iter().skip(offset).take(limit).collect(),
            total,
        })
    }
}
