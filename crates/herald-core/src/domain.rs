/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Broadcast recipients are chats (private chats and groups alike).
pub type RecipientId = ChatId;

/// Tables of the roster that administrators can browse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    ChatType,
    Chat,
    User,
    Group,
    Administrator,
    NotificationType,
    NotificationSubscriber,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::ChatType,
        EntityKind::Chat,
        EntityKind::User,
        EntityKind::Group,
        EntityKind::Administrator,
        EntityKind::NotificationType,
        EntityKind::NotificationSubscriber,
    ];

    /// Name used in admin commands (`/get_data chats`).
    pub fn table_name(self) -> &'static str {
        match self {
            EntityKind::ChatType => "chat_types",
            EntityKind::Chat => "chats",
            EntityKind::User => "users",
            EntityKind::Group => "groups",
            EntityKind::Administrator => "administrators",
            EntityKind::NotificationType => "notification_types",
            EntityKind::NotificationSubscriber => "notification_subscribers",
        }
    }

    pub fn from_table_name(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        Self::ALL.into_iter().find(|k| k.table_name() == name)
    }

    /// Records shown per page when browsing this table.
    pub fn page_size(self) -> usize {
        match self {
            EntityKind::Administrator => 15,
            _ => 20,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_resolve_back_to_kinds() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_table_name(kind.table_name()), Some(kind));
        }
        assert_eq!(EntityKind::from_table_name(" Chats "), Some(EntityKind::Chat));
        assert_eq!(EntityKind::from_table_name("sessions"), None);
    }
}
