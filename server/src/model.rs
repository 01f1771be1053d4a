use chat_api::{ChatView, MessageView, PublicUser, SeenState, ThreadView};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const DEFAULT_BIO: &str = "Hey, there I'm using this chat !!";

/// Preview stored for a message that only carries an image.
pub const IMAGE_PREVIEW: &str = "image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub bio: String,
    pub avatar_url: Option<String>,
    pub last_seen: Option<i64>,
    pub refresh_token: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Read-only snapshot of a user used to enrich chat responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: Uuid,
    pub name: String,
    pub bio: String,
    pub avatar_url: Option<String>,
    pub last_seen: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewState {
    pub seen: bool,
    pub last_read_at: Option<i64>,
}

/// The single record describing a conversation between two users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: Uuid,
    /// Participants in canonical (sorted) order.
    pub participants: [Uuid; 2],
    pub thread_id: Uuid,
    pub last_message: String,
    pub last_sender_id: Option<Uuid>,
    pub created_at: i64,
    pub updated_at: i64,
    pub views: BTreeMap<Uuid, ViewState>,
}

impl Conversation {
    pub fn view_of(&self, user: Uuid) -> ViewState {
        self.views.get(&user).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadEntry {
    pub seq: i64,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub sent_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageThread {
    pub id: Uuid,
    pub entries: Vec<ThreadEntry>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A friend-list row before it is rendered for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendPreview {
    pub friend: Profile,
    pub last_message: String,
    pub seen: bool,
    pub last_sender_id: Option<Uuid>,
    pub updated_at: i64,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        PublicUser {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            name: u.name.clone(),
            bio: u.bio.clone(),
            avatar: u.avatar_url.clone(),
            last_seen: u.last_seen,
            created_at: u.created_at,
            updated_at: u.updated_at,
        }
    }
}

impl From<&Conversation> for ChatView {
    fn from(c: &Conversation) -> Self {
        ChatView {
            id: c.id,
            participants: c.participants.to_vec(),
            message_id: c.thread_id,
            last_message: c.last_message.clone(),
            last_message_sender_id: c.last_sender_id,
            views: c
                .views
                .iter()
                .map(|(user_id, v)| SeenState {
                    user_id: *user_id,
                    message_seen: v.seen,
                    last_read_at: v.last_read_at,
                })
                .collect(),
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

impl From<&ThreadEntry> for MessageView {
    fn from(e: &ThreadEntry) -> Self {
        MessageView {
            sender_id: e.sender_id,
            content: e.content.clone(),
            image_url: e.image_url.clone(),
            timestamp: e.sent_at,
        }
    }
}

impl From<&MessageThread> for ThreadView {
    fn from(t: &MessageThread) -> Self {
        ThreadView {
            id: t.id,
            messages: t.entries.iter().map(MessageView::from).collect(),
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}
