use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Top level envelope returned by every endpoint.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Envelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
}

impl Envelope {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_data<T: Serialize>(mut self, data: &T) -> serde_json::Result<Self> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }

    pub fn with_chat<T: Serialize>(mut self, chat: &T) -> serde_json::Result<Self> {
        self.chat = Some(serde_json::to_value(chat)?);
        Ok(self)
    }

    pub fn with_user<T: Serialize>(mut self, user: &T) -> serde_json::Result<Self> {
        self.user = Some(serde_json::to_value(user)?);
        Ok(self)
    }

    /// Decode the `data` payload into a typed view.
    pub fn data_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.data.clone().unwrap_or(Value::Null))
    }

    pub fn chat_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.chat.clone().unwrap_or(Value::Null))
    }

    pub fn user_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(self.user.clone().unwrap_or(Value::Null))
    }
}

/// A user as exposed to clients. Credentials never leave the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub name: String,
    pub bio: String,
    pub avatar: Option<String>,
    pub last_seen: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub access_token: String,
}

/// One participant's view of a conversation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SeenState {
    pub user_id: Uuid,
    pub message_seen: bool,
    pub last_read_at: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub participants: Vec<Uuid>,
    /// Id of the message thread shared by both participants.
    pub message_id: Uuid,
    pub last_message: String,
    pub last_message_sender_id: Option<Uuid>,
    pub views: Vec<SeenState>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub image_url: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThreadView {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub messages: Vec<MessageView>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A row of the friend list shown on the left side of the client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FriendEntry {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub bio: String,
    pub avatar: Option<String>,
    pub last_message: String,
    pub message_seen: bool,
    pub last_message_sender_id: Option<Uuid>,
    pub updated_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMedia {
    pub name: String,
    pub bio: String,
    pub avatar: Option<String>,
    pub images: Vec<String>,
    pub last_seen: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub last_data: String,
    pub time_update: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RegisterRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
    pub new_password: Option<String>,
    pub new_password_again: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct StartChatRequest {
    pub receiver_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ToggleSeenRequest {
    pub friend_id: Option<Uuid>,
}

/// `?_id=` query naming the conversation partner.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct PeerQuery {
    #[serde(rename = "_id", default)]
    pub id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct FriendQuery {
    pub friend_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NameQuery {
    pub name: Option<String>,
}
