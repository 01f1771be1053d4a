use crate::db::{now_ms, opt_uuid_at, uuid_at};
use crate::error::{ChatError, ChatResult};
use crate::model::{
    Conversation, FriendPreview, MessageThread, Profile, ThreadEntry, ViewState, IMAGE_PREVIEW,
};
use crate::users;
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::{BTreeMap, HashSet};
use time::OffsetDateTime;
use uuid::Uuid;

/// Outcome of [`open_or_get_chat`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    Created(Conversation),
    Existing(Conversation),
}

/// Image references of a conversation together with the partner's profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMedia {
    pub peer: Profile,
    pub images: Vec<String>,
}

fn ordered(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Deterministic id for the conversation between two users.
pub fn conversation_id(a: Uuid, b: Uuid) -> Uuid {
    let (low, high) = ordered(a, b);
    let name = format!("chat:{}:{}", low, high);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes())
}

fn load_views(conn: &Connection, conversation: &Uuid) -> ChatResult<BTreeMap<Uuid, ViewState>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, seen, last_read_at FROM conversation_views WHERE conversation_id = ?1",
    )?;
    let views = stmt
        .query_map([conversation.to_string()], |row| {
            Ok((
                uuid_at(row, 0)?,
                ViewState {
                    seen: row.get::<_, i64>(1)? != 0,
                    last_read_at: row.get(2)?,
                },
            ))
        })?
        .collect::<Result<BTreeMap<_, _>, _>>()?;
    Ok(views)
}

/// Find the conversation between two users regardless of who started it.
pub fn find_conversation(conn: &Connection, a: Uuid, b: Uuid) -> ChatResult<Option<Conversation>> {
    let id = conversation_id(a, b);
    let row = conn
        .query_row(
            "SELECT user_a, user_b, thread_id, last_message, last_sender_id, created_at, updated_at FROM conversations WHERE id = ?1",
            [id.to_string()],
            |row| {
                Ok((
                    [uuid_at(row, 0)?, uuid_at(row, 1)?],
                    uuid_at(row, 2)?,
                    row.get::<_, String>(3)?,
                    opt_uuid_at(row, 4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            },
        )
        .optional()?;
    let Some((participants, thread_id, last_message, last_sender_id, created_at, updated_at)) = row
    else {
        return Ok(None);
    };
    Ok(Some(Conversation {
        id,
        participants,
        thread_id,
        last_message,
        last_sender_id,
        created_at,
        updated_at,
        views: load_views(conn, &id)?,
    }))
}

/// IMMEDIATE transaction: the write lock is held from `BEGIN`.
fn write_tx(conn: &Connection) -> rusqlite::Result<Transaction<'_>> {
    Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
}

fn require_conversation(
    conn: &Connection,
    a: Uuid,
    b: Uuid,
    missing: &str,
) -> ChatResult<Conversation> {
    find_conversation(conn, a, b)?.ok_or_else(|| ChatError::not_found(missing))
}

/// Open the conversation between `requester` and `peer`, or report the one
/// that already exists.
pub fn open_or_get_chat(conn: &Connection, requester: Uuid, peer: Uuid) -> ChatResult<OpenOutcome> {
    if requester == peer {
        return Err(ChatError::validation("Cannot start a chat with yourself"));
    }
    users::profile(conn, peer)?;
    if let Some(existing) = find_conversation(conn, requester, peer)? {
        return Ok(OpenOutcome::Existing(existing));
    }

    let id = conversation_id(requester, peer);
    let (low, high) = ordered(requester, peer);
    let thread_id = Uuid::new_v4();
    let now = now_ms();
    let tx = write_tx(conn)?;
    tx.execute(
        "INSERT INTO threads (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
        params![thread_id.to_string(), now],
    )?;
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO conversations (id, user_a, user_b, thread_id, last_message, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, '', ?5, ?5)",
        params![id.to_string(), low.to_string(), high.to_string(), thread_id.to_string(), now],
    )?;
    if inserted == 0 {
        // lost a race against another request for the same pair
        drop(tx);
        return Ok(OpenOutcome::Existing(require_conversation(
            conn,
            requester,
            peer,
            "No chat found",
        )?));
    }
    for user in [low, high] {
        tx.execute(
            "INSERT INTO conversation_views (conversation_id, user_id, seen) VALUES (?1, ?2, 0)",
            params![id.to_string(), user.to_string()],
        )?;
    }
    tx.commit()?;
    tracing::info!(conversation = %id, %requester, %peer, "chat started");
    Ok(OpenOutcome::Created(require_conversation(
        conn,
        requester,
        peer,
        "No chat found",
    )?))
}

/// Append a message from `requester` to the conversation with `peer`.
///
/// The shared preview, the last sender and both participants' view state
/// are updated in the same transaction as the entry itself.
pub fn append_message(
    conn: &Connection,
    requester: Uuid,
    peer: Uuid,
    content: Option<&str>,
    image_url: Option<&str>,
) -> ChatResult<(Conversation, ThreadEntry)> {
    let content = content.map(str::trim).filter(|c| !c.is_empty());
    let image_url = image_url.map(str::trim).filter(|u| !u.is_empty());
    if content.is_none() && image_url.is_none() {
        return Err(ChatError::validation(
            "Please provide content or upload an image",
        ));
    }
    let chat = require_conversation(conn, requester, peer, "No chat found")?;
    let preview = content.unwrap_or(IMAGE_PREVIEW);
    let now = now_ms();

    let tx = write_tx(conn)?;
    let seq: i64 = tx.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM thread_entries WHERE thread_id = ?1",
        [chat.thread_id.to_string()],
        |row| row.get(0),
    )?;
    tx.execute(
        "INSERT INTO thread_entries (thread_id, seq, sender_id, content, image_url, sent_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            chat.thread_id.to_string(),
            seq,
            requester.to_string(),
            content,
            image_url,
            now
        ],
    )?;
    tx.execute(
        "UPDATE threads SET updated_at = ?2 WHERE id = ?1",
        params![chat.thread_id.to_string(), now],
    )?;
    tx.execute(
        "UPDATE conversations SET last_message = ?2, last_sender_id = ?3, updated_at = ?4 WHERE id = ?1",
        params![chat.id.to_string(), preview, requester.to_string(), now],
    )?;
    tx.execute(
        "UPDATE conversation_views SET seen = 1, last_read_at = ?3 WHERE conversation_id = ?1 AND user_id = ?2",
        params![chat.id.to_string(), requester.to_string(), now],
    )?;
    tx.execute(
        "UPDATE conversation_views SET seen = 0 WHERE conversation_id = ?1 AND user_id = ?2",
        params![chat.id.to_string(), peer.to_string()],
    )?;
    tx.commit()?;

    let entry = ThreadEntry {
        seq,
        sender_id: requester,
        content: content.map(str::to_string),
        image_url: image_url.map(str::to_string),
        sent_at: now,
    };
    let chat = require_conversation(conn, requester, peer, "No chat found")?;
    Ok((chat, entry))
}

/// One row per conversation partner of `user`, most recently active first.
pub fn list_friends_with_preview(conn: &Connection, user: Uuid) -> ChatResult<Vec<FriendPreview>> {
    let mut stmt = conn.prepare(
        "SELECT u.id, u.name, u.bio, u.avatar_url, u.last_seen, c.last_message, v.seen, c.last_sender_id, c.updated_at \
         FROM conversations c \
         JOIN conversation_views v ON v.conversation_id = c.id AND v.user_id = ?1 \
         JOIN users u ON u.id = (CASE WHEN c.user_a = ?1 THEN c.user_b ELSE c.user_a END) \
         WHERE (c.user_a = ?1 OR c.user_b = ?1) \
         ORDER BY c.updated_at DESC, c.rowid DESC",
    )?;
    let rows = stmt
        .query_map([user.to_string()], |row| {
            Ok(FriendPreview {
                friend: Profile {
                    id: uuid_at(row, 0)?,
                    name: row.get(1)?,
                    bio: row.get(2)?,
                    avatar_url: row.get(3)?,
                    last_seen: row.get(4)?,
                },
                last_message: row.get(5)?,
                seen: row.get::<_, i64>(6)? != 0,
                last_sender_id: opt_uuid_at(row, 7)?,
                updated_at: row.get(8)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen_friends = HashSet::new();
    Ok(rows
        .into_iter()
        .filter(|row| row.friend.id != user && seen_friends.insert(row.friend.id))
        .collect())
}

/// Mark the conversation with `peer` as seen by `user`.
///
/// Returns the view state of both participants.
pub fn toggle_seen(conn: &Connection, user: Uuid, peer: Uuid) -> ChatResult<Vec<(Uuid, ViewState)>> {
    let chat = require_conversation(
        conn,
        user,
        peer,
        "No chats found for the specified friend.",
    )?;
    conn.execute(
        "UPDATE conversation_views SET seen = 1, last_read_at = ?3 WHERE conversation_id = ?1 AND user_id = ?2",
        params![chat.id.to_string(), user.to_string(), now_ms()],
    )?;
    Ok(load_views(conn, &chat.id)?.into_iter().collect())
}

fn load_thread(conn: &Connection, thread_id: Uuid) -> ChatResult<MessageThread> {
    let (created_at, updated_at): (i64, i64) = conn
        .query_row(
            "SELECT created_at, updated_at FROM threads WHERE id = ?1",
            [thread_id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| ChatError::not_found("No messages found"))?;
    let mut stmt = conn.prepare(
        "SELECT seq, sender_id, content, image_url, sent_at FROM thread_entries WHERE thread_id = ?1 ORDER BY seq",
    )?;
    let entries = stmt
        .query_map([thread_id.to_string()], |row| {
            Ok(ThreadEntry {
                seq: row.get(0)?,
                sender_id: uuid_at(row, 1)?,
                content: row.get(2)?,
                image_url: row.get(3)?,
                sent_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MessageThread {
        id: thread_id,
        entries,
        created_at,
        updated_at,
    })
}

/// The full message thread shared with `peer`.
pub fn thread_for(conn: &Connection, user: Uuid, peer: Uuid) -> ChatResult<MessageThread> {
    let chat = require_conversation(conn, user, peer, "no chat found")?;
    load_thread(conn, chat.thread_id)
}

/// Images exchanged with `peer`, in thread order, plus the peer's profile.
pub fn conversation_media(conn: &Connection, user: Uuid, peer: Uuid) -> ChatResult<ConversationMedia> {
    let profile = users::profile(conn, peer)?;
    let chat = require_conversation(conn, user, peer, "Chat not found")?;
    let images = load_thread(conn, chat.thread_id)?
        .entries
        .into_iter()
        .filter_map(|e| e.image_url)
        .collect();
    Ok(ConversationMedia {
        peer: profile,
        images,
    })
}

/// Last message preview and a clock label of when it happened.
pub fn last_message(conn: &Connection, user: Uuid, peer: Uuid) -> ChatResult<(String, String)> {
    let chat = require_conversation(conn, user, peer, "no chat found")?;
    Ok((chat.last_message.clone(), clock_label(chat.updated_at)))
}

/// Render epoch milliseconds as a 12-hour UTC clock label such as `3:07 pm`.
pub fn clock_label(ms: i64) -> String {
    let at = OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let (hour, minute) = (at.hour(), at.minute());
    let suffix = if hour < 12 { "am" } else { "pm" };
    let hour12 = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{}:{:02} {}", hour12, minute, suffix)
}
