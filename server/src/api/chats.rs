use super::{json_body, query, with_upload, AppState, CurrentUser, FormData};
use crate::chats::{self, OpenOutcome};
use crate::error::{ChatError, ChatResult};
use crate::users;
use axum::{
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
        Extension, Multipart, Query, State,
    },
    http::StatusCode,
    Json,
};
use chat_api::{
    ChatView, ConversationMedia, Envelope, FriendEntry, FriendQuery, LastMessage, MessageView,
    PeerQuery, PublicUser, SeenState, StartChatRequest, ThreadView, ToggleSeenRequest,
};
use uuid::Uuid;

fn required_id(id: Option<Uuid>, msg: &str) -> ChatResult<Uuid> {
    id.ok_or_else(|| ChatError::validation(msg))
}

pub(super) async fn start_chat(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    payload: Result<Json<StartChatRequest>, JsonRejection>,
) -> ChatResult<(StatusCode, Json<Envelope>)> {
    let req = json_body(payload)?;
    let receiver = required_id(req.receiver_id, "Receiver ID is required")?;
    let me = user.id;
    let outcome = state
        .db(move |conn| chats::open_or_get_chat(conn, me, receiver))
        .await?;
    match outcome {
        OpenOutcome::Created(chat) => Ok((
            StatusCode::CREATED,
            Json(Envelope::ok("Chat started successfully").with_chat(&ChatView::from(&chat))?),
        )),
        OpenOutcome::Existing(chat) => Ok((
            StatusCode::CONFLICT,
            Json(
                Envelope::failure("Chat already exists with this user")
                    .with_chat(&ChatView::from(&chat))?,
            ),
        )),
    }
}

pub(super) async fn friend_list(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ChatResult<Json<Envelope>> {
    let me = user.id;
    let rows = state
        .db(move |conn| chats::list_friends_with_preview(conn, me))
        .await?;
    let friends: Vec<FriendEntry> = rows
        .into_iter()
        .map(|row| FriendEntry {
            id: row.friend.id,
            name: row.friend.name,
            bio: row.friend.bio,
            avatar: row.friend.avatar_url,
            last_message: row.last_message,
            message_seen: row.seen,
            last_message_sender_id: row.last_sender_id,
            updated_at: row.updated_at,
        })
        .collect();
    Ok(Json(Envelope::ok("Friend list fetched").with_data(&friends)?))
}

pub(super) async fn friend_profile(
    State(state): State<AppState>,
    params: Result<Query<PeerQuery>, QueryRejection>,
) -> ChatResult<Json<Envelope>> {
    let peer = required_id(query(params)?.id, "Friend ID is required")?;
    let friend = state.db(move |conn| users::get(conn, peer)).await?;
    Ok(Json(
        Envelope::ok("Friend data fetched").with_user(&PublicUser::from(&friend))?,
    ))
}

pub(super) async fn thread(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    params: Result<Query<PeerQuery>, QueryRejection>,
) -> ChatResult<Json<Envelope>> {
    let peer = required_id(query(params)?.id, "Friend ID is required")?;
    let me = user.id;
    let thread = state
        .db(move |conn| chats::thread_for(conn, me, peer))
        .await?;
    Ok(Json(
        Envelope::ok("Messages fetched").with_data(&ThreadView::from(&thread))?,
    ))
}

pub(super) async fn send_message(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    params: Result<Query<PeerQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ChatResult<Json<Envelope>> {
    let peer = required_id(query(params)?.id, "Friend ID is required")?;
    let mut form = FormData::read(multipart).await?;
    let content = form
        .text("content")
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    let image = form.take_file("imageUrl");
    if content.is_none() && image.is_none() {
        return Err(ChatError::validation(
            "Please provide content or upload an image",
        ));
    }

    let me = user.id;
    state
        .db(move |conn| chats::find_conversation(conn, me, peer))
        .await?
        .ok_or_else(|| ChatError::not_found("No chat found"))?;
    let (chat, entry) = with_upload(&state, image, move |conn, image_url| {
        chats::append_message(conn, me, peer, content.as_deref(), image_url)
    })
    .await?;
    tracing::debug!(conversation = %chat.id, sender = %me, seq = entry.seq, "message appended");
    let body = Envelope::ok("Message sent successfully")
        .with_chat(&ChatView::from(&chat))?
        .with_data(&MessageView::from(&entry))?;
    Ok(Json(body))
}

pub(super) async fn last_message(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    params: Result<Query<PeerQuery>, QueryRejection>,
) -> ChatResult<Json<Envelope>> {
    let peer = required_id(query(params)?.id, "Friend ID is required")?;
    let me = user.id;
    let (last_data, time_update) = state
        .db(move |conn| chats::last_message(conn, me, peer))
        .await?;
    Ok(Json(Envelope::ok("Last message fetched").with_data(&LastMessage {
        last_data,
        time_update,
    })?))
}

pub(super) async fn toggle_seen(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    payload: Result<Json<ToggleSeenRequest>, JsonRejection>,
) -> ChatResult<Json<Envelope>> {
    let friend = required_id(json_body(payload)?.friend_id, "Friend ID is required")?;
    let me = user.id;
    let views = state
        .db(move |conn| chats::toggle_seen(conn, me, friend))
        .await?;
    let views: Vec<SeenState> = views
        .into_iter()
        .map(|(user_id, view)| SeenState {
            user_id,
            message_seen: view.seen,
            last_read_at: view.last_read_at,
        })
        .collect();
    Ok(Json(Envelope::ok("Message seen status updated").with_data(&views)?))
}

pub(super) async fn friend_media(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    params: Result<Query<FriendQuery>, QueryRejection>,
) -> ChatResult<Json<Envelope>> {
    let friend = required_id(query(params)?.friend_id, "Friend ID is required")?;
    let me = user.id;
    let media = state
        .db(move |conn| chats::conversation_media(conn, me, friend))
        .await?;
    let body = ConversationMedia {
        name: media.peer.name,
        bio: media.peer.bio,
        avatar: media.peer.avatar_url,
        images: media.images,
        last_seen: media.peer.last_seen,
    };
    Ok(Json(Envelope::ok("Friend media fetched").with_data(&body)?))
}
