use super::{json_body, query, with_upload, AppState, CurrentUser, FormData};
use crate::auth::{self, TokenKind};
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
    AccessToken, Envelope, ForgotPasswordRequest, LoginData, LoginRequest, NameQuery, PublicUser,
    RefreshRequest, RegisterRequest,
};

pub(super) async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ChatResult<(StatusCode, Json<Envelope>)> {
    let req = json_body(payload)?;
    let user = state
        .db(move |conn| {
            users::register(
                conn,
                req.username.as_deref(),
                req.email.as_deref(),
                req.password.as_deref(),
            )
        })
        .await?;
    tracing::info!(user_id = %user.id, "user registered");
    let body = Envelope::ok("User registered successfully").with_user(&PublicUser::from(&user))?;
    Ok((StatusCode::CREATED, Json(body)))
}

pub(super) async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ChatResult<Json<Envelope>> {
    let req = json_body(payload)?;
    let key = req.email.as_deref().unwrap_or_default().trim().to_string();
    if !state.login_limiter.check(&key) {
        return Err(ChatError::RateLimited);
    }
    let secret = state.jwt_secret.clone();
    let policy = state.session_policy;
    let notifier = state.notifier.clone();
    let (access_ttl, refresh_ttl) = (state.access_ttl(), state.refresh_ttl());
    let data = state
        .db(move |conn| {
            let user = users::authenticate(conn, req.email.as_deref(), req.password.as_deref())?;
            if let Err(err) = policy.admit(&secret, &user) {
                notifier.login_attempt(&user);
                return Err(err);
            }
            let access_token = auth::issue_token(&secret, user.id, TokenKind::Access, access_ttl)?;
            let refresh_token =
                auth::issue_token(&secret, user.id, TokenKind::Refresh, refresh_ttl)?;
            users::set_refresh_token(conn, user.id, Some(&refresh_token))?;
            users::touch_last_seen(conn, user.id)?;
            let user = users::get(conn, user.id)?;
            Ok(LoginData {
                user: PublicUser::from(&user),
                access_token,
                refresh_token,
            })
        })
        .await?;
    tracing::info!(user_id = %data.user.id, "user logged in");
    Ok(Json(
        Envelope::ok("User logged in successfully").with_data(&data)?,
    ))
}

pub(super) async fn refresh(
    State(state): State<AppState>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> ChatResult<Json<Envelope>> {
    let req = json_body(payload)?;
    let token = users::required(req.refresh_token.as_deref(), "Refresh token is required")?
        .to_string();
    let claims = auth::verify_token(&state.jwt_secret, &token, TokenKind::Refresh)
        .map_err(|_| ChatError::unauthorized("Invalid refresh token"))?;
    let user = state
        .db(move |conn| users::find_by_id(conn, claims.sub))
        .await?
        .ok_or_else(|| ChatError::unauthorized("Invalid refresh token"))?;
    if user.refresh_token.as_deref() != Some(token.as_str()) {
        return Err(ChatError::unauthorized("Refresh token is expired or used"));
    }
    let access_token =
        auth::issue_token(&state.jwt_secret, user.id, TokenKind::Access, state.access_ttl())?;
    Ok(Json(
        Envelope::ok("Access token refreshed").with_data(&AccessToken { access_token })?,
    ))
}

pub(super) async fn forgot_password(
    State(state): State<AppState>,
    payload: Result<Json<ForgotPasswordRequest>, JsonRejection>,
) -> ChatResult<Json<Envelope>> {
    let req = json_body(payload)?;
    state
        .db(move |conn| {
            users::reset_password(
                conn,
                req.email.as_deref(),
                req.new_password.as_deref(),
                req.new_password_again.as_deref(),
            )
        })
        .await?;
    Ok(Json(Envelope::ok("Password changed successfully")))
}

pub(super) async fn logout(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ChatResult<Json<Envelope>> {
    let id = user.id;
    state
        .db(move |conn| {
            users::set_refresh_token(conn, id, None)?;
            users::touch_last_seen(conn, id)
        })
        .await?;
    tracing::info!(user_id = %id, "user logged out");
    Ok(Json(Envelope::ok("User logged out")))
}

pub(super) async fn me(
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ChatResult<Json<Envelope>> {
    Ok(Json(
        Envelope::ok("User fetched").with_user(&PublicUser::from(&user))?,
    ))
}

pub(super) async fn update_profile(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ChatResult<Json<Envelope>> {
    let mut form = FormData::read(multipart).await?;
    let name = form.text("name").map(str::to_string);
    let bio = form.text("bio").map(str::to_string);
    users::required(name.as_deref(), "Enter your name")?;
    let avatar = form.take_file("avatar");
    let id = user.id;
    let updated = with_upload(&state, avatar, move |conn, avatar_url| {
        users::update_profile(conn, id, name.as_deref(), bio.as_deref(), avatar_url)
    })
    .await?;
    Ok(Json(
        Envelope::ok("Profile updated successfully").with_user(&PublicUser::from(&updated))?,
    ))
}

pub(super) async fn search(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    params: Result<Query<NameQuery>, QueryRejection>,
) -> ChatResult<Json<Envelope>> {
    let params = query(params)?;
    let id = user.id;
    let found = state
        .db(move |conn| users::search_by_name(conn, id, params.name.as_deref()))
        .await?;
    let found: Vec<PublicUser> = found.iter().map(PublicUser::from).collect();
    Ok(Json(Envelope::ok("Users found").with_data(&found)?))
}
