//! HTTP surface of the chat backend.

mod chats;
mod media;
mod users;

use crate::auth::{self, LoginRateLimiter, SessionPolicy, TokenKind};
use crate::config::Config;
use crate::db::{self, DbPool};
use crate::error::{ChatError, ChatResult};
use crate::media::MediaStore;
use crate::model::User;
use crate::notify::{LoginNotifier, TracingNotifier};
use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::{
        multipart::MultipartRejection,
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, Multipart, Query, State,
    },
    http::{header, HeaderValue, Method, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, patch, post},
    Json, Router,
};
use bytes::Bytes;
use rusqlite::Connection;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub media: MediaStore,
    pub config: Config,
    pub jwt_secret: Arc<Vec<u8>>,
    pub login_limiter: LoginRateLimiter,
    pub session_policy: SessionPolicy,
    pub notifier: Arc<dyn LoginNotifier>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_notifier(config, Arc::new(TracingNotifier)).await
    }

    /// Build state with a custom login notifier.
    pub async fn with_notifier(config: Config, notifier: Arc<dyn LoginNotifier>) -> Result<Self> {
        let media_dir = config.media_dir();
        tokio::fs::create_dir_all(&media_dir)
            .await
            .with_context(|| format!("create {}", media_dir.display()))?;
        let media = MediaStore::new(media_dir, &config.public_url)?;
        let db_path = config.db_path();
        let pool = tokio::task::spawn_blocking(move || db::open_pool(db_path)).await??;
        let jwt_secret =
            auth::load_or_create_secret(&config.secret_path(), config.jwt_secret.as_deref()).await?;
        Ok(Self {
            pool,
            media,
            session_policy: SessionPolicy {
                single_session: config.single_session,
            },
            config,
            jwt_secret: Arc::new(jwt_secret),
            login_limiter: LoginRateLimiter::new(5, std::time::Duration::from_secs(60)),
            notifier,
        })
    }

    /// Run blocking database work on a pooled connection.
    pub async fn db<T, F>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Connection) -> ChatResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&conn)
        })
        .await
        .map_err(|e| ChatError::Internal(e.into()))?
    }

    pub fn access_ttl(&self) -> time::Duration {
        time::Duration::minutes(self.config.access_ttl_minutes)
    }

    pub fn refresh_ttl(&self) -> time::Duration {
        time::Duration::days(self.config.refresh_ttl_days)
    }
}

/// The authenticated caller, inserted by [`require_user`].
#[derive(Clone, Debug)]
pub struct CurrentUser(pub User);

/// Build the HTTP application router.
pub fn build_router(state: AppState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes() as usize);
    let protected = Router::new()
        .route("/chatapp/users/logout", post(users::logout))
        .route("/chatapp/users/profileupdate", patch(users::update_profile))
        .route("/chatapp/users/getuserdataright", get(users::me))
        .route(
            "/chatapp/users/userdata/withname/leftside",
            get(users::search),
        )
        .route("/chatapp/chats/start-chat", post(chats::start_chat))
        .route(
            "/chatapp/chats/login-user-getting-friend-list",
            get(chats::friend_list),
        )
        .route(
            "/chatapp/chats/friend-data-with-loggedin-user-profile",
            get(chats::friend_profile),
        )
        .route(
            "/chatapp/chats/message-by-current-chat-user",
            get(chats::thread),
        )
        .route(
            "/chatapp/chats/send-messagesby-loggedinuser",
            post(chats::send_message),
        )
        .route("/chatapp/chats/last-message", get(chats::last_message))
        .route(
            "/chatapp/chats/toggle/last/seen/logged/user",
            post(chats::toggle_seen),
        )
        .route(
            "/chatapp/chats/friend/data/for/right/side",
            get(chats::friend_media),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user))
        .layer(upload_limit);
    let public = Router::new()
        .route("/chatapp/health", get(health))
        .route("/chatapp/users/register", post(users::register))
        .route("/chatapp/users/login", post(users::login))
        .route("/chatapp/users/refresh-token", post(users::refresh))
        .route("/chatapp/users/forgot/password", post(users::forgot_password))
        .route("/chatapp/media/:id", get(media::download));
    let cors = cors_layer(state.config.cors_origin.as_deref());
    Router::new()
        .merge(public)
        .merge(protected)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let Some(origin) = origin else {
        return CorsLayer::permissive();
    };
    match origin.parse::<HeaderValue>() {
        Ok(origin) => CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]),
        Err(_) => {
            tracing::warn!(%origin, "ignoring unparsable CORS origin");
            CorsLayer::new()
        }
    }
}

async fn health() -> &'static str {
    "ok"
}

/// Reject requests without a valid access token for a user that is still
/// logged in.
async fn require_user(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next<Body>,
) -> Result<Response, ChatError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ChatError::unauthorized("Unauthorized request"))?;
    let claims = auth::verify_token(&state.jwt_secret, token, TokenKind::Access)
        .map_err(|_| ChatError::unauthorized("Invalid access token"))?;
    let user = state
        .db(move |conn| crate::users::find_by_id(conn, claims.sub))
        .await?
        .filter(|u| u.refresh_token.is_some())
        .ok_or_else(|| ChatError::unauthorized("Invalid access token"))?;
    req.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(req).await)
}

pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ChatResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ChatError::validation(e.body_text()))
}

pub(crate) fn query<T>(payload: Result<Query<T>, QueryRejection>) -> ChatResult<T> {
    payload
        .map(|Query(v)| v)
        .map_err(|e| ChatError::validation(e.body_text()))
}

/// A file part of a multipart form.
pub(crate) struct Upload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

/// Text fields and file parts of a multipart form, keyed by field name.
#[derive(Default)]
pub(crate) struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, Upload>,
}

impl FormData {
    pub async fn read(multipart: Result<Multipart, MultipartRejection>) -> ChatResult<Self> {
        let mut multipart = multipart.map_err(|e| ChatError::validation(e.body_text()))?;
        let mut form = FormData::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ChatError::validation(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if field.file_name().is_some() {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ChatError::validation(e.to_string()))?;
                // browsers send an empty part for an untouched file input
                if !data.is_empty() {
                    form.files.insert(
                        name,
                        Upload {
                            file_name,
                            content_type,
                            data,
                        },
                    );
                }
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ChatError::validation(e.to_string()))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn take_file(&mut self, name: &str) -> Option<Upload> {
        self.files.remove(name)
    }
}

/// Run `f` with the public URL of `upload`, if any.
///
/// The file is written before `f` runs; its metadata row is only recorded
/// once `f` succeeds. On failure a file no other record refers to is deleted.
pub(crate) async fn with_upload<T, F>(state: &AppState, upload: Option<Upload>, f: F) -> ChatResult<T>
where
    F: FnOnce(&Connection, Option<&str>) -> ChatResult<T> + Send + 'static,
    T: Send + 'static,
{
    let stored = match upload {
        Some(upload) => {
            let meta = state
                .media
                .save(
                    upload.data,
                    upload.file_name.as_deref(),
                    upload.content_type.as_deref(),
                )
                .await
                .map_err(|e| match e {
                    ChatError::Internal(e) => ChatError::Upstream(format!("{e:#}")),
                    other => other,
                })?;
            let url = state.media.url_for(&meta.id)?;
            Some((meta, url))
        }
        None => None,
    };
    let saved_id = stored.as_ref().map(|(meta, _)| meta.id.clone());
    let result = state
        .db(move |conn| {
            let value = f(conn, stored.as_ref().map(|(_, url)| url.as_str()))?;
            if let Some((meta, _)) = &stored {
                crate::media::record(conn, meta)?;
            }
            Ok(value)
        })
        .await;
    if let (Err(_), Some(id)) = (&result, saved_id) {
        discard_upload(state, id).await;
    }
    result
}

async fn discard_upload(state: &AppState, id: String) {
    let lookup_id = id.clone();
    match state
        .db(move |conn| crate::media::lookup(conn, &lookup_id))
        .await
    {
        // same bytes already referenced by an earlier upload
        Ok(Some(_)) => {}
        Ok(None) => {
            if let Err(e) = state.media.remove(&id).await {
                tracing::warn!(%id, error = %e, "failed to remove orphaned upload");
            }
        }
        Err(e) => tracing::warn!(%id, error = %e, "failed to check orphaned upload"),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

/// Run the HTTP server with the resolved configuration.
pub async fn run_http_server(config: Config) -> Result<()> {
    let addr: SocketAddr = config.bind.parse().context("invalid bind address")?;
    let state = AppState::new(config).await?;
    tracing::info!(%addr, data_dir = %state.config.data_dir.display(), "chat server listening");
    axum::Server::bind(&addr)
        .serve(build_router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
