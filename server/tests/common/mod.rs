#![allow(dead_code)]

use chatapp::{
    api::{build_router, AppState},
    config::Config,
    model::User,
    notify::LoginNotifier,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const PASSWORD: &str = "hunter22";

/// Smallest byte prefix `infer` recognises as PNG.
pub const PNG: &[u8] = &[
    0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0x0D, b'I', b'H', b'D', b'R',
];

/// Collects login-attempt notices instead of sending them.
#[derive(Default)]
pub struct RecordingNotifier {
    pub notified: Mutex<Vec<Uuid>>,
}

impl LoginNotifier for RecordingNotifier {
    fn login_attempt(&self, user: &User) {
        self.notified.lock().push(user.id);
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub server: JoinHandle<()>,
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
    pub client: reqwest::Client,
    _tmp: tempfile::TempDir,
}

pub struct Session {
    pub id: Uuid,
    pub email: String,
    pub access: String,
    pub refresh: String,
}

pub async fn spawn_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        bind: addr.to_string(),
        data_dir: tmp.path().to_path_buf(),
        public_url: format!("http://{}", addr),
        max_upload_mb: 1,
        ..Default::default()
    };
    let notifier = Arc::new(RecordingNotifier::default());
    let state = AppState::with_notifier(config, notifier.clone())
        .await
        .unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    TestServer {
        addr,
        server,
        state,
        notifier,
        client: reqwest::Client::new(),
        _tmp: tmp,
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn register(&self, username: &str) -> reqwest::Response {
        self.client
            .post(self.url("/chatapp/users/register"))
            .json(&json!({
                "username": username,
                "email": format!("{username}@example.com"),
                "password": PASSWORD,
            }))
            .send()
            .await
            .unwrap()
    }

    pub async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/chatapp/users/login"))
            .json(&json!({"email": email, "password": password}))
            .send()
            .await
            .unwrap()
    }

    /// Register `username` and log in, returning the issued tokens.
    pub async fn session(&self, username: &str) -> Session {
        let resp = self.register(username).await;
        assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
        let email = format!("{username}@example.com");
        let resp = self.login(&email, PASSWORD).await;
        assert!(resp.status().is_success());
        let body: Value = resp.json().await.unwrap();
        Session {
            id: body["data"]["user"]["_id"].as_str().unwrap().parse().unwrap(),
            email,
            access: body["data"]["accessToken"].as_str().unwrap().to_string(),
            refresh: body["data"]["refreshToken"].as_str().unwrap().to_string(),
        }
    }

    pub async fn get(&self, token: &str, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
    }

    pub async fn post_json(&self, token: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn start_chat(&self, token: &str, peer: Uuid) -> reqwest::Response {
        self.post_json(token, "/chatapp/chats/start-chat", json!({"receiverId": peer}))
            .await
    }

    pub async fn send_form(
        &self,
        token: &str,
        peer: Uuid,
        form: reqwest::multipart::Form,
    ) -> reqwest::Response {
        self.client
            .post(self.url(&format!(
                "/chatapp/chats/send-messagesby-loggedinuser?_id={peer}"
            )))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .unwrap()
    }

    pub async fn send_text(&self, token: &str, peer: Uuid, text: &str) -> reqwest::Response {
        let form = reqwest::multipart::Form::new().text("content", text.to_string());
        self.send_form(token, peer, form).await
    }

    pub async fn friends(&self, token: &str) -> Vec<Value> {
        let resp = self
            .get(token, "/chatapp/chats/login-user-getting-friend-list")
            .await;
        assert!(resp.status().is_success());
        let body: Value = resp.json().await.unwrap();
        body["data"].as_array().unwrap().clone()
    }
}

pub fn image_part(bytes: &[u8], name: &str, mime: &str) -> reqwest::multipart::Part {
    reqwest::multipart::Part::bytes(bytes.to_vec())
        .file_name(name.to_string())
        .mime_str(mime)
        .unwrap()
}
