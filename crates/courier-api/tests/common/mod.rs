#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use courier_api::{AppState, AppStateInner, AuthConfig, router};
use courier_store::Database;

pub const JWT_SECRET: &str = "test-secret";
pub const PASSWORD: &str = "password123";

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub router: Router,
}

/// A registered user and the tokens from registration.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(AuthConfig::new(JWT_SECRET).with_admin_emails(["admin@example.com"]))
    }

    pub fn with_config(config: AuthConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let state = AppStateInner::new(db, config);
        let router = router(state.clone());
        Self { dir, state, router }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::PUT, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.request(Method::DELETE, uri, Some(token), None).await
    }

    pub async fn register(&self, username: &str) -> TestUser {
        self.register_with_email(username, &format!("{username}@example.com"))
            .await
    }

    pub async fn register_with_email(&self, username: &str, email: &str) -> TestUser {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/v1/registration",
                None,
                Some(json!({ "username": username, "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register {username}: {body}");

        TestUser {
            user_id: body["user"]["userId"].as_str().unwrap().to_string(),
            username: username.to_string(),
            email: email.to_string(),
            access_token: body["accessToken"].as_str().unwrap().to_string(),
            refresh_token: body["refreshToken"].as_str().unwrap().to_string(),
        }
    }

    /// Creates a group chat owned by `owner` with the extra `members`.
    pub async fn create_chat(&self, owner: &TestUser, name: &str, members: &[&TestUser]) -> Value {
        let member_ids: Vec<&str> = members.iter().map(|m| m.user_id.as_str()).collect();
        let (status, body) = self
            .post(
                "/api/v1/chats",
                &owner.access_token,
                json!({ "name": name, "members": member_ids }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create chat {name}: {body}");
        body
    }

    pub async fn send(&self, author: &TestUser, chat_id: &str, content: &str) -> Value {
        let (status, body) = self
            .post(
                &format!("/api/v1/chats/{chat_id}/messages"),
                &author.access_token,
                json!({ "content": content }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "send message: {body}");
        body
    }
}
