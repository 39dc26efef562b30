//! Shared harness: a gateway over in-memory doubles plus a fake collaborator.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, header};
use axum::response::Response;
use evgate_api::config::{AllowedOrigin, GatewayConfig};
use evgate_api::routing::{RouteRule, RouteTable};
use evgate_api::{AppState, router, token_service};
use evgate_core::auth::password::hash_password;
use evgate_core::auth::service::{TokenService, TokenTtls};
use evgate_core::models::auth::{NewUser, Role, User};
use evgate_core::store::MemoryTokenStore;
use evgate_core::users::{InMemoryUserDirectory, UserDirectory};
use serde_json::{Value, json};
use tower::ServiceExt;

pub const PASSWORD: &str = "password123";

pub struct Gateway {
    pub app: Router,
    pub tokens: Arc<TokenService>,
    pub store: Arc<MemoryTokenStore>,
    pub users: Arc<InMemoryUserDirectory>,
}

pub fn config(collaborators: &[(&str, String)]) -> GatewayConfig {
    let mut map: BTreeMap<String, String> = [
        ("core", "http://127.0.0.1:1"),
        ("communication", "http://127.0.0.1:1"),
        ("notification", "http://127.0.0.1:1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    for (name, url) in collaborators {
        map.insert(name.to_string(), url.clone());
    }

    GatewayConfig {
        jwt_secret: "integration-test-secret".into(),
        jwt_issuer: "api-gateway".into(),
        ttls: TokenTtls::default(),
        allowed_origin: AllowedOrigin::Any,
        collaborators: map,
        upstream_timeout: Duration::from_secs(2),
        store_timeout: Duration::from_secs(1),
        lookup_timeout: Duration::from_secs(1),
        routes_file: None,
    }
}

pub fn gateway(config: GatewayConfig) -> Gateway {
    gateway_with_rules(config, RouteTable::default_rules())
}

/// App state over fresh in-memory doubles and the given rules.
pub fn state_with_rules(
    config: GatewayConfig,
    rules: Vec<RouteRule>,
) -> (AppState, Arc<MemoryTokenStore>, Arc<InMemoryUserDirectory>) {
    let store = Arc::new(MemoryTokenStore::new());
    let users = Arc::new(InMemoryUserDirectory::new());
    let service = token_service(&config, store.clone(), users.clone()).unwrap();
    let routes = RouteTable::new(rules, &config.collaborators).unwrap();
    (AppState::new(service, config, routes), store, users)
}

pub fn gateway_with_rules(config: GatewayConfig, rules: Vec<RouteRule>) -> Gateway {
    let (state, store, users) = state_with_rules(config, rules);
    let tokens = state.tokens.clone();
    Gateway {
        app: router(state),
        tokens,
        store,
        users,
    }
}

impl Gateway {
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let resp = self.send(method, uri, token, body).await;
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response {
        let mut req = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "gateway.test");
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();
        self.app.clone().oneshot(req).await.unwrap()
    }

    /// Register through the API and return `(user id, access, refresh)`.
    pub async fn register(&self, email: &str) -> (String, String, String) {
        let (status, body) = self
            .call(
                Method::POST,
                "/api/v1/auth/register",
                None,
                Some(json!({
                    "email": email,
                    "password": PASSWORD,
                    "firstName": "Ada",
                    "lastName": "Lovelace",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
        (
            body["user"]["id"].as_str().unwrap().to_string(),
            body["accessToken"].as_str().unwrap().to_string(),
            body["refreshToken"].as_str().unwrap().to_string(),
        )
    }

    /// Seed an admin account directly and return its access token.
    pub async fn admin_token(&self) -> (User, String) {
        let admin = self
            .users
            .create(NewUser {
                email: "admin@example.com".into(),
                password_hash: hash_password(PASSWORD).unwrap(),
                first_name: "Root".into(),
                last_name: "Admin".into(),
                role: Role::Admin,
            })
            .await
            .unwrap();
        let pair = self.tokens.issue(&admin.id.to_string(), Role::Admin).unwrap();
        (admin, pair.access_token)
    }
}

/// What the fake collaborator saw on its last request.
#[derive(Default)]
pub struct Collaborator {
    pub hits: AtomicUsize,
    pub last: std::sync::Mutex<Option<Value>>,
}

impl Collaborator {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn last(&self) -> Value {
        self.last.lock().unwrap().clone().unwrap_or(Value::Null)
    }
}

/// Start a collaborator that records each request and echoes it back.
pub async fn spawn_collaborator() -> (SocketAddr, Arc<Collaborator>) {
    let seen = Arc::new(Collaborator::default());
    let app = Router::new()
        .fallback(echo)
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen)
}

async fn echo(State(seen): State<Arc<Collaborator>>, request: Request) -> Response {
    seen.hits.fetch_add(1, Ordering::SeqCst);
    let (parts, body) = request.into_parts();
    let body: Bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    let get = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let record = json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "userId": get("x-user-id"),
        "userRole": get("x-user-role"),
        "forwardedHost": get("x-forwarded-host"),
        "forwardedProto": get("x-forwarded-proto"),
        "body": String::from_utf8_lossy(&body),
    });
    *seen.last.lock().unwrap() = Some(record.clone());

    Response::builder()
        .status(StatusCode::ACCEPTED)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-collaborator", "core")
        .body(Body::from(record.to_string()))
        .unwrap()
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
