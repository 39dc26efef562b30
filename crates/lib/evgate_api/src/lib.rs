//! # evgate_api
//!
//! HTTP surface of the evgate API gateway.
//!
//! Every rule in the [`RouteTable`] becomes a set of axum routes guarded by
//! the rule's access level. Local rules mount the auth or admin handlers;
//! proxy rules forward to a collaborator.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routing;

use std::sync::Arc;

use axum::{Extension, Router};
use axum::http::{Method, header};
use axum::routing::{any, get, post, put};
use evgate_core::auth::jwt::{CodecError, TokenCodec};
use evgate_core::auth::service::TokenService;
use evgate_core::store::TokenStore;
use evgate_core::users::UserDirectory;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::config::{AllowedOrigin, GatewayConfig};
use crate::error::AppError;
use crate::handlers::{admin, auth, health};
use crate::middleware::auth::{require_admin, require_auth};
use crate::routing::proxy::{self, MountedProxy};
use crate::routing::{Access, LocalService, RouteRule, RouteTable, RouteTarget};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Token lifecycle and user flows.
    pub tokens: Arc<TokenService>,
    pub config: Arc<GatewayConfig>,
    /// Immutable after startup.
    pub routes: Arc<RouteTable>,
    /// Outbound client for proxy routes.
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(tokens: TokenService, config: GatewayConfig, routes: RouteTable) -> Self {
        Self {
            tokens: Arc::new(tokens),
            config: Arc::new(config),
            routes: Arc::new(routes),
            http: reqwest::Client::new(),
        }
    }
}

/// Wire a [`TokenService`] from configuration.
pub fn token_service(
    config: &GatewayConfig,
    store: Arc<dyn TokenStore>,
    users: Arc<dyn UserDirectory>,
) -> Result<TokenService, CodecError> {
    let codec = TokenCodec::new(config.jwt_secret.as_bytes(), config.jwt_issuer.clone())?;
    Ok(TokenService::new(codec, store, users, config.ttls).with_lookup_timeout(config.lookup_timeout))
}

/// Builds the Axum router with all routes and shared state.
pub fn router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/", get(health::health_handler))
        .route("/health", get(health::health_handler));

    for rule in state.routes.rules() {
        debug!(prefix = %rule.prefix, access = ?rule.access, target = ?rule.target, "mounting route");
        app = app.merge(rule_router(rule, &state));
    }

    app.fallback(|| async { AppError::NotFound("Route not found".into()) })
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&state.config.allowed_origin)),
        )
        .with_state(state)
}

fn rule_router(rule: &RouteRule, state: &AppState) -> Router<AppState> {
    match &rule.target {
        RouteTarget::Local(service) => {
            let local = match service {
                LocalService::Auth => auth_routes(state),
                LocalService::Admin => admin_routes(),
            };
            Router::new().nest(&rule.prefix, guard(local, rule.access, state))
        }
        RouteTarget::Proxy(collaborator) => {
            let routes = Router::new()
                .route(&rule.prefix, any(proxy::forward))
                .route(&format!("{}/", rule.prefix), any(proxy::forward))
                .route(&format!("{}/{{*rest}}", rule.prefix), any(proxy::forward))
                .route_layer(Extension(MountedProxy::new(&rule.prefix, collaborator)));
            guard(routes, rule.access, state)
        }
    }
}

/// Wrap `routes` in the middleware for `access`.
///
/// The layer added last runs first, so `require_auth` always runs before
/// `require_admin`.
fn guard(routes: Router<AppState>, access: Access, state: &AppState) -> Router<AppState> {
    match access {
        Access::Public => routes,
        Access::Authenticated => routes.route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        )),
        Access::Admin => routes
            .route_layer(axum::middleware::from_fn(require_admin))
            .route_layer(axum::middleware::from_fn_with_state(
                state.clone(),
                require_auth,
            )),
    }
}

fn auth_routes(state: &AppState) -> Router<AppState> {
    let me = Router::new()
        .route("/me", get(auth::me_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            require_auth,
        ));

    Router::new()
        .route("/register", post(auth::register_handler))
        .route("/login", post(auth::login_handler))
        .route("/refresh", post(auth::refresh_handler))
        .route("/logout", post(auth::logout_handler))
        .route("/forgot-password", post(auth::forgot_password_handler))
        .route("/reset-password", post(auth::reset_password_handler))
        .merge(me)
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/users/{id}", get(admin::get_user_handler))
        .route("/users/{id}/status", put(admin::set_user_status_handler))
}

fn cors_layer(origin: &AllowedOrigin) -> CorsLayer {
    match origin {
        AllowedOrigin::Any => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
        AllowedOrigin::Exact(value) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(value.clone()))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::AUTHORIZATION,
                header::CONTENT_TYPE,
                header::ACCEPT,
                header::ORIGIN,
            ])
            .expose_headers([header::CONTENT_LENGTH])
            .allow_credentials(true),
    }
}
