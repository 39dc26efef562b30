//! Collaborator proxy: forwards a request verbatim and streams both bodies.
//!
//! Only metadata is rewritten. Hop-by-hop headers are dropped, forwarding
//! headers are set, and identity headers are replaced with the identity the
//! gateway verified. Collaborators trust `X-User-Id` without re-checking the
//! token, so they must be reachable only through the gateway.

use axum::body::Body;
use axum::Extension;
use axum::extract::{Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::Uri;
use axum::response::Response;
use evgate_core::models::auth::AuthenticatedIdentity;
use tracing::{debug, warn};
use url::Url;

use crate::AppState;
use crate::error::AppError;
use crate::middleware::auth::AuthenticatedUser;

pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
pub const X_USER_ROLE: HeaderName = HeaderName::from_static("x-user-role");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Connection-scoped headers that never cross a proxy.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// The proxy rule a route was mounted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedProxy {
    pub prefix: String,
    pub collaborator: String,
}

impl MountedProxy {
    pub fn new(prefix: impl Into<String>, collaborator: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            collaborator: collaborator.into(),
        }
    }
}

/// Handler for every proxy rule: forward to the collaborator of the rule the
/// route was mounted for.
///
/// The access guard that already ran belongs to that rule, so a path the
/// table would give to a different rule is refused.
pub async fn forward(
    State(state): State<AppState>,
    Extension(mounted): Extension<MountedProxy>,
    request: Request,
) -> Result<Response, AppError> {
    let path = request.uri().path().to_owned();
    let resolved = state.routes.resolve(&path).map(|r| r.prefix.as_str());
    if resolved != Some(mounted.prefix.as_str()) {
        warn!(%path, mounted = %mounted.prefix, ?resolved, "route and table disagree");
        return Err(AppError::NotFound(format!("No route for {path}")));
    }
    let collaborator = mounted.collaborator;
    let base = state
        .routes
        .upstream(&collaborator)
        .ok_or_else(|| AppError::Internal(format!("collaborator {collaborator} not configured")))?;
    let target = upstream_url(base, request.uri());

    let identity = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.0.clone());
    let (parts, body) = request.into_parts();
    let headers = outbound_headers(&parts.headers, identity.as_ref());

    debug!(%collaborator, method = %parts.method, %target, "proxying request");

    let send = state
        .http
        .request(parts.method, target.as_str())
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send();

    let upstream = match tokio::time::timeout(state.config.upstream_timeout, send).await {
        Err(_) => {
            return Err(AppError::GatewayTimeout(format!(
                "{collaborator} did not answer within {:?}",
                state.config.upstream_timeout
            )));
        }
        Ok(Err(e)) => return Err(AppError::BadGateway(format!("{collaborator}: {e}"))),
        Ok(Ok(resp)) => resp,
    };

    let status = upstream.status();
    if status.is_server_error() {
        warn!(%collaborator, %status, "collaborator returned an error");
    }

    let mut response = Response::builder().status(status);
    if let Some(h) = response.headers_mut() {
        copy_end_to_end(upstream.headers(), h);
    }
    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| AppError::Internal(format!("response build failed: {e}")))
}

/// Collaborator base URL joined with the incoming path and query.
pub fn upstream_url(base: &Url, uri: &Uri) -> String {
    let base = base.as_str().trim_end_matches('/');
    match uri.query() {
        Some(q) => format!("{base}{}?{q}", uri.path()),
        None => format!("{base}{}", uri.path()),
    }
}

/// Headers for the outbound request.
pub fn outbound_headers(
    incoming: &HeaderMap,
    identity: Option<&AuthenticatedIdentity>,
) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(incoming.len() + 4);
    copy_end_to_end(incoming, &mut out);
    out.remove(header::HOST);
    out.remove(header::CONTENT_LENGTH);
    out.remove(X_USER_ID);
    out.remove(X_USER_ROLE);

    if let Some(host) = incoming.get(header::HOST) {
        out.insert(X_FORWARDED_HOST, host.clone());
    }
    let proto = incoming
        .get(X_FORWARDED_PROTO)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("http"));
    out.insert(X_FORWARDED_PROTO, proto);

    if let Some(id) = identity {
        match HeaderValue::from_str(&id.user_id) {
            Ok(v) => {
                out.insert(X_USER_ID, v);
                out.insert(X_USER_ROLE, HeaderValue::from_static(id.role.as_str()));
            }
            Err(_) => warn!(user_id = %id.user_id, "user id is not a valid header value"),
        }
    }
    out
}

fn copy_end_to_end(from: &HeaderMap, to: &mut HeaderMap) {
    let named_by_connection: Vec<String> = from
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .collect();

    for (name, value) in from {
        if HOP_BY_HOP.contains(name) || named_by_connection.iter().any(|n| n == name.as_str()) {
            continue;
        }
        to.append(name.clone(), value.clone());
    }
}
