//! Token service: issue, validate, rotate and revoke gateway tokens.
//!
//! Token lifecycle is `issued -> active -> {expired | revoked}`. Expiry is
//! enforced by the codec, revocation by the token store. Refresh tokens are
//! single-use: presenting one consumes it before a new pair is issued.

use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::jwt::{CodecError, TokenCodec};
use super::password::{check_password_policy, hash_password, verify_password};
use super::reset::{LogNotifier, ResetNotifier, generate_reset_token};
use super::{AuthError, TokenRejection};
use crate::models::auth::{
    AuthSession, Claims, NewUser, Registration, Role, TokenKind, TokenPair, User,
};
use crate::store::TokenStore;
use crate::users::UserDirectory;

/// Default bound on a single user-directory round trip.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Hash compared against when the email is unknown, so a miss costs the same
/// bcrypt work as a wrong password.
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| hash_password("evgate-timing-equaliser").unwrap_or_default());

/// Lifetimes of the tokens this service hands out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtls {
    pub access: Duration,
    pub refresh: Duration,
    pub reset: Duration,
}

impl Default for TokenTtls {
    /// 15 minutes, 7 days, 24 hours.
    fn default() -> Self {
        Self {
            access: Duration::from_secs(15 * 60),
            refresh: Duration::from_secs(7 * 24 * 60 * 60),
            reset: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Issues and checks gateway tokens against a store and a user directory.
#[derive(Clone)]
pub struct TokenService {
    codec: TokenCodec,
    store: Arc<dyn TokenStore>,
    users: Arc<dyn UserDirectory>,
    notifier: Arc<dyn ResetNotifier>,
    ttls: TokenTtls,
    lookup_timeout: Duration,
}

impl TokenService {
    pub fn new(
        codec: TokenCodec,
        store: Arc<dyn TokenStore>,
        users: Arc<dyn UserDirectory>,
        ttls: TokenTtls,
    ) -> Self {
        Self {
            codec,
            store,
            users,
            notifier: Arc::new(LogNotifier),
            ttls,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Replace the reset-token notifier.
    pub fn with_notifier(mut self, notifier: Arc<dyn ResetNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Bound user-directory calls by `timeout`.
    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    pub fn ttls(&self) -> TokenTtls {
        self.ttls
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    // -----------------------------------------------------------------------
    // Token lifecycle
    // -----------------------------------------------------------------------

    /// Issue a fresh access + refresh pair for `user_id` with `role`.
    pub fn issue(&self, user_id: &str, role: Role) -> Result<TokenPair, AuthError> {
        let access = self.claims(user_id, role, TokenKind::Access, self.ttls.access);
        let refresh = self.claims(user_id, role, TokenKind::Refresh, self.ttls.refresh);
        Ok(TokenPair {
            access_token: self.codec.encode(&access)?,
            refresh_token: self.codec.encode(&refresh)?,
            expires_in: access.exp - access.iat,
        })
    }

    /// Validate an access token: signature, time window, kind, revocation.
    ///
    /// A store outage is an error, never a pass.
    pub async fn validate(&self, access_token: &str) -> Result<Claims, AuthError> {
        let claims = self.decode_kind(access_token, TokenKind::Access)?;
        if self.store.is_revoked(&claims.jti).await? {
            return Err(AuthError::InvalidToken(TokenRejection::Revoked));
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new pair, consuming the old one.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.decode_kind(refresh_token, TokenKind::Refresh)?;

        let ttl = Duration::from_secs(claims.remaining_secs(Utc::now()));
        if !self.store.revoke_once(&claims.jti, ttl).await? {
            warn!(user_id = %claims.sub, jti = %claims.jti, "refresh token replayed");
            return Err(AuthError::InvalidToken(TokenRejection::Revoked));
        }

        let user_id = parse_user_id(&claims.sub)
            .ok_or(AuthError::InvalidToken(TokenRejection::Malformed))?;
        let user = self
            .lookup(self.users.get_by_id(user_id))
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !user.is_active {
            warn!(user_id = %user.id, "refresh refused for inactive user");
            return Err(AuthError::UserNotActive);
        }

        let pair = self.issue(&claims.sub, user.role)?;
        info!(user_id = %user.id, "refresh token rotated");
        Ok(pair)
    }

    /// Revoke `token` for the rest of its lifetime. Idempotent.
    ///
    /// Either kind of token is accepted. An already-expired token needs no
    /// marker and succeeds as a no-op.
    pub async fn logout(&self, token: &str) -> Result<(), AuthError> {
        let claims = match self.codec.decode(token) {
            Ok(claims) => claims,
            Err(CodecError::Expired) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let ttl = Duration::from_secs(claims.remaining_secs(Utc::now()));
        self.store.revoke(&claims.jti, ttl).await?;
        info!(user_id = %claims.sub, kind = ?claims.kind, "token revoked on logout");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Credential flows
    // -----------------------------------------------------------------------

    /// Create an active `user` account and sign it in.
    pub async fn register(&self, registration: Registration) -> Result<AuthSession, AuthError> {
        let email = normalize_email(&registration.email);
        if email.is_empty() || !email.contains('@') {
            return Err(AuthError::Validation("A valid email is required".into()));
        }
        check_password_policy(&registration.password)?;

        if self.lookup(self.users.get_by_email(&email)).await?.is_some() {
            return Err(AuthError::EmailAlreadyExists);
        }

        let password_hash = hash_blocking(registration.password).await?;
        let user = self
            .lookup(self.users.create(NewUser {
                email,
                password_hash,
                first_name: registration.first_name.trim().to_string(),
                last_name: registration.last_name.trim().to_string(),
                role: Role::User,
            }))
            .await?;

        let tokens = self.issue(&user.id.to_string(), user.role)?;
        info!(user_id = %user.id, "user registered");
        Ok(AuthSession { user, tokens })
    }

    /// Check credentials and sign in.
    ///
    /// Unknown email and wrong password fail identically.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let email = normalize_email(email);
        let user = self.lookup(self.users.get_by_email(&email)).await?;

        let hash = user
            .as_ref()
            .map(|u| u.password_hash.clone())
            .unwrap_or_else(|| DUMMY_HASH.clone());
        let matches = verify_blocking(password.to_string(), hash).await?;

        let user = match user {
            Some(user) if matches => user,
            _ => {
                debug!("login rejected");
                return Err(AuthError::InvalidCredentials);
            }
        };
        if !user.is_active {
            return Err(AuthError::UserNotActive);
        }

        let tokens = self.issue(&user.id.to_string(), user.role)?;
        info!(user_id = %user.id, "user logged in");
        Ok(AuthSession { user, tokens })
    }

    /// Fetch a user profile by ID.
    pub async fn current_user(&self, user_id: &str) -> Result<User, AuthError> {
        let id = parse_user_id(user_id).ok_or(AuthError::UserNotFound)?;
        self.lookup(self.users.get_by_id(id))
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Activate or deactivate an account.
    ///
    /// Deactivation does not revoke outstanding access tokens; it stops the
    /// next refresh.
    pub async fn set_user_active(&self, user_id: &str, active: bool) -> Result<User, AuthError> {
        let id = parse_user_id(user_id).ok_or(AuthError::UserNotFound)?;
        let user = self.lookup(self.users.set_active(id, active)).await?;
        info!(user_id = %user.id, active, "user activation changed");
        Ok(user)
    }

    // -----------------------------------------------------------------------
    // Password reset
    // -----------------------------------------------------------------------

    /// Issue a one-time reset token for `email` and hand it to the notifier.
    ///
    /// Callers facing the public must not reveal which error occurred.
    pub async fn create_reset_token(&self, email: &str) -> Result<String, AuthError> {
        let email = normalize_email(email);
        let user = self
            .lookup(self.users.get_by_email(&email))
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !user.is_active {
            return Err(AuthError::UserNotActive);
        }

        let token = generate_reset_token();
        self.store
            .put_reset_token(&token, &user.id.to_string(), self.ttls.reset)
            .await?;
        self.notifier.reset_requested(&user, &token).await;
        Ok(token)
    }

    /// Consume `token` and set a new password for its owner.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        check_password_policy(new_password)?;
        let user_id = self.store.consume_reset_token(token).await?;
        let id = parse_user_id(&user_id).ok_or(AuthError::InvalidResetToken)?;

        let password_hash = hash_blocking(new_password.to_string()).await?;
        self.lookup(self.users.update_password(id, &password_hash))
            .await?;
        info!(user_id = %id, "password reset");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn claims(&self, user_id: &str, role: Role, kind: TokenKind, ttl: Duration) -> Claims {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2).max(1);
        Claims {
            sub: user_id.to_string(),
            role,
            iat: now,
            exp: now.saturating_add(ttl),
            nbf: now,
            iss: self.codec.issuer().to_string(),
            jti: Uuid::new_v4().to_string(),
            kind,
        }
    }

    fn decode_kind(&self, token: &str, kind: TokenKind) -> Result<Claims, AuthError> {
        let claims = self.codec.decode(token)?;
        if claims.kind != kind {
            return Err(AuthError::InvalidToken(TokenRejection::WrongKind));
        }
        Ok(claims)
    }

    async fn lookup<T>(
        &self,
        call: impl Future<Output = Result<T, AuthError>>,
    ) -> Result<T, AuthError> {
        tokio::time::timeout(self.lookup_timeout, call)
            .await
            .map_err(|_| AuthError::Timeout("user directory"))?
    }
}

fn parse_user_id(raw: &str) -> Option<Uuid> {
    Uuid::parse_str(raw).ok()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

async fn hash_blocking(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::Internal(format!("hash task: {e}")))?
}

async fn verify_blocking(password: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AuthError::Internal(format!("verify task: {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::store::MemoryTokenStore;
    use crate::users::InMemoryUserDirectory;

    #[derive(Default)]
    struct CapturingNotifier {
        tokens: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ResetNotifier for CapturingNotifier {
        async fn reset_requested(&self, _user: &User, token: &str) {
            self.tokens.lock().unwrap().push(token.to_string());
        }
    }

    struct Harness {
        service: TokenService,
        store: Arc<MemoryTokenStore>,
        users: Arc<InMemoryUserDirectory>,
        notifier: Arc<CapturingNotifier>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryTokenStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        let notifier = Arc::new(CapturingNotifier::default());
        let codec = TokenCodec::new(b"service-test-secret", "api-gateway").unwrap();
        let service = TokenService::new(codec, store.clone(), users.clone(), TokenTtls::default())
            .with_notifier(notifier.clone());
        Harness {
            service,
            store,
            users,
            notifier,
        }
    }

    fn registration(email: &str) -> Registration {
        Registration {
            email: email.into(),
            password: "password123".into(),
            first_name: "Grace".into(),
            last_name: "Hopper".into(),
        }
    }

    fn rejection(err: AuthError) -> TokenRejection {
        match err {
            AuthError::InvalidToken(reason) => reason,
            other => panic!("expected InvalidToken, got {other:?}"),
        }
    }

    #[test]
    fn issued_pair_shares_subject_but_not_jti() {
        let h = harness();
        let pair = h.service.issue("user-1", Role::Admin).unwrap();
        let access = h.service.codec().decode(&pair.access_token).unwrap();
        let refresh = h.service.codec().decode(&pair.refresh_token).unwrap();

        assert_eq!(access.sub, refresh.sub);
        assert_eq!(access.role, Role::Admin);
        assert_eq!(refresh.role, Role::Admin);
        assert_ne!(access.jti, refresh.jti);
        assert_eq!(access.kind, TokenKind::Access);
        assert_eq!(refresh.kind, TokenKind::Refresh);
        assert!(access.exp > access.iat);
        assert!(refresh.exp > access.exp);
        assert_eq!(pair.expires_in, 15 * 60);
    }

    #[tokio::test]
    async fn extreme_ttls_saturate_instead_of_overflowing() {
        let h = harness();
        let ttls = TokenTtls {
            access: Duration::from_secs(u64::MAX),
            refresh: Duration::from_secs(i64::MAX as u64),
            reset: Duration::from_secs(u64::MAX),
        };
        let service = TokenService::new(h.service.codec().clone(), h.store.clone(), h.users.clone(), ttls);

        let pair = service.issue("user-1", Role::User).unwrap();
        let access = service.validate(&pair.access_token).await.unwrap();
        assert_eq!(access.exp, i64::MAX);
        let refresh = service.codec().decode(&pair.refresh_token).unwrap();
        assert_eq!(refresh.exp, i64::MAX);

        service.logout(&pair.access_token).await.unwrap();
        assert!(service.validate(&pair.access_token).await.is_err());
    }

    #[tokio::test]
    async fn validate_accepts_fresh_access_token() {
        let h = harness();
        let pair = h.service.issue("user-1", Role::User).unwrap();
        let claims = h.service.validate(&pair.access_token).await.unwrap();
        assert_eq!(claims.sub, "user-1");
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_token() {
        let h = harness();
        let pair = h.service.issue("user-1", Role::User).unwrap();
        let err = h.service.validate(&pair.refresh_token).await.unwrap_err();
        assert_eq!(rejection(err), TokenRejection::WrongKind);
    }

    #[tokio::test]
    async fn expired_access_token_fails() {
        let h = harness();
        let now = Utc::now().timestamp();
        let stale = Claims {
            sub: "user-1".into(),
            role: Role::User,
            iat: now - 7200,
            exp: now - 3600,
            nbf: now - 7200,
            iss: "api-gateway".into(),
            jti: Uuid::new_v4().to_string(),
            kind: TokenKind::Access,
        };
        let token = h.service.codec().encode(&stale).unwrap();
        let err = h.service.validate(&token).await.unwrap_err();
        assert_eq!(rejection(err), TokenRejection::Expired);
    }

    #[tokio::test]
    async fn logout_revokes_and_is_idempotent() {
        let h = harness();
        let pair = h.service.issue("user-1", Role::User).unwrap();

        h.service.logout(&pair.access_token).await.unwrap();
        h.service.logout(&pair.access_token).await.unwrap();

        for _ in 0..3 {
            let err = h.service.validate(&pair.access_token).await.unwrap_err();
            assert_eq!(rejection(err), TokenRejection::Revoked);
        }
    }

    #[tokio::test]
    async fn store_outage_fails_closed() {
        let h = harness();
        let pair = h.service.issue("user-1", Role::User).unwrap();
        h.store.set_available(false);
        assert!(matches!(
            h.service.validate(&pair.access_token).await,
            Err(AuthError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn refresh_rotates_and_refuses_replay() {
        let h = harness();
        let session = h.service.register(registration("r@example.com")).await.unwrap();

        let rotated = h.service.refresh(&session.tokens.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, session.tokens.refresh_token);
        h.service.validate(&rotated.access_token).await.unwrap();

        let err = h.service.refresh(&session.tokens.refresh_token).await.unwrap_err();
        assert_eq!(rejection(err), TokenRejection::Revoked);
    }

    #[tokio::test]
    async fn refresh_refuses_deactivated_user() {
        let h = harness();
        let session = h.service.register(registration("d@example.com")).await.unwrap();
        h.users.set_active(session.user.id, false).await.unwrap();

        assert!(matches!(
            h.service.refresh(&session.tokens.refresh_token).await,
            Err(AuthError::UserNotActive)
        ));
    }

    #[tokio::test]
    async fn access_token_cannot_refresh() {
        let h = harness();
        let pair = h.service.issue(&Uuid::new_v4().to_string(), Role::User).unwrap();
        let err = h.service.refresh(&pair.access_token).await.unwrap_err();
        assert_eq!(rejection(err), TokenRejection::WrongKind);
    }

    #[tokio::test]
    async fn register_then_login() {
        let h = harness();
        h.service.register(registration("Login@Example.com ")).await.unwrap();

        let session = h.service.login("login@example.com", "password123").await.unwrap();
        assert_eq!(session.user.email, "login@example.com");
        assert_eq!(session.user.role, Role::User);
        h.service.validate(&session.tokens.access_token).await.unwrap();
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_weak_passwords() {
        let h = harness();
        h.service.register(registration("dup@example.com")).await.unwrap();
        assert!(matches!(
            h.service.register(registration("dup@example.com")).await,
            Err(AuthError::EmailAlreadyExists)
        ));

        let mut weak = registration("weak@example.com");
        weak.password = "short".into();
        assert!(matches!(
            h.service.register(weak).await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn bad_credentials_look_the_same() {
        let h = harness();
        h.service.register(registration("c@example.com")).await.unwrap();

        assert!(matches!(
            h.service.login("c@example.com", "wrong-password").await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            h.service.login("nobody@example.com", "password123").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn inactive_user_cannot_login() {
        let h = harness();
        let session = h.service.register(registration("i@example.com")).await.unwrap();
        h.service
            .set_user_active(&session.user.id.to_string(), false)
            .await
            .unwrap();
        assert!(matches!(
            h.service.login("i@example.com", "password123").await,
            Err(AuthError::UserNotActive)
        ));
    }

    #[tokio::test]
    async fn reset_flow_is_single_use() {
        let h = harness();
        h.service.register(registration("p@example.com")).await.unwrap();

        let token = h.service.create_reset_token("p@example.com").await.unwrap();
        assert_eq!(h.notifier.tokens.lock().unwrap().as_slice(), [token.clone()]);

        h.service.reset_password(&token, "brand-new-pass").await.unwrap();
        assert!(matches!(
            h.service.reset_password(&token, "another-pass").await,
            Err(AuthError::InvalidResetToken)
        ));

        h.service.login("p@example.com", "brand-new-pass").await.unwrap();
        assert!(matches!(
            h.service.login("p@example.com", "password123").await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn reset_for_unknown_or_inactive_user_fails_internally() {
        let h = harness();
        assert!(matches!(
            h.service.create_reset_token("ghost@example.com").await,
            Err(AuthError::UserNotFound)
        ));

        let session = h.service.register(registration("x@example.com")).await.unwrap();
        h.users.set_active(session.user.id, false).await.unwrap();
        assert!(matches!(
            h.service.create_reset_token("x@example.com").await,
            Err(AuthError::UserNotActive)
        ));
        assert!(h.notifier.tokens.lock().unwrap().is_empty());
    }
}
