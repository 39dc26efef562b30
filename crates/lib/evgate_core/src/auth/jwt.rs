//! JWT encoding and decoding.
//!
//! Only HS256 is accepted. The algorithm is fixed here and never read from
//! the token header.

use std::fmt;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use thiserror::Error;

use crate::models::auth::Claims;

/// The one signing algorithm this gateway speaks.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Codec-level failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed token")]
    Malformed,

    #[error("signature check failed")]
    SignatureInvalid,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("signing error: {0}")]
    Signing(String),
}

/// Signs and verifies gateway tokens with a shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    issuer: String,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("algorithm", &ALGORITHM)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec. An empty secret is a configuration error.
    pub fn new(secret: &[u8], issuer: impl Into<String>) -> Result<Self, CodecError> {
        if secret.is_empty() {
            return Err(CodecError::Signing("signing secret is empty".into()));
        }
        let issuer = issuer.into();

        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "nbf", "iss", "sub"]);

        Ok(Self {
            issuer,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        })
    }

    /// Issuer stamped into and required from every token.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign `claims` into the compact `header.claims.signature` form.
    pub fn encode(&self, claims: &Claims) -> Result<String, CodecError> {
        encode(&Header::new(ALGORITHM), claims, &self.encoding)
            .map_err(|e| CodecError::Signing(format!("jwt encode: {e}")))
    }

    /// Verify signature and time window, returning the claims.
    pub fn decode(&self, token: &str) -> Result<Claims, CodecError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => CodecError::Expired,
                ErrorKind::ImmatureSignature => CodecError::NotYetValid,
                ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                    CodecError::SignatureInvalid
                }
                _ => CodecError::Malformed,
            })
    }
}
