//! Authentication/authorization boundary.
//!
//! Real signature-verification *algorithms* are treated as an external
//! collaborator here. This module defines the trait boundary
//! ([`Authorizer`]) the dialect handlers call through, plus default
//! implementations that are deliberately simple: a SigV2-shaped HMAC-SHA1
//! check for the S3-like dialect (the `sha1` crate is already part of the
//! dependency stack for this reason) and a static token map for the
//! Swift-like dialect. Production deployments supply their own
//! `Authorizer` backed by a real credential store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;

use crate::envelope::RequestEnvelope;
use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub display_name: String,
    pub tenant: String,
    pub suspended: bool,
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Authenticates the request and returns the resolved user, or a
    /// [`ClientError`] describing why it failed.
    async fn authorize(&self, env: &RequestEnvelope) -> Result<UserRecord, ClientError>;
}

/// One registered principal: access key id plus the shared secret used to
/// validate the SigV2-shaped canonical-string signature.
#[derive(Debug, Clone)]
pub struct Principal {
    pub access_key: String,
    pub secret_key: String,
    pub user: UserRecord,
}

/// S3-like dialect authorizer: validates `Authorization: AWS
/// <access_key>:<signature>` against an HMAC-SHA1 digest of a canonical
/// string built from method, content hash, content type, and path — the
/// same shape as AWS SigV2, without claiming to *be* a production-grade
/// implementation of one — production deployments supply their own.
pub struct SigV2Authorizer {
    principals: HashMap<String, Principal>,
}

impl SigV2Authorizer {
    pub fn new(principals: Vec<Principal>) -> Arc<Self> {
        Arc::new(Self {
            principals: principals
                .into_iter()
                .map(|p| (p.access_key.clone(), p))
                .collect(),
        })
    }

    fn canonical_string(env: &RequestEnvelope) -> String {
        let method = format!("{:?}", env.method);
        let bucket = env.bucket.as_deref().unwrap_or("");
        let object = env.object.as_deref().unwrap_or("");
        format!("{method}\n{bucket}\n{object}\n{}", env.content_type.as_deref().unwrap_or(""))
    }

    fn sign(secret: &str, canonical: &str) -> String {
        use hmac::{Hmac, Mac};
        use sha1::Sha1;
        let mut mac = <Hmac<Sha1> as Mac>::new_from_slice(secret.as_bytes())
            .expect("HMAC accepts a key of any length");
        mac.update(canonical.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }
}

#[async_trait]
impl Authorizer for SigV2Authorizer {
    async fn authorize(&self, env: &RequestEnvelope) -> Result<UserRecord, ClientError> {
        let header = env
            .authorization
            .as_deref()
            .ok_or(ClientError::InvalidAccessKey)?;
        let rest = header
            .strip_prefix("AWS ")
            .ok_or(ClientError::InvalidAccessKey)?;
        let (access_key, signature) = rest.split_once(':').ok_or(ClientError::InvalidAccessKey)?;

        let principal = self
            .principals
            .get(access_key)
            .ok_or(ClientError::InvalidAccessKey)?;

        let expected = Self::sign(&principal.secret_key, &Self::canonical_string(env));
        if expected != signature {
            return Err(ClientError::SignatureMismatch);
        }
        Ok(principal.user.clone())
    }
}

/// Swift-like dialect authorizer: a static token-to-user map, standing in
/// for the real `X-Auth-Token` lookup against a Keystone-shaped service.
pub struct TokenAuthorizer {
    tokens: HashMap<String, UserRecord>,
}

impl TokenAuthorizer {
    pub fn new(tokens: Vec<(String, UserRecord)>) -> Arc<Self> {
        Arc::new(Self {
            tokens: tokens.into_iter().collect(),
        })
    }
}

#[async_trait]
impl Authorizer for TokenAuthorizer {
    async fn authorize(&self, env: &RequestEnvelope) -> Result<UserRecord, ClientError> {
        let token = env
            .authorization
            .as_deref()
            .ok_or(ClientError::InvalidAccessKey)?;
        self.tokens
            .get(token)
            .cloned()
            .ok_or(ClientError::InvalidAccessKey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Dialect, ReqMethod};

    fn user() -> UserRecord {
        UserRecord {
            id: "u1".into(),
            display_name: "Alice".into(),
            tenant: "t1".into(),
            suspended: false,
        }
    }

    #[tokio::test]
    async fn sigv2_accepts_matching_signature_and_rejects_mismatch() {
        let authz = SigV2Authorizer::new(vec![Principal {
            access_key: "AKIA".into(),
            secret_key: "secret".into(),
            user: user(),
        }]);
        let mut env = RequestEnvelope::new(1, ReqMethod::Get, "/b/k".into(), Dialect::S3);
        env.bucket = Some("b".into());
        env.object = Some("k".into());
        let canonical = SigV2Authorizer::canonical_string(&env);
        let sig = SigV2Authorizer::sign("secret", &canonical);
        env.authorization = Some(format!("AWS AKIA:{sig}"));

        assert!(authz.authorize(&env).await.is_ok());

        env.authorization = Some("AWS AKIA:garbage".into());
        assert_eq!(
            authz.authorize(&env).await.unwrap_err(),
            ClientError::SignatureMismatch
        );
    }

    #[tokio::test]
    async fn token_authorizer_rejects_unknown_token() {
        let authz = TokenAuthorizer::new(vec![("tok-1".into(), user())]);
        let mut env = RequestEnvelope::new(1, ReqMethod::Get, "/".into(), Dialect::Swift);
        env.authorization = Some("unknown".into());
        assert!(authz.authorize(&env).await.is_err());
    }
}
