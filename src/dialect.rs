//! Dialect handler (C5): the per-REST-personality policy surface.
//!
//! Each dialect (S3-like, Swift-like) owns bucket/object name validation,
//! authentication, and the method-to-operation mapping for its own URI
//! shape. [`DialectManager`] is the trait [`crate::router::DialectRouter`]
//! resolves a request down to; [`S3DialectManager`] and
//! [`SwiftDialectManager`] are the two concrete implementations the
//! binary wires up at startup.

use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::{Authorizer, UserRecord};
use crate::backend::ObjectStore;
use crate::envelope::RequestEnvelope;
use crate::error::ClientError;
use crate::ops::{classify, OpKind, Operation, OpParams, PermissionMode};

/// A decoded bucket/object pair plus the remaining query string, parsed
/// from the URI remainder the router hands this manager.
pub struct ParsedPath {
    pub bucket: Option<String>,
    pub object: Option<String>,
}

#[async_trait]
pub trait DialectManager: Send + Sync {
    /// A short name for diagnostics and routing tests; not wire-visible.
    fn name(&self) -> &str;

    /// Splits the URI remainder below this dialect's mount point into
    /// bucket and object components, per this dialect's own path shape.
    fn parse_path(&self, path: &str) -> ParsedPath;

    /// Rejects bucket names this dialect won't accept (spec-free: each
    /// dialect sets its own length/charset rules).
    fn validate_bucket_name(&self, name: &str) -> Result<(), ClientError>;

    /// Rejects object keys this dialect won't accept.
    fn validate_object_name(&self, name: &str) -> Result<(), ClientError>;

    /// Authenticates the request via this dialect's `Authorizer`.
    async fn authorize(&self, env: &RequestEnvelope) -> Result<UserRecord, ClientError>;

    /// Resolves method + path shape + sub-resource markers to a concrete
    /// [`Operation`], or `None` if nothing in this dialect matches.
    fn get_op(&self, env: &RequestEnvelope) -> Option<Operation>;

    /// Which bucket/object ACLs must be loaded before `verify_permission`
    /// runs, per the operation's kind.
    fn read_permissions(&self, op: &Operation) -> PermissionMode {
        op.kind.permission_mode()
    }

    fn backend(&self) -> &Arc<dyn ObjectStore>;
}

fn parse_op_params(env: &RequestEnvelope) -> OpParams {
    let q = &env.query;
    OpParams {
        // Range/If-* conditionals come off request headers, not the query
        // string; the pipeline fills these in once it has the raw headers.
        range: None,
        if_match: None,
        if_none_match: None,
        if_modified_since: None,
        if_unmodified_since: None,
        content_md5: None,
        copy_source: q.get("x-copy-source").cloned(),
        metadata_directive_replace: q.get("metadata-directive").map(|v| v == "REPLACE").unwrap_or(false),
        canned_acl: q.get("x-acl").cloned(),
        prefix: q.get("prefix").cloned().unwrap_or_default(),
        delimiter: q.get("delimiter").cloned().unwrap_or_default(),
        marker: q.get("marker").cloned().unwrap_or_default(),
        max_keys: q
            .get("max-keys")
            .or_else(|| q.get("max-uploads"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
        upload_id: q.get("uploadId").cloned(),
        part_number: q.get("partNumber").and_then(|v| v.parse().ok()),
        parts: Vec::new(),
        keys_to_delete: Vec::new(),
        // Stashed under X-Object-Manifest, a header rather than a query
        // param; the pipeline fills it in once it has the raw headers.
        manifest: None,
    }
}

/// S3-like dialect: `/{bucket}/{object...}` paths, bucket names are
/// DNS-label-shaped, objects accept almost any UTF-8 key.
pub struct S3DialectManager {
    backend: Arc<dyn ObjectStore>,
    authorizer: Arc<dyn Authorizer>,
}

impl S3DialectManager {
    pub fn new(backend: Arc<dyn ObjectStore>, authorizer: Arc<dyn Authorizer>) -> Arc<Self> {
        Arc::new(Self { backend, authorizer })
    }
}

#[async_trait]
impl DialectManager for S3DialectManager {
    fn name(&self) -> &str {
        "s3"
    }

    fn parse_path(&self, path: &str) -> ParsedPath {
        let trimmed = path.trim_start_matches('/');
        if trimmed.is_empty() {
            return ParsedPath { bucket: None, object: None };
        }
        match trimmed.split_once('/') {
            Some((bucket, rest)) if !rest.is_empty() => ParsedPath {
                bucket: Some(bucket.to_string()),
                object: Some(rest.to_string()),
            },
            Some((bucket, _)) => ParsedPath {
                bucket: Some(bucket.to_string()),
                object: None,
            },
            None => ParsedPath {
                bucket: Some(trimmed.to_string()),
                object: None,
            },
        }
    }

    fn validate_bucket_name(&self, name: &str) -> Result<(), ClientError> {
        let len_ok = (3..=63).contains(&name.len());
        let charset_ok = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.');
        let edges_ok = !name.starts_with('-') && !name.ends_with('-') && !name.contains("..");
        if len_ok && charset_ok && edges_ok {
            Ok(())
        } else {
            Err(ClientError::InvalidBucketName)
        }
    }

    fn validate_object_name(&self, name: &str) -> Result<(), ClientError> {
        if name.is_empty() || name.len() > 1024 || name.contains('\0') {
            Err(ClientError::InvalidObjectKey)
        } else {
            Ok(())
        }
    }

    async fn authorize(&self, env: &RequestEnvelope) -> Result<UserRecord, ClientError> {
        self.authorizer.authorize(env).await
    }

    fn get_op(&self, env: &RequestEnvelope) -> Option<Operation> {
        let kind = classify(
            env.method,
            env.bucket.is_some(),
            env.object.is_some(),
            &env.query,
        )?;
        Some(Operation {
            kind,
            dialect: env.dialect,
            params: parse_op_params(env),
        })
    }

    fn backend(&self) -> &Arc<dyn ObjectStore> {
        &self.backend
    }
}

/// Swift-like dialect: `/v1/AUTH_{tenant}/{container}/{object...}` paths.
/// The tenant segment is stripped by the router's `/swift/v1` mount point
/// before `parse_path` ever sees it — this manager only needs to split
/// container from object.
pub struct SwiftDialectManager {
    backend: Arc<dyn ObjectStore>,
    authorizer: Arc<dyn Authorizer>,
}

impl SwiftDialectManager {
    pub fn new(backend: Arc<dyn ObjectStore>, authorizer: Arc<dyn Authorizer>) -> Arc<Self> {
        Arc::new(Self { backend, authorizer })
    }
}

#[async_trait]
impl DialectManager for SwiftDialectManager {
    fn name(&self) -> &str {
        "swift"
    }

    fn parse_path(&self, path: &str) -> ParsedPath {
        let trimmed = path.trim_start_matches('/');
        let trimmed = trimmed
            .strip_prefix("AUTH_")
            .map(|rest| rest.split_once('/').map(|(_, r)| r).unwrap_or(""))
            .unwrap_or(trimmed);
        if trimmed.is_empty() {
            return ParsedPath { bucket: None, object: None };
        }
        match trimmed.split_once('/') {
            Some((container, rest)) if !rest.is_empty() => ParsedPath {
                bucket: Some(container.to_string()),
                object: Some(rest.to_string()),
            },
            Some((container, _)) => ParsedPath {
                bucket: Some(container.to_string()),
                object: None,
            },
            None => ParsedPath {
                bucket: Some(trimmed.to_string()),
                object: None,
            },
        }
    }

    fn validate_bucket_name(&self, name: &str) -> Result<(), ClientError> {
        if !(3..=255).contains(&name.len()) || name.contains('/') {
            Err(ClientError::InvalidBucketName)
        } else {
            Ok(())
        }
    }

    fn validate_object_name(&self, name: &str) -> Result<(), ClientError> {
        if name.is_empty() || name.len() > 1024 {
            Err(ClientError::InvalidObjectKey)
        } else {
            Ok(())
        }
    }

    async fn authorize(&self, env: &RequestEnvelope) -> Result<UserRecord, ClientError> {
        self.authorizer.authorize(env).await
    }

    fn get_op(&self, env: &RequestEnvelope) -> Option<Operation> {
        let kind = classify(
            env.method,
            env.bucket.is_some(),
            env.object.is_some(),
            &env.query,
        )?;
        // Swift has no ACL sub-resource or multipart upload surface in the
        // same shape as S3; narrow to the operations that make sense here.
        let kind = match kind {
            OpKind::GetBucketAcl | OpKind::PutBucketAcl | OpKind::GetObjectAcl | OpKind::PutObjectAcl => {
                return None
            }
            other => other,
        };
        Some(Operation {
            kind,
            dialect: env.dialect,
            params: parse_op_params(env),
        })
    }

    fn backend(&self) -> &Arc<dyn ObjectStore> {
        &self.backend
    }
}

/// Test double used by `router.rs`'s lookup tests, where only `name()`
/// and the `Arc<dyn DialectManager>` shape are exercised.
#[cfg(test)]
pub mod test_support {
    use super::*;

    pub struct StubManager {
        name: String,
    }

    impl StubManager {
        pub fn arc(name: &str) -> Arc<dyn DialectManager> {
            Arc::new(Self { name: name.to_string() })
        }
    }

    #[async_trait]
    impl DialectManager for StubManager {
        fn name(&self) -> &str {
            &self.name
        }

        fn parse_path(&self, _path: &str) -> ParsedPath {
            ParsedPath { bucket: None, object: None }
        }

        fn validate_bucket_name(&self, _name: &str) -> Result<(), ClientError> {
            Ok(())
        }

        fn validate_object_name(&self, _name: &str) -> Result<(), ClientError> {
            Ok(())
        }

        async fn authorize(&self, _env: &RequestEnvelope) -> Result<UserRecord, ClientError> {
            Err(ClientError::InvalidAccessKey)
        }

        fn get_op(&self, _env: &RequestEnvelope) -> Option<Operation> {
            None
        }

        fn backend(&self) -> &Arc<dyn ObjectStore> {
            unimplemented!("StubManager is routing-test scaffolding only")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenAuthorizer;
    use crate::backend::MemoryBackend;
    use crate::envelope::{Dialect, ReqMethod};

    fn s3() -> Arc<S3DialectManager> {
        S3DialectManager::new(MemoryBackend::new(), TokenAuthorizer::new(vec![]))
    }

    #[test]
    fn s3_parse_path_splits_bucket_and_object() {
        let mgr = s3();
        let parsed = mgr.parse_path("/my-bucket/a/b/c.txt");
        assert_eq!(parsed.bucket.as_deref(), Some("my-bucket"));
        assert_eq!(parsed.object.as_deref(), Some("a/b/c.txt"));
    }

    #[test]
    fn s3_rejects_bucket_name_with_uppercase() {
        let mgr = s3();
        assert!(mgr.validate_bucket_name("MyBucket").is_err());
        assert!(mgr.validate_bucket_name("my-bucket").is_ok());
    }

    #[test]
    fn s3_get_op_classifies_plain_get_as_get_object() {
        let mgr = s3();
        let mut env = RequestEnvelope::new(1, ReqMethod::Get, "/b/k".into(), Dialect::S3);
        env.bucket = Some("b".into());
        env.object = Some("k".into());
        let op = mgr.get_op(&env).unwrap();
        assert_eq!(op.kind, OpKind::GetObject);
    }

    #[test]
    fn swift_parse_path_strips_auth_tenant_segment() {
        let mgr = SwiftDialectManager::new(MemoryBackend::new(), TokenAuthorizer::new(vec![]));
        let parsed = mgr.parse_path("/AUTH_test/container/obj");
        assert_eq!(parsed.bucket.as_deref(), Some("container"));
        assert_eq!(parsed.object.as_deref(), Some("obj"));
    }

    #[test]
    fn swift_rejects_container_names_outside_3_to_255_chars() {
        let mgr = SwiftDialectManager::new(MemoryBackend::new(), TokenAuthorizer::new(vec![]));
        assert!(mgr.validate_bucket_name("ab").is_err());
        assert!(mgr.validate_bucket_name("abc").is_ok());
        assert!(mgr.validate_bucket_name(&"a".repeat(255)).is_ok());
        assert!(mgr.validate_bucket_name(&"a".repeat(256)).is_err());
    }
}
