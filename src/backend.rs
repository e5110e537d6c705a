//! The backing object store, modeled as an external collaborator.
//!
//! Operations only need object/bucket CRUD, attribute maps, and streaming
//! read/write from a backend; the real storage engine behind it is out of
//! scope here. This module defines that boundary as [`ObjectStore`] and
//! ships an in-memory implementation used by the test suite and by
//! `gatehoused --backend memory` for local smoke-testing — never by a real
//! deployment.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

use crate::error::{BackendError, ClientError, GatewayError};

#[derive(Debug, Clone)]
pub struct ObjectAttrs {
    pub content_type: Option<String>,
    pub etag: String,
    pub size: u64,
    pub last_modified: u64,
    pub metadata: std::collections::HashMap<String, String>,
    pub acl: Option<String>,
    /// User id of whoever created this object — the ACL owner, independent
    /// of whichever user happens to be making the current request.
    pub owner: String,
}

#[derive(Debug, Clone, Default)]
pub struct BucketAttrs {
    pub acl: Option<String>,
    pub created: u64,
    pub owner: String,
}

/// The object/bucket CRUD surface every C7 operation needs. A production
/// gateway swaps this for a client against the real distributed store;
/// [`MemoryBackend`] below exists only so the operation layer and its
/// tests have something concrete to run against.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn create_bucket(&self, bucket: &str, owner: &str) -> Result<(), GatewayError>;
    async fn delete_bucket(&self, bucket: &str) -> Result<(), GatewayError>;
    async fn bucket_exists(&self, bucket: &str) -> bool;
    async fn bucket_attrs(&self, bucket: &str) -> Result<BucketAttrs, GatewayError>;
    async fn set_bucket_acl(&self, bucket: &str, acl: &str) -> Result<(), GatewayError>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
        metadata: std::collections::HashMap<String, String>,
        owner: &str,
    ) -> Result<ObjectAttrs, GatewayError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<(Bytes, ObjectAttrs), GatewayError>;
    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectAttrs, GatewayError>;
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), GatewayError>;
    async fn set_object_acl(&self, bucket: &str, key: &str, acl: &str) -> Result<(), GatewayError>;

    /// Lists keys under `prefix`, honoring `delimiter` for common-prefix
    /// rollup, starting strictly after `marker`, capped at `max_keys`.
    /// Returns `(keys, common_prefixes, truncated)`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        marker: &str,
        max_keys: usize,
    ) -> Result<(Vec<(String, ObjectAttrs)>, Vec<String>, bool), GatewayError>;

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        replace_metadata: Option<std::collections::HashMap<String, String>>,
    ) -> Result<ObjectAttrs, GatewayError>;
}

/// A single in-memory bucket: objects keyed by name, kept in sort order so
/// listing doesn't need to re-sort on every call.
struct MemBucket {
    attrs: BucketAttrs,
    objects: BTreeMap<String, (Bytes, ObjectAttrs)>,
}

/// Reference [`ObjectStore`] implementation backed by an in-process
/// `DashMap`. Not crash-consistent, not size-bounded — explicitly a test
/// fixture, not a production backend.
#[derive(Default)]
pub struct MemoryBackend {
    buckets: DashMap<String, MemBucket>,
}

impl MemoryBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn compute_etag(data: &Bytes) -> String {
        use sha1::{Digest, Sha1};
        let mut hasher = Sha1::new();
        hasher.update(data);
        hex::encode(hasher.finalize())
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn create_bucket(&self, bucket: &str, owner: &str) -> Result<(), GatewayError> {
        if self.buckets.contains_key(bucket) {
            return Err(ClientError::BucketAlreadyExists.into());
        }
        self.buckets.insert(
            bucket.to_string(),
            MemBucket {
                attrs: BucketAttrs {
                    acl: None,
                    created: Self::now(),
                    owner: owner.to_string(),
                },
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), GatewayError> {
        let Some(b) = self.buckets.get(bucket) else {
            return Err(ClientError::NoSuchBucket.into());
        };
        if !b.objects.is_empty() {
            return Err(ClientError::BucketNotEmpty.into());
        }
        drop(b);
        self.buckets.remove(bucket);
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> bool {
        self.buckets.contains_key(bucket)
    }

    async fn bucket_attrs(&self, bucket: &str) -> Result<BucketAttrs, GatewayError> {
        self.buckets
            .get(bucket)
            .map(|b| b.attrs.clone())
            .ok_or_else(|| ClientError::NoSuchBucket.into())
    }

    async fn set_bucket_acl(&self, bucket: &str, acl: &str) -> Result<(), GatewayError> {
        let mut b = self
            .buckets
            .get_mut(bucket)
            .ok_or(ClientError::NoSuchBucket)?;
        b.attrs.acl = Some(acl.to_string());
        Ok(())
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: Option<String>,
        metadata: std::collections::HashMap<String, String>,
        owner: &str,
    ) -> Result<ObjectAttrs, GatewayError> {
        let mut b = self
            .buckets
            .get_mut(bucket)
            .ok_or(ClientError::NoSuchBucket)?;
        let attrs = ObjectAttrs {
            content_type,
            etag: Self::compute_etag(&data),
            size: data.len() as u64,
            last_modified: Self::now(),
            metadata,
            acl: None,
            owner: owner.to_string(),
        };
        b.objects.insert(key.to_string(), (data, attrs.clone()));
        Ok(attrs)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<(Bytes, ObjectAttrs), GatewayError> {
        let b = self.buckets.get(bucket).ok_or(ClientError::NoSuchBucket)?;
        b.objects
            .get(key)
            .cloned()
            .ok_or_else(|| ClientError::NoSuchKey.into())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<ObjectAttrs, GatewayError> {
        let (_, attrs) = self.get_object(bucket, key).await?;
        Ok(attrs)
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), GatewayError> {
        let mut b = self
            .buckets
            .get_mut(bucket)
            .ok_or(ClientError::NoSuchBucket)?;
        b.objects.remove(key);
        Ok(())
    }

    async fn set_object_acl(&self, bucket: &str, key: &str, acl: &str) -> Result<(), GatewayError> {
        let mut b = self
            .buckets
            .get_mut(bucket)
            .ok_or(ClientError::NoSuchBucket)?;
        let (_, attrs) = b.objects.get_mut(key).ok_or(ClientError::NoSuchKey)?;
        attrs.acl = Some(acl.to_string());
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
        marker: &str,
        max_keys: usize,
    ) -> Result<(Vec<(String, ObjectAttrs)>, Vec<String>, bool), GatewayError> {
        let b = self.buckets.get(bucket).ok_or(ClientError::NoSuchBucket)?;
        let mut keys = Vec::new();
        let mut common_prefixes: Vec<String> = Vec::new();
        let mut truncated = false;

        for (key, (_, attrs)) in b.objects.range(marker.to_string()..) {
            if key == marker {
                continue;
            }
            if !key.starts_with(prefix) {
                if key.as_str() > prefix && !prefix.is_empty() {
                    break;
                }
                continue;
            }
            if !delimiter.is_empty() {
                let remainder = &key[prefix.len()..];
                if let Some(idx) = remainder.find(delimiter) {
                    let cp = format!("{}{}", prefix, &remainder[..idx + delimiter.len()]);
                    if !common_prefixes.contains(&cp) {
                        if keys.len() + common_prefixes.len() >= max_keys {
                            truncated = true;
                            break;
                        }
                        common_prefixes.push(cp);
                    }
                    continue;
                }
            }
            if keys.len() + common_prefixes.len() >= max_keys {
                truncated = true;
                break;
            }
            keys.push((key.clone(), attrs.clone()));
        }

        Ok((keys, common_prefixes, truncated))
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
        replace_metadata: Option<std::collections::HashMap<String, String>>,
    ) -> Result<ObjectAttrs, GatewayError> {
        let (data, mut attrs) = self.get_object(src_bucket, src_key).await?;
        if let Some(meta) = replace_metadata {
            attrs.metadata = meta;
        }
        let mut dst = self
            .buckets
            .get_mut(dst_bucket)
            .ok_or(ClientError::NoSuchBucket)?;
        attrs.last_modified = Self::now();
        attrs.etag = Self::compute_etag(&data);
        dst.objects.insert(dst_key.to_string(), (data, attrs.clone()));
        Ok(attrs)
    }
}

impl From<BackendError> for GatewayError {
    fn from(e: BackendError) -> Self {
        GatewayError::Backend(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips_bytes_and_etag() {
        let backend = MemoryBackend::new();
        backend.create_bucket("b", "alice").await.unwrap();
        let attrs = backend
            .put_object("b", "k", Bytes::from_static(b"hello"), None, Default::default(), "alice")
            .await
            .unwrap();
        let (data, got) = backend.get_object("b", "k").await.unwrap();
        assert_eq!(data, Bytes::from_static(b"hello"));
        assert_eq!(got.etag, attrs.etag);
    }

    #[tokio::test]
    async fn delete_bucket_requires_empty() {
        let backend = MemoryBackend::new();
        backend.create_bucket("b", "alice").await.unwrap();
        backend
            .put_object("b", "k", Bytes::from_static(b"x"), None, Default::default(), "alice")
            .await
            .unwrap();
        assert!(backend.delete_bucket("b").await.is_err());
        backend.delete_object("b", "k").await.unwrap();
        backend.delete_bucket("b").await.unwrap();
        assert!(!backend.bucket_exists("b").await);
    }
}
