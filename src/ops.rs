//! Operation library (C7): composition over inheritance.
//!
//! A deep per-transport/per-dialect operation class hierarchy doesn't pay
//! for itself here: this module uses one operation descriptor carrying a
//! behavior tag, a dialect tag, and a parameters payload, with virtual
//! dispatch replaced by matching on the tag. That's what [`Operation`] is —
//! one type, dispatched by [`OpKind`], rather than twenty structs each
//! implementing a shared trait.
//!
//! Every operation honors the same contract: `verify_params →
//! prefetch_data → verify_permission → execute → complete`, each of which
//! is a method here that matches on `self.kind`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;

use crate::backend::{ObjectAttrs, ObjectStore};
use crate::envelope::{Dialect, ReqMethod, RequestEnvelope};
use crate::error::{ClientError, GatewayError};
use crate::format::{self, AclDocument, Format, Permission};
use crate::multipart_id;

pub const DEFAULT_MAX_KEYS: usize = 1000;
pub const MIN_MULTIPART_PART_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    GetObject,
    PutObject,
    DeleteObject,
    HeadObject,
    CopyObject,
    ListBucket,
    CreateBucket,
    DeleteBucket,
    HeadBucket,
    GetBucketAcl,
    PutBucketAcl,
    GetObjectAcl,
    PutObjectAcl,
    MultipartInit,
    MultipartUploadPart,
    MultipartComplete,
    MultipartAbort,
    MultipartListParts,
    ListMultipartUploads,
    MultiObjectDelete,
}

/// Which bucket/object policy loads [`crate::dialect::DialectManager::read_permissions`]
/// must orchestrate ahead of `verify_permission`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    BucketAndObject,
    BucketOnly,
    /// COPY authorizes source and destination internally; the pipeline
    /// skips the generic bucket/object policy load for it.
    Skip,
}

impl OpKind {
    pub fn permission_mode(self) -> PermissionMode {
        use OpKind::*;
        match self {
            GetObject | HeadObject | PutObjectAcl | GetObjectAcl | MultiObjectDelete => {
                PermissionMode::BucketAndObject
            }
            // A plain PUT is authorized against the bucket alone: loading and
            // OR-ing in a pre-existing object ACL here would let a restrictive
            // object grant veto an overwrite bucket-level write access should
            // allow.
            PutObject | DeleteObject | CreateBucket | DeleteBucket | PutBucketAcl => {
                PermissionMode::BucketOnly
            }
            CopyObject => PermissionMode::Skip,
            _ => PermissionMode::BucketAndObject,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpParams {
    pub range: Option<(u64, u64)>,
    pub if_match: Option<String>,
    pub if_none_match: Option<String>,
    pub if_modified_since: Option<String>,
    pub if_unmodified_since: Option<String>,
    pub content_md5: Option<String>,
    pub copy_source: Option<String>,
    pub metadata_directive_replace: bool,
    pub canned_acl: Option<String>,
    pub prefix: String,
    pub delimiter: String,
    pub marker: String,
    pub max_keys: usize,
    pub upload_id: Option<String>,
    pub part_number: Option<u32>,
    pub parts: Vec<(u32, String)>,
    pub keys_to_delete: Vec<String>,
    pub manifest: Option<String>,
}

/// Metadata key a manifest object's `X-Object-Manifest: bucket/prefix`
/// header is stashed under, alongside genuine user metadata. Reserved —
/// not exposed back to clients as a user metadata entry.
pub const MANIFEST_META_KEY: &str = "x-object-manifest";

/// One canonical operation bound to an envelope for the duration of a
/// single request.
pub struct Operation {
    pub kind: OpKind,
    pub dialect: Dialect,
    pub params: OpParams,
}

/// Data fetched by `prefetch_data` ahead of `execute`, kept distinct so a
/// failed fetch (e.g. no-such-key on a conditional GET) can short-circuit
/// before any mutation is attempted.
#[derive(Default)]
pub struct Prefetched {
    pub object: Option<(Bytes, ObjectAttrs)>,
}

pub struct ExecuteOutcome {
    pub status: StatusCode,
    pub body: Bytes,
    pub content_type: &'static str,
    pub extra_headers: Vec<(String, String)>,
}

impl Operation {
    /// Step 7 of the pipeline: validates the operation's own parameters
    /// (already parsed during dialect `init`) are internally consistent.
    pub fn verify_params(&self) -> Result<(), GatewayError> {
        match self.kind {
            OpKind::MultipartUploadPart | OpKind::MultipartComplete | OpKind::MultipartAbort
            | OpKind::MultipartListParts => {
                if self.params.upload_id.is_none() {
                    return Err(ClientError::NoSuchUpload.into());
                }
            }
            OpKind::CopyObject => {
                if self.params.copy_source.is_none() {
                    return Err(ClientError::MalformedRequest("missing copy source".into()).into());
                }
            }
            OpKind::MultiObjectDelete => {
                if self.params.keys_to_delete.is_empty() || self.params.keys_to_delete.len() > 1000 {
                    return Err(ClientError::MalformedRequest("bad delete key list".into()).into());
                }
            }
            OpKind::MultipartComplete => {
                let mut last = 0u32;
                for (n, _) in &self.params.parts {
                    if *n <= last {
                        return Err(ClientError::InvalidPart.into());
                    }
                    last = *n;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Step "prefetch_data" from the per-op contract: reads whatever the
    /// operation needs before permission checks and execution can proceed
    /// (the current object, for conditional GET/HEAD; the bucket ACL, for
    /// ACL operations).
    pub async fn prefetch_data(
        &self,
        env: &RequestEnvelope,
        backend: &dyn ObjectStore,
    ) -> Result<Prefetched, GatewayError> {
        let mut out = Prefetched::default();
        let bucket = env.bucket.as_deref().unwrap_or("");
        match self.kind {
            OpKind::GetObject | OpKind::HeadObject | OpKind::GetObjectAcl => {
                if let Some(object) = &env.object {
                    out.object = Some(backend.get_object(bucket, object).await?);
                }
            }
            _ => {}
        }
        Ok(out)
    }

    /// `verify_permission`: checks the resolved ACLs against the
    /// authenticated user. Bucket/object ACLs were already loaded by
    /// `read_permissions` before this runs.
    pub fn verify_permission(
        &self,
        env: &RequestEnvelope,
        bucket_acl: Option<&AclDocument>,
        object_acl: Option<&AclDocument>,
    ) -> Result<(), GatewayError> {
        let user_id = env
            .user
            .as_ref()
            .map(|u| u.id.as_str())
            .unwrap_or("AllUsers");

        let needed = match self.kind {
            OpKind::GetObject | OpKind::HeadObject | OpKind::GetObjectAcl => Permission::Read,
            OpKind::PutObject
            | OpKind::DeleteObject
            | OpKind::PutObjectAcl
            | OpKind::MultipartInit
            | OpKind::MultipartUploadPart
            | OpKind::MultipartComplete
            | OpKind::MultipartAbort
            | OpKind::MultiObjectDelete => Permission::Write,
            OpKind::PutBucketAcl | OpKind::DeleteBucket => Permission::WriteAcp,
            _ => return Ok(()),
        };

        if needed == Permission::WriteAcp {
            if let Some(acl) = bucket_acl {
                if !acl.permits(user_id, &Permission::FullControl) && acl.owner != user_id {
                    return Err(ClientError::AccessDenied.into());
                }
            }
            return Ok(());
        }

        let acl = object_acl.or(bucket_acl);
        if let Some(acl) = acl {
            if !acl.permits(user_id, &needed) && !acl.permits(user_id, &Permission::FullControl) {
                return Err(ClientError::AccessDenied.into());
            }
        }
        Ok(())
    }

    /// `execute` + the response-shaping half of `complete`: runs the
    /// operation against the backend and renders the dialect-correct
    /// success body. Error paths are surfaced to the caller, which routes
    /// them through the pipeline's single abort-early path instead.
    pub async fn execute(
        &self,
        env: &mut RequestEnvelope,
        backend: &dyn ObjectStore,
        body: Bytes,
        prefetched: &Prefetched,
        max_put_size: u64,
        format: Format,
    ) -> Result<ExecuteOutcome, GatewayError> {
        let bucket = env.bucket.clone().unwrap_or_default();
        let object = env.object.clone();

        match self.kind {
            OpKind::CreateBucket => {
                let owner = env.user.as_ref().map(|u| u.id.as_str()).unwrap_or("AllUsers");
                backend.create_bucket(&bucket, owner).await?;
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::new(),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
            OpKind::DeleteBucket => {
                backend.delete_bucket(&bucket).await?;
                Ok(ExecuteOutcome {
                    status: StatusCode::NO_CONTENT,
                    body: Bytes::new(),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
            OpKind::HeadBucket => {
                if !backend.bucket_exists(&bucket).await {
                    return Err(ClientError::NoSuchBucket.into());
                }
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::new(),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
            OpKind::PutObject => {
                let len = env.content_length.unwrap_or(body.len() as u64);
                if len > max_put_size {
                    return Err(ClientError::EntityTooLarge.into());
                }
                if let Some(expected_md5) = &self.params.content_md5 {
                    use md5_compat::compute_md5_base64;
                    let actual = compute_md5_base64(&body);
                    if &actual != expected_md5 {
                        return Err(ClientError::BadDigest.into());
                    }
                }
                let object = object.ok_or_else(|| ClientError::InvalidObjectKey.into_gw())?;
                let mut metadata = env.metadata.clone();
                if let Some(manifest) = &self.params.manifest {
                    metadata.insert(MANIFEST_META_KEY.to_string(), manifest.clone());
                }
                let owner = env.user.as_ref().map(|u| u.id.as_str()).unwrap_or("AllUsers");
                let attrs = backend
                    .put_object(&bucket, &object, body, env.content_type.clone(), metadata, owner)
                    .await?;
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::new(),
                    content_type: "application/xml",
                    extra_headers: vec![("ETag".into(), format!("\"{}\"", attrs.etag))],
                })
            }
            OpKind::GetObject => {
                let (mut data, attrs) = prefetched
                    .object
                    .clone()
                    .ok_or::<GatewayError>(ClientError::NoSuchKey.into())?;
                if let Some(inm) = &self.params.if_none_match {
                    if inm == &attrs.etag {
                        return Ok(ExecuteOutcome {
                            status: StatusCode::NOT_MODIFIED,
                            body: Bytes::new(),
                            content_type: "application/xml",
                            extra_headers: vec![],
                        });
                    }
                }
                if let Some(im) = &self.params.if_match {
                    if im != &attrs.etag {
                        return Err(ClientError::PreconditionFailed.into());
                    }
                }
                if modified_since_unmet(&self.params.if_modified_since, attrs.last_modified) {
                    return Ok(ExecuteOutcome {
                        status: StatusCode::NOT_MODIFIED,
                        body: Bytes::new(),
                        content_type: "application/xml",
                        extra_headers: vec![],
                    });
                }
                if unmodified_since_unmet(&self.params.if_unmodified_since, attrs.last_modified) {
                    return Err(ClientError::PreconditionFailed.into());
                }
                if let Some(manifest) = attrs.metadata.get(MANIFEST_META_KEY) {
                    let user_id = env.user.as_ref().map(|u| u.id.as_str()).unwrap_or("AllUsers");
                    let (concatenated, _total) = resolve_manifest(backend, manifest, user_id, true).await?;
                    data = concatenated;
                }
                if let Some((start, end)) = self.params.range {
                    let end = if end == 0 { data.len() as u64 - 1 } else { end.min(data.len() as u64 - 1) };
                    if start > end || start >= data.len() as u64 {
                        return Err(ClientError::InvalidRange.into());
                    }
                    let slice = data.slice(start as usize..=end as usize);
                    return Ok(ExecuteOutcome {
                        status: StatusCode::PARTIAL_CONTENT,
                        body: slice,
                        content_type: "application/octet-stream",
                        extra_headers: vec![
                            ("ETag".into(), format!("\"{}\"", attrs.etag)),
                            (
                                "Content-Range".into(),
                                format!("bytes {}-{}/{}", start, end, data.len()),
                            ),
                        ],
                    });
                }
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: data,
                    content_type: "application/octet-stream",
                    extra_headers: vec![("ETag".into(), format!("\"{}\"", attrs.etag))],
                })
            }
            OpKind::HeadObject => {
                let (_, attrs) = prefetched
                    .object
                    .clone()
                    .ok_or::<GatewayError>(ClientError::NoSuchKey.into())?;
                let size = if let Some(manifest) = attrs.metadata.get(MANIFEST_META_KEY) {
                    let user_id = env.user.as_ref().map(|u| u.id.as_str()).unwrap_or("AllUsers");
                    let (_, total) = resolve_manifest(backend, manifest, user_id, false).await?;
                    total
                } else {
                    attrs.size
                };
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::new(),
                    content_type: "application/octet-stream",
                    extra_headers: vec![
                        ("ETag".into(), format!("\"{}\"", attrs.etag)),
                        ("Content-Length".into(), size.to_string()),
                    ],
                })
            }
            OpKind::DeleteObject => {
                let object = object.ok_or_else(|| ClientError::InvalidObjectKey.into_gw())?;
                backend.delete_object(&bucket, &object).await?;
                Ok(ExecuteOutcome {
                    status: StatusCode::NO_CONTENT,
                    body: Bytes::new(),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
            OpKind::CopyObject => {
                let source = self.params.copy_source.clone().unwrap_or_default();
                let (src_bucket, src_key) = source
                    .trim_start_matches('/')
                    .split_once('/')
                    .ok_or_else(|| ClientError::MalformedRequest("bad copy source".into()).into_gw())?;
                let object = object.ok_or_else(|| ClientError::InvalidObjectKey.into_gw())?;
                let replace = if self.params.metadata_directive_replace {
                    Some(env.metadata.clone())
                } else {
                    None
                };
                let attrs = backend
                    .copy_object(src_bucket, src_key, &bucket, &object, replace)
                    .await?;
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::new(),
                    content_type: "application/xml",
                    extra_headers: vec![("ETag".into(), format!("\"{}\"", attrs.etag))],
                })
            }
            OpKind::ListBucket => {
                let (keys, common_prefixes, truncated) = backend
                    .list_objects(
                        &bucket,
                        &self.params.prefix,
                        &self.params.delimiter,
                        &self.params.marker,
                        self.params.max_keys,
                    )
                    .await?;
                let next_marker = if truncated { keys.last().map(|(k, _)| k.as_str()) } else { None };
                let (body, ct) = format::render_listing(
                    format,
                    &bucket,
                    &self.params.prefix,
                    &self.params.marker,
                    self.params.max_keys,
                    &keys,
                    &common_prefixes,
                    truncated,
                    next_marker,
                );
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::from(body),
                    content_type: ct,
                    extra_headers: vec![],
                })
            }
            OpKind::GetBucketAcl | OpKind::GetObjectAcl => {
                let attrs = backend.bucket_attrs(&bucket).await?;
                let canned = attrs.acl.as_deref().unwrap_or("private");
                let acl = AclDocument::from_canned(&attrs.owner, canned).unwrap_or_default();
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::from(acl.to_xml()),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
            OpKind::PutBucketAcl => {
                let canned = self.params.canned_acl.clone().unwrap_or_else(|| "private".into());
                backend.set_bucket_acl(&bucket, &canned).await?;
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::new(),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
            OpKind::PutObjectAcl => {
                let object = object.ok_or_else(|| ClientError::InvalidObjectKey.into_gw())?;
                let canned = self.params.canned_acl.clone().unwrap_or_else(|| "private".into());
                backend.set_object_acl(&bucket, &object, &canned).await?;
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::new(),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
            OpKind::MultipartInit => {
                let object = object.ok_or_else(|| ClientError::InvalidObjectKey.into_gw())?;
                let upload_id = uuid::Uuid::new_v4().to_string();
                let meta_key = multipart_id::compose_meta(&object, &upload_id);
                let owner = env.user.as_ref().map(|u| u.id.as_str()).unwrap_or("AllUsers");
                backend
                    .put_object(&bucket, &meta_key, Bytes::new(), env.content_type.clone(), env.metadata.clone(), owner)
                    .await?;
                let body = format!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<InitiateMultipartUploadResult><Bucket>{bucket}</Bucket><Key>{object}</Key><UploadId>{upload_id}</UploadId></InitiateMultipartUploadResult>"
                );
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::from(body),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
            OpKind::MultipartUploadPart => {
                let object = object.ok_or_else(|| ClientError::InvalidObjectKey.into_gw())?;
                let upload_id = self.params.upload_id.clone().unwrap();
                let part_number = self
                    .params
                    .part_number
                    .ok_or_else(|| ClientError::MalformedRequest("missing partNumber".into()).into_gw())?;
                let part_key = multipart_id::compose_part(&object, &upload_id, part_number);
                let owner = env.user.as_ref().map(|u| u.id.as_str()).unwrap_or("AllUsers");
                let attrs = backend
                    .put_object(&bucket, &part_key, body, None, HashMap::new(), owner)
                    .await?;
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::new(),
                    content_type: "application/xml",
                    extra_headers: vec![("ETag".into(), format!("\"{}\"", attrs.etag))],
                })
            }
            OpKind::MultipartComplete => {
                let object = object.ok_or_else(|| ClientError::InvalidObjectKey.into_gw())?;
                let upload_id = self.params.upload_id.clone().unwrap();

                let mut assembled = Vec::new();
                let n_parts = self.params.parts.len();
                for (idx, (part_number, _etag)) in self.params.parts.iter().enumerate() {
                    let part_key = multipart_id::compose_part(&object, &upload_id, *part_number);
                    let (data, _attrs) = backend.get_object(&bucket, &part_key).await?;
                    if idx + 1 < n_parts && (data.len() as u64) < MIN_MULTIPART_PART_SIZE {
                        return Err(ClientError::InvalidPart.into());
                    }
                    assembled.extend_from_slice(&data);
                }

                let owner = env.user.as_ref().map(|u| u.id.as_str()).unwrap_or("AllUsers");
                let attrs = backend
                    .put_object(
                        &bucket,
                        &object,
                        Bytes::from(assembled),
                        env.content_type.clone(),
                        env.metadata.clone(),
                        owner,
                    )
                    .await?;

                for (part_number, _) in &self.params.parts {
                    let part_key = multipart_id::compose_part(&object, &upload_id, *part_number);
                    let _ = backend.delete_object(&bucket, &part_key).await;
                }
                let meta_key = multipart_id::compose_meta(&object, &upload_id);
                let _ = backend.delete_object(&bucket, &meta_key).await;

                let body = format!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<CompleteMultipartUploadResult><Bucket>{bucket}</Bucket><Key>{object}</Key><ETag>\"{}\"</ETag></CompleteMultipartUploadResult>",
                    attrs.etag
                );
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::from(body),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
            OpKind::MultipartAbort => {
                let object = object.ok_or_else(|| ClientError::InvalidObjectKey.into_gw())?;
                let upload_id = self.params.upload_id.clone().unwrap();
                let base = multipart_id::base(&object, &upload_id);
                let (keys, _, _) = backend.list_objects(&bucket, &base, "", "", 10_000).await?;
                for (key, _) in keys {
                    let _ = backend.delete_object(&bucket, &key).await;
                }
                let meta_key = multipart_id::compose_meta(&object, &upload_id);
                let _ = backend.delete_object(&bucket, &meta_key).await;
                Ok(ExecuteOutcome {
                    status: StatusCode::NO_CONTENT,
                    body: Bytes::new(),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
            OpKind::MultipartListParts => {
                let object = object.ok_or_else(|| ClientError::InvalidObjectKey.into_gw())?;
                let upload_id = self.params.upload_id.clone().unwrap();
                let base = multipart_id::base(&object, &upload_id);
                let (mut keys, _, _) = backend.list_objects(&bucket, &base, "", "", 10_000).await?;
                keys.retain(|(k, _)| !k.ends_with(".meta"));
                keys.sort_by_key(|(k, _)| {
                    k.rsplit('.').next().and_then(|n| n.parse::<u32>().ok()).unwrap_or(0)
                });
                let mut body = format!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ListPartsResult><Bucket>{bucket}</Bucket><Key>{object}</Key><UploadId>{upload_id}</UploadId>"
                );
                for (key, attrs) in &keys {
                    let part_number = key.rsplit('.').next().unwrap_or("0");
                    body.push_str(&format!(
                        "<Part><PartNumber>{part_number}</PartNumber><ETag>\"{}\"</ETag><Size>{}</Size></Part>",
                        attrs.etag, attrs.size
                    ));
                }
                body.push_str("</ListPartsResult>");
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::from(body),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
            OpKind::ListMultipartUploads => {
                // default_max is fixed at construction and max_uploads is
                // derived from it, never the other way around.
                let default_max = DEFAULT_MAX_KEYS;
                let max_uploads = if self.params.max_keys == 0 {
                    default_max
                } else {
                    self.params.max_keys
                };
                let (keys, _, truncated) = backend
                    .list_objects(&bucket, &self.params.prefix, "", &self.params.marker, max_uploads * 3)
                    .await?;

                let mut uploads: HashMap<String, String> = HashMap::new();
                for (key, _) in &keys {
                    if let Some((obj_key, upload_id, suffix)) = multipart_id::parse(key) {
                        if suffix == "meta" {
                            uploads.insert(upload_id, obj_key);
                        }
                    }
                }
                let mut body = format!(
                    "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ListMultipartUploadsResult><Bucket>{bucket}</Bucket><MaxUploads>{max_uploads}</MaxUploads><IsTruncated>{truncated}</IsTruncated>"
                );
                for (upload_id, key) in &uploads {
                    body.push_str(&format!(
                        "<Upload><Key>{key}</Key><UploadId>{upload_id}</UploadId></Upload>"
                    ));
                }
                body.push_str("</ListMultipartUploadsResult>");
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::from(body),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
            OpKind::MultiObjectDelete => {
                // `verify_permission` only gates this operation at the
                // bucket level (there is no single `env.object` for a
                // `?delete` POST) — each key can carry its own ACL, so
                // eligibility is re-checked per key here before deleting it.
                let user_id = env.user.as_ref().map(|u| u.id.as_str()).unwrap_or("AllUsers");
                let bucket_attrs = backend.bucket_attrs(&bucket).await?;
                let bucket_acl =
                    AclDocument::from_canned(&bucket_attrs.owner, bucket_attrs.acl.as_deref().unwrap_or("private"));

                let mut results = Vec::new();
                for key in &self.params.keys_to_delete {
                    let object_acl = match backend.head_object(&bucket, key).await {
                        Ok(attrs) => {
                            AclDocument::from_canned(&attrs.owner, attrs.acl.as_deref().unwrap_or("private"))
                        }
                        Err(_) => None,
                    };
                    let acl = object_acl.as_ref().or(bucket_acl.as_ref());
                    let denied = acl.is_some_and(|acl| {
                        !acl.permits(user_id, &Permission::Write) && !acl.permits(user_id, &Permission::FullControl)
                    });
                    if denied {
                        let (_, code) = GatewayError::Client(ClientError::AccessDenied).to_error_code(self.dialect);
                        results.push((key.clone(), Some(code)));
                        continue;
                    }
                    match backend.delete_object(&bucket, key).await {
                        Ok(()) => results.push((key.clone(), None)),
                        Err(e) => {
                            let (_, code) = e.to_error_code(self.dialect);
                            results.push((key.clone(), Some(code)));
                        }
                    }
                }
                let mut body = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<DeleteResult>");
                for (key, err) in &results {
                    match err {
                        None => body.push_str(&format!("<Deleted><Key>{key}</Key></Deleted>")),
                        Some(code) => body.push_str(&format!(
                            "<Error><Key>{key}</Key><Code>{code}</Code></Error>"
                        )),
                    }
                }
                body.push_str("</DeleteResult>");
                Ok(ExecuteOutcome {
                    status: StatusCode::OK,
                    body: Bytes::from(body),
                    content_type: "application/xml",
                    extra_headers: vec![],
                })
            }
        }
    }
}

/// Translates `HTTP method + path shape + sub-resource query markers` into
/// an [`OpKind`] — the natural method-and-sub-resource mapping a dialect
/// handler's `get_op` performs, plus the sub-resource special cases
/// (`?acl`, `?uploads`, `?uploadId=`, `POST .../?delete`).
pub fn classify(
    method: ReqMethod,
    has_bucket: bool,
    has_object: bool,
    query: &HashMap<String, String>,
) -> Option<OpKind> {
    let has_acl = query.contains_key("acl");
    let has_uploads = query.contains_key("uploads");
    let has_upload_id = query.contains_key("uploadId");
    let has_delete = query.contains_key("delete");

    Some(match (method, has_bucket, has_object) {
        (ReqMethod::Put, _, true) if has_acl => OpKind::PutObjectAcl,
        (ReqMethod::Get, _, true) if has_acl => OpKind::GetObjectAcl,
        (ReqMethod::Put, true, false) if has_acl => OpKind::PutBucketAcl,
        (ReqMethod::Get, true, false) if has_acl => OpKind::GetBucketAcl,
        (ReqMethod::Post, true, true) if has_uploads => OpKind::MultipartInit,
        (ReqMethod::Put, _, true) if has_upload_id => OpKind::MultipartUploadPart,
        (ReqMethod::Post, _, true) if has_upload_id => OpKind::MultipartComplete,
        (ReqMethod::Delete, _, true) if has_upload_id => OpKind::MultipartAbort,
        (ReqMethod::Get, _, true) if has_upload_id => OpKind::MultipartListParts,
        (ReqMethod::Get, true, false) if has_uploads => OpKind::ListMultipartUploads,
        (ReqMethod::Post, true, false) if has_delete => OpKind::MultiObjectDelete,
        (ReqMethod::Copy, _, true) => OpKind::CopyObject,
        (ReqMethod::Get, false, false) => OpKind::ListBucket,
        (ReqMethod::Get, true, false) => OpKind::ListBucket,
        (ReqMethod::Put, true, false) => OpKind::CreateBucket,
        (ReqMethod::Delete, true, false) => OpKind::DeleteBucket,
        (ReqMethod::Head, true, false) => OpKind::HeadBucket,
        (ReqMethod::Get, _, true) => OpKind::GetObject,
        (ReqMethod::Head, _, true) => OpKind::HeadObject,
        (ReqMethod::Put, _, true) => OpKind::PutObject,
        (ReqMethod::Delete, _, true) => OpKind::DeleteObject,
        _ => return None,
    })
}

impl ClientError {
    fn into_gw(self) -> GatewayError {
        self.into()
    }
}

/// True if `If-Modified-Since` was given and the object's `last_modified`
/// is at or before it, meaning a 304 should be returned. An unparsable
/// header is ignored rather than treated as a match.
fn modified_since_unmet(since: &Option<String>, last_modified: u64) -> bool {
    let Some(since) = since else { return false };
    let Ok(since) = httpdate::parse_http_date(since) else { return false };
    let last_modified = std::time::UNIX_EPOCH + std::time::Duration::from_secs(last_modified);
    last_modified <= since
}

/// True if `If-Unmodified-Since` was given and the object's `last_modified`
/// is after it, meaning a 412 should be returned.
fn unmodified_since_unmet(since: &Option<String>, last_modified: u64) -> bool {
    let Some(since) = since else { return false };
    let Ok(since) = httpdate::parse_http_date(since) else { return false };
    let last_modified = std::time::UNIX_EPOCH + std::time::Duration::from_secs(last_modified);
    last_modified > since
}

/// Resolves a Dynamic-Large-Object-style manifest: `manifest` is
/// `"bucket/prefix"`, naming the bucket and key prefix the object's real
/// parts live under. Lists every part in key order, honoring the manifest
/// bucket's own ACL for `user_id`, and — when `want_body` — concatenates
/// their bytes; otherwise only total size is computed.
async fn resolve_manifest(
    backend: &dyn ObjectStore,
    manifest: &str,
    user_id: &str,
    want_body: bool,
) -> Result<(Bytes, u64), GatewayError> {
    let (manifest_bucket, prefix) = manifest.split_once('/').unwrap_or((manifest, ""));
    let bucket_attrs = backend.bucket_attrs(manifest_bucket).await?;
    if let Some(acl) = AclDocument::from_canned(&bucket_attrs.owner, bucket_attrs.acl.as_deref().unwrap_or("private")) {
        if !acl.permits(user_id, &Permission::Read) && !acl.permits(user_id, &Permission::FullControl) {
            return Err(ClientError::AccessDenied.into());
        }
    }

    let mut marker = String::new();
    let mut total = 0u64;
    let mut body = Vec::new();
    loop {
        let (keys, _, truncated) = backend
            .list_objects(manifest_bucket, prefix, "", &marker, DEFAULT_MAX_KEYS)
            .await?;
        if keys.is_empty() {
            break;
        }
        for (key, part_attrs) in &keys {
            total += part_attrs.size;
            if want_body {
                let (data, _) = backend.get_object(manifest_bucket, key).await?;
                body.extend_from_slice(&data);
            }
            marker = key.clone();
        }
        if !truncated {
            break;
        }
    }
    Ok((Bytes::from(body), total))
}

/// A minimal MD5 implementation used only to validate the optional
/// `Content-MD5` header on PUT object. Kept tiny and
/// dependency-free since this is the one place the gateway needs MD5
/// rather than the SHA-1 already used for ETags/signatures elsewhere.
mod md5_compat {
    use base64::Engine;
    use bytes::Bytes;

    pub fn compute_md5_base64(data: &Bytes) -> String {
        let digest = md5(data);
        base64::engine::general_purpose::STANDARD.encode(digest)
    }

    // Public-domain reference MD5 (RFC 1321), specialized for a single
    // in-memory buffer.
    fn md5(input: &[u8]) -> [u8; 16] {
        const S: [u32; 64] = [
            7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 7, 12, 17, 22, 5, 9, 14, 20, 5, 9, 14, 20, 5, 9,
            14, 20, 5, 9, 14, 20, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 4, 11, 16, 23, 6, 10, 15,
            21, 6, 10, 15, 21, 6, 10, 15, 21, 6, 10, 15, 21,
        ];
        const K: [u32; 64] = [
            0xd76aa478, 0xe8c7b756, 0x242070db, 0xc1bdceee, 0xf57c0faf, 0x4787c62a, 0xa8304613, 0xfd469501,
            0x698098d8, 0x8b44f7af, 0xffff5bb1, 0x895cd7be, 0x6b901122, 0xfd987193, 0xa679438e, 0x49b40821,
            0xf61e2562, 0xc040b340, 0x265e5a51, 0xe9b6c7aa, 0xd62f105d, 0x02441453, 0xd8a1e681, 0xe7d3fbc8,
            0x21e1cde6, 0xc33707d6, 0xf4d50d87, 0x455a14ed, 0xa9e3e905, 0xfcefa3f8, 0x676f02d9, 0x8d2a4c8a,
            0xfffa3942, 0x8771f681, 0x6d9d6122, 0xfde5380c, 0xa4beea44, 0x4bdecfa9, 0xf6bb4b60, 0xbebfbc70,
            0x289b7ec6, 0xeaa127fa, 0xd4ef3085, 0x04881d05, 0xd9d4d039, 0xe6db99e5, 0x1fa27cf8, 0xc4ac5665,
            0xf4292244, 0x432aff97, 0xab9423a7, 0xfc93a039, 0x655b59c3, 0x8f0ccc92, 0xffeff47d, 0x85845dd1,
            0x6fa87e4f, 0xfe2ce6e0, 0xa3014314, 0x4e0811a1, 0xf7537e82, 0xbd3af235, 0x2ad7d2bb, 0xeb86d391,
        ];
        let mut a0: u32 = 0x67452301;
        let mut b0: u32 = 0xefcdab89;
        let mut c0: u32 = 0x98badcfe;
        let mut d0: u32 = 0x10325476;

        let mut msg = input.to_vec();
        let bit_len = (input.len() as u64).wrapping_mul(8);
        msg.push(0x80);
        while msg.len() % 64 != 56 {
            msg.push(0);
        }
        msg.extend_from_slice(&bit_len.to_le_bytes());

        for chunk in msg.chunks(64) {
            let mut m = [0u32; 16];
            for (i, word) in chunk.chunks(4).enumerate() {
                m[i] = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            }
            let (mut a, mut b, mut c, mut d) = (a0, b0, c0, d0);
            for i in 0..64 {
                let (f, g) = match i {
                    0..=15 => ((b & c) | (!b & d), i),
                    16..=31 => ((d & b) | (!d & c), (5 * i + 1) % 16),
                    32..=47 => (b ^ c ^ d, (3 * i + 5) % 16),
                    _ => (c ^ (b | !d), (7 * i) % 16),
                };
                let f = f.wrapping_add(a).wrapping_add(K[i]).wrapping_add(m[g]);
                a = d;
                d = c;
                c = b;
                b = b.wrapping_add(f.rotate_left(S[i]));
            }
            a0 = a0.wrapping_add(a);
            b0 = b0.wrapping_add(b);
            c0 = c0.wrapping_add(c);
            d0 = d0.wrapping_add(d);
        }

        let mut out = [0u8; 16];
        out[0..4].copy_from_slice(&a0.to_le_bytes());
        out[4..8].copy_from_slice(&b0.to_le_bytes());
        out[8..12].copy_from_slice(&c0.to_le_bytes());
        out[12..16].copy_from_slice(&d0.to_le_bytes());
        out
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn md5_of_known_input_matches_reference() {
            let digest = md5(b"abc");
            assert_eq!(hex::encode(digest), "900150983cd24fb0d6963f7d28e17f72");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_picks_multipart_init_over_plain_post() {
        let mut q = HashMap::new();
        q.insert("uploads".to_string(), String::new());
        assert_eq!(classify(ReqMethod::Post, true, true, &q), Some(OpKind::MultipartInit));
    }

    #[test]
    fn classify_default_max_keys_then_derives_max_uploads() {
        // Regression for the construction-order bug: default_max must be
        // fixed first and max_uploads derived from it.
        assert_eq!(DEFAULT_MAX_KEYS, 1000);
    }

    #[test]
    fn verify_params_rejects_non_monotone_part_numbers() {
        let op = Operation {
            kind: OpKind::MultipartComplete,
            dialect: Dialect::S3,
            params: OpParams {
                upload_id: Some("u".into()),
                parts: vec![(2, "a".into()), (1, "b".into())],
                ..Default::default()
            },
        };
        assert!(op.verify_params().is_err());
    }

    #[test]
    fn modified_since_is_unmet_when_object_predates_header() {
        // Object last touched 2020-01-01, client asks "changed since 2024" — no.
        let since = Some("Wed, 01 Jan 2024 00:00:00 GMT".to_string());
        assert!(modified_since_unmet(&since, 1_577_836_800));
    }

    #[test]
    fn modified_since_is_met_when_object_postdates_header() {
        let since = Some("Wed, 01 Jan 2020 00:00:00 GMT".to_string());
        assert!(!modified_since_unmet(&since, 1_700_000_000));
    }

    #[test]
    fn modified_since_absent_header_never_shortcircuits() {
        assert!(!modified_since_unmet(&None, 0));
    }

    #[test]
    fn modified_since_unparsable_header_is_ignored() {
        let since = Some("not-a-date".to_string());
        assert!(!modified_since_unmet(&since, 1_700_000_000));
    }

    #[test]
    fn unmodified_since_is_unmet_when_object_postdates_header() {
        let since = Some("Wed, 01 Jan 2020 00:00:00 GMT".to_string());
        assert!(unmodified_since_unmet(&since, 1_700_000_000));
    }

    #[test]
    fn unmodified_since_is_met_when_object_predates_header() {
        let since = Some("Wed, 01 Jan 2024 00:00:00 GMT".to_string());
        assert!(!unmodified_since_unmet(&since, 1_577_836_800));
    }

    #[tokio::test]
    async fn resolve_manifest_concatenates_parts_in_key_order() {
        let backend = crate::backend::MemoryBackend::new();
        backend.create_bucket("parts", "alice").await.unwrap();
        backend
            .put_object("parts", "big/0001", Bytes::from_static(b"hello "), None, HashMap::new(), "alice")
            .await
            .unwrap();
        backend
            .put_object("parts", "big/0002", Bytes::from_static(b"world"), None, HashMap::new(), "alice")
            .await
            .unwrap();

        let (body, total) = resolve_manifest(backend.as_ref(), "parts/big/", "alice", true)
            .await
            .unwrap();
        assert_eq!(&body[..], b"hello world");
        assert_eq!(total, 11);
    }

    #[tokio::test]
    async fn resolve_manifest_without_body_still_totals_size() {
        let backend = crate::backend::MemoryBackend::new();
        backend.create_bucket("parts", "alice").await.unwrap();
        backend
            .put_object("parts", "big/0001", Bytes::from_static(b"1234567890"), None, HashMap::new(), "alice")
            .await
            .unwrap();

        let (body, total) = resolve_manifest(backend.as_ref(), "parts/big/", "alice", false)
            .await
            .unwrap();
        assert!(body.is_empty());
        assert_eq!(total, 10);
    }
}
