//! Response body formatting: the XML/JSON rendering boundary C8 draws on.
//!
//! The underlying XML/JSON formatter library is treated as an external
//! collaborator; this module is the minimal slice the response emitter and
//! operation layer actually need — rendering an error body and a handful of structural
//! documents (listings, ACLs) in whichever shape the active dialect wants.

use std::collections::HashMap;

use crate::backend::ObjectAttrs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Xml,
    Json,
}

/// Picks a format from `Accept`/`Content-Type`, defaulting to XML for the
/// S3-like dialect and JSON for Swift (Swift's listing endpoints commonly
/// default to plain text, but this core only emits structured bodies).
pub fn negotiate(accept: Option<&str>, default: Format) -> Format {
    match accept.map(|a| a.to_ascii_lowercase()) {
        Some(a) if a.contains("json") => Format::Json,
        Some(a) if a.contains("xml") => Format::Xml,
        _ => default,
    }
}

fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Renders the dialect-shaped error body: `<Error><Code>…</Code>
/// <Message>…</Message></Error>` for XML, `{"Code":…,"Message":…}` for
/// JSON.
pub fn render_error(format: Format, code: &str, message: &str) -> (String, &'static str) {
    match format {
        Format::Xml => (
            format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Error><Code>{}</Code><Message>{}</Message></Error>",
                xml_escape(code),
                xml_escape(message)
            ),
            "application/xml",
        ),
        Format::Json => (
            serde_json::json!({"Code": code, "Message": message}).to_string(),
            "application/json",
        ),
    }
}

/// Renders a bucket listing body.
pub fn render_listing(
    format: Format,
    bucket: &str,
    prefix: &str,
    marker: &str,
    max_keys: usize,
    keys: &[(String, ObjectAttrs)],
    common_prefixes: &[String],
    truncated: bool,
    next_marker: Option<&str>,
) -> (String, &'static str) {
    match format {
        Format::Xml => {
            let mut body = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<ListBucketResult>");
            body.push_str(&format!("<Name>{}</Name>", xml_escape(bucket)));
            body.push_str(&format!("<Prefix>{}</Prefix>", xml_escape(prefix)));
            body.push_str(&format!("<Marker>{}</Marker>", xml_escape(marker)));
            body.push_str(&format!("<MaxKeys>{max_keys}</MaxKeys>"));
            body.push_str(&format!("<IsTruncated>{truncated}</IsTruncated>"));
            if let Some(next) = next_marker {
                body.push_str(&format!("<NextMarker>{}</NextMarker>", xml_escape(next)));
            }
            for (key, attrs) in keys {
                body.push_str(&format!(
                    "<Contents><Key>{}</Key><Size>{}</Size><ETag>\"{}\"</ETag></Contents>",
                    xml_escape(key),
                    attrs.size,
                    attrs.etag
                ));
            }
            for cp in common_prefixes {
                body.push_str(&format!(
                    "<CommonPrefixes><Prefix>{}</Prefix></CommonPrefixes>",
                    xml_escape(cp)
                ));
            }
            body.push_str("</ListBucketResult>");
            (body, "application/xml")
        }
        Format::Json => {
            let contents: Vec<_> = keys
                .iter()
                .map(|(k, a)| serde_json::json!({"Key": k, "Size": a.size, "ETag": a.etag}))
                .collect();
            let body = serde_json::json!({
                "Name": bucket,
                "Prefix": prefix,
                "Marker": marker,
                "MaxKeys": max_keys,
                "IsTruncated": truncated,
                "next-marker": next_marker,
                "Contents": contents,
                "CommonPrefixes": common_prefixes,
            });
            (body.to_string(), "application/json")
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Permission {
    Read,
    Write,
    ReadAcp,
    WriteAcp,
    FullControl,
}

#[derive(Debug, Clone)]
pub struct Grant {
    pub grantee: String,
    pub permission: Permission,
}

#[derive(Debug, Clone, Default)]
pub struct AclDocument {
    pub owner: String,
    pub grants: Vec<Grant>,
}

impl AclDocument {
    /// Expands a canned ACL (`private`, `public-read`, `public-read-write`,
    /// `authenticated-read`) into an explicit grant list.
    pub fn from_canned(owner: &str, canned: &str) -> Option<Self> {
        let owner = owner.to_string();
        let grants = match canned {
            "private" => vec![],
            "public-read" => vec![Grant {
                grantee: "AllUsers".into(),
                permission: Permission::Read,
            }],
            "public-read-write" => vec![
                Grant {
                    grantee: "AllUsers".into(),
                    permission: Permission::Read,
                },
                Grant {
                    grantee: "AllUsers".into(),
                    permission: Permission::Write,
                },
            ],
            "authenticated-read" => vec![Grant {
                grantee: "AuthenticatedUsers".into(),
                permission: Permission::Read,
            }],
            _ => return None,
        };
        Some(Self { owner, grants })
    }

    pub fn permits(&self, grantee: &str, permission: &Permission) -> bool {
        self.owner == grantee
            || self
                .grants
                .iter()
                .any(|g| (g.grantee == grantee || g.grantee == "AllUsers") && &g.permission == permission)
    }

    pub fn to_xml(&self) -> String {
        let mut body = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<AccessControlPolicy>");
        body.push_str(&format!("<Owner><ID>{}</ID></Owner>", xml_escape(&self.owner)));
        body.push_str("<AccessControlList>");
        for g in &self.grants {
            body.push_str(&format!(
                "<Grant><Grantee>{}</Grantee><Permission>{:?}</Permission></Grant>",
                xml_escape(&g.grantee),
                g.permission
            ));
        }
        body.push_str("</AccessControlList></AccessControlPolicy>");
        body
    }
}

/// Normalizes a parsed metadata map (already stripped/lowercased by
/// [`crate::envelope::normalize_metadata_headers`]) back into the header
/// values a response must echo, e.g. for PUT-object responses.
pub fn metadata_for_response(meta: &HashMap<String, String>) -> Vec<(String, String)> {
    meta.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canned_acl_public_read_grants_allusers_read_only() {
        let acl = AclDocument::from_canned("owner", "public-read").unwrap();
        assert!(acl.permits("AllUsers", &Permission::Read));
        assert!(!acl.permits("AllUsers", &Permission::Write));
        assert!(acl.permits("owner", &Permission::FullControl));
    }

    #[test]
    fn error_body_escapes_xml_special_characters() {
        let (body, ct) = render_error(Format::Xml, "NoSuchKey", "missing <tag>");
        assert_eq!(ct, "application/xml");
        assert!(body.contains("&lt;tag&gt;"));
    }
}
