//! Multipart object identifier encoding.
//!
//! Logical key = `<object_key>.<upload_id>`; metadata suffix `.meta`; part
//! suffix `.<part_number>`. Object keys may themselves contain `.`
//! characters (`photos/a.jpg`), so recovering the three components from a
//! canonical name can't split on the first two dots — it has to split on
//! the *last* two, leaving whatever remains (however many further dots it
//! holds) as the object key.

pub fn base(object_key: &str, upload_id: &str) -> String {
    format!("{object_key}.{upload_id}")
}

pub fn compose_meta(object_key: &str, upload_id: &str) -> String {
    format!("{}.meta", base(object_key, upload_id))
}

pub fn compose_part(object_key: &str, upload_id: &str, part_number: u32) -> String {
    format!("{}.{part_number}", base(object_key, upload_id))
}

/// Splits a canonical name (base plus `.meta` or `.<n>` suffix) into
/// `(object_key, upload_id, suffix)` by splitting on the last two `.`
/// separators.
pub fn parse(name: &str) -> Option<(String, String, String)> {
    let mut parts = name.rsplitn(3, '.');
    let suffix = parts.next()?;
    let upload_id = parts.next()?;
    let object_key = parts.next()?;
    if object_key.is_empty() || upload_id.is_empty() {
        return None;
    }
    Some((object_key.to_string(), upload_id.to_string(), suffix.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_recovers_object_key_and_upload_id_from_meta_name() {
        let name = compose_meta("photos/a.jpg", "upload-123");
        let (key, id, suffix) = parse(&name).unwrap();
        assert_eq!(key, "photos/a.jpg");
        assert_eq!(id, "upload-123");
        assert_eq!(suffix, "meta");
    }

    #[test]
    fn parse_recovers_object_key_and_upload_id_from_part_name() {
        let name = compose_part("photos/a.jpg", "upload-123", 7);
        let (key, id, suffix) = parse(&name).unwrap();
        assert_eq!(key, "photos/a.jpg");
        assert_eq!(id, "upload-123");
        assert_eq!(suffix, "7");
    }

    #[test]
    fn parse_rejects_name_with_no_separators() {
        assert!(parse("plain-key").is_none());
    }
}
