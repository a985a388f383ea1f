use semver::Version;

pub const MAX_PACKAGE_ID_LENGTH: usize = 100;

/// Package id grammar: dot/dash/underscore separated runs of ASCII
/// alphanumerics, at most 100 characters. Checked before any service call so
/// malformed input never reaches the store.
pub fn is_valid_package_id(id: &str) -> bool {
    if id.is_empty() || id.len() > MAX_PACKAGE_ID_LENGTH {
        return false;
    }

    let bytes = id.as_bytes();
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return false;
    }

    let mut previous_was_separator = false;
    for &byte in bytes {
        match byte {
            b'.' | b'-' | b'_' => {
                if previous_was_separator {
                    return false;
                }
                previous_was_separator = true;
            }
            _ if byte.is_ascii_alphanumeric() => previous_was_separator = false,
            _ => return false,
        }
    }
    true
}

/// Parses a version string, tolerating one- and two-part numeric versions
/// (`1`, `1.0`) by padding them to full semantic versions.
pub fn parse_version(value: &str) -> Option<Version> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(version) = Version::parse(value) {
        return Some(version);
    }

    let (core, suffix) = match value.find(['-', '+']) {
        Some(idx) => value.split_at(idx),
        None => (value, ""),
    };
    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() >= 3 {
        return None;
    }
    if !parts
        .iter()
        .all(|part| !part.is_empty() && part.bytes().all(|byte| byte.is_ascii_digit()))
    {
        return None;
    }

    let mut padded = parts.join(".");
    for _ in parts.len()..3 {
        padded.push_str(".0");
    }
    padded.push_str(suffix);
    Version::parse(&padded).ok()
}

/// Canonical string form used for storage keys and duplicate detection.
pub fn normalize_version(version: &Version) -> String {
    version.to_string()
}

#[cfg(test)]
mod tests {
    use super::{is_valid_package_id, normalize_version, parse_version};

    #[test]
    fn accepts_typical_package_ids() {
        for id in ["Foo", "Foo.Bar", "foo-bar", "foo_bar2", "A1.B2.C3"] {
            assert!(is_valid_package_id(id), "{id} should be valid");
        }
    }

    #[test]
    fn rejects_malformed_package_ids() {
        for id in [
            "",
            ".Foo",
            "Foo.",
            "Foo..Bar",
            "Foo Bar",
            "Foo/Bar",
            "Foo!",
            "-leading",
        ] {
            assert!(!is_valid_package_id(id), "{id} should be invalid");
        }
    }

    #[test]
    fn rejects_overlong_package_ids() {
        let id = "a".repeat(101);
        assert!(!is_valid_package_id(&id));
    }

    #[test]
    fn parses_full_semantic_versions() {
        let version = parse_version("1.2.3-beta.1").expect("parse");
        assert_eq!(normalize_version(&version), "1.2.3-beta.1");
    }

    #[test]
    fn pads_short_numeric_versions() {
        assert_eq!(
            normalize_version(&parse_version("1.0").expect("parse")),
            "1.0.0"
        );
        assert_eq!(normalize_version(&parse_version("2").expect("parse")), "2.0.0");
        assert_eq!(
            normalize_version(&parse_version("1.0-rc.1").expect("parse")),
            "1.0.0-rc.1"
        );
    }

    #[test]
    fn rejects_unparseable_versions() {
        for value in ["", "abc", "1.0.0.0", "1..0", "1.x"] {
            assert!(parse_version(value).is_none(), "{value} should not parse");
        }
    }
}
