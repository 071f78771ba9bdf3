/// Device-side path handling.
///
/// The device only understands absolute `/`-separated paths. Paths coming
/// from a desktop tree widget may use `\` and carry stray separators.

/// Normalise a path for the device.
///
/// - `\` becomes `/`
/// - runs of separators collapse to one
/// - a leading `/` is ensured and a trailing one trimmed
/// - an empty path is the root `/`
pub fn normalize_device_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in path.split(['/', '\\']).filter(|s| !s.is_empty()) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Join a native child name onto its parent's device path.
pub fn join_device_path(parent: &str, name: &str) -> String {
    if name.starts_with('/') || name.starts_with('\\') {
        return normalize_device_path(name);
    }
    normalize_device_path(&format!("{parent}/{name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backslashes_become_forward_slashes() {
        assert_eq!(normalize_device_path("\\DCIM\\100APPLE"), "/DCIM/100APPLE");
        assert_eq!(normalize_device_path("/\\DCIM"), "/DCIM");
        assert!(!normalize_device_path("a\\b\\\\c").contains('\\'));
    }

    #[test]
    fn separators_collapse_and_root_is_kept() {
        assert_eq!(normalize_device_path(""), "/");
        assert_eq!(normalize_device_path("/"), "/");
        assert_eq!(normalize_device_path("\\"), "/");
        assert_eq!(normalize_device_path("//DCIM//103APPLE/"), "/DCIM/103APPLE");
        assert_eq!(normalize_device_path("DCIM"), "/DCIM");
    }

    #[test]
    fn normalisation_is_idempotent() {
        for p in ["", "/", "\\a\\b", "//x//y//", "Media/DCIM"] {
            let once = normalize_device_path(p);
            assert_eq!(normalize_device_path(&once), once);
        }
    }

    #[test]
    fn join_uses_parent_unless_name_is_absolute() {
        assert_eq!(join_device_path("/", "DCIM"), "/DCIM");
        assert_eq!(join_device_path("/DCIM", "IMG_0001.JPG"), "/DCIM/IMG_0001.JPG");
        assert_eq!(join_device_path("/DCIM", "/Books"), "/Books");
    }
}
