/// Remote filesystem browser — one level at a time.
///
/// [`expand`] lists a single directory and returns only its direct
/// children, in the order the device listed them. Deeper levels are
/// fetched lazily by expanding each child when asked to.
use crate::error::DeviceError;
use crate::model::FsEntry;
use crate::session::DeviceLink;
use tracing::debug;

pub use crate::model::{join_device_path, normalize_device_path};

/// List the direct children of `path` on the device.
///
/// `path` may use `\` separators; it is normalised before it reaches the
/// native side. The native tree is released before this returns.
pub fn expand(link: &DeviceLink, path: &str) -> Result<Vec<FsEntry>, DeviceError> {
    let path = normalize_device_path(path);
    let root = link.adapter().list_directory(link.handle(), &path, 1)?;
    let children = root.children.unwrap_or_default();
    debug!("Expanded {path}: {} entries", children.len());
    Ok(children)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FileKind;
    use crate::native::{FakeNative, FakeTree, NativeAdapter};
    use crate::session::{DeviceSession, SessionId};
    use std::sync::Arc;

    fn session(fake: &Arc<FakeNative>) -> DeviceSession {
        DeviceSession::create(&NativeAdapter::new(fake.clone()), SessionId(1)).unwrap()
    }

    #[test]
    fn root_expansion_returns_direct_children_in_order() {
        let fake = Arc::new(FakeNative::new());
        fake.set_tree(
            "/",
            FakeTree::dir(
                "/",
                vec![
                    FakeTree::dir("A", vec![FakeTree::file("nested.txt", 3)]),
                    FakeTree::file("B", 10),
                ],
            ),
        );
        let session = session(&fake);

        let entries = expand(session.link(), "/").unwrap();
        let names: Vec<_> = entries.iter().map(FsEntry::name).collect();
        assert_eq!(names, ["A", "B"]);
        assert_eq!(entries[0].kind, FileKind::Directory);
        assert_eq!(entries[0].path, "/A");
        assert!(entries[0].is_expandable());
        assert!(entries[0].children.is_none());
        assert_eq!(entries[1].kind, FileKind::File);
        assert_eq!(entries[1].size, 10);
        assert_eq!(fake.trees_released(), 1);
        assert_eq!(fake.live_buffers(), 0);
    }

    #[test]
    fn backslash_paths_reach_native_side_forward_slashed() {
        let fake = Arc::new(FakeNative::new());
        fake.set_tree("/DCIM/100APPLE", FakeTree::dir("100APPLE", Vec::new()));
        let session = session(&fake);

        expand(session.link(), "\\DCIM\\100APPLE\\").unwrap();
        assert_eq!(fake.listed_paths(), ["/DCIM/100APPLE"]);
    }

    #[test]
    fn listing_failure_is_io_error_and_error_buffer_released() {
        let fake = Arc::new(FakeNative::new());
        fake.fail_listing("/private", "permission denied");
        let session = session(&fake);

        let err = expand(session.link(), "/private").unwrap_err();
        assert_eq!(err, DeviceError::Io("permission denied".into()));
        assert_eq!(fake.strings_released(), 1);
        assert_eq!(fake.live_buffers(), 0);
    }

    #[test]
    fn broken_children_array_is_decode_error_and_tree_released() {
        let fake = Arc::new(FakeNative::new());
        fake.set_broken_listing("/Broken");
        let session = session(&fake);

        let err = expand(session.link(), "/Broken").unwrap_err();
        assert!(matches!(err, DeviceError::Decode(_)));
        assert_eq!(fake.trees_released(), 1);
        assert_eq!(fake.live_buffers(), 0);
    }

    #[test]
    fn null_child_pointer_is_decode_error_and_tree_released() {
        let fake = Arc::new(FakeNative::new());
        fake.set_null_child_listing("/Media", FakeTree::dir("Media", vec![FakeTree::file("a", 1)]));
        let session = session(&fake);

        let err = expand(session.link(), "/Media").unwrap_err();
        assert_eq!(err, DeviceError::Decode("null child pointer under /Media".into()));
        assert_eq!(fake.trees_released(), 1);
        assert_eq!(fake.live_buffers(), 0);
        assert_eq!(fake.double_releases(), 0);
    }

    #[test]
    fn nul_in_path_never_reaches_native_side() {
        let fake = Arc::new(FakeNative::new());
        let session = session(&fake);

        let err = expand(session.link(), "/a\0b").unwrap_err();
        assert!(matches!(err, DeviceError::Decode(_)));
        assert!(fake.listed_paths().is_empty());
    }
}
