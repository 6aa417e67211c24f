use std::{
    ffi::OsString,
    io,
    path::{Component, Path, PathBuf},
};

use log::debug;

/// Device node of partition `number` on `device`, the way `losetup` names it
pub(crate) fn partition_device(device: &Path, number: usize) -> PathBuf {
    let mut node = OsString::from(device.as_os_str());
    node.push(format!("p{number}"));

    PathBuf::from(node)
}

fn is_dir_in_root(root: &Path, path: &Path) -> bool {
    debug!("Checking if {} is in {}", path.display(), root.display());

    if let Ok(p) = path.canonicalize() {
        debug!("File can be canonicalized: {}", p.display());

        return p.starts_with(root);
    }

    if let Some(p) = path.parent() {
        is_dir_in_root(root, p)
    } else {
        false
    }
}

/// Resolves `path` as if `root` was the root directory, refusing anything
/// that ends up outside of it.
pub(crate) fn join_path(root: &Path, path: &Path) -> Result<PathBuf, io::Error> {
    let joined = if path.is_absolute() {
        let mut joined = root.to_path_buf();

        for part in path.components() {
            match part {
                Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
                Component::ParentDir => joined.push(".."),
                Component::Normal(c) => joined.push(c),
            }
        }

        joined
    } else {
        root.join(path)
    };

    debug!("Joined Path {}", joined.display());

    let canonical = match joined.canonicalize() {
        Ok(p) => p,
        Err(e) => {
            if e.kind() == io::ErrorKind::NotFound {
                debug!(
                    "File {} doesn't exist... Checking if its parent exists in the root dir",
                    joined.display()
                );

                if is_dir_in_root(root, &joined) {
                    debug!("File ancestors in chroot.. Returning");
                    return Ok(joined);
                }
            }

            return Err(e);
        }
    };

    debug!("Canonicalized Path {}", canonical.display());

    if !canonical.starts_with(root) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} isn't contained in {}", path.display(), root.display()),
        ));
    }

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use test_log::test;

    use super::partition_device;

    #[test]
    fn test_partition_device() {
        assert_eq!(
            partition_device(Path::new("/dev/loop3"), 1),
            PathBuf::from("/dev/loop3p1")
        );
        assert_eq!(
            partition_device(Path::new("/dev/loop12"), 5),
            PathBuf::from("/dev/loop12p5")
        );
    }
}

#[cfg(test)]
mod chroot_test {
    use std::{
        fs::{self, File},
        os,
        path::PathBuf,
    };

    use tempfile::TempDir;
    use test_log::test;

    use super::join_path;

    const ROOT_CANARY_DIR: &str = "canary";

    const ROOT_TEST_DIR: &str = "test";
    const TEST_CANARY_SUBDIR: &str = "canary";
    const TEST_TEST_SUBDIR: &str = "testdir";

    fn create_directories() -> (TempDir, PathBuf) {
        let root_dir = TempDir::new().unwrap();
        let root = root_dir.path().canonicalize().unwrap();

        fs::create_dir(root.join(ROOT_CANARY_DIR)).unwrap();
        let canary = root.join(ROOT_CANARY_DIR);
        File::create(canary.join("canary-test-file.txt")).unwrap();

        fs::create_dir(root.join(ROOT_TEST_DIR)).unwrap();
        let test = root.join(ROOT_TEST_DIR);

        File::create(root.join("root-test-file.txt")).unwrap();

        os::unix::fs::symlink(root.join(ROOT_CANARY_DIR), test.join(TEST_CANARY_SUBDIR)).unwrap();
        File::create(test.join("u-boot.bin")).unwrap();
        fs::create_dir(test.join(TEST_TEST_SUBDIR)).unwrap();

        let test_dir = test.join(TEST_TEST_SUBDIR);
        File::create(test_dir.join("u-boot.bin")).unwrap();

        (root_dir, test)
    }

    #[test]
    fn test_absolute_file() {
        let (_dir, root) = create_directories();

        assert_eq!(
            join_path(&root, &PathBuf::from("/u-boot.bin")).unwrap(),
            root.join("u-boot.bin")
        );
    }

    #[test]
    fn test_absolute_file_missing() {
        let (_dir, root) = create_directories();

        assert_eq!(
            join_path(&root, &PathBuf::from("/not-there.txt")).unwrap(),
            root.join("not-there.txt")
        );
    }

    #[test]
    fn test_absolute_file_dir_missing() {
        let (_dir, root) = create_directories();

        assert_eq!(
            join_path(&root, &PathBuf::from("/boot/not-there.txt")).unwrap(),
            root.join("boot/not-there.txt")
        );
    }

    #[test]
    fn test_absolute_file_outside_missing() {
        let (_dir, root) = create_directories();

        join_path(&root, &PathBuf::from("/testdir/../../../not-there.txt")).unwrap_err();
    }

    #[test]
    fn test_absolute_file_outside_symlink() {
        let (_dir, root) = create_directories();

        join_path(&root, &PathBuf::from("/canary/not-there.txt")).unwrap_err();
    }

    #[test]
    fn test_relative_dir_file() {
        let (_dir, root) = create_directories();

        assert_eq!(
            join_path(&root, &PathBuf::from("testdir/u-boot.bin")).unwrap(),
            root.join("testdir/u-boot.bin")
        );
    }

    #[test]
    fn test_relative_file_outside() {
        let (_dir, root) = create_directories();

        join_path(&root, &PathBuf::from("../root-test-file.txt")).unwrap_err();
    }

    #[test]
    fn test_relative_file_symlink() {
        let (_dir, root) = create_directories();

        join_path(&root, &PathBuf::from("canary/canary-test-file.txt")).unwrap_err();
    }
}
