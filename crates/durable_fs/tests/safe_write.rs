use assert_matches::assert_matches;
use durable_fs::{
    equal, tee_hasher, CopyOptions, DirFs, ErrorKind, HookError, PostWriteHook, SafeWriteError,
    SafeWriteOptions,
};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;

fn checked(content: &'static [u8], expected_content: &[u8]) -> (impl std::io::Read, PostWriteHook) {
    tee_hasher::<Sha256, _>(content, Sha256::digest(expected_content).to_vec())
}

fn names(fs: &DirFs, path: impl AsRef<Path>) -> Vec<String> {
    fs.read_dir_names(path).unwrap()
}

#[test]
fn write_creates_parents() {
    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());

    SafeWriteOptions::default()
        .safe_write(&fs, "/foo/bar/baz", 0o644, &b"content"[..], &[])
        .unwrap();

    assert_eq!(
        fs_err::read(dir.path().join("foo/bar/baz")).unwrap(),
        b"content"
    );
    assert_eq!(names(&fs, "foo/bar"), ["baz"]);
}

#[test]
fn failed_write_keeps_previous_content() {
    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    let options = SafeWriteOptions::default();

    let (reader, hook) = checked(b"v1", b"v1");
    options.safe_write(&fs, "file", 0o644, reader, &[hook]).unwrap();

    let (reader, hook) = checked(b"v2 but corrupted", b"v2");
    let err = options
        .safe_write(&fs, "file", 0o644, reader, &[hook])
        .unwrap_err();
    assert_matches!(
        err,
        SafeWriteError::PostHook(_, HookError::ChecksumMismatch { .. })
    );

    assert_eq!(fs_err::read(dir.path().join("file")).unwrap(), b"v1");
    assert_eq!(names(&fs, ""), ["file"]);
}

#[test]
fn leftover_uses_default_naming() {
    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    let options = SafeWriteOptions::builder()
        .with_disable_remove_on_error(true)
        .build()
        .unwrap();

    let (reader, hook) = checked(b"wrong", b"right");
    options
        .safe_write(&fs, "foo/bar/baz", 0o644, reader, &[hook])
        .unwrap_err();

    let leftovers = names(&fs, "foo/bar");
    assert_eq!(leftovers.len(), 1);
    let leftover = &leftovers[0];
    assert!(leftover.starts_with("baz-"), "{leftover}");
    assert!(leftover.ends_with(".tmp"), "{leftover}");
    let digits = &leftover["baz-".len()..leftover.len() - ".tmp".len()];
    assert_eq!(digits.len(), 10);
    assert!(digits.chars().all(|c| c.is_ascii_digit()));
}

#[test]
fn dedicated_tmp_dir_has_no_default_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    let options = SafeWriteOptions::builder()
        .with_tmp_dir("tmp")
        .with_disable_remove_on_error(true)
        .build()
        .unwrap();

    let (reader, hook) = checked(b"wrong", b"right");
    options
        .safe_write(&fs, "foo/baz", 0o644, reader, &[hook])
        .unwrap_err();

    let leftovers = names(&fs, "tmp");
    assert_eq!(leftovers.len(), 1);
    assert!(leftovers[0].starts_with("baz-"));
    assert!(!leftovers[0].ends_with(".tmp"));
    assert!(!fs.exists("foo/baz").unwrap());
}

#[test]
fn cleanup_predicate_controls_removal() {
    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    let options = SafeWriteOptions::builder()
        .with_tmp_dir("tmp")
        .with_ignore_error_for_cleanup(|err| err.kind() == ErrorKind::ChecksumMismatch)
        .build()
        .unwrap();

    let (reader, hook) = checked(b"wrong", b"right");
    options
        .safe_write(&fs, "kept", 0o644, reader, &[hook])
        .unwrap_err();
    assert_eq!(names(&fs, "tmp").len(), 1);

    let failing_close = PostWriteHook::close(FailingClose);
    options
        .safe_write(&fs, "removed", 0o644, &b"x"[..], &[failing_close])
        .unwrap_err();
    assert_eq!(names(&fs, "tmp").len(), 1);
}

struct FailingClose;

impl durable_stream::Close for FailingClose {
    fn close(&mut self) -> std::io::Result<()> {
        Err(std::io::Error::other("close failed"))
    }
}

#[test]
fn clean_tmp_removes_only_temporaries() {
    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    let options = SafeWriteOptions::builder()
        .with_prefix_suffix("pre-", ".suf")
        .with_disable_remove_on_error(true)
        .build()
        .unwrap();

    options
        .safe_write(&fs, "a/keep", 0o644, &b"keep"[..], &[])
        .unwrap();
    fs_err::write(dir.path().join("a/pre-lookalike"), b"").unwrap();
    for destination in ["a/one", "a/b/two"] {
        let (reader, hook) = checked(b"wrong", b"right");
        options
            .safe_write(&fs, destination, 0o644, reader, &[hook])
            .unwrap_err();
    }
    assert_eq!(names(&fs, "a").len(), 4);

    options.clean_tmp(&fs).unwrap();

    assert_eq!(names(&fs, "a"), ["b", "keep", "pre-lookalike"]);
    assert!(names(&fs, "a/b").is_empty());
}

#[test]
fn clean_tmp_with_missing_tmp_dir() {
    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    let options = SafeWriteOptions::builder()
        .with_tmp_dir("does/not/exist")
        .build()
        .unwrap();
    options.clean_tmp(&fs).unwrap();
}

#[test]
fn non_random_leftover_blocks_until_cleaned() {
    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    let options = SafeWriteOptions::builder()
        .with_random_pattern("")
        .with_tmp_dir("tmp")
        .with_prefix_suffix("", ".part")
        .build()
        .unwrap();

    fs.create_dir_all("tmp").unwrap();
    let mut leftover = fs.create_file("tmp/file.part").unwrap();
    leftover.write_all(b"stale").unwrap();
    drop(leftover);

    let err = options
        .safe_write(&fs, "file", 0o644, &b"fresh"[..], &[])
        .unwrap_err();
    assert_matches!(err, SafeWriteError::PreHook(_, HookError::NotEmpty { size: 5, .. }));
    // The failed attempt removed the stale artifact, so the retry succeeds.
    options
        .safe_write(&fs, "file", 0o644, &b"fresh"[..], &[])
        .unwrap();
    assert_eq!(fs_err::read(dir.path().join("file")).unwrap(), b"fresh");
}

#[test]
fn disable_mkdir_requires_existing_directories() {
    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    let options = SafeWriteOptions::builder()
        .with_disable_mkdir(true)
        .build()
        .unwrap();

    let err = options
        .safe_write(&fs, "missing/file", 0o644, &b"x"[..], &[])
        .unwrap_err();
    assert_matches!(err, SafeWriteError::OpenTemp(_, ref io) if io.kind() == std::io::ErrorKind::NotFound);
    assert_eq!(err.kind(), ErrorKind::Filesystem);
}

#[test]
fn tree_write_is_equal_to_source() {
    let source_dir = tempfile::tempdir().unwrap();
    let source = DirFs::new(source_dir.path());
    fs_err::create_dir_all(source_dir.path().join("x/y")).unwrap();
    fs_err::write(source_dir.path().join("x/y/z"), b"deep").unwrap();
    fs_err::write(source_dir.path().join("top"), b"top").unwrap();

    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    let options = SafeWriteOptions::default();
    options
        .safe_write_tree(&fs, "published/tree", 0o755, &source, &[])
        .unwrap();

    let report = equal(&fs.sub("published/tree").unwrap(), &source, &CopyOptions::default()).unwrap();
    assert!(report.is_equal(), "{report}");
    assert_eq!(names(&fs, "published"), ["tree"]);
}

#[test]
fn tree_write_onto_non_empty_directory_fails_at_rename() {
    let source_dir = tempfile::tempdir().unwrap();
    let source = DirFs::new(source_dir.path());
    fs_err::write(source_dir.path().join("file"), b"new").unwrap();

    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    fs_err::create_dir_all(dir.path().join("tree")).unwrap();
    fs_err::write(dir.path().join("tree/old"), b"old").unwrap();

    let err = SafeWriteOptions::default()
        .safe_write_tree(&fs, "tree", 0o755, &source, &[])
        .unwrap_err();
    assert_matches!(err, SafeWriteError::Rename { .. });

    // A failed rename leaves the staged tree behind.
    let entries = names(&fs, "");
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|name| name.starts_with("tree-")));
    assert_eq!(names(&fs, "tree"), ["old"]);
}

#[cfg(unix)]
#[test]
fn forced_permissions() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    let options = SafeWriteOptions::builder()
        .with_force_permissions(true)
        .build()
        .unwrap();

    options
        .safe_write(&fs, "file", 0o604, &b"x"[..], &[])
        .unwrap();
    let mode = fs_err::metadata(dir.path().join("file")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o604);

    let source_dir = tempfile::tempdir().unwrap();
    options
        .safe_write_tree(&fs, "tree", 0o410, &DirFs::new(source_dir.path()), &[])
        .unwrap();
    let mode = fs_err::metadata(dir.path().join("tree")).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o710);
}

/// The bits the umask removes, observed by creating a file that asks for every bit.
#[cfg(unix)]
fn umask(fs: &DirFs) -> u32 {
    fs.create_new_file("umask-check", 0o777).unwrap();
    let mode = durable_fs::permission_bits(&fs.symlink_metadata("umask-check").unwrap());
    fs.remove_file("umask-check").unwrap();
    0o777 & !mode
}

#[cfg(unix)]
#[test]
fn requested_permissions_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    let umask = umask(&fs);

    SafeWriteOptions::default()
        .safe_write(&fs, "read-only", 0o444, &b"x"[..], &[])
        .unwrap();
    let mode = durable_fs::permission_bits(&fs.symlink_metadata("read-only").unwrap());
    assert_eq!(mode, 0o444 & !umask);
    assert_eq!(mode & 0o222, 0);
    assert_eq!(fs_err::read(dir.path().join("read-only")).unwrap(), b"x");
}

#[cfg(unix)]
#[test]
fn tree_permissions_respect_umask() {
    let dir = tempfile::tempdir().unwrap();
    let fs = DirFs::new(dir.path());
    let umask = umask(&fs);

    let source_dir = tempfile::tempdir().unwrap();
    SafeWriteOptions::default()
        .safe_write_tree(&fs, "tree", 0o777, &DirFs::new(source_dir.path()), &[])
        .unwrap();
    let mode = durable_fs::permission_bits(&fs.symlink_metadata("tree").unwrap());
    assert_eq!(mode, 0o777 & !umask);

    SafeWriteOptions::default()
        .safe_write_tree(&fs, "private", 0o400, &DirFs::new(source_dir.path()), &[])
        .unwrap();
    let mode = durable_fs::permission_bits(&fs.symlink_metadata("private").unwrap());
    assert_eq!(mode, 0o700 & !umask);
}
