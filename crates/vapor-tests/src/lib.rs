//! Shared helpers for the vapor integration suites.

use vapor_core::{ErrorKind, FsError, FsResult};
use vapor_fs::FileSystem;

/// Creates (or truncates) the file at `path` and writes `data` through a
/// descriptor.
pub fn write_file(fs: &FileSystem, path: &str, data: &[u8]) -> FsResult<()> {
    let fd = fs.open_str(path, "w", 0)?;
    fs.write_fd(fd, data, None)?;
    fs.close(fd)
}

/// Reads the whole file at `path`.
pub fn read_file(fs: &FileSystem, path: &str) -> FsResult<Vec<u8>> {
    let fd = fs.open_str(path, "r", 0)?;
    let size = fs.fstat(fd)?.size;
    let mut buf = vec![0u8; size as usize];
    let read = fs.read_fd(fd, &mut buf, Some(0))?;
    buf.truncate(read);
    fs.close(fd)?;
    Ok(buf)
}

/// Walks the tree depth-first and returns every path below the root.
pub fn walk(fs: &FileSystem) -> FsResult<Vec<String>> {
    fn visit(fs: &FileSystem, dir: &str, out: &mut Vec<String>) -> FsResult<()> {
        for name in fs.readdir(dir)? {
            let path = if dir == "/" {
                format!("/{name}")
            } else {
                format!("{dir}/{name}")
            };
            out.push(path.clone());
            if fs.readdir(&path).is_ok() {
                visit(fs, &path, out)?;
            }
        }
        Ok(())
    }
    let mut out = Vec::new();
    visit(fs, "/", &mut out)?;
    Ok(out)
}

/// Asserts that a result failed with the given error kind.
pub fn expect_kind<T: std::fmt::Debug>(result: Result<T, FsError>, kind: ErrorKind) {
    match result {
        Err(err) => assert_eq!(err.kind, kind, "unexpected error kind: {err}"),
        Ok(value) => panic!("expected {kind:?}, got Ok({value:?})"),
    }
}
