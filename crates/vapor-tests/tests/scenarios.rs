//! End-to-end walks through the public operation surface.

use vapor_core::{ErrorKind, BLOCK_SIZE};
use vapor_fs::FileSystem;
use vapor_tests::{expect_kind, read_file, write_file};

#[test]
fn test_mkdir_then_readdir() {
    let fs = FileSystem::new();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();
    assert_eq!(fs.readdir("/a").unwrap(), vec!["b"]);
    assert_eq!(fs.readdir("/").unwrap(), vec!["a"]);
}

#[test]
fn test_hard_link_mirrors_content_and_survives_unlink() {
    let fs = FileSystem::new();
    write_file(&fs, "/x", b"hi").unwrap();
    fs.link("/x", "/y").unwrap();

    assert_eq!(read_file(&fs, "/y").unwrap(), b"hi");
    assert_eq!(fs.stat("/x").unwrap().nlink, 2);
    assert_eq!(fs.stat("/x").unwrap().ino, fs.stat("/y").unwrap().ino);

    fs.unlink("/x").unwrap();
    assert_eq!(fs.stat("/y").unwrap().nlink, 1);
    assert_eq!(read_file(&fs, "/y").unwrap(), b"hi");
    expect_kind(fs.stat("/x"), ErrorKind::NoEnt);
}

#[test]
fn test_writes_through_one_link_show_through_the_other() {
    let fs = FileSystem::new();
    write_file(&fs, "/x", b"before").unwrap();
    fs.link("/x", "/y").unwrap();

    let fd = fs.open_str("/y", "a", 0).unwrap();
    fs.write_fd(fd, b"+after", None).unwrap();
    fs.close(fd).unwrap();
    assert_eq!(read_file(&fs, "/x").unwrap(), b"before+after");
}

#[test]
fn test_rename_replaces_file() {
    let fs = FileSystem::new();
    write_file(&fs, "/a", b"A").unwrap();
    write_file(&fs, "/b", b"B").unwrap();

    fs.rename("/a", "/b").unwrap();
    assert_eq!(read_file(&fs, "/b").unwrap(), b"A");
    expect_kind(fs.stat("/a"), ErrorKind::NoEnt);
    assert_eq!(fs.readdir("/").unwrap(), vec!["b"]);
}

#[test]
fn test_rename_over_non_empty_directory_fails() {
    let fs = FileSystem::new();
    fs.mkdir("/d1").unwrap();
    fs.mkdir("/d2").unwrap();
    fs.mkdir("/d2/x").unwrap();

    expect_kind(fs.rename("/d1", "/d2"), ErrorKind::NotEmpty);
    // Both trees are untouched after the failure.
    assert!(fs.lookup("/d1").is_ok());
    assert_eq!(fs.readdir("/d2").unwrap(), vec!["x"]);
}

#[test]
fn test_exclusive_open_collides_with_existing() {
    let fs = FileSystem::new();
    write_file(&fs, "/f", b"").unwrap();
    expect_kind(fs.open_str("/f", "wx", 0), ErrorKind::Exist);
}

#[test]
fn test_truncate_large_file_and_reread() {
    let fs = FileSystem::new();
    let three_mib = 3 * BLOCK_SIZE;
    write_file(&fs, "/big", &vec![0xabu8; three_mib]).unwrap();
    assert_eq!(fs.stat("/big").unwrap().size, three_mib as u64);

    let half = 3 * BLOCK_SIZE as u64 / 2;
    fs.truncate("/big", half).unwrap();
    assert_eq!(fs.stat("/big").unwrap().size, 1_572_864);

    let contents = read_file(&fs, "/big").unwrap();
    assert_eq!(contents.len(), 1_572_864);
    assert!(contents.iter().all(|&b| b == 0xab));
}

#[test]
fn test_xattr_round_trip() {
    let fs = FileSystem::new();
    write_file(&fs, "/f", b"").unwrap();

    fs.setxattr("/f", "user.k", b"v").unwrap();
    assert_eq!(fs.listxattr("/f").unwrap(), vec!["user.k"]);
    assert_eq!(fs.getxattr("/f", "user.k").unwrap(), Some(b"v".to_vec()));

    fs.removexattr("/f", "user.k").unwrap();
    assert_eq!(fs.listxattr("/f").unwrap(), Vec::<String>::new());
}

#[test]
fn test_hard_linked_entries_keep_separate_xattrs() {
    let fs = FileSystem::new();
    write_file(&fs, "/x", b"shared").unwrap();
    fs.link("/x", "/y").unwrap();

    fs.setxattr("/x", "user.origin", b"x-side").unwrap();
    assert_eq!(fs.getxattr("/y", "user.origin").unwrap(), None);
    assert_eq!(fs.listxattr("/y").unwrap(), Vec::<String>::new());
}

#[test]
fn test_deep_paths_resolve_through_intermediate_dirs() {
    let fs = FileSystem::new();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();
    fs.mkdir("/a/b/c").unwrap();
    write_file(&fs, "/a/b/c/leaf", b"deep").unwrap();

    assert_eq!(read_file(&fs, "/a/b/c/leaf").unwrap(), b"deep");
    expect_kind(fs.lookup("/a/missing/leaf"), ErrorKind::NoEnt);
    expect_kind(fs.lookup("/a/b/c/leaf/below"), ErrorKind::NotDir);
}

#[test]
fn test_directory_stat_shape() {
    let fs = FileSystem::new();
    fs.mkdir("/d").unwrap();
    let stat = fs.stat("/d").unwrap();
    assert_eq!(stat.size, 512);
    assert_eq!(stat.blocks, 1);
    assert_eq!(stat.nlink, 1);
    assert_eq!((stat.dev, stat.rdev), (0, 0));
}

#[test]
fn test_append_descriptor_tracks_growth() {
    let fs = FileSystem::new();
    write_file(&fs, "/log", b"one\n").unwrap();

    let fd = fs.open_str("/log", "a", 0).unwrap();
    fs.write_fd(fd, b"two\n", None).unwrap();
    fs.write_fd(fd, b"three\n", None).unwrap();
    fs.close(fd).unwrap();

    assert_eq!(read_file(&fs, "/log").unwrap(), b"one\ntwo\nthree\n");
}
