//! End-to-end behaviour of the path layer over the in-memory store.

use gridfuse::cadapter::client::PoolConfig;
use gridfuse::cadapter::{
    ConnectionPool, Connector, Credentials, FileRecord, MemoryStore, StoreClient,
};
use gridfuse::chuck::ChunkLayout;
use gridfuse::meta::xattr::XattrReply;
use gridfuse::meta::{FileKind, S_IFDIR};
use gridfuse::vfs::{Caller, FsError, GridFs, GridOps};

const ME: Caller = Caller { uid: 0, gid: 0 };

fn mount(store: &MemoryStore, chunk_size: u64) -> GridFs<MemoryStore> {
    let pool = ConnectionPool::new(store.clone(), None, PoolConfig::default());
    GridFs::new(pool, ChunkLayout::new(chunk_size))
}

async fn seed(store: &MemoryStore, name: &str, mode: Option<u32>) {
    let mut client = store.connect(None).await.unwrap();
    let mut record = FileRecord::new(name);
    record.mode = mode;
    client.insert(record).await.unwrap();
}

fn names(entries: &[gridfuse::vfs::DirEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

#[tokio::test]
async fn large_file_commits_in_default_chunks() {
    let store = MemoryStore::new();
    let fs = mount(&store, 256 * 1024);
    let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();

    let fh = fs.create(ME, "/a/b.txt", 0o644).await.unwrap();
    assert_eq!(fs.write("/a/b.txt", &data, 0).await.unwrap(), data.len());
    fs.flush("/a/b.txt", fh).await.unwrap();
    fs.release("/a/b.txt", fh).await.unwrap();

    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].filename, "a/b.txt");
    assert_eq!(records[0].length, 300_000);
    assert_eq!(records[0].chunk_size, 262_144);
    assert_eq!(store.chunk_lengths(records[0].id), vec![262_144, 37_856]);

    let back = fs.read("/a/b.txt", 0, 400_000).await.unwrap();
    assert_eq!(back, data);
    let tail = fs.read("/a/b.txt", 262_000, 1_000).await.unwrap();
    assert_eq!(tail, &data[262_000..263_000]);
}

#[tokio::test]
async fn readdir_lists_root_children_and_implied_dirs() {
    let store = MemoryStore::new();
    seed(&store, "x", None).await;
    seed(&store, "a/y", None).await;
    seed(&store, "a/z", None).await;
    let fs = mount(&store, 1024);

    let root = fs.readdir("/").await.unwrap();
    assert_eq!(names(&root), vec![".", "..", "x", "a"]);
    assert_eq!(root[3].kind, FileKind::Directory);

    let sub = fs.readdir("/a").await.unwrap();
    assert_eq!(names(&sub), vec![".", "..", "y", "z"]);

    let st = fs.getattr(ME, "/a").await.unwrap();
    assert_eq!(st.kind(), FileKind::Directory);
}

#[tokio::test]
async fn readdir_suppresses_duplicate_names_and_lists_buffered() {
    let store = MemoryStore::new();
    seed(&store, "dup", None).await;
    seed(&store, "dup", None).await;
    let fs = mount(&store, 1024);
    fs.create(ME, "/fresh", 0o644).await.unwrap();

    let root = fs.readdir("/").await.unwrap();
    assert_eq!(names(&root), vec![".", "..", "dup", "fresh"]);
}

#[tokio::test]
async fn symlink_readlink_truncation() {
    let store = MemoryStore::new();
    let fs = mount(&store, 1024);
    fs.symlink(ME, "target/path", "/ln").await.unwrap();

    let full = fs.readlink("/ln", 64).await.unwrap();
    assert_eq!(full.len(), 64);
    assert_eq!(&full[..11], b"target/path");
    assert!(full[11..].iter().all(|b| *b == 0));

    let cut = fs.readlink("/ln", 4).await.unwrap();
    assert_eq!(cut, b"targ");

    let st = fs.getattr(ME, "/ln").await.unwrap();
    assert_eq!(st.kind(), FileKind::Symlink);
    assert_eq!(st.size, 11);

    assert!(matches!(
        fs.readlink("/missing", 64).await,
        Err(FsError::NotFound)
    ));
    seed(&store, "plain", None).await;
    assert!(matches!(
        fs.readlink("/plain", 64).await,
        Err(FsError::NotFound)
    ));
}

#[tokio::test]
async fn rename_keeps_record_identity() {
    let store = MemoryStore::new();
    let mut client = store.connect(None).await.unwrap();
    let original = client.store_file("old", b"payload", 4).await.unwrap();
    let fs = mount(&store, 1024);

    fs.rename("/old", "/new").await.unwrap();
    let records = store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, original.id);
    assert_eq!(records[0].filename, "new");
    assert_eq!(records[0].length, original.length);
    assert_eq!(records[0].md5, original.md5);
    assert_eq!(fs.read("/new", 0, 64).await.unwrap(), b"payload");

    assert!(matches!(
        fs.rename("/nonexistent", "/x").await,
        Err(FsError::NotFound)
    ));
}

#[tokio::test]
async fn xattr_lifecycle() {
    let store = MemoryStore::new();
    seed(&store, "f", None).await;
    let fs = mount(&store, 1024);

    fs.setxattr("/f", "user.color", b"blue").await.unwrap();
    assert_eq!(
        fs.getxattr("/f", "user.color", 0).await.unwrap(),
        XattrReply::Size(4)
    );
    assert_eq!(
        fs.getxattr("/f", "user.color", 64).await.unwrap(),
        XattrReply::Data(b"blue".to_vec())
    );
    assert!(matches!(
        fs.getxattr("/f", "user.color", 2).await,
        Err(FsError::Range)
    ));
    assert_eq!(
        fs.listxattr("/f", 64).await.unwrap(),
        XattrReply::Data(b"user.color\0".to_vec())
    );

    fs.removexattr("/f", "user.color").await.unwrap();
    assert!(matches!(
        fs.getxattr("/f", "user.color", 64).await,
        Err(FsError::NoAttribute)
    ));
    assert_eq!(fs.listxattr("/f", 0).await.unwrap(), XattrReply::Size(0));

    // outside our namespace, on the root and on the missing
    assert!(matches!(
        fs.getxattr("/f", "security.selinux", 64).await,
        Err(FsError::NoAttribute)
    ));
    assert!(matches!(
        fs.getxattr("/", "user.color", 64).await,
        Err(FsError::NoAttribute)
    ));
    assert!(matches!(
        fs.setxattr("/ghost", "user.k", b"v").await,
        Err(FsError::NotFound)
    ));
}

#[tokio::test]
async fn binary_xattr_value_is_refused_not_mangled() {
    let store = MemoryStore::new();
    seed(&store, "f", None).await;
    let fs = mount(&store, 1024);

    fs.setxattr("/f", "user.bin", b"text").await.unwrap();
    let err = fs
        .setxattr("/f", "user.bin", &[255, 0, 254, 128])
        .await
        .unwrap_err();
    assert_eq!(err.errno(), libc::EINVAL);
    assert_eq!(
        fs.getxattr("/f", "user.bin", 64).await.unwrap(),
        XattrReply::Data(b"text".to_vec())
    );
    // NUL bytes are valid UTF-8 and survive
    fs.setxattr("/f", "user.nul", b"a\0b").await.unwrap();
    assert_eq!(
        fs.getxattr("/f", "user.nul", 64).await.unwrap(),
        XattrReply::Data(b"a\0b".to_vec())
    );
}

#[tokio::test]
async fn xattr_on_buffered_file_is_no_attribute() {
    let store = MemoryStore::new();
    let fs = mount(&store, 1024);
    fs.create(ME, "/tmp.bin", 0o644).await.unwrap();
    for res in [
        fs.setxattr("/tmp.bin", "user.k", b"v").await.err(),
        fs.removexattr("/tmp.bin", "user.k").await.err(),
    ] {
        assert!(matches!(res, Some(FsError::NoAttribute)));
    }
    assert!(matches!(
        fs.getxattr("/tmp.bin", "user.k", 0).await,
        Err(FsError::NoAttribute)
    ));
    assert!(matches!(
        fs.listxattr("/tmp.bin", 0).await,
        Err(FsError::NoAttribute)
    ));
}

#[tokio::test]
async fn clean_flush_does_not_store_again() {
    let store = MemoryStore::new();
    let fs = mount(&store, 1024);
    let fh = fs.create(ME, "/once", 0o644).await.unwrap();
    fs.write("/once", b"data", 0).await.unwrap();
    fs.flush("/once", fh).await.unwrap();
    fs.flush("/once", fh).await.unwrap();
    assert_eq!(store.store_count(), 1);
}

#[tokio::test]
async fn empty_created_file_is_committed() {
    let store = MemoryStore::new();
    let fs = mount(&store, 1024);
    let fh = fs.create(ME, "/empty", 0o600).await.unwrap();
    fs.flush("/empty", fh).await.unwrap();
    fs.release("/empty", fh).await.unwrap();

    let st = fs.getattr(ME, "/empty").await.unwrap();
    assert_eq!(st.size, 0);
    assert_eq!(st.mode, 0o100600);
}

#[tokio::test]
async fn directory_link_count_counts_subdirectories() {
    let store = MemoryStore::new();
    seed(&store, "d", Some(S_IFDIR | 0o755)).await;
    seed(&store, "d/s1", Some(S_IFDIR | 0o755)).await;
    seed(&store, "d/s2", Some(S_IFDIR | 0o700)).await;
    seed(&store, "d/file", None).await;
    seed(&store, "d/s1/deep", Some(S_IFDIR | 0o755)).await;
    let fs = mount(&store, 1024);

    let st = fs.getattr(ME, "/d").await.unwrap();
    assert_eq!(st.nlink, 4);
    let root = fs.getattr(ME, "/").await.unwrap();
    assert_eq!(root.mode, S_IFDIR | 0o777);
    assert_eq!(root.nlink, 2);
}

#[tokio::test]
async fn mkdir_then_rmdir() {
    let store = MemoryStore::new();
    let fs = mount(&store, 1024);
    fs.mkdir(ME, "/docs", 0o750).await.unwrap();
    let st = fs.getattr(ME, "/docs").await.unwrap();
    assert_eq!(st.mode, S_IFDIR | 0o750);
    fs.rmdir("/docs").await.unwrap();
    assert!(matches!(
        fs.getattr(ME, "/docs").await,
        Err(FsError::NotFound)
    ));
    // removing again is not an error
    fs.rmdir("/docs").await.unwrap();
    fs.unlink("/never-there").await.unwrap();
}

#[tokio::test]
async fn error_taxonomy() {
    let store = MemoryStore::new();
    seed(&store, "ro", None).await;
    let fs = mount(&store, 1024);

    assert!(matches!(
        fs.write("/not-open", b"x", 0).await,
        Err(FsError::NotFound)
    ));
    assert!(matches!(
        fs.read("/no-record", 0, 10).await,
        Err(FsError::BadDescriptor)
    ));
    assert!(matches!(
        fs.open("/ro", libc::O_WRONLY as u32).await,
        Err(FsError::AccessDenied)
    ));
    assert!(matches!(
        fs.open("/ro", libc::O_RDWR as u32).await,
        Err(FsError::AccessDenied)
    ));
    assert_eq!(fs.open("/ro", libc::O_RDONLY as u32).await.unwrap(), 0);
    assert!(matches!(
        fs.open("/nope", libc::O_RDONLY as u32).await,
        Err(FsError::NotFound)
    ));
    assert!(matches!(
        fs.getattr(ME, "/nope").await,
        Err(FsError::NotFound)
    ));
}

#[tokio::test]
async fn store_outage_maps_to_io_error() {
    let store = MemoryStore::new();
    store.set_offline(true);
    let pool = ConnectionPool::new(
        store.clone(),
        None,
        PoolConfig { capacity: 2 },
    );
    let fs = GridFs::new(pool, ChunkLayout::new(1024));

    let err = fs.getattr(ME, "/anything").await.unwrap_err();
    assert_eq!(err.errno(), libc::EIO);
    assert!(matches!(err, FsError::Gateway(_)));
    // one attempt, no retry
    assert_eq!(store.connect_attempts(), 1);
    // the failed checkout did not leak capacity
    assert_eq!(fs.pool().available(), 2);

    store.set_offline(false);
    assert!(matches!(
        fs.getattr(ME, "/anything").await,
        Err(FsError::NotFound)
    ));
}

#[tokio::test]
async fn bad_credentials_surface_as_io_error() {
    let store = MemoryStore::new().with_user("alice", "secret");
    let pool = ConnectionPool::new(
        store.clone(),
        Some(Credentials {
            username: "alice".into(),
            password: "guess".into(),
        }),
        PoolConfig::default(),
    );
    let fs = GridFs::new(pool, ChunkLayout::new(1024));
    let err = fs.readdir("/").await.unwrap_err();
    assert_eq!(err.errno(), libc::EIO);
}

#[tokio::test]
async fn pool_stays_usable_after_failing_operations() {
    let store = MemoryStore::new();
    let pool = ConnectionPool::new(
        store.clone(),
        None,
        PoolConfig { capacity: 1 },
    );
    let fs = GridFs::new(pool, ChunkLayout::new(1024));

    for _ in 0..5 {
        assert!(fs.rename("/missing", "/x").await.is_err());
        assert!(fs.getxattr("/missing", "user.k", 0).await.is_err());
    }
    seed(&store, "present", None).await;
    fs.getattr(ME, "/present").await.unwrap();
    assert_eq!(store.connect_count(), 2);
}

#[tokio::test]
async fn writes_during_buffering_are_visible_through_getattr() {
    let store = MemoryStore::new();
    let fs = mount(&store, 4);
    fs.create(ME, "/grow", 0o644).await.unwrap();
    fs.write("/grow", b"abcdef", 10).await.unwrap();

    let st = fs.getattr(ME, "/grow").await.unwrap();
    assert_eq!(st.size, 16);
    assert_eq!(st.nlink, 1);
    let head = fs.read("/grow", 0, 12).await.unwrap();
    assert_eq!(&head[..10], &[0u8; 10]);
    assert_eq!(&head[10..], b"ab");
}
