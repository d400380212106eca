//! Working copy integration tests
//!
//! These drive the public API only: a checkout is built through the BASE
//! operations, then modified the way a client would.

use dsvn_wc::node::{self, NodeStatus};
use dsvn_wc::{BaseNode, CopyOrigin, Depth, Kind, Status, WcDb, WcError, workqueue};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ROOT_URL: &str = "svn://example.org/repo";
const UUID: &str = "0d1f4e3a-9b8c-4a2e-b7f6-5c4d3e2f1a0b";

fn base(relpath: &str) -> BaseNode {
    BaseNode::new(relpath, ROOT_URL, UUID, 3)
}

fn file(db: &WcDb, abspath: &Path, relpath: &str, contents: &[u8]) {
    fs::write(abspath, contents).unwrap();
    let (sha1, _) = db.pristine_install_contents(abspath, contents).unwrap();
    db.base_add_file(abspath, &base(relpath), &sha1, Some(contents.len() as i64), &[]).unwrap();
}

/// `trunk` at r3 with `src/main.c`, `src/util.c` and `README`
fn checkout() -> (TempDir, WcDb, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("wc");
    let db = WcDb::new();
    db.init(&root, "trunk", ROOT_URL, UUID, 0, Depth::Infinity).unwrap();
    db.base_add_directory(&root, &base("trunk"), &["src".into(), "README".into()], Depth::Infinity, &[])
        .unwrap();
    fs::create_dir(root.join("src")).unwrap();
    db.base_add_directory(&root.join("src"), &base("trunk/src"), &["main.c".into(), "util.c".into()], Depth::Infinity, &[])
        .unwrap();
    file(&db, &root.join("src/main.c"), "trunk/src/main.c", b"int main(void) { return 0; }\n");
    file(&db, &root.join("src/util.c"), "trunk/src/util.c", b"void util(void) {}\n");
    file(&db, &root.join("README"), "trunk/README", b"read me\n");
    (tmp, db, root)
}

fn origin(relpath: &str) -> CopyOrigin {
    CopyOrigin { repos_relpath: relpath.into(), root_url: ROOT_URL.into(), uuid: UUID.into(), revision: 3 }
}

#[test]
fn test_chained_copies_keep_first_origin() {
    let (_tmp, db, root) = checkout();
    db.op_copy(&root.join("src"), &root.join("b"), &[]).unwrap();
    db.op_copy(&root.join("b"), &root.join("c"), &[]).unwrap();
    db.op_copy(&root.join("c"), &root.join("d"), &[]).unwrap();

    for name in ["b", "c", "d"] {
        let info = db.read_info(&root.join(name)).unwrap();
        assert_eq!(info.original, Some(origin("trunk/src")), "origin of {}", name);
        let child = db.scan_addition(&root.join(name).join("util.c")).unwrap();
        assert_eq!(child.status, Status::Copied);
        assert_eq!(child.op_root_abspath, root.join(name));
        assert_eq!(child.repos_relpath, format!("trunk/{}/util.c", name));
    }
    // Children of a copied directory inherit the origin instead of storing one.
    assert_eq!(db.read_info(&root.join("d/main.c")).unwrap().original, None);
}

#[test]
fn test_copy_of_copied_child_elides_when_it_follows_the_parent() {
    let (_tmp, db, root) = checkout();
    db.op_copy(&root.join("src"), &root.join("lib"), &[]).unwrap();
    db.op_copy(&root.join("src/util.c"), &root.join("lib/extra.c"), &[]).unwrap();

    // `lib/extra.c` comes from trunk/src/util.c, not trunk/src/extra.c
    assert!(!db.temp_elide_copyfrom(&root.join("lib/extra.c")).unwrap());
    assert_eq!(db.read_info(&root.join("lib/extra.c")).unwrap().original, Some(origin("trunk/src/util.c")));
}

#[test]
fn test_delete_status_and_revert() {
    let (_tmp, db, root) = checkout();
    let main_c = root.join("src/main.c");

    node::delete(&db, &main_c, false).unwrap();
    assert!(!main_c.exists());
    assert_eq!(node::node_status(&db, &main_c).unwrap(), NodeStatus::Deleted);
    let deletion = db.scan_deletion(&main_c).unwrap();
    assert_eq!(deletion.base_del_abspath.as_deref(), Some(main_c.as_path()));

    db.op_revert(&main_c).unwrap();
    db.wq_add(
        &main_c,
        &[workqueue::WorkItem::FileInstall {
            local_abspath: main_c.clone(),
            source_abspath: None,
            use_commit_times: false,
            record_fileinfo: true,
        }],
    )
    .unwrap();
    workqueue::run(&db, &root, None).unwrap();
    assert_eq!(node::node_status(&db, &main_c).unwrap(), NodeStatus::Normal);
    assert_eq!(fs::read(&main_c).unwrap(), b"int main(void) { return 0; }\n");
}

#[test]
fn test_add_commit_cycle() {
    let (_tmp, db, root) = checkout();
    let docs = root.join("docs");
    fs::create_dir(&docs).unwrap();
    fs::write(docs.join("guide.txt"), b"guide\n").unwrap();
    node::add(&db, &docs).unwrap();
    node::add(&db, &docs.join("guide.txt")).unwrap();
    assert_eq!(node::node_status(&db, &docs.join("guide.txt")).unwrap(), NodeStatus::Added);
    assert_eq!(
        node::node_url(&db, &docs.join("guide.txt")).unwrap().as_deref(),
        Some("svn://example.org/repo/trunk/docs/guide.txt")
    );

    let (sha1, _) = db.pristine_install_contents(&root, b"guide\n").unwrap();
    db.global_commit(&docs, 4, None, Some("jrandom"), None, false, &[]).unwrap();
    db.global_commit(&docs.join("guide.txt"), 4, None, Some("jrandom"), Some(&sha1), false, &[]).unwrap();

    let info = db.read_info(&docs.join("guide.txt")).unwrap();
    assert_eq!(info.status, Status::Normal);
    assert_eq!(info.revision, Some(4));
    assert_eq!(info.repos_relpath.as_deref(), Some("trunk/docs/guide.txt"));
    assert_eq!(node::node_status(&db, &docs.join("guide.txt")).unwrap(), NodeStatus::Normal);
}

#[test]
fn test_write_locks_are_exclusive_across_handles() {
    let (_tmp, db, root) = checkout();
    let other = WcDb::new();

    let guard = db.acquire_write_lock(&root, -1).unwrap();
    assert!(db.own_lock(&root.join("src")).unwrap());
    assert!(matches!(other.wclock_set(&root.join("src"), 0), Err(WcError::Locked(_))));
    assert!(other.wclocked(&root).unwrap());
    assert!(!other.own_lock(&root).unwrap());

    drop(guard);
    assert!(!db.wclocked(&root).unwrap());
    other.wclock_set(&root.join("src"), 0).unwrap();
    other.wclock_remove(&root.join("src")).unwrap();
}

#[test]
fn test_store_survives_reopen() {
    let (_tmp, db, root) = checkout();
    db.op_add_file(&root.join("new.c"), &[]).unwrap();
    db.close(&root).unwrap();
    drop(db);

    let db = WcDb::open(&root).unwrap();
    let info = db.read_info(&root.join("new.c")).unwrap();
    assert_eq!(info.status, Status::Added);
    assert_eq!(info.kind, Kind::File);
    assert_eq!(db.read_children(&root).unwrap(), vec!["README", "new.c", "src"]);
}
