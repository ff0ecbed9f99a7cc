//! Generated-tree properties for mirror copies and zip round trips.

use futures::future::BoxFuture;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;

use tbloader_kernel::{
    CopyOptions, FileHandle, MemoryBackend, RelativePath, ZipOptions, copy_dir, unzip, zip_dir,
};

/// One generated node: a path and either file content or `None` for a
/// directory.
type Node = (Vec<String>, Option<Vec<u8>>);

/// Path → content, `None` marking a directory.
type Listing = BTreeMap<String, Option<Vec<u8>>>;

fn node() -> impl Strategy<Value = Node> {
    (
        prop::collection::vec("[a-c]{1,2}", 1..4),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..64)),
    )
}

fn tree() -> impl Strategy<Value = Vec<Node>> {
    prop::collection::vec(node(), 0..12)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Materialize `nodes` under `root`. Nodes that collide with an earlier
/// node of the other kind are dropped.
async fn build(root: &FileHandle, nodes: &[Node]) {
    for (segments, content) in nodes {
        let handle = root.open_path(&RelativePath::new(segments));
        match content {
            None => {
                let _ = handle.mkdirs().await;
            }
            Some(bytes) => {
                if handle.parent().mkdirs().await.is_ok() && !handle.is_dir().await {
                    let _ = handle.create_new(bytes, true).await;
                }
            }
        }
    }
}

fn listing<'a>(dir: &'a FileHandle, prefix: String, out: &'a mut Listing) -> BoxFuture<'a, ()> {
    Box::pin(async move {
        for entry in dir.entries().await.unwrap() {
            let path = if prefix.is_empty() {
                entry.name.clone()
            } else {
                format!("{prefix}/{}", entry.name)
            };
            let child = dir.open(&entry.name);
            if entry.kind.is_dir() {
                out.insert(path.clone(), None);
                listing(&child, path, out).await;
            } else {
                out.insert(path, Some(child.read_to_end().await.unwrap()));
            }
        }
    })
}

async fn snapshot(root: &FileHandle) -> Listing {
    let mut out = Listing::new();
    listing(root, String::new(), &mut out).await;
    out
}

fn mem_root() -> FileHandle {
    FileHandle::root(Arc::new(MemoryBackend::new()))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn mirror_copy_reproduces_source(source in tree(), stale in tree()) {
        runtime().block_on(async {
            let src = mem_root();
            let dst = mem_root();
            build(&src, &source).await;
            build(&dst, &stale).await;

            copy_dir(&src, &dst, &CopyOptions::mirror()).await.unwrap();
            let expected = snapshot(&src).await;
            prop_assert_eq!(&snapshot(&dst).await, &expected);

            copy_dir(&src, &dst, &CopyOptions::mirror()).await.unwrap();
            prop_assert_eq!(&snapshot(&dst).await, &expected);
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn unzip_restores_zipped_tree(source in tree()) {
        runtime().block_on(async {
            let src = mem_root();
            build(&src, &source).await;

            let work = TempDir::new().unwrap();
            let archive = work.path().join("tree.zip");
            let restored = work.path().join("restored");
            zip_dir(&src, &archive, &ZipOptions::default()).await.unwrap();
            let summary = unzip(&archive, &restored, None).unwrap();

            let expected = snapshot(&src).await;
            prop_assert_eq!(summary.entries as usize, expected.len());
            prop_assert_eq!(&snapshot(&FileHandle::local(&restored)).await, &expected);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
