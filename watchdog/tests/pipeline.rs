//! End-to-end tests: real file system events in, sync script calls out.
#![cfg(unix)]

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use codex_watchdog::{ExcludeSet, Script, ScriptSet, TreeConfig, Watchdog};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const KILL_DELAY: Duration = Duration::from_millis(100);

struct Fixture {
    root: PathBuf,
    log: PathBuf,
    scripts: ScriptSet,
    _tree: TempDir,
    _scripts: TempDir,
}

impl Fixture {
    /// A tree to watch plus scripts that log `<name> <arg>` and then run
    /// `body`.
    fn new(body: &str) -> Self {
        let tree = TempDir::new().unwrap();
        let scripts_dir = TempDir::new().unwrap();
        let log = scripts_dir.path().join("calls.log");

        for script in Script::ALL {
            let path = scripts_dir.path().join(script.file_name());
            let text = format!(
                "#!/bin/sh\necho \"{} $1\" >> '{}'\n{body}\n",
                script.file_name(),
                log.display()
            );
            std::fs::write(&path, text).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let scripts = ScriptSet::in_dir(scripts_dir.path());
        scripts.verify().unwrap();

        Self {
            root: tree.path().canonicalize().unwrap(),
            log,
            scripts,
            _tree: tree,
            _scripts: scripts_dir,
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn start(&self, tree: TreeConfig) -> Watchdog {
        Watchdog::start_trees(&[tree], self.scripts.clone(), KILL_DELAY).unwrap()
    }

    fn tree(&self) -> TreeConfig {
        TreeConfig::new(&self.root).with_agglomeration(Duration::from_millis(200))
    }

    fn calls(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    /// Wait until `call` has been logged.
    async fn expect_call(&self, call: &str) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !self.calls().iter().any(|c| c == call) {
            assert!(
                Instant::now() < deadline,
                "never called {call:?}; calls: {:?}",
                self.calls()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Give stray events a chance to show up.
    async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(600)).await;
    }
}

fn call(script: &str, path: &Path) -> String {
    format!("{script} {}", path.display())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_created_file_is_copied() {
    let fx = Fixture::new("");
    let watchdog = fx.start(fx.tree());

    let file = fx.path("a.txt");
    std::fs::write(&file, b"hello").unwrap();

    fx.expect_call(&call("copy", &file)).await;
    watchdog.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_removed_file_is_deleted() {
    let fx = Fixture::new("");
    let file = fx.path("a.txt");
    std::fs::write(&file, b"hello").unwrap();
    let watchdog = fx.start(fx.tree());

    std::fs::remove_file(&file).unwrap();

    fx.expect_call(&call("delete", &file)).await;
    watchdog.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_created_directory_is_bulk_synced_and_watched() {
    let fx = Fixture::new("");
    let watchdog = fx.start(fx.tree());

    let sub = fx.path("sub");
    std::fs::create_dir(&sub).unwrap();
    fx.expect_call(&call("bulk_sync", &sub)).await;

    let inner = sub.join("inner.txt");
    std::fs::write(&inner, b"hello").unwrap();
    fx.expect_call(&call("copy", &inner)).await;

    watchdog.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_writes_collapse_into_one_copy() {
    let fx = Fixture::new("");
    let file = fx.path("a.txt");
    std::fs::write(&file, b"v0").unwrap();
    let watchdog = fx.start(fx.tree());

    for version in ["v1", "v2", "v3"] {
        std::fs::write(&file, version).unwrap();
    }

    fx.expect_call(&call("copy", &file)).await;
    fx.settle().await;
    assert_eq!(fx.calls(), vec![call("copy", &file)]);

    watchdog.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scattered_writes_bulk_sync_common_ancestor() {
    let fx = Fixture::new("");
    for rel in ["x/a", "x/b", "y/c"] {
        let path = fx.path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"v0").unwrap();
    }
    let watchdog = fx.start(fx.tree());

    for rel in ["x/a", "x/b", "y/c"] {
        std::fs::write(fx.path(rel), b"v1").unwrap();
    }

    fx.expect_call(&call("bulk_sync", &fx.root)).await;
    fx.settle().await;
    assert_eq!(fx.calls(), vec![call("bulk_sync", &fx.root)]);

    watchdog.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_write_then_remove_is_a_single_delete() {
    let fx = Fixture::new("");
    let file = fx.path("a.txt");
    std::fs::write(&file, b"").unwrap();
    let watchdog = fx.start(fx.tree());

    // Appending produces a single write event, unlike a truncating write.
    std::fs::OpenOptions::new()
        .append(true)
        .open(&file)
        .unwrap()
        .write_all(b"v1")
        .unwrap();
    std::fs::remove_file(&file).unwrap();

    fx.expect_call(&call("delete", &file)).await;
    fx.settle().await;
    assert_eq!(fx.calls(), vec![call("delete", &file)]);

    watchdog.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_excluded_file_is_never_synced() {
    let fx = Fixture::new("");
    let excluded = fx.path("a.txt");
    let pattern = format!("^{}$", regex::escape(&excluded.to_string_lossy()));
    let tree = fx.tree().with_excludes(ExcludeSet::new([pattern]).unwrap());
    let watchdog = fx.start(tree);

    std::fs::write(&excluded, b"secret").unwrap();
    fx.settle().await;
    let other = fx.path("b.txt");
    std::fs::write(&other, b"public").unwrap();

    fx.expect_call(&call("copy", &other)).await;
    assert!(
        fx.calls().iter().all(|c| !c.contains("a.txt")),
        "{:?}",
        fx.calls()
    );

    watchdog.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_kills_stubborn_script() {
    let fx = Fixture::new("trap '' TERM\nwhile :; do sleep 1; done");
    let watchdog = fx.start(fx.tree());

    let sub = fx.path("sub");
    std::fs::create_dir(&sub).unwrap();
    fx.expect_call(&call("bulk_sync", &sub)).await;

    let started = Instant::now();
    tokio::time::timeout(Duration::from_secs(5), watchdog.stop())
        .await
        .expect("pipelines did not stop");
    assert!(started.elapsed() >= KILL_DELAY);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trees_are_independent() {
    let first = Fixture::new("");
    let second = TempDir::new().unwrap();
    let second_root = second.path().canonicalize().unwrap();

    let watchdog = Watchdog::start_trees(
        &[
            first.tree(),
            TreeConfig::new(&second_root).with_agglomeration(Duration::from_millis(200)),
        ],
        first.scripts.clone(),
        KILL_DELAY,
    )
    .unwrap();
    assert_eq!(watchdog.trees(), 2);

    let a = first.path("a.txt");
    let b = second_root.join("b.txt");
    std::fs::write(&a, b"one").unwrap();
    std::fs::write(&b, b"two").unwrap();

    first.expect_call(&call("copy", &a)).await;
    first.expect_call(&call("copy", &b)).await;

    watchdog.stop().await;
}
