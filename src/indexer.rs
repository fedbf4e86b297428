use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::warn;

/// A regular file found by the walker, with the stat fields the
/// processor needs. For symlinks the path is the link, the stat is the
/// target's.
#[derive(Debug, Clone)]
pub struct FileMeta {
    /// Filesystem path, for opening.
    pub path: PathBuf,
    /// Slash-separated path with the root stripped, leading slash kept.
    pub logical: String,
    /// File size (bytes)
    pub size: u64,
    /// Modification time (Unix timestamp, seconds)
    pub modtime: i64,
}

/// Additive byte sum of the logical path. Stable across runs and
/// independent of filesystem order, which makes it the shard selector.
pub fn sum_bytes(s: &str) -> usize {
    s.bytes().map(|b| b as usize).sum()
}

/// Parallel directory walker. A dispatcher thread owns the pending
/// directory queue and hands one directory per idle worker over a
/// rendezvous channel; workers read directories, push subdirectories
/// back onto the stash, and emit shard-qualifying regular files.
pub struct Indexer {
    stash_tx: Sender<PathBuf>,
    stash_rx: Receiver<PathBuf>,
    dirs_tx: Sender<PathBuf>,
    dirs_rx: Receiver<PathBuf>,
    status_tx: Sender<usize>,
    status_rx: Receiver<usize>,
    out_tx: Sender<FileMeta>,
    out_rx: Receiver<FileMeta>,
    group: usize,
    shard: usize,
    follow_symlinks: bool,
}

impl Indexer {
    /// `group` is the shard group size, `shard` the 0-based index of
    /// this instance within it.
    pub fn new(group: usize, shard: usize, follow_symlinks: bool) -> Self {
        // Unbuffered channels: every send is a rendezvous with the
        // dispatcher (stash, status) or a worker (dirs), and the files
        // channel gives the pipeline its back-pressure.
        let (stash_tx, stash_rx) = bounded(0);
        let (dirs_tx, dirs_rx) = bounded(0);
        let (status_tx, status_rx) = bounded(0);
        let (out_tx, out_rx) = bounded(0);
        Self {
            stash_tx,
            stash_rx,
            dirs_tx,
            dirs_rx,
            status_tx,
            status_rx,
            out_tx,
            out_rx,
            group,
            shard,
            follow_symlinks,
        }
    }

    /// Receiver end of the files channel; clone one per processor
    /// worker. Closes when the scan is done.
    pub fn sink(&self) -> Receiver<FileMeta> {
        self.out_rx.clone()
    }

    /// Walk `root` with `n` workers. Blocks until the whole subtree is
    /// enumerated; run it on its own thread.
    pub fn scan(self, root: PathBuf, n: usize) {
        let Indexer {
            stash_tx,
            stash_rx,
            dirs_tx,
            dirs_rx,
            status_tx,
            status_rx,
            out_tx,
            out_rx: _,
            group,
            shard,
            follow_symlinks,
        } = self;

        let mut handles = Vec::with_capacity(n);
        for id in 0..n {
            let walker = Walker {
                id,
                root: root.clone(),
                group,
                shard,
                follow_symlinks,
                dirs: dirs_rx.clone(),
                status: status_tx.clone(),
                stash: stash_tx.clone(),
                out: out_tx.clone(),
            };
            handles.push(thread::spawn(move || walker.run()));
        }
        // Workers hold the only remaining clones; once the dispatcher
        // drops the hand-off sender they unwind and the files channel
        // closes behind them.
        drop(dirs_rx);
        drop(status_tx);
        drop(stash_tx);
        drop(out_tx);

        // One worker picks this up and stalls until dispatch starts
        // reading its status toggle.
        let _ = dirs_tx.send(root);
        dispatch(n, dirs_tx, stash_rx, status_rx);

        for handle in handles {
            let _ = handle.join();
        }
    }
}

/// Dispatcher loop: multiplex newly stashed directories and worker
/// status toggles, hand one directory to each idle worker, and stop
/// when the queue is empty and every worker is idle.
fn dispatch(n: usize, dirs_tx: Sender<PathBuf>, stash_rx: Receiver<PathBuf>, status_rx: Receiver<usize>) {
    let mut active = vec![false; n];
    let mut queue: VecDeque<PathBuf> = VecDeque::new();
    loop {
        select! {
            recv(stash_rx) -> msg => match msg {
                Ok(dir) => queue.push_back(dir),
                Err(_) => break,
            },
            recv(status_rx) -> msg => match msg {
                Ok(id) => active[id] = !active[id],
                Err(_) => break,
            },
        }
        let free = active.iter().filter(|a| !**a).count();
        if queue.is_empty() && free == n {
            break;
        }
        if queue.is_empty() {
            continue;
        }
        for _ in 0..free {
            let dir = match queue.pop_front() {
                Some(d) => d,
                None => break,
            };
            if dirs_tx.send(dir).is_err() {
                return;
            }
            // Block for the busy acknowledgement before the next
            // hand-off. Without it every worker can look idle while
            // the hand-off is still in flight, and the loop would
            // terminate early.
            while let Ok(id) = status_rx.recv() {
                active[id] = !active[id];
                if active[id] {
                    break;
                }
            }
            if queue.is_empty() {
                break;
            }
        }
        if !active.iter().any(|a| *a) {
            break;
        }
    }
    // dirs_tx drops here, which is what stops the workers.
}

struct Walker {
    id: usize,
    root: PathBuf,
    group: usize,
    shard: usize,
    follow_symlinks: bool,
    dirs: Receiver<PathBuf>,
    status: Sender<usize>,
    stash: Sender<PathBuf>,
    out: Sender<FileMeta>,
}

impl Walker {
    fn run(self) {
        for dir in self.dirs.iter() {
            let _ = self.status.send(self.id);
            self.read_dir(&dir);
            let _ = self.status.send(self.id);
        }
    }

    /// Shard rule: with fewer than two shards everything qualifies.
    fn accepts(&self, logical: &str) -> bool {
        if self.group < 2 {
            return true;
        }
        sum_bytes(logical) % self.group == self.shard
    }

    fn read_dir(&self, dir: &Path) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("{}: {}", dir.display(), e);
                return;
            }
        };
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("{}: {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            let file_type = match entry.file_type() {
                Ok(ft) => ft,
                Err(e) => {
                    warn!("{}: {}", path.display(), e);
                    continue;
                }
            };
            // For symlinks, take the stat of the target but keep the
            // link's path; a symlinked directory is walked under the
            // link path.
            let meta = if file_type.is_symlink() {
                if !self.follow_symlinks {
                    warn!("{}: symlink skipped", path.display());
                    continue;
                }
                match fs::metadata(&path) {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!("{}: {}", path.display(), e);
                        continue;
                    }
                }
            } else {
                match entry.metadata() {
                    Ok(meta) => meta,
                    Err(e) => {
                        warn!("{}: {}", path.display(), e);
                        continue;
                    }
                }
            };
            if meta.is_dir() {
                let _ = self.stash.send(path);
                continue;
            }
            if !meta.is_file() {
                continue;
            }
            let logical = match logical_path(&self.root, &path) {
                Some(logical) => logical,
                None => {
                    warn!("{}: outside scan root, skipped", path.display());
                    continue;
                }
            };
            if self.accepts(&logical) {
                let _ = self.out.send(FileMeta {
                    logical,
                    size: meta.len(),
                    modtime: modtime(&meta),
                    path,
                });
            }
        }
    }
}

/// Strip the scan root, normalize separators, keep a leading slash.
fn logical_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let rel = rel.to_string_lossy();
    if cfg!(windows) {
        Some(format!("/{}", rel.replace('\\', "/")))
    } else {
        Some(format!("/{}", rel))
    }
}

#[cfg(unix)]
fn modtime(meta: &fs::Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    meta.mtime()
}

#[cfg(not(unix))]
fn modtime(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn scan_logical(root: &Path, group: usize, shard: usize, follow: bool) -> BTreeSet<String> {
        let idx = Indexer::new(group, shard, follow);
        let sink = idx.sink();
        let root = root.to_path_buf();
        let handle = thread::spawn(move || idx.scan(root, 2));
        let found: BTreeSet<String> = sink.iter().map(|fm| fm.logical).collect();
        handle.join().unwrap();
        found
    }

    fn build_tree(dir: &Path) {
        fs::write(dir.join("a.txt"), b"aa").unwrap();
        fs::create_dir_all(dir.join("sub/deep")).unwrap();
        fs::write(dir.join("sub/b.txt"), b"bb").unwrap();
        fs::write(dir.join("sub/deep/c.txt"), b"cc").unwrap();
        fs::create_dir(dir.join("empty")).unwrap();
    }

    #[test]
    fn test_sum_bytes() {
        // '/' is 47, 'a' is 97.
        assert_eq!(sum_bytes("/a"), 144);
        assert_eq!(sum_bytes("/b"), 145);
        assert_eq!(sum_bytes(""), 0);
    }

    #[test]
    fn test_walk_finds_all_regular_files() {
        let tmp = tempfile::tempdir().unwrap();
        build_tree(tmp.path());
        let found = scan_logical(tmp.path(), 1, 0, true);
        let want: BTreeSet<String> = ["/a.txt", "/sub/b.txt", "/sub/deep/c.txt"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(found, want);
    }

    #[test]
    fn test_shards_partition_the_tree() {
        let tmp = tempfile::tempdir().unwrap();
        build_tree(tmp.path());
        let all = scan_logical(tmp.path(), 1, 0, true);
        let s0 = scan_logical(tmp.path(), 2, 0, true);
        let s1 = scan_logical(tmp.path(), 2, 1, true);
        assert!(s0.is_disjoint(&s1));
        let union: BTreeSet<String> = s0.union(&s1).cloned().collect();
        assert_eq!(union, all);
        for logical in &s0 {
            assert_eq!(sum_bytes(logical) % 2, 0);
        }
        for logical in &s1 {
            assert_eq!(sum_bytes(logical) % 2, 1);
        }
    }

    #[test]
    fn test_missing_root_yields_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let gone = tmp.path().join("nope");
        let found = scan_logical(&gone, 1, 0, true);
        assert!(found.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_keeps_link_path_and_target_stat() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("target.txt"), b"0123456789").unwrap();
        std::os::unix::fs::symlink(
            tmp.path().join("target.txt"),
            tmp.path().join("link.txt"),
        )
        .unwrap();
        // Dangling links are logged and skipped.
        std::os::unix::fs::symlink(
            tmp.path().join("missing"),
            tmp.path().join("dangling"),
        )
        .unwrap();

        let idx = Indexer::new(1, 0, true);
        let sink = idx.sink();
        let root = tmp.path().to_path_buf();
        let handle = thread::spawn(move || idx.scan(root, 2));
        let found: Vec<FileMeta> = sink.iter().collect();
        handle.join().unwrap();

        let mut logical: Vec<&str> = found.iter().map(|fm| fm.logical.as_str()).collect();
        logical.sort();
        assert_eq!(logical, vec!["/link.txt", "/target.txt"]);
        let link = found.iter().find(|fm| fm.logical == "/link.txt").unwrap();
        assert_eq!(link.size, 10);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_skipped_when_not_following() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("plain.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(
            tmp.path().join("plain.txt"),
            tmp.path().join("link.txt"),
        )
        .unwrap();
        let found = scan_logical(tmp.path(), 1, 0, false);
        let want: BTreeSet<String> = std::iter::once("/plain.txt".to_string()).collect();
        assert_eq!(found, want);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_directory_recursed_under_link_path() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("real")).unwrap();
        fs::write(tmp.path().join("real/inner.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(tmp.path().join("real"), tmp.path().join("alias")).unwrap();
        let found = scan_logical(tmp.path(), 1, 0, true);
        assert!(found.contains("/real/inner.txt"));
        assert!(found.contains("/alias/inner.txt"));
    }
}
