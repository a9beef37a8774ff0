//! Deduplicating background work queue and the repository sync queue built on it.
//!
//! A key is in at most one of three states: pending (sent to the channel,
//! not yet picked up), running, or running with a rerun requested. Enqueueing
//! a pending key is a no-op; enqueueing a running key schedules exactly one
//! more run once the current one finishes. Two workers never run the same key
//! at the same time.

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use crate::config::SYNC_QUEUE_NAME;
use crate::index::IndexDb;
use crate::lifecycle::{Lifecycle, ShutdownToken};

use super::sync::sync_repository;
use super::{CoreContext, CoreError, CoreResult};

/// What an enqueue call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new job was scheduled.
    Scheduled,
    /// The key was already pending; nothing changed.
    Absorbed,
    /// The key is running; one more run will follow it.
    Rerun,
    /// The queue is shutting down.
    Closed,
}

/// Tally of [`Enqueued`] outcomes from a bulk enqueue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnqueueCounts {
    pub scheduled: usize,
    pub absorbed: usize,
    pub rerun: usize,
    pub closed: usize,
}

impl EnqueueCounts {
    pub fn record(&mut self, outcome: Enqueued) {
        match outcome {
            Enqueued::Scheduled => self.scheduled += 1,
            Enqueued::Absorbed => self.absorbed += 1,
            Enqueued::Rerun => self.rerun += 1,
            Enqueued::Closed => self.closed += 1,
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.scheduled + self.absorbed + self.rerun + self.closed
    }
}

struct State<K> {
    pending: HashSet<K>,
    running: HashSet<K>,
    rerun: HashSet<K>,
}

impl<K> State<K> {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running.is_empty()
    }
}

type Handler<K> = dyn Fn(&K, &ShutdownToken) -> CoreResult<()> + Send + Sync;

struct Shared<K> {
    name: String,
    state: Mutex<State<K>>,
    idle: Condvar,
    sender: Sender<K>,
    token: ShutdownToken,
}

impl<K> Shared<K> {
    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Named, in-memory work queue where each key runs at most once at a time.
pub struct UniqueQueue<K> {
    shared: Arc<Shared<K>>,
}

impl<K> UniqueQueue<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    /// Start `workers` threads that run `handler` until the lifecycle token is
    /// cancelled. The threads are registered with `lifecycle`.
    pub fn start<H>(
        name: &str,
        workers: usize,
        lifecycle: &Lifecycle,
        handler: H,
    ) -> CoreResult<Self>
    where
        H: Fn(&K, &ShutdownToken) -> CoreResult<()> + Send + Sync + 'static,
    {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            name: name.to_string(),
            state: Mutex::new(State {
                pending: HashSet::new(),
                running: HashSet::new(),
                rerun: HashSet::new(),
            }),
            idle: Condvar::new(),
            sender,
            token: lifecycle.token().clone(),
        });
        let handler: Arc<Handler<K>> = Arc::new(handler);

        for i in 0..workers.max(1) {
            let thread_name = format!("{name}-{i}");
            let shared = Arc::clone(&shared);
            let receiver = receiver.clone();
            let handler = Arc::clone(&handler);
            let handle = thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || worker_loop(&shared, &receiver, handler.as_ref()))
                .map_err(|source| CoreError::QueueInit {
                    name: name.to_string(),
                    source,
                })?;
            lifecycle.register(thread_name, handle);
        }

        info!(queue = name, workers, "queue started");
        Ok(Self { shared })
    }

    /// Schedule `key` without blocking.
    pub fn enqueue(&self, key: K) -> Enqueued {
        if self.shared.token.is_cancelled() {
            return Enqueued::Closed;
        }

        let mut state = self.shared.lock();
        if state.pending.contains(&key) {
            return Enqueued::Absorbed;
        }
        if state.running.contains(&key) {
            state.rerun.insert(key);
            return Enqueued::Rerun;
        }

        state.pending.insert(key.clone());
        if let Err(err) = self.shared.sender.send(key) {
            state.pending.remove(&err.0);
            return Enqueued::Closed;
        }
        Enqueued::Scheduled
    }

    /// Block until nothing is pending or running, or `timeout` elapses.
    /// Returns `true` if the queue went idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .idle
            .wait_timeout_while(state, timeout, |s| !s.is_idle())
            .unwrap_or_else(PoisonError::into_inner);
        state.is_idle()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

fn worker_loop<K>(shared: &Shared<K>, receiver: &Receiver<K>, handler: &Handler<K>)
where
    K: Eq + Hash + Clone + Debug,
{
    loop {
        select! {
            recv(receiver) -> msg => match msg {
                Ok(key) => run_job(shared, key, handler),
                Err(_) => break,
            },
            recv(shared.token.cancelled()) -> _ => break,
        }
    }
    debug!(queue = %shared.name, "worker stopped");
}

fn run_job<K>(shared: &Shared<K>, key: K, handler: &Handler<K>)
where
    K: Eq + Hash + Clone + Debug,
{
    {
        let mut state = shared.lock();
        state.pending.remove(&key);
        state.running.insert(key.clone());
    }

    match catch_unwind(AssertUnwindSafe(|| handler(&key, &shared.token))) {
        Ok(Ok(())) => trace!(queue = %shared.name, job = ?key, "job done"),
        Ok(Err(CoreError::Cancelled)) => {
            debug!(queue = %shared.name, job = ?key, "job cancelled");
        }
        Ok(Err(err)) => error!(queue = %shared.name, job = ?key, error = %err, "job failed"),
        Err(_) => error!(queue = %shared.name, job = ?key, "job panicked"),
    }

    let mut state = shared.lock();
    state.running.remove(&key);
    if state.rerun.remove(&key) && !shared.token.is_cancelled() {
        state.pending.insert(key.clone());
        if let Err(err) = shared.sender.send(key) {
            state.pending.remove(&err.0);
        }
    }
    if state.is_idle() {
        shared.idle.notify_all();
    }
}

/// A repository sync request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SyncJob {
    pub repo_id: i64,
}

/// The repository sync queue: a [`UniqueQueue`] of [`SyncJob`]s whose handler
/// runs the sync orchestrator on its own index connection.
pub struct SyncQueue {
    queue: UniqueQueue<SyncJob>,
    db_path: PathBuf,
}

impl SyncQueue {
    pub fn start(ctx: &CoreContext, workers: usize, lifecycle: &Lifecycle) -> CoreResult<Self> {
        let db_path = ctx.db_path().to_path_buf();
        let history = ctx.history_handle();
        let job_db_path = db_path.clone();

        let queue = UniqueQueue::start(SYNC_QUEUE_NAME, workers, lifecycle, move |job: &SyncJob, token| {
            let db = IndexDb::open(&job_db_path)?;
            let report = sync_repository(&db, history.as_ref(), job.repo_id, token)?;
            debug!(
                repo_id = report.repo_id,
                inserted = report.inserted,
                deleted = report.deleted,
                "queued sync applied"
            );
            Ok(())
        })?;

        Ok(Self { queue, db_path })
    }

    /// Schedule a sync of one repository.
    pub fn enqueue_sync(&self, repo_id: i64) -> Enqueued {
        self.queue.enqueue(SyncJob { repo_id })
    }

    /// Schedule a sync of every non-empty repository, streaming the catalog.
    ///
    /// Returns what each enqueue did, one outcome per repository visited.
    pub fn enqueue_sync_all(&self, doer_id: i64) -> CoreResult<EnqueueCounts> {
        let db = IndexDb::open(&self.db_path)?;
        let mut counts = EnqueueCounts::default();
        db.for_each_non_empty_repository(|repo| {
            let outcome = self.enqueue_sync(repo.id);
            if outcome == Enqueued::Closed {
                warn!(repo_id = repo.id, "queue closed while enqueueing");
            }
            counts.record(outcome);
            Ok(())
        })?;
        info!(
            doer_id,
            visited = counts.total(),
            scheduled = counts.scheduled,
            "queued sync of all repositories"
        );
        Ok(counts)
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.queue.wait_idle(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Visibility;
    use crate::core::testing::{add_repo, log_line, sha, FakeHistory};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use tempfile::tempdir;

    const WAIT: Duration = Duration::from_secs(10);

    #[test]
    fn test_concurrent_enqueues_of_pending_key_run_once() {
        let lifecycle = Lifecycle::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Barrier::new(2));

        // One worker, blocked on a different key until every enqueue is done.
        let queue = {
            let runs = Arc::clone(&runs);
            let gate = Arc::clone(&gate);
            UniqueQueue::start("test", 1, &lifecycle, move |key: &u32, _| {
                if *key == 0 {
                    gate.wait();
                } else {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            })
            .expect("start")
        };

        assert_eq!(queue.enqueue(0), Enqueued::Scheduled);
        let outcomes: Vec<Enqueued> = thread::scope(|scope| {
            let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| queue.enqueue(7))).collect();
            handles.into_iter().map(|h| h.join().expect("join")).collect()
        });
        gate.wait();

        assert_eq!(outcomes.iter().filter(|o| **o == Enqueued::Scheduled).count(), 1);
        assert!(queue.wait_idle(WAIT));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        lifecycle.shutdown();
    }

    #[test]
    fn test_enqueue_while_running_schedules_one_rerun() {
        let lifecycle = Lifecycle::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let started = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let queue = {
            let runs = Arc::clone(&runs);
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            UniqueQueue::start("test", 4, &lifecycle, move |_: &u32, _| {
                if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                    started.wait();
                    release.wait();
                }
                Ok(())
            })
            .expect("start")
        };

        assert_eq!(queue.enqueue(1), Enqueued::Scheduled);
        started.wait();
        assert_eq!(queue.enqueue(1), Enqueued::Rerun);
        assert_eq!(queue.enqueue(1), Enqueued::Rerun);
        release.wait();

        assert!(queue.wait_idle(WAIT));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        lifecycle.shutdown();
    }

    #[test]
    fn test_same_key_never_runs_concurrently() {
        let lifecycle = Lifecycle::new();
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        let queue = {
            let active = Arc::clone(&active);
            let overlap = Arc::clone(&overlap);
            UniqueQueue::start("test", 4, &lifecycle, move |_: &u32, _| {
                if active.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlap.fetch_add(1, Ordering::SeqCst);
                }
                thread::sleep(Duration::from_millis(2));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("start")
        };

        for _ in 0..50 {
            queue.enqueue(5);
            thread::sleep(Duration::from_millis(1));
        }
        assert!(queue.wait_idle(WAIT));
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
        lifecycle.shutdown();
    }

    #[test]
    fn test_failing_and_panicking_jobs_do_not_stall_queue() {
        let lifecycle = Lifecycle::new();
        let queue = UniqueQueue::start("test", 2, &lifecycle, |key: &u32, _| match key {
            1 => Err(CoreError::RepositoryNotFound { repo_id: 1 }),
            2 => panic!("boom"),
            _ => Ok(()),
        })
        .expect("start");

        queue.enqueue(1);
        queue.enqueue(2);
        queue.enqueue(3);
        assert!(queue.wait_idle(WAIT));
        lifecycle.shutdown();
    }

    #[test]
    fn test_enqueue_after_shutdown_is_closed() {
        let lifecycle = Lifecycle::new();
        let queue =
            UniqueQueue::start("test", 1, &lifecycle, |_: &u32, _| Ok(())).expect("start");
        lifecycle.shutdown();
        assert_eq!(queue.enqueue(1), Enqueued::Closed);
    }

    #[test]
    fn test_sync_queue_syncs_all_non_empty_repositories() {
        let dir = tempdir().expect("tempdir");
        let history = Arc::new(FakeHistory::default());
        let ctx = CoreContext::new(&dir.path().join("index.db"), history.clone());

        let db = ctx.open_db().expect("db");
        let owner = db.insert_user("alice", false).expect("user");
        let a = add_repo(&db, owner, "a", Visibility::Public);
        let b = add_repo(&db, owner, "b", Visibility::Private);
        let empty = add_repo(&db, owner, "empty", Visibility::Public);
        db.set_repository_empty(empty, true).expect("mark empty");

        history.set_log("alice/a", &log_line(&sha(1), 10, "A-1 x"));
        history.set_log("alice/b", &log_line(&sha(2), 20, "B-1 y"));

        let lifecycle = Lifecycle::new();
        let queue = SyncQueue::start(&ctx, 2, &lifecycle).expect("start");
        let counts = queue.enqueue_sync_all(owner).expect("enqueue all");
        assert_eq!((counts.scheduled, counts.total()), (2, 2));
        assert!(queue.wait_idle(WAIT));
        lifecycle.shutdown();

        assert_eq!(db.links_for_repo(a).expect("a").len(), 1);
        assert_eq!(db.links_for_repo(b).expect("b").len(), 1);
        assert_eq!(history.opens(), 2);
    }

    #[test]
    fn test_enqueue_sync_all_reports_outcomes_per_repository() {
        let dir = tempdir().expect("tempdir");
        let history = Arc::new(FakeHistory::default());
        let ctx = CoreContext::new(&dir.path().join("index.db"), history.clone());

        let db = ctx.open_db().expect("db");
        let owner = db.insert_user("alice", false).expect("user");
        add_repo(&db, owner, "a", Visibility::Public);
        add_repo(&db, owner, "b", Visibility::Public);

        let lifecycle = Lifecycle::new();
        let queue = SyncQueue::start(&ctx, 1, &lifecycle).expect("start");
        lifecycle.shutdown();

        let counts = queue.enqueue_sync_all(owner).expect("enqueue all");
        assert_eq!(
            counts,
            EnqueueCounts {
                closed: 2,
                ..EnqueueCounts::default()
            }
        );
        assert_eq!(history.opens(), 0);
    }

    #[test]
    fn test_enqueue_counts_tally_each_outcome() {
        let mut counts = EnqueueCounts::default();
        for outcome in [
            Enqueued::Scheduled,
            Enqueued::Absorbed,
            Enqueued::Rerun,
            Enqueued::Rerun,
            Enqueued::Closed,
        ] {
            counts.record(outcome);
        }
        assert_eq!((counts.scheduled, counts.absorbed, counts.rerun, counts.closed), (1, 1, 2, 1));
        assert_eq!(counts.total(), 5);
    }
}
