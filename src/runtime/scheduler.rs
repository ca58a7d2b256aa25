//! Worker pool and configuration (§4.5 "Scheduler / executor").
//!
//! A small fixed-size pool of `std::thread` workers share one ready queue
//! guarded by `Mutex` + `Condvar`; submission is FIFO per worker, which
//! satisfies §4.5's "every submitted continuation must eventually run"
//! without implementing work-stealing (permitted, not required). A
//! dedicated [`crate::time::Timer`] thread handles `Sleep`.

use crate::error::UncaughtError;
use crate::node::Node;
use crate::runtime::fiber::{ExternalWait, FiberId, FiberState, FiberStatus};
use crate::runtime::interpreter;
use crate::time::Timer;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// Configuration for a [`Runtime`], mirroring the teacher's own
/// `runtime::event_loop::Config` (there: submission-queue size; here:
/// worker-thread count).
#[derive(Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads. Defaults to the available parallelism,
    /// falling back to 1 if it can't be queried.
    pub worker_threads: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

pub(crate) struct ReadyQueue {
    pub(crate) queue: Mutex<VecDeque<FiberId>>,
    pub(crate) condvar: Condvar,
}

pub(crate) struct Shared {
    pub(crate) fibers: Mutex<slab::Slab<Arc<Mutex<FiberState>>>>,
    pub(crate) ready: ReadyQueue,
    pub(crate) shutting_down: std::sync::atomic::AtomicBool,
    pub(crate) timer: Timer,
}

impl Shared {
    pub(crate) fn submit(self: &Arc<Self>, fiber: FiberId) {
        let mut queue = self.ready.queue.lock().unwrap();
        queue.push_back(fiber);
        self.ready.condvar.notify_one();
    }

    pub(crate) fn lookup(&self, id: FiberId) -> Option<Arc<Mutex<FiberState>>> {
        self.fibers.lock().unwrap().get(id.0).cloned()
    }

    pub(crate) fn insert_fiber(self: &Arc<Self>, state: FiberState) -> FiberId {
        let ready = matches!(state.status, FiberStatus::Ready(_));
        let cell = Arc::new(Mutex::new(state));
        let id = FiberId(self.fibers.lock().unwrap().insert(cell));
        tracing::trace!(fiber = id.0, "fiber spawned");
        if ready {
            self.submit(id);
        }
        id
    }

    pub(crate) fn remove_fiber(&self, id: FiberId) {
        let mut fibers = self.fibers.lock().unwrap();
        if fibers.contains(id.0) {
            fibers.remove(id.0);
        }
    }

    /// Marks a fiber's exit as never going to be joined, so the interpreter
    /// frees its slot as soon as it terminates instead of keeping the exit
    /// around forever (see [`crate::runtime::fiber::Fiber`]'s `Drop`).
    pub(crate) fn mark_unobserved(self: Arc<Self>, id: FiberId) {
        let Some(cell) = self.lookup(id) else {
            return;
        };
        let mut state = cell.lock().unwrap();
        if matches!(state.status, FiberStatus::Done(_)) {
            drop(state);
            self.remove_fiber(id);
        } else {
            state.unobserved = true;
        }
    }
}

/// An explicit handle on the worker pool and timer thread backing `run`.
///
/// The common case goes through the free functions `run`/`run_with`, which
/// lazily create and reuse one process-wide `Runtime` (§9 "process-wide
/// scheduler with explicit lifecycle"). Construct one directly for
/// non-default [`RuntimeConfig`]s or to control shutdown explicitly.
pub struct Runtime {
    pub(crate) shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let worker_threads = config.worker_threads.max(1);

        let shared = Arc::new_cyclic(|weak: &std::sync::Weak<Shared>| {
            let weak = weak.clone();
            Shared {
                fibers: Mutex::new(slab::Slab::new()),
                ready: ReadyQueue {
                    queue: Mutex::new(VecDeque::new()),
                    condvar: Condvar::new(),
                },
                shutting_down: std::sync::atomic::AtomicBool::new(false),
                timer: Timer::start(move |fiber| {
                    if let Some(shared) = weak.upgrade() {
                        interpreter::resume_sleep(&shared, fiber);
                    }
                }),
            }
        });

        let workers = (0..worker_threads)
            .map(|index| {
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("rill-worker-{index}"))
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn rill worker thread")
            })
            .collect();

        Runtime { shared, workers }
    }

    /// Spawns the root fiber and blocks the calling thread until it
    /// terminates (§6 `run`).
    pub fn block_on<E, A>(&self, effect: crate::effect::Effect<E, A>) -> Result<A, crate::error::RillError<E>>
    where
        E: Send + 'static,
        A: Send + 'static,
    {
        let wait = Arc::new(ExternalWait {
            result: Mutex::new(None),
            condvar: Condvar::new(),
        });

        let mut state = FiberState::new(effect.into_node(), false, None);
        state.external_waiter = Some(wait.clone());
        self.shared.insert_fiber(state);

        let mut guard = wait.result.lock().unwrap();
        while guard.is_none() {
            guard = wait.condvar.wait(guard).unwrap();
        }
        let exit = guard.take().unwrap();

        crate::exit::translate::<E, A>(exit)
    }

    pub fn shutdown(self) {
        // Drop runs the real shutdown; this just gives callers an explicit
        // spelling for "shut down now" (§9 "shutdown on demand").
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shared
            .shutting_down
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.shared.ready.condvar.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let fiber = {
            let mut queue = shared.ready.queue.lock().unwrap();
            loop {
                if shared.shutting_down.load(std::sync::atomic::Ordering::SeqCst) {
                    return;
                }
                if let Some(fiber) = queue.pop_front() {
                    break fiber;
                }
                queue = shared.ready.condvar.wait(queue).unwrap();
            }
        };

        interpreter::drive(&shared, fiber);
    }
}

/// Like [`worker_loop`], but exits as soon as `done` is set rather than only
/// on runtime shutdown.
///
/// [`interpreter::run_to_completion`] blocks its calling worker on a
/// throwaway fiber's exit; with a fixed-size pool that borrow can exhaust
/// every worker if finalizers or fork handlers nest deeply (each one parks
/// a worker waiting on the next). Spawning one of these for the duration of
/// the wait lends the pool a temporary extra thread, the same way a
/// work-stealing pool grows its blocking-pool side rather than deadlock
/// under nested blocking calls.
fn helper_loop(shared: Arc<Shared>, done: Arc<std::sync::atomic::AtomicBool>) {
    loop {
        let fiber = {
            let mut queue = shared.ready.queue.lock().unwrap();
            loop {
                if done.load(std::sync::atomic::Ordering::SeqCst)
                    || shared.shutting_down.load(std::sync::atomic::Ordering::SeqCst)
                {
                    return;
                }
                if let Some(fiber) = queue.pop_front() {
                    break fiber;
                }
                let (g, _timeout) = shared
                    .ready
                    .condvar
                    .wait_timeout(queue, std::time::Duration::from_millis(10))
                    .unwrap();
                queue = g;
            }
        };

        interpreter::drive(&shared, fiber);
    }
}

/// Spawns a [`helper_loop`] thread that keeps draining the ready queue until
/// `done` is set. Returned handle must be joined by the caller once `done`
/// is flipped and the ready-queue condvar has been notified.
pub(crate) fn spawn_helper(
    shared: &Arc<Shared>,
    done: Arc<std::sync::atomic::AtomicBool>,
) -> JoinHandle<()> {
    let shared = shared.clone();
    std::thread::Builder::new()
        .name("rill-worker-helper".to_string())
        .spawn(move || helper_loop(shared, done))
        .expect("failed to spawn rill helper thread")
}

pub(crate) fn report_uncaught(error: UncaughtError) {
    crate::runtime::handler::report(error);
}
