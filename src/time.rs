//! Timer thread backing the `Sleep` node (§4.2 rule 11, §4.5).
//!
//! One dedicated thread per [`crate::runtime::Runtime`] holds a min-heap of
//! deadlines and parks on a `Condvar` until the nearest one elapses, then
//! hands the fiber back to the scheduler. Mirrors the teacher's own
//! dedicated-thread-per-concern style (it uses `io_uring`'s kernel timeout
//! opcode for the same job; we have no kernel ring here, so a thread is the
//! idiomatic `std`-only substitute).

use crate::runtime::fiber::FiberId;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct Entry {
    deadline: Instant,
    fiber: FiberId,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline.cmp(&other.deadline)
    }
}

struct State {
    heap: BinaryHeap<Reverse<Entry>>,
    shutdown: bool,
}

/// Handle to the timer's background thread.
pub(crate) struct Timer {
    state: Arc<(Mutex<State>, Condvar)>,
    thread: Option<JoinHandle<()>>,
}

impl Timer {
    pub(crate) fn start(on_fire: impl Fn(FiberId) + Send + 'static) -> Self {
        let state = Arc::new((
            Mutex::new(State {
                heap: BinaryHeap::new(),
                shutdown: false,
            }),
            Condvar::new(),
        ));

        let thread_state = state.clone();
        let thread = std::thread::Builder::new()
            .name("rill-timer".into())
            .spawn(move || Self::run(thread_state, on_fire))
            .expect("failed to spawn rill timer thread");

        Timer {
            state,
            thread: Some(thread),
        }
    }

    fn run(state: Arc<(Mutex<State>, Condvar)>, on_fire: impl Fn(FiberId)) {
        let (lock, condvar) = &*state;
        let mut guard = lock.lock().unwrap();

        loop {
            if guard.shutdown {
                return;
            }

            match guard.heap.peek() {
                None => {
                    guard = condvar.wait(guard).unwrap();
                }
                Some(Reverse(entry)) => {
                    let now = Instant::now();
                    if entry.deadline <= now {
                        let Reverse(entry) = guard.heap.pop().unwrap();
                        drop(guard);
                        on_fire(entry.fiber);
                        guard = lock.lock().unwrap();
                    } else {
                        let (g, _timeout) =
                            condvar.wait_timeout(guard, entry.deadline - now).unwrap();
                        guard = g;
                    }
                }
            }
        }
    }

    /// Schedules `fiber` to fire after `duration`. A zero or negative
    /// duration still goes through the heap so the fiber yields a
    /// submission that `interrupt` can race against (§4.5).
    pub(crate) fn schedule(&self, fiber: FiberId, duration: Duration) {
        let (lock, condvar) = &*self.state;
        let mut guard = lock.lock().unwrap();
        guard.heap.push(Reverse(Entry {
            deadline: Instant::now() + duration,
            fiber,
        }));
        condvar.notify_one();
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let (lock, condvar) = &*self.state;
        lock.lock().unwrap().shutdown = true;
        condvar.notify_one();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
