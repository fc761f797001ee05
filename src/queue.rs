// src/queue.rs
//! Mutex + condvar work queue drained by a single worker thread.
//!
//! Producers pay one short lock and a notify. The consumer tracks whether it
//! is busy so callers can wait for the queue to go fully idle.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard};

pub(crate) struct QueueState<T> {
    items: VecDeque<T>,
    busy: bool,
}

pub(crate) struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    cond: Condvar,
    idle: Condvar,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                busy: false,
            }),
            cond: Condvar::new(),
            idle: Condvar::new(),
        }
    }

    /// Enqueues `item` and wakes the worker. Never blocks on the worker.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        state.items.push_back(item);
        self.cond.notify_one();
    }

    /// Worker side: marks the previous item done, then waits for the next.
    /// Returns `None` once `stop` is set; anything still queued is dropped.
    pub fn pop(&self, stop: &AtomicBool) -> Option<T> {
        let mut state = self.state.lock();
        state.busy = false;

        loop {
            if stop.load(Ordering::Acquire) {
                state.items.clear();
                self.idle.notify_all();
                return None;
            }

            if let Some(item) = state.items.pop_front() {
                state.busy = true;
                return Some(item);
            }

            self.idle.notify_all();
            self.cond.wait(&mut state);
        }
    }

    /// Blocks until the queue is empty and the worker is not processing an item.
    pub fn wait_idle(&self, stop: &AtomicBool) {
        let mut state = self.state.lock();
        while (state.busy || !state.items.is_empty()) && !stop.load(Ordering::Acquire) {
            self.idle.wait(&mut state);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Held by shutdown while the stop flag flips, so no worker can miss the wakeup.
    pub fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock()
    }

    pub fn wake_all(&self) {
        self.cond.notify_all();
        self.idle.notify_all();
    }
}
