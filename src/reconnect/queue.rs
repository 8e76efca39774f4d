//! Bounded blocking queue between the record producer and the tree
//! applier.
//!
//! Single producer, single consumer. `supply` blocks while the queue is
//! full; `next` blocks while it is empty and still open. Closing the
//! queue lets the consumer drain what is already buffered, after which
//! `next` reports end of stream. Every blocking call carries the
//! configured timeout; the protocol has its own liveness checks, so a
//! timeout here is fatal to the session.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::Error;

struct State<T> {
    items: VecDeque<T>,
    closed: bool,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    timeout: Duration,
}

pub struct BlockingQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for BlockingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> BlockingQueue<T> {
    pub fn new(capacity: usize, timeout: Duration) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument(
                "queue capacity must be positive".to_string(),
            ));
        }
        if timeout.is_zero() {
            return Err(Error::InvalidArgument(
                "queue timeout must be positive".to_string(),
            ));
        }
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    items: VecDeque::with_capacity(capacity),
                    closed: false,
                }),
                not_empty: Condvar::new(),
                not_full: Condvar::new(),
                capacity,
                timeout,
            }),
        })
    }

    /// Enqueues an item, blocking while the queue is full.
    pub fn supply(&self, item: T) -> Result<()> {
        let deadline = Instant::now() + self.shared.timeout;
        let mut state = self
            .shared
            .state
            .lock()
            .map_err(|_| Error::MutexPoisoned)?;
        loop {
            if state.closed {
                return Err(Error::InvalidState(
                    "supply on a closed queue".to_string(),
                ));
            }
            if state.items.len() < self.shared.capacity {
                state.items.push_back(item);
                self.shared.not_empty.notify_one();
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let (guard, _) = self
                .shared
                .not_full
                .wait_timeout(state, deadline - now)
                .map_err(|_| Error::MutexPoisoned)?;
            state = guard;
        }
    }

    /// Dequeues the next item, blocking while the queue is open and
    /// empty. A closed and drained queue yields `EndOfStream`.
    pub fn next(&self) -> Result<T> {
        let deadline = Instant::now() + self.shared.timeout;
        let mut state = self
            .shared
            .state
            .lock()
            .map_err(|_| Error::MutexPoisoned)?;
        loop {
            if let Some(item) = state.items.pop_front() {
                self.shared.not_full.notify_one();
                return Ok(item);
            }
            if state.closed {
                return Err(Error::EndOfStream);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let (guard, _) = self
                .shared
                .not_empty
                .wait_timeout(state, deadline - now)
                .map_err(|_| Error::MutexPoisoned)?;
            state = guard;
        }
    }

    /// Whether another item will arrive, blocking like `next` while the
    /// answer is undecided.
    pub fn has_next(&self) -> Result<bool> {
        let deadline = Instant::now() + self.shared.timeout;
        let mut state = self
            .shared
            .state
            .lock()
            .map_err(|_| Error::MutexPoisoned)?;
        loop {
            if !state.items.is_empty() {
                return Ok(true);
            }
            if state.closed {
                return Ok(false);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let (guard, _) = self
                .shared
                .not_empty
                .wait_timeout(state, deadline - now)
                .map_err(|_| Error::MutexPoisoned)?;
            state = guard;
        }
    }

    /// Marks the queue closed. Buffered items stay consumable.
    pub fn close(&self) {
        if let Ok(mut state) = self.shared.state.lock() {
            state.closed = true;
        }
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
    }
}
