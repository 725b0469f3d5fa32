//! Request/queue engine (C2): asynchronous request objects and per-disk
//! worker pools, grounded on the teacher's `engine/mod.rs` dispatch pattern
//! and `original_source/io/request_queue_impl_worker.cpp`/`request.h`.
//!
//! Per SPEC_FULL.md section 9, several source queue implementations
//! (`linuxaio_queue`, `aio_queue`) duplicate post/wait thread logic with
//! subtly different termination signalling; this unifies them into one
//! `DiskQueue` shape shared by every backend, parked on a `Condvar` rather
//! than busy-waiting.

use crate::error::Error;
use crate::file::{File, FileBackend};
use crate::stats::IoStats;
use crate::util::counting_ptr::CountingPtr;
use crate::util::onoff::OnOffSwitch;
use crate::Result;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// What operation a request performs.
enum Op {
    Read { offset: u64, buf: Vec<u8> },
    Write { offset: u64, data: Vec<u8> },
}

/// Request lifecycle, per SPEC_FULL.md section 4.4's state table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Queued,
    InFlight,
    Done,
}

struct RequestInner {
    state: Mutex<RequestState>,
    done: Condvar,
    op: Mutex<Option<Op>>,
    result: Mutex<Option<Result<Vec<u8>>>>,
    cancelled: AtomicBool,
    on_done: Mutex<Vec<Arc<OnOffSwitch>>>,
}

/// A single asynchronous I/O request. Cloning shares the same underlying
/// state (handles are cheap references, like the original's `request_ptr`).
#[derive(Clone)]
pub struct RequestHandle {
    inner: Arc<RequestInner>,
    file: CountingPtr<File>,
}

impl RequestHandle {
    fn new_read(file: CountingPtr<File>, offset: u64, len: usize) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                state: Mutex::new(RequestState::Queued),
                done: Condvar::new(),
                op: Mutex::new(Some(Op::Read {
                    offset,
                    buf: vec![0u8; len],
                })),
                result: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                on_done: Mutex::new(Vec::new()),
            }),
            file,
        }
    }

    fn new_write(file: CountingPtr<File>, offset: u64, data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                state: Mutex::new(RequestState::Queued),
                done: Condvar::new(),
                op: Mutex::new(Some(Op::Write { offset, data })),
                result: Mutex::new(None),
                cancelled: AtomicBool::new(false),
                on_done: Mutex::new(Vec::new()),
            }),
            file,
        }
    }

    pub fn state(&self) -> RequestState {
        *self.inner.state.lock().unwrap()
    }

    pub fn poll(&self) -> bool {
        self.state() == RequestState::Done
    }

    /// Blocks until the request reaches `Done`, then returns its outcome.
    /// A read's payload is returned; a write's payload is the empty vec.
    pub fn wait(&self) -> Result<Vec<u8>> {
        let mut state = self.inner.state.lock().unwrap();
        while *state != RequestState::Done {
            state = self.inner.done.wait(state).unwrap();
        }
        drop(state);
        self.inner
            .result
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(Error::invariant("request done with no result recorded")))
    }

    pub fn completed_ok(&self) -> bool {
        self.poll() && matches!(self.inner.result.lock().unwrap().as_ref(), Some(Ok(_)))
    }

    pub fn error(&self) -> Option<String> {
        match self.inner.result.lock().unwrap().as_ref() {
            Some(Err(e)) => Some(e.to_string()),
            _ => None,
        }
    }

    /// Best-effort cancel. Returns `false` if the request was already
    /// `Done` (including an earlier cancel), matching idempotency invariant
    /// 7 in SPEC_FULL.md section 8.
    fn cancel(&self) -> bool {
        if self.poll() {
            return false;
        }
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let mut state = self.inner.state.lock().unwrap();
        if *state == RequestState::Queued {
            *state = RequestState::Done;
            drop(state);
            *self.inner.result.lock().unwrap() = Some(Err(Error::Cancelled));
            self.inner.done.notify_all();
            self.notify_switches();
            return true;
        }
        // already in flight; the backend on this queue has no native
        // cancellation, so the request runs to completion and is tagged
        // Cancelled only if it had not yet started the I/O.
        false
    }

    fn register_switch(&self, switch: Arc<OnOffSwitch>) {
        let mut switches = self.inner.on_done.lock().unwrap();
        if self.poll() {
            switch.on();
        } else {
            switches.push(switch);
        }
    }

    fn notify_switches(&self) {
        let switches = std::mem::take(&mut *self.inner.on_done.lock().unwrap());
        for s in switches {
            s.on();
        }
    }

    fn run(&self, stats: &IoStats) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state == RequestState::Done {
                return;
            }
            *state = RequestState::InFlight;
        }

        let op = self.inner.op.lock().unwrap().take();
        let outcome = match op {
            Some(Op::Read { offset, mut buf }) => {
                stats.read_started(buf.len());
                let started = std::time::Instant::now();
                let r = self
                    .file
                    .backend()
                    .read_at(&mut buf, offset)
                    .map(|n| {
                        buf.truncate(n);
                        buf
                    });
                stats.read_finished(started.elapsed());
                r
            }
            Some(Op::Write { offset, data }) => {
                stats.write_started(data.len());
                let started = std::time::Instant::now();
                let r = self
                    .file
                    .backend()
                    .write_at(&data, offset)
                    .map(|_| Vec::new());
                stats.write_finished(started.elapsed());
                r
            }
            None => Err(Error::invariant("request run twice")),
        };

        *self.inner.result.lock().unwrap() = Some(outcome);
        *self.inner.state.lock().unwrap() = RequestState::Done;
        self.inner.done.notify_all();
        self.notify_switches();
    }
}

/// Waits until every request in `handles` reaches `Done`.
pub fn wait_all(handles: &[RequestHandle]) {
    let switches: Vec<_> = handles
        .iter()
        .map(|_| Arc::new(OnOffSwitch::default()))
        .collect();
    for (h, s) in handles.iter().zip(&switches) {
        h.register_switch(s.clone());
    }
    for s in &switches {
        s.wait_for_on();
    }
}

/// Blocks until at least one request in `handles` is `Done`, returning its
/// index.
pub fn wait_any(handles: &[RequestHandle]) -> usize {
    let switch = Arc::new(OnOffSwitch::default());
    for h in handles {
        h.register_switch(switch.clone());
    }
    switch.wait_for_on();
    handles
        .iter()
        .position(|h| h.poll())
        .expect("wait_any woke with no request done")
}

/// A per-disk FIFO plus the post/wait worker threads that drain it.
/// Owned by `DiskQueues`, never a global singleton (SPEC_FULL.md section 9).
pub struct DiskQueue {
    waiting: Arc<Mutex<VecDeque<RequestHandle>>>,
    num_waiting: Arc<AtomicU32>,
    has_work: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<IoStats>,
    workers: Vec<JoinHandle<()>>,
}

impl DiskQueue {
    pub fn new(stats: Arc<IoStats>, num_workers: usize) -> Self {
        let waiting = Arc::new(Mutex::new(VecDeque::new()));
        let num_waiting = Arc::new(AtomicU32::new(0));
        let has_work = Arc::new(Condvar::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let waiting = waiting.clone();
            let num_waiting = num_waiting.clone();
            let has_work = has_work.clone();
            let shutdown = shutdown.clone();
            let stats = stats.clone();
            workers.push(std::thread::spawn(move || loop {
                let mut queue = waiting.lock().unwrap();
                loop {
                    if shutdown.load(Ordering::SeqCst) && queue.is_empty() {
                        return;
                    }
                    if let Some(req) = queue.pop_front() {
                        num_waiting.fetch_sub(1, Ordering::SeqCst);
                        drop(queue);
                        req.run(&stats);
                        break;
                    }
                    queue = has_work.wait(queue).unwrap();
                }
            }));
        }

        Self {
            waiting,
            num_waiting,
            has_work,
            shutdown,
            stats,
            workers,
        }
    }

    fn enqueue(&self, req: RequestHandle) -> RequestHandle {
        self.waiting.lock().unwrap().push_back(req.clone());
        self.num_waiting.fetch_add(1, Ordering::SeqCst);
        self.has_work.notify_one();
        req
    }

    pub fn async_read(&self, file: CountingPtr<File>, offset: u64, len: usize) -> RequestHandle {
        self.enqueue(RequestHandle::new_read(file, offset, len))
    }

    pub fn async_write(&self, file: CountingPtr<File>, offset: u64, data: Vec<u8>) -> RequestHandle {
        self.enqueue(RequestHandle::new_write(file, offset, data))
    }

    pub fn cancel(&self, handle: &RequestHandle) -> bool {
        let mut queue = self.waiting.lock().unwrap();
        if let Some(pos) = queue.iter().position(|h| Arc::ptr_eq(&h.inner, &handle.inner)) {
            queue.remove(pos);
            self.num_waiting.fetch_sub(1, Ordering::SeqCst);
            drop(queue);
            handle.cancel();
            true
        } else {
            drop(queue);
            handle.cancel()
        }
    }

    pub fn num_waiting(&self) -> u32 {
        self.num_waiting.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &IoStats {
        &*self.stats
    }
}

impl Drop for DiskQueue {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.has_work.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Registry mapping `queue_id` to its worker pool. Constructed once as part
/// of `Environment`; owned, not global.
pub struct DiskQueues {
    queues: Mutex<std::collections::HashMap<u32, Arc<DiskQueue>>>,
    stats: Arc<IoStats>,
}

impl DiskQueues {
    pub fn new(stats: Arc<IoStats>) -> Self {
        Self {
            queues: Mutex::new(std::collections::HashMap::new()),
            stats,
        }
    }

    pub fn get_or_create(&self, queue_id: u32, num_workers: usize) -> Arc<DiskQueue> {
        let mut queues = self.queues.lock().unwrap();
        queues
            .entry(queue_id)
            .or_insert_with(|| Arc::new(DiskQueue::new(self.stats.clone(), num_workers)))
            .clone()
    }
}
