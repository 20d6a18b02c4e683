//! Shared state of the reader pipeline: two single-slot mailboxes, the
//! recycling stack, and the sticky failure flag.
//!
//! Three critical sections each protect one structure; none nests inside
//! another, and condition variables are signaled after the corresponding
//! lock is released. Single-slot mailboxes keep backpressure tight: at most
//! one chunk is in flight at each stage, so total memory stays bounded at
//! `nconsumers + 2` chunks.
//!
//! A worker that hits an unrecoverable error has no return path to
//! consumers stalled on the mailboxes, so failure is a sticky flag checked
//! at every suspension point. Once tripped, every wait returns immediately
//! and the stored cause is reported from `read` and `close`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::chunk::SeqChunk;
use crate::error::Error;

/// A single-slot mailbox. The producer writes only when the slot is empty,
/// the consumer reads only when it is full.
struct Mailbox {
    slot: Mutex<Slot>,
    full: Condvar,
    empty: Condvar,
}

#[derive(Default)]
struct Slot {
    chunk: Option<Box<SeqChunk>>,
    /// Latched by the consumer that takes the terminal chunk. Lives inside
    /// the slot so racing readers observe it under the same lock.
    at_eof: bool,
}

impl Mailbox {
    fn new() -> Mailbox {
        Mailbox {
            slot: Mutex::new(Slot::default()),
            full: Condvar::new(),
            empty: Condvar::new(),
        }
    }

    fn wake_all(&self) {
        drop(self.slot.lock());
        self.full.notify_all();
        self.empty.notify_all();
    }
}

/// What a consumer gets from the unpacker's outbox.
pub(crate) enum ConsumerTake {
    Chunk(Box<SeqChunk>),
    /// The terminal chunk; this caller latched the EOF flag and must
    /// recycle the chunk so the loader's accounting closes.
    Terminal(Box<SeqChunk>),
    AtEof,
    Stopped,
}

pub(crate) struct Exchange {
    loader_box: Mailbox,
    unpacker_box: Mailbox,
    recycling: Mutex<Vec<Box<SeqChunk>>>,
    recycled: Condvar,
    tripped: AtomicBool,
    cause: Mutex<Option<Error>>,
}

impl Exchange {
    pub(crate) fn new() -> Arc<Exchange> {
        Arc::new(Exchange {
            loader_box: Mailbox::new(),
            unpacker_box: Mailbox::new(),
            recycling: Mutex::new(Vec::new()),
            recycled: Condvar::new(),
            tripped: AtomicBool::new(false),
            cause: Mutex::new(None),
        })
    }

    /// Record a worker failure and wake every suspension point.
    pub(crate) fn poison(&self, err: Error) {
        {
            let mut cause = self.cause.lock();
            if cause.is_none() {
                *cause = Some(err);
            }
        }
        self.trip();
    }

    /// Wake every suspension point without recording an error, so workers
    /// wind down on an early close.
    pub(crate) fn shutdown(&self) {
        self.trip();
    }

    fn trip(&self) {
        self.tripped.store(true, Ordering::SeqCst);
        self.loader_box.wake_all();
        self.unpacker_box.wake_all();
        drop(self.recycling.lock());
        self.recycled.notify_all();
    }

    pub(crate) fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// The error a consumer sees once the pipeline is down.
    pub(crate) fn observe(&self) -> Error {
        match self.cause.lock().as_ref() {
            Some(err) => Error::WorkerFailed(err.to_string()),
            None => Error::Closed,
        }
    }

    pub(crate) fn take_cause(&self) -> Option<Error> {
        self.cause.lock().take()
    }

    /// Loader: hand a loaded chunk to the unpacker. `false` when stopped.
    pub(crate) fn put_loaded(&self, chu: Box<SeqChunk>) -> bool {
        self.put(&self.loader_box, chu)
    }

    /// Unpacker: the next loaded chunk. `None` when stopped.
    pub(crate) fn take_loaded(&self) -> Option<Box<SeqChunk>> {
        self.take(&self.loader_box)
    }

    /// Unpacker: hand a decoded chunk to the consumers. `false` when stopped.
    pub(crate) fn put_unpacked(&self, chu: Box<SeqChunk>) -> bool {
        self.put(&self.unpacker_box, chu)
    }

    fn put(&self, mb: &Mailbox, chu: Box<SeqChunk>) -> bool {
        let mut slot = mb.slot.lock();
        loop {
            if self.is_tripped() {
                return false;
            }
            if slot.chunk.is_none() {
                slot.chunk = Some(chu);
                drop(slot);
                mb.full.notify_one();
                return true;
            }
            mb.empty.wait(&mut slot);
        }
    }

    fn take(&self, mb: &Mailbox) -> Option<Box<SeqChunk>> {
        let mut slot = mb.slot.lock();
        loop {
            if self.is_tripped() {
                return None;
            }
            if let Some(chu) = slot.chunk.take() {
                drop(slot);
                mb.empty.notify_one();
                return Some(chu);
            }
            mb.full.wait(&mut slot);
        }
    }

    /// Consumer: the next decoded chunk. The terminal chunk latches the EOF
    /// flag under the outbox lock, and every other consumer racing it, or
    /// arriving later, observes `AtEof` without touching the pipeline.
    pub(crate) fn next_unpacked(&self) -> ConsumerTake {
        let mb = &self.unpacker_box;
        let mut slot = mb.slot.lock();
        loop {
            if self.is_tripped() {
                return ConsumerTake::Stopped;
            }
            if slot.at_eof {
                return ConsumerTake::AtEof;
            }
            if let Some(chu) = slot.chunk.take() {
                if chu.n == 0 {
                    slot.at_eof = true;
                    drop(slot);
                    // Wake the other waiting consumers to see the latch.
                    mb.full.notify_all();
                    return ConsumerTake::Terminal(chu);
                }
                drop(slot);
                mb.empty.notify_one();
                return ConsumerTake::Chunk(chu);
            }
            mb.full.wait(&mut slot);
        }
    }

    /// Whether a consumer has observed end of data.
    pub(crate) fn saw_eof(&self) -> bool {
        self.unpacker_box.slot.lock().at_eof
    }

    /// Push a chunk back for reuse. Constant time, never blocks.
    pub(crate) fn recycle(&self, chu: Box<SeqChunk>) {
        self.recycling.lock().push(chu);
        self.recycled.notify_one();
    }

    /// Loader: pop one recycled chunk, waiting for a consumer to push.
    /// `None` when stopped.
    pub(crate) fn pop_recycled(&self) -> Option<Box<SeqChunk>> {
        let mut stack = self.recycling.lock();
        loop {
            if self.is_tripped() {
                return None;
            }
            if let Some(chu) = stack.pop() {
                return Some(chu);
            }
            self.recycled.wait(&mut stack);
        }
    }

    /// Loader, at end of data: take everything currently in the recycling
    /// stack, waiting until it is non-empty. `None` when stopped.
    pub(crate) fn drain_recycled(&self) -> Option<Vec<Box<SeqChunk>>> {
        let mut stack = self.recycling.lock();
        loop {
            if self.is_tripped() {
                return None;
            }
            if !stack.is_empty() {
                return Some(std::mem::take(&mut *stack));
            }
            self.recycled.wait(&mut stack);
        }
    }

    /// True when no chunk is parked anywhere in the pipeline.
    pub(crate) fn is_drained(&self) -> bool {
        self.loader_box.slot.lock().chunk.is_none()
            && self.unpacker_box.slot.lock().chunk.is_none()
            && self.recycling.lock().is_empty()
    }
}
