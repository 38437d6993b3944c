//! Deferred Work
//!
//! Objects must never block the frame loop. Slow work (file reads, network
//! fetches, decoding) runs on a worker thread and hands its single result back
//! through a one-slot lock-free queue that the object polls each frame.
//!
//! The worker is tied to the owning object's [`Liveness`]: if the object is
//! erased before the work finishes, the result is discarded instead of
//! delivered.

use crate::object::Liveness;
use rtrb::{Consumer, RingBuffer};
use std::io;
use std::thread;

/// Result of background work, polled from the frame thread
pub struct Deferred<T> {
    consumer: Consumer<T>,
    liveness: Liveness,
    taken: bool,
}

impl<T: Send + 'static> Deferred<T> {
    /// Run `work` on a new thread. The closure may check the liveness flag
    /// to stop early.
    pub fn spawn<F>(liveness: Liveness, work: F) -> io::Result<Self>
    where
        F: FnOnce(&Liveness) -> T + Send + 'static,
    {
        let (mut producer, consumer) = RingBuffer::new(1);
        let worker_liveness = liveness.clone();

        thread::Builder::new()
            .name("trellis-deferred".into())
            .spawn(move || {
                if !worker_liveness.is_alive() {
                    return;
                }
                let result = work(&worker_liveness);
                if worker_liveness.is_alive() {
                    // Single push into an empty slot cannot fail
                    let _ = producer.push(result);
                } else {
                    tracing::debug!("deferred result dropped, owner erased");
                }
            })?;

        Ok(Self {
            consumer,
            liveness,
            taken: false,
        })
    }
}

impl<T> Deferred<T> {
    /// Take the result if it is ready. Returns `Some` at most once.
    pub fn poll(&mut self) -> Option<T> {
        if self.taken {
            return None;
        }
        let value = self.consumer.pop().ok()?;
        self.taken = true;
        Some(value)
    }

    /// Work still running, or finished with an untaken result
    pub fn is_pending(&self) -> bool {
        !self.taken && (!self.consumer.is_abandoned() || !self.consumer.is_empty())
    }

    /// The worker finished without producing a result (its owner was erased)
    pub fn is_abandoned(&self) -> bool {
        !self.taken && self.consumer.is_abandoned() && self.consumer.is_empty()
    }

    pub fn is_owner_alive(&self) -> bool {
        self.liveness.is_alive()
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("pending", &self.is_pending())
            .field("taken", &self.taken)
            .finish()
    }
}
