/*
 *  bus/arbiter.rs
 *
 *  deejdsp - displays and SD card over the deej serial link
 *  (c) 2020-26 Stuart Hunter
 *
 *  FIFO arbitration of the single serial link
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use log::trace;
use tokio::sync::oneshot;

/// Shared bus state. `busy` is held by exactly one client at a time and
/// `waiters` is granted strictly front to back.
#[derive(Debug, Default)]
struct BusState {
    busy: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Grants exclusive use of the bus to one logical client at a time.
///
/// Callers wait without a deadline for the bus itself; only the command run
/// once the bus is granted is timeout bounded. Acquisition is not re-entrant.
#[derive(Debug, Clone, Default)]
pub struct BusArbiter {
    state: Arc<Mutex<BusState>>,
}

impl BusArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        // state is only ever mutated with plain field writes, a poisoned
        // lock still holds a consistent queue
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until this caller is the sole holder of the bus.
    ///
    /// The returned guard releases the bus when dropped, so release happens
    /// exactly once per acquisition on every exit path.
    pub async fn acquire(&self) -> BusGuard {
        let ticket = {
            let mut state = self.lock();
            if !state.busy {
                state.busy = true;
                trace!("bus idle, granted immediately");
                return BusGuard { arbiter: self.clone() };
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            trace!("bus busy, queued at position {}", state.waiters.len());
            Ticket { rx: Some(rx), arbiter: self.clone() }
        };
        ticket.wait().await
    }

    /// Hand the bus to the next live waiter or mark it idle.
    fn release(&self) {
        let mut state = self.lock();
        while let Some(next) = state.waiters.pop_front() {
            // a waiter that gave up has dropped its receiver, skip it
            if next.send(()).is_ok() {
                trace!("bus handed over, {} still waiting", state.waiters.len());
                return;
            }
        }
        state.busy = false;
        trace!("bus idle");
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    /// Number of clients queued behind the current holder
    pub fn waiting(&self) -> usize {
        self.lock().waiters.len()
    }
}

/// Single-use wait handle for a queued client.
struct Ticket {
    rx: Option<oneshot::Receiver<()>>,
    arbiter: BusArbiter,
}

impl Ticket {
    async fn wait(mut self) -> BusGuard {
        if let Some(rx) = self.rx.as_mut() {
            // the sender lives in the queue until release() pops it, and
            // release() always sends before dropping a live sender
            let _ = rx.await;
        }
        self.rx = None;
        BusGuard { arbiter: self.arbiter.clone() }
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        // dropped while still queued: if the grant already landed nobody
        // will ever hold it, pass it straight on
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if rx.try_recv().is_ok() {
                self.arbiter.release();
            }
        }
    }
}

/// Proof of exclusive bus ownership. Dropping it releases the bus.
#[derive(Debug)]
#[must_use = "the bus is released as soon as the guard is dropped"]
pub struct BusGuard {
    arbiter: BusArbiter,
}

impl Drop for BusGuard {
    fn drop(&mut self) {
        self.arbiter.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_idle_bus_grants_immediately() {
        let arbiter = BusArbiter::new();
        assert!(!arbiter.is_busy());
        let guard = arbiter.acquire().await;
        assert!(arbiter.is_busy());
        drop(guard);
        assert!(!arbiter.is_busy());
    }

    #[tokio::test]
    async fn test_grants_in_arrival_order() {
        let arbiter = BusArbiter::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = arbiter.acquire().await;

        let mut handles = Vec::new();
        for id in 0..8 {
            let task_arbiter = arbiter.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _guard = task_arbiter.acquire().await;
                order.lock().unwrap().push(id);
                tokio::task::yield_now().await;
            }));
            // make sure each task is queued before the next one arrives
            while arbiter.waiting() < id + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(first);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), (0..8).collect::<Vec<_>>());
        assert!(!arbiter.is_busy());
        assert_eq!(arbiter.waiting(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion() {
        let arbiter = BusArbiter::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let arbiter = arbiter.clone();
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = arbiter.acquire().await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(!arbiter.is_busy());
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_skipped() {
        let arbiter = BusArbiter::new();
        let holder = arbiter.acquire().await;

        let gave_up = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move {
                let _ = tokio::time::timeout(Duration::from_millis(5), arbiter.acquire()).await;
            })
        };
        gave_up.await.unwrap();

        let patient = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move {
                let _guard = arbiter.acquire().await;
            })
        };
        while arbiter.waiting() < 2 {
            tokio::task::yield_now().await;
        }

        drop(holder);
        patient.await.unwrap();
        assert!(!arbiter.is_busy());
    }

    #[tokio::test]
    async fn test_waiter_dropped_after_grant_passes_bus_on() {
        let arbiter = BusArbiter::new();
        let holder = arbiter.acquire().await;

        // queued, but never polled again after the grant lands
        let mut granted = Box::pin(arbiter.acquire());
        assert!(tokio::time::timeout(Duration::ZERO, &mut granted).await.is_err());
        assert_eq!(arbiter.waiting(), 1);

        let next = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move {
                let _guard = arbiter.acquire().await;
            })
        };
        while arbiter.waiting() < 2 {
            tokio::task::yield_now().await;
        }

        drop(holder);
        assert!(arbiter.is_busy());
        assert_eq!(arbiter.waiting(), 1);

        drop(granted);
        next.await.unwrap();
        assert!(!arbiter.is_busy());

        // and with nobody behind it the bus goes idle
        let holder = arbiter.acquire().await;
        let mut granted = Box::pin(arbiter.acquire());
        assert!(tokio::time::timeout(Duration::ZERO, &mut granted).await.is_err());
        drop(holder);
        assert!(arbiter.is_busy());
        drop(granted);
        assert!(!arbiter.is_busy());
    }
}
