// Free-space pool for the FAT16 allocator
//
// The pool is an immutable, ascending linked list of free cluster numbers.
// Allocation walks `count` nodes from the current head without holding any
// lock, then publishes the node it stopped at as the new head with a
// compare-and-set on pointer identity. A losing thread simply retries
// against the fresher head, so two callers can never claim the same node.
//
// The head is published through a mutex that is only held for the load and
// the compare-and-set themselves (never across a walk, a table scan or I/O).

use dosvol_core::{DosError, DosResult};
use log::{debug, trace};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

struct FreeNode {
    cluster: u16,
    /// Number of nodes from this one to the end of the list, inclusive.
    remaining: usize,
    next: Option<Arc<FreeNode>>,
}

impl Drop for FreeNode {
    // Unlink iteratively; a 65k node chain would overflow the stack otherwise.
    fn drop(&mut self) {
        let mut next = self.next.take();
        while let Some(node) = next {
            match Arc::try_unwrap(node) {
                Ok(mut owned) => next = owned.next.take(),
                Err(_) => break,
            }
        }
    }
}

type Head = Option<Arc<FreeNode>>;

fn same_head(a: &Head, b: &Head) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn build_list(ascending: &[u16]) -> Head {
    let mut head: Head = None;
    for (i, &cluster) in ascending.iter().enumerate().rev() {
        head = Some(Arc::new(FreeNode {
            cluster,
            remaining: ascending.len() - i,
            next: head,
        }));
    }
    head
}

struct PoolState {
    head: Head,
    /// Clusters handed out by `claim` that have not been linked into the
    /// table yet. A rescan must not hand them out again.
    reserved: HashSet<u16>,
}

pub struct FreeSpacePool {
    state: Mutex<PoolState>,
}

impl FreeSpacePool {
    /// Build a pool from free cluster numbers in ascending order.
    pub fn new(ascending: &[u16]) -> Self {
        Self {
            state: Mutex::new(PoolState {
                head: build_list(ascending),
                reserved: HashSet::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // The guarded state is always left consistent, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self) -> Head {
        self.lock().head.clone()
    }

    /// Number of clusters currently available.
    pub fn count(&self) -> usize {
        self.lock().head.as_ref().map_or(0, |node| node.remaining)
    }

    /// Reserve `count` clusters. Returns them in pool (ascending) order.
    pub fn claim(&self, count: usize) -> DosResult<Vec<u16>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let head = self.load();
            let available = head.as_ref().map_or(0, |node| node.remaining);
            if count > available {
                return Err(DosError::InsufficientSpace { requested: count, available });
            }

            let mut claimed = Vec::with_capacity(count);
            let mut cursor = head.clone();
            for _ in 0..count {
                match cursor.take() {
                    Some(node) => {
                        claimed.push(node.cluster);
                        cursor = node.next.clone();
                    }
                    None => break,
                }
            }
            if claimed.len() < count {
                // `remaining` promised more nodes than the list holds; treat as a lost race.
                continue;
            }

            let mut state = self.lock();
            if same_head(&state.head, &head) {
                state.head = cursor;
                state.reserved.extend(claimed.iter().copied());
                drop(state);
                if attempts > 1 {
                    trace!("claimed {} clusters after {} attempts", count, attempts);
                }
                return Ok(claimed);
            }
        }
    }

    /// Forget reservations for clusters that are now linked in the table.
    pub fn settle(&self, clusters: &[u16]) {
        let mut state = self.lock();
        for cluster in clusters {
            state.reserved.remove(cluster);
        }
    }

    /// Replace the pool with the result of a full table rescan.
    ///
    /// `freed` clusters lose any outstanding reservation first. `rescan`
    /// receives the reservations still in flight and must return the free
    /// clusters, ascending, that are not among them. If a concurrent claim
    /// moves the head while the rescan runs, the rescan is repeated.
    pub fn rebuild<F>(&self, freed: &[u16], rescan: F)
    where
        F: Fn(&HashSet<u16>) -> Vec<u16>,
    {
        self.settle(freed);
        loop {
            let (head, reserved) = {
                let state = self.lock();
                (state.head.clone(), state.reserved.clone())
            };
            let fresh = build_list(&rescan(&reserved));

            let mut state = self.lock();
            if same_head(&state.head, &head) {
                let count = fresh.as_ref().map_or(0, |node| node.remaining);
                state.head = fresh;
                drop(state);
                debug!("free-space pool rebuilt with {} clusters", count);
                return;
            }
        }
    }

    /// Clusters claimed but not yet settled.
    pub fn reserved_count(&self) -> usize {
        self.lock().reserved.len()
    }
}
