use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;

use crate::models::BucketKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Queued,
    Running,
    /// Requested again while running; requeued once on finish
    RunningDirty,
}

#[derive(Default)]
struct Inner {
    slots: HashMap<BucketKey, Slot>,
    ready: VecDeque<BucketKey>,
}

/// Recompute requests keyed by bucket.
///
/// A bucket is either absent, queued once, or running; requests for a queued
/// or running bucket coalesce instead of piling up.
#[derive(Default)]
pub struct RecomputeQueue {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl RecomputeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ask for `key` to be recomputed. Returns false when coalesced.
    pub fn request(&self, key: BucketKey) -> bool {
        let mut inner = self.inner();
        match inner.slots.get(&key).copied() {
            None => {
                inner.slots.insert(key.clone(), Slot::Queued);
                inner.ready.push_back(key);
                drop(inner);
                self.notify.notify_one();
                true
            }
            Some(Slot::Running) => {
                inner.slots.insert(key, Slot::RunningDirty);
                false
            }
            Some(Slot::Queued) | Some(Slot::RunningDirty) => false,
        }
    }

    /// Claim the next queued bucket, marking it running
    pub fn take(&self) -> Option<BucketKey> {
        let mut inner = self.inner();
        let key = inner.ready.pop_front()?;
        inner.slots.insert(key.clone(), Slot::Running);
        Some(key)
    }

    /// Release a running bucket; requeues it if it was requested meanwhile
    pub fn finish(&self, key: &BucketKey) {
        let mut inner = self.inner();
        match inner.slots.get(key).copied() {
            Some(Slot::RunningDirty) => {
                inner.slots.insert(key.clone(), Slot::Queued);
                inner.ready.push_back(key.clone());
                drop(inner);
                self.notify.notify_one();
            }
            Some(Slot::Running) => {
                inner.slots.remove(key);
            }
            _ => {}
        }
    }

    /// Wait for the next queued bucket
    pub async fn next(&self) -> BucketKey {
        loop {
            let notified = self.notify.notified();
            if let Some(key) = self.take() {
                return key;
            }
            notified.await;
        }
    }

    /// Buckets queued or running
    pub fn pending(&self) -> usize {
        self.inner().slots.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }
}
