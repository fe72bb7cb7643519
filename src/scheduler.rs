// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 U.S. Federal Government (in countries where recognized)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Level-triggered reconciliation scheduling.
//!
//! [`WorkQueue`] hands out object keys to workers with two guarantees:
//! a key waiting in the queue appears once no matter how often it is
//! added, and a key is never held by two workers at once. A key added
//! while it is being processed is parked and queued again on
//! [`WorkQueue::done`].
//!
//! [`Controller`] runs a [`Reconciler`] over a queue with a fixed number of
//! workers until its cancellation token fires.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::error::ErrorClass;
use crate::reconcile::{Action, Reconciler};
use crate::types::ObjectKey;

struct QueueState<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    failures: HashMap<K, u32>,
}

impl<K> Default for QueueState<K> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            failures: HashMap::new(),
        }
    }
}

/// De-duplicating, per-key serialized work queue with exponential backoff.
pub struct WorkQueue<K> {
    state: Mutex<QueueState<K>>,
    notify: Notify,
    shutdown: CancellationToken,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + Send + 'static,
{
    /// Create a queue with the given per-key backoff bounds.
    pub fn new(initial_backoff: Duration, max_backoff: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            shutdown: CancellationToken::new(),
            initial_backoff,
            max_backoff,
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<K>> {
        // No operation leaves the state half-updated, so poisoning is ignored.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `key` unless it is already waiting.
    pub fn add(&self, key: K) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let mut state = self.lock();
        if !state.dirty.insert(key.clone()) {
            return;
        }
        if !state.processing.contains(&key) {
            state.queue.push_back(key);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Queue `key` once `delay` has elapsed.
    pub fn add_after(self: &Arc<Self>, key: K, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = queue.shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Queue `key` after its next backoff delay and return that delay.
    ///
    /// The delay doubles with each call until [`WorkQueue::forget`].
    pub fn add_rate_limited(self: &Arc<Self>, key: K) -> Duration {
        let delay = {
            let mut state = self.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = backoff(self.initial_backoff, self.max_backoff, *failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(key, delay);
        delay
    }

    /// Reset the backoff of `key`.
    pub fn forget(&self, key: &K) {
        self.lock().failures.remove(key);
    }

    /// Number of consecutive failures recorded for `key`.
    pub fn failures(&self, key: &K) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Number of keys waiting to be processed.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    /// Returns true if no key is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for the next key. Returns `None` once the queue is shut down.
    ///
    /// The caller must pass the key to [`WorkQueue::done`] when finished.
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shutdown.is_cancelled() {
                return None;
            }
            {
                let mut state = self.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return None,
                _ = notified.as_mut() => {}
            }
        }
    }

    /// Mark `key` as no longer being processed.
    pub fn done(&self, key: &K) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and drop pending delayed adds.
    pub fn shut_down(&self) {
        self.shutdown.cancel();
        self.notify.notify_waiters();
    }
}

/// Exponential backoff: `initial * 2^failures`, capped at `max`.
pub fn backoff(initial: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 2u32.checked_pow(failures.min(31)).unwrap_or(u32::MAX);
    initial.checked_mul(factor).map_or(max, |d| d.min(max))
}

/// Runs a reconciler over a work queue.
pub struct Controller {
    reconciler: Arc<dyn Reconciler>,
    queue: Arc<WorkQueue<ObjectKey>>,
    workers: usize,
}

impl Controller {
    /// Create a controller with its own queue.
    pub fn new(reconciler: Arc<dyn Reconciler>, config: &SchedulerConfig) -> Self {
        Self {
            reconciler,
            queue: WorkQueue::new(config.initial_backoff(), config.max_backoff()),
            workers: config.workers.max(1),
        }
    }

    /// The queue feeding this controller.
    pub fn queue(&self) -> Arc<WorkQueue<ObjectKey>> {
        Arc::clone(&self.queue)
    }

    /// Queue every key in `keys`.
    pub fn enqueue_all(&self, keys: impl IntoIterator<Item = ObjectKey>) {
        for key in keys {
            self.queue.add(key);
        }
    }

    /// Process keys until `cancel` fires.
    ///
    /// In-flight passes observe the same token and abort their HTTP
    /// exchange; nothing is persisted for an aborted pass.
    pub async fn run(self, cancel: CancellationToken) {
        let name = self.reconciler.name();
        tracing::info!(controller = name, workers = self.workers, "Starting controller");

        let mut handles = Vec::with_capacity(self.workers);
        for _ in 0..self.workers {
            let reconciler = Arc::clone(&self.reconciler);
            let queue = Arc::clone(&self.queue);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    process(reconciler.as_ref(), &queue, &key, &cancel).await;
                    queue.done(&key);
                }
            }));
        }

        cancel.cancelled().await;
        self.queue.shut_down();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(controller = name, "Worker terminated abnormally: {}", e);
            }
        }
        tracing::info!(controller = name, "Controller stopped");
    }
}

async fn process(
    reconciler: &dyn Reconciler,
    queue: &Arc<WorkQueue<ObjectKey>>,
    key: &ObjectKey,
    cancel: &CancellationToken,
) {
    let name = reconciler.name();
    match reconciler.reconcile(key, cancel).await {
        Ok(Action::Done) => queue.forget(key),
        Ok(Action::RequeueAfter(delay)) => {
            queue.forget(key);
            tracing::debug!(controller = name, key = %key, "Requeue in {:?}", delay);
            queue.add_after(key.clone(), delay);
        }
        Err(e) => match e.class() {
            ErrorClass::Cancelled => {
                tracing::info!(controller = name, key = %key, "Reconciliation cancelled");
            }
            ErrorClass::Config => {
                queue.forget(key);
                tracing::warn!(
                    controller = name,
                    key = %key,
                    "Reconciliation failed, waiting for a change: {}",
                    e
                );
            }
            _ => {
                let delay = queue.add_rate_limited(key.clone());
                tracing::warn!(
                    controller = name,
                    key = %key,
                    "Reconciliation failed, retrying in {:?}: {}",
                    delay,
                    e
                );
            }
        },
    }
}
