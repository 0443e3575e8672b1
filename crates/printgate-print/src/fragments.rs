// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Chunked-upload reassembly state and its expiry watchdog.
//
// Large submissions may arrive in numbered fragments. Each fragment id owns
// one entry that is refreshed on every chunk and removed when the payload is
// complete. Transfers that are abandoned half way are swept by the watchdog,
// which only runs while there is something to sweep.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use printgate_core::config::FragmentWatchConfig;
use printgate_core::error::{PrintgateError, Result};

/// Partially received payload for one fragment id.
#[derive(Debug)]
pub struct FragmentEntry {
    chunks: BTreeMap<u32, Vec<u8>>,
    total: u32,
    /// Time the last chunk arrived.
    pub update_time: Instant,
}

impl FragmentEntry {
    fn is_complete(&self) -> bool {
        self.chunks.len() as u32 == self.total
    }

    fn assemble(self) -> Vec<u8> {
        self.chunks.into_values().flatten().collect()
    }
}

/// Shared fragment mapping. Clones refer to the same map.
#[derive(Debug, Clone, Default)]
pub struct FragmentStore {
    entries: Arc<Mutex<HashMap<String, FragmentEntry>>>,
}

impl FragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, FragmentEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store chunk `index` of `total` for `id` and refresh its update time.
    ///
    /// Returns the reassembled payload, in index order, once every chunk has
    /// arrived; the entry is removed at that point. A repeated index
    /// overwrites the earlier chunk.
    pub fn upsert_chunk(
        &self,
        id: &str,
        index: u32,
        total: u32,
        bytes: Vec<u8>,
    ) -> Result<Option<Vec<u8>>> {
        if id.is_empty() {
            return Err(PrintgateError::Parameter("fragment id is empty".into()));
        }
        if total == 0 || index >= total {
            return Err(PrintgateError::Parameter(format!(
                "fragment index {index} out of range for total {total}"
            )));
        }

        let mut entries = self.entries();
        let entry = entries.entry(id.to_owned()).or_insert_with(|| FragmentEntry {
            chunks: BTreeMap::new(),
            total,
            update_time: Instant::now(),
        });
        if entry.total != total {
            return Err(PrintgateError::Parameter(format!(
                "fragment {id} announced {} chunks, now {total}",
                entry.total
            )));
        }
        entry.chunks.insert(index, bytes);
        entry.update_time = Instant::now();

        if entry.is_complete() {
            let done = entries.remove(id).map(FragmentEntry::assemble);
            debug!(fragment_id = id, total, "fragment reassembled");
            return Ok(done);
        }
        Ok(None)
    }

    pub fn remove(&self, id: &str) -> bool {
        self.entries().remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delete every entry idle for longer than `expire`. Returns how many
    /// were removed.
    pub fn sweep_expired(&self, expire: Duration) -> usize {
        sweep_locked(&mut self.entries(), expire)
    }
}

fn sweep_locked(entries: &mut HashMap<String, FragmentEntry>, expire: Duration) -> usize {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|id, entry| {
        let keep = now.duration_since(entry.update_time) <= expire;
        if !keep {
            debug!(fragment_id = %id, "dropping stale fragment");
        }
        keep
    });
    before - entries.len()
}

/// Lazy sweeper over a [`FragmentStore`].
///
/// At most one sweep cycle exists at a time. The cycle re-arms itself after
/// each sweep only while the store is non-empty; chunk inserts start it again.
#[derive(Debug)]
pub struct FragmentWatchdog {
    store: FragmentStore,
    check_interval: Duration,
    expire: Duration,
    watching: Arc<AtomicBool>,
    sweeps: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FragmentWatchdog {
    pub fn new(store: FragmentStore, check_interval: Duration, expire: Duration) -> Self {
        if expire <= check_interval {
            warn!(
                ?check_interval,
                ?expire,
                "fragment expiry does not exceed the sweep interval; entries may live up to twice as long as configured"
            );
        }
        Self {
            store,
            check_interval,
            expire,
            watching: Arc::new(AtomicBool::new(false)),
            sweeps: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(None),
        }
    }

    pub fn from_config(store: FragmentStore, config: &FragmentWatchConfig) -> Self {
        Self::new(store, config.check_interval(), config.expire())
    }

    pub fn store(&self) -> &FragmentStore {
        &self.store
    }

    /// Whether a sweep cycle is currently scheduled.
    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    /// Number of sweeps performed since construction.
    pub fn sweep_count(&self) -> u64 {
        self.sweeps.load(Ordering::SeqCst)
    }

    /// Accept a chunk and make sure a sweep cycle is running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn accept_chunk(
        &self,
        id: &str,
        index: u32,
        total: u32,
        bytes: Vec<u8>,
    ) -> Result<Option<Vec<u8>>> {
        let assembled = self.store.upsert_chunk(id, index, total, bytes)?;
        if !self.store.is_empty() {
            self.start_watch();
        }
        Ok(assembled)
    }

    /// Schedule a sweep cycle unless one is already scheduled.
    ///
    /// Returns `true` when this call started the cycle. Must be called from
    /// within a Tokio runtime.
    pub fn start_watch(&self) -> bool {
        if self.watching.swap(true, Ordering::SeqCst) {
            return false;
        }

        let store = self.store.clone();
        let watching = Arc::clone(&self.watching);
        let sweeps = Arc::clone(&self.sweeps);
        let interval = self.check_interval;
        let expire = self.expire;

        debug!(?interval, ?expire, "fragment watchdog armed");
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                sweeps.fetch_add(1, Ordering::SeqCst);

                // Emptiness and the flag change together under the store lock,
                // so an insert racing with the last sweep still re-arms us.
                let idle = {
                    let mut entries = store.entries();
                    let removed = sweep_locked(&mut entries, expire);
                    if removed > 0 {
                        info!(removed, remaining = entries.len(), "expired fragments swept");
                    }
                    if entries.is_empty() {
                        watching.store(false, Ordering::SeqCst);
                    }
                    entries.is_empty()
                };
                if idle {
                    debug!("fragment store empty, watchdog idle");
                    break;
                }
            }
        });

        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(handle);
        true
    }

    /// Cancel the pending cycle, if any.
    pub fn stop(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.watching.store(false, Ordering::SeqCst);
    }
}

impl Drop for FragmentWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}
