//! Per-channel operation locks. Acquisition never waits: a held lock is
//! reported as a busy channel straight away.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use tracing::debug;

use crate::{types::ChannelId, Error, Result};

/// Process-wide table of held channel locks, keyed by channel id. An entry
/// exists exactly while its lock is held.
#[derive(Clone, Debug, Default)]
pub struct ChannelLockManager {
    held: Arc<Mutex<HashSet<ChannelId>>>,
}

impl ChannelLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashSet<ChannelId>> {
        self.held.lock().expect("channel lock table poisoned")
    }

    /// Takes the lock of `channel_id` if it is free.
    pub fn try_acquire(&self, channel_id: &ChannelId) -> bool {
        let acquired = self.table().insert(*channel_id);
        debug!(channel_id = %channel_id, acquired, "Try acquiring channel lock");
        acquired
    }

    /// Releases a lock taken with [`Self::try_acquire`].
    ///
    /// # Panics
    ///
    /// Releasing a lock that is not held is a bookkeeping bug and aborts.
    pub fn release(&self, channel_id: &ChannelId) {
        let released = self.table().remove(channel_id);
        assert!(released, "released channel lock {} which is not held", channel_id);
        debug!(channel_id = %channel_id, "Released channel lock");
    }

    pub fn is_locked(&self, channel_id: &ChannelId) -> bool {
        self.table().contains(channel_id)
    }

    pub fn held_count(&self) -> usize {
        self.table().len()
    }

    /// Takes the lock of `channel_id` for the lifetime of the returned guard.
    pub fn try_lock(&self, channel_id: &ChannelId) -> Result<ChannelLockGuard> {
        if self.try_acquire(channel_id) {
            Ok(ChannelLockGuard {
                manager: self.clone(),
                channel_ids: vec![*channel_id],
            })
        } else {
            Err(Error::ChannelBusy(*channel_id))
        }
    }

    /// Takes every lock in `channel_ids`, in order. If one is busy, the locks
    /// already taken by this call are released before the error is returned.
    pub fn acquire_all_or_none(&self, channel_ids: &[ChannelId]) -> Result<ChannelLockGuard> {
        let mut seen = HashSet::new();
        let guards = channel_ids
            .iter()
            .filter(|channel_id| seen.insert(**channel_id))
            .map(|channel_id| self.try_lock(channel_id))
            .collect::<Result<Vec<_>>>()?;
        let channel_ids = guards
            .into_iter()
            .flat_map(|mut guard| std::mem::take(&mut guard.channel_ids))
            .collect();
        Ok(ChannelLockGuard {
            manager: self.clone(),
            channel_ids,
        })
    }
}

/// Releases its locks exactly once, when dropped.
#[must_use = "the locks are released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ChannelLockGuard {
    manager: ChannelLockManager,
    channel_ids: Vec<ChannelId>,
}

impl ChannelLockGuard {
    pub fn channel_ids(&self) -> &[ChannelId] {
        &self.channel_ids
    }
}

impl Drop for ChannelLockGuard {
    fn drop(&mut self) {
        for channel_id in self.channel_ids.drain(..) {
            self.manager.release(&channel_id);
        }
    }
}
