//! Bounded render-target cache
//!
//! A [`RenderTargetPool`] maps value-equal descriptions to reusable targets.
//! Targets are created lazily on a miss, handed out as a [`PoolLease`], and
//! go back to an idle list (not destroyed) when the lease is returned.
//!
//! Memory is bounded by two limits:
//!
//! - **hard**: checked before creating anything. If the bytes held by leased
//!   entries plus the new entry's estimate would pass it, `get` fails with
//!   [`PoolError::PoolExhausted`] without touching the cache. Otherwise idle
//!   entries are evicted, oldest first, until the new entry fits.
//! - **soft**: after every `get` and `return_value`, idle entries are evicted
//!   oldest first while held bytes exceed it.
//!
//! Listener failures during eviction are reported and the loop carries on.

use crate::core::config::PoolLimits;
use crate::device::{DeviceError, GraphicsDevice};
use crate::foundation::diagnostics::{default_diagnostics, report, Diagnostics, Level};
use crate::foundation::ids::IdPool;
use crate::render::textures::{TextureUnitAllocator, TextureUnitContext, TextureUnitError};
use slotmap::{new_key_type, SlotMap};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

const TARGET: &str = "render_core::pool";

static POOL_IDS: IdPool = IdPool::new();

/// Result type for pool operations
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors reported by a render-target pool
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The request would take the pool past its hard limit
    #[error("Pool exhausted: requested {requested} bytes, holding {held}, hard limit {hard_limit}")]
    PoolExhausted {
        /// Size of the entry that did not fit
        requested: u64,
        /// Bytes held when the request failed
        held: u64,
        /// The hard limit
        hard_limit: u64,
    },

    /// The pool has been shut down
    #[error("Pool has been deleted")]
    Deleted,

    /// The lease does not belong to a leased entry of this pool
    #[error("Lease does not belong to this pool")]
    UnknownLease,

    /// The soft limit is above the hard limit
    #[error("Invalid pool limits: soft {soft} exceeds hard {hard}")]
    InvalidLimits {
        /// Soft limit
        soft: u64,
        /// Hard limit
        hard: u64,
    },

    /// Texture unit allocation failed while building a target
    #[error("Texture unit error: {0}")]
    TextureUnits(TextureUnitError),

    /// The device failed while building or destroying a target
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    /// Any other listener failure
    #[error("Listener error: {0}")]
    Listener(String),
}

impl From<TextureUnitError> for PoolError {
    fn from(error: TextureUnitError) -> Self {
        match error {
            TextureUnitError::Device(device) => Self::Device(device),
            other => Self::TextureUnits(other),
        }
    }
}

/// The collaborators a pool needs to build or destroy targets
#[derive(Debug)]
pub struct PoolScope<'a> {
    /// Device facade
    pub device: &'a mut dyn GraphicsDevice,
    /// Texture unit allocator
    pub units: &'a mut TextureUnitAllocator,
    /// The caller's current texture unit context
    pub context: &'a TextureUnitContext,
}

impl<'a> PoolScope<'a> {
    /// Bundle a device, allocator and current context
    pub fn new(
        device: &'a mut dyn GraphicsDevice,
        units: &'a mut TextureUnitAllocator,
        context: &'a TextureUnitContext,
    ) -> Self {
        Self {
            device,
            units,
            context,
        }
    }
}

/// Creates, measures and destroys the targets held by a pool
pub trait PoolListener<D, T> {
    /// Size in bytes a target for `description` is expected to take
    fn estimate_size(&self, description: &D) -> u64;

    /// Build a new target
    fn create(&mut self, scope: &mut PoolScope<'_>, description: &D) -> PoolResult<T>;

    /// Actual size in bytes of a created target
    fn size_of(&self, description: &D, target: &T) -> u64;

    /// An idle target is being handed out again
    fn on_reuse(&mut self, _description: &D, _target: &T) {}

    /// Release a target's device resources
    fn on_delete(&mut self, scope: &mut PoolScope<'_>, description: &D, target: T) -> PoolResult<()>;

    /// A failure happened during eviction and was swallowed
    fn on_error(&mut self, _error: &PoolError) {}
}

new_key_type! {
    struct EntryKey;
}

/// A target borrowed from a pool. Give it back with
/// [`RenderTargetPool::return_value`].
#[derive(Debug)]
pub struct PoolLease<T> {
    pool: u64,
    key: EntryKey,
    target: T,
}

impl<T> PoolLease<T> {
    /// The leased target
    pub const fn target(&self) -> &T {
        &self.target
    }
}

impl<T> Deref for PoolLease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.target
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryState {
    Leased,
    Idle { since: u64 },
}

#[derive(Debug)]
struct Entry<D, T> {
    description: D,
    target: T,
    size: u64,
    state: EntryState,
}

/// Cache of render targets keyed by description
#[derive(Debug)]
pub struct RenderTargetPool<D, T, L> {
    id: u64,
    limits: PoolLimits,
    listener: L,
    entries: SlotMap<EntryKey, Entry<D, T>>,
    idle_by_description: HashMap<D, Vec<EntryKey>>,
    idle_order: BTreeMap<u64, EntryKey>,
    clock: u64,
    held_bytes: u64,
    idle_bytes: u64,
    deleted: bool,
    diagnostics: Arc<dyn Diagnostics>,
}

impl<D, T, L> RenderTargetPool<D, T, L>
where
    D: Hash + Eq + Clone,
    T: Clone,
    L: PoolListener<D, T>,
{
    /// Create an empty pool
    pub fn new(limits: PoolLimits, listener: L) -> PoolResult<Self> {
        Self::with_diagnostics(limits, listener, default_diagnostics())
    }

    /// Create an empty pool reporting through the given sink
    pub fn with_diagnostics(
        limits: PoolLimits,
        listener: L,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> PoolResult<Self> {
        if limits.soft_bytes > limits.hard_bytes {
            return Err(PoolError::InvalidLimits {
                soft: limits.soft_bytes,
                hard: limits.hard_bytes,
            });
        }

        report!(
            diagnostics,
            Level::Debug,
            TARGET,
            "created pool: soft {} hard {} margin {}",
            limits.soft_bytes,
            limits.hard_bytes,
            limits.eviction_margin_bytes
        );

        Ok(Self {
            id: POOL_IDS.fresh(),
            limits,
            listener,
            entries: SlotMap::with_key(),
            idle_by_description: HashMap::new(),
            idle_order: BTreeMap::new(),
            clock: 0,
            held_bytes: 0,
            idle_bytes: 0,
            deleted: false,
            diagnostics,
        })
    }

    /// Lease a target for `description`, reusing an idle one when possible
    pub fn get(&mut self, scope: &mut PoolScope<'_>, description: &D) -> PoolResult<PoolLease<T>> {
        self.check_live()?;

        if let Some(key) = self.take_idle(description) {
            if let Some(entry) = self.entries.get(key) {
                report!(self.diagnostics, Level::Trace, TARGET, "reuse ({} bytes)", entry.size);
                self.listener.on_reuse(&entry.description, &entry.target);
                let lease = self.lease(key, entry.target.clone());
                self.evict_to_soft_limit(scope);
                return Ok(lease);
            }
        }

        let estimate = self.listener.estimate_size(description);
        let hard = self.limits.hard_bytes;
        let leased_bytes = self.held_bytes - self.idle_bytes;
        if leased_bytes.saturating_add(estimate) > hard {
            report!(
                self.diagnostics,
                Level::Warn,
                TARGET,
                "exhausted: {} bytes leased, {} requested, hard limit {}",
                leased_bytes,
                estimate,
                hard
            );
            return Err(self.exhausted(estimate));
        }
        self.evict_until(scope, hard.saturating_sub(estimate));

        let target = self.listener.create(scope, description).map_err(|e| {
            report!(self.diagnostics, Level::Error, TARGET, "create failed: {}", e);
            e
        })?;
        let size = self.listener.size_of(description, &target);
        report!(
            self.diagnostics,
            Level::Trace,
            TARGET,
            "create (estimated {} bytes, actual {})",
            estimate,
            size
        );

        let key = self.entries.insert(Entry {
            description: description.clone(),
            target: target.clone(),
            size,
            state: EntryState::Leased,
        });
        self.held_bytes += size;

        if self.held_bytes > hard {
            self.evict_until(scope, hard);
            if self.held_bytes > hard {
                if let Some(entry) = self.entries.remove(key) {
                    self.held_bytes -= entry.size;
                    self.destroy(scope, entry);
                }
                return Err(self.exhausted(size));
            }
        }

        let lease = self.lease(key, target);
        self.evict_to_soft_limit(scope);
        Ok(lease)
    }

    /// Give a leased target back. It stays alive in the idle list.
    pub fn return_value(&mut self, scope: &mut PoolScope<'_>, lease: PoolLease<T>) -> PoolResult<()> {
        self.check_live()?;
        if lease.pool != self.id {
            return Err(PoolError::UnknownLease);
        }

        let stamp = self.clock;
        let entry = self
            .entries
            .get_mut(lease.key)
            .filter(|entry| entry.state == EntryState::Leased)
            .ok_or(PoolError::UnknownLease)?;

        self.clock += 1;
        entry.state = EntryState::Idle { since: stamp };
        self.idle_bytes += entry.size;
        self.idle_by_description
            .entry(entry.description.clone())
            .or_default()
            .push(lease.key);
        self.idle_order.insert(stamp, lease.key);

        report!(self.diagnostics, Level::Trace, TARGET, "return ({} bytes)", entry.size);

        self.evict_to_soft_limit(scope);
        Ok(())
    }

    /// Destroy every entry, leased or idle, and refuse further use
    pub fn delete(&mut self, scope: &mut PoolScope<'_>) {
        if self.deleted {
            return;
        }

        report!(
            self.diagnostics,
            Level::Debug,
            TARGET,
            "delete: {} entries, {} bytes",
            self.entries.len(),
            self.held_bytes
        );

        let entries: Vec<Entry<D, T>> = self.entries.drain().map(|(_, entry)| entry).collect();
        for entry in entries {
            self.destroy(scope, entry);
        }
        self.idle_by_description.clear();
        self.idle_order.clear();
        self.held_bytes = 0;
        self.idle_bytes = 0;
        self.deleted = true;
    }

    /// Whether [`Self::delete`] has run
    pub const fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Bytes held by every entry
    pub const fn held_bytes(&self) -> u64 {
        self.held_bytes
    }

    /// Bytes held by idle entries
    pub const fn idle_bytes(&self) -> u64 {
        self.idle_bytes
    }

    /// Number of entries, leased or idle
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Number of idle entries
    pub fn idle_count(&self) -> usize {
        self.idle_order.len()
    }

    /// The configured limits
    pub const fn limits(&self) -> &PoolLimits {
        &self.limits
    }

    /// The listener
    pub const fn listener(&self) -> &L {
        &self.listener
    }

    fn check_live(&self) -> PoolResult<()> {
        if self.deleted {
            Err(PoolError::Deleted)
        } else {
            Ok(())
        }
    }

    fn lease(&self, key: EntryKey, target: T) -> PoolLease<T> {
        PoolLease {
            pool: self.id,
            key,
            target,
        }
    }

    fn exhausted(&self, requested: u64) -> PoolError {
        PoolError::PoolExhausted {
            requested,
            held: self.held_bytes,
            hard_limit: self.limits.hard_bytes,
        }
    }

    /// Move the most recently returned idle entry for `description` back to
    /// the leased state.
    fn take_idle(&mut self, description: &D) -> Option<EntryKey> {
        let keys = self.idle_by_description.get_mut(description)?;
        let key = keys.pop()?;
        if keys.is_empty() {
            self.idle_by_description.remove(description);
        }

        let entry = self.entries.get_mut(key)?;
        if let EntryState::Idle { since } = entry.state {
            self.idle_order.remove(&since);
        }
        entry.state = EntryState::Leased;
        self.idle_bytes -= entry.size;
        Some(key)
    }

    fn evict_to_soft_limit(&mut self, scope: &mut PoolScope<'_>) {
        if self.held_bytes > self.limits.soft_bytes {
            self.evict_until(scope, self.limits.eviction_target());
        }
    }

    /// Evict idle entries, oldest first, until at most `target_bytes` are
    /// held or nothing idle is left.
    fn evict_until(&mut self, scope: &mut PoolScope<'_>, target_bytes: u64) {
        while self.held_bytes > target_bytes {
            let Some((_, key)) = self.idle_order.pop_first() else {
                break;
            };
            let Some(entry) = self.entries.remove(key) else {
                continue;
            };

            if let Some(keys) = self.idle_by_description.get_mut(&entry.description) {
                keys.retain(|k| *k != key);
                if keys.is_empty() {
                    self.idle_by_description.remove(&entry.description);
                }
            }
            self.held_bytes -= entry.size;
            self.idle_bytes -= entry.size;

            report!(self.diagnostics, Level::Trace, TARGET, "evict ({} bytes)", entry.size);
            self.destroy(scope, entry);
        }
    }

    fn destroy(&mut self, scope: &mut PoolScope<'_>, entry: Entry<D, T>) {
        if let Err(error) = self.listener.on_delete(scope, &entry.description, entry.target) {
            report!(self.diagnostics, Level::Error, TARGET, "delete failed: {}", error);
            self.listener.on_error(&error);
        }
    }
}

impl<D, T, L> Drop for RenderTargetPool<D, T, L> {
    fn drop(&mut self) {
        if !self.deleted && !self.entries.is_empty() {
            report!(
                self.diagnostics,
                Level::Warn,
                TARGET,
                "pool dropped without delete: {} entries ({} bytes) leaked",
                self.entries.len(),
                self.held_bytes
            );
        }
    }
}
