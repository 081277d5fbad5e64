// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The slice manager.
//!
//! A [`Memory`] owns the slice history, the proxy side table and the heap of
//! wrapped entities. All mutation happens against the current slice; reads of
//! an entity merge patches from the current slice up to the entity's owner
//! slice and are cached until a slice switch invalidates them.
use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::{debug, instrument, trace};

use crate::config::{ConfigError, MemoryConfig};
use crate::error::MemoryError;
use crate::history::History;
use crate::ident::{EntityId, MemoryId};
use crate::slice::SliceId;
use crate::value::Value;
use crate::versionable::draft::{Draft, DraftRef};
use crate::versionable::{Entity, Kind};
use crate::worker::MemoryWorker;

/// Versioned object store over a branching slice history.
///
/// # Example
/// ```
/// use echo_memory::{Draft, Memory, Value};
///
/// let mut memory = Memory::new();
/// let mut draft = Draft::new();
/// let root = draft.object([("a", 1.into())]);
/// let id = memory.make_versionable(&mut draft, root)?;
/// memory.attach(id)?;
///
/// memory.create("edit")?;
/// memory.switch_to("edit")?;
/// memory.object(id)?.set("a", 2)?;
///
/// memory.switch_to("")?;
/// assert_eq!(memory.object(id)?.get("a"), Some(Value::Int(1)));
/// # Ok::<(), echo_memory::MemoryError>(())
/// ```
#[derive(Debug)]
pub struct Memory {
    id: MemoryId,
    config: MemoryConfig,
    pub(crate) history: History,
    pub(crate) heap: FxHashMap<EntityId, Entity>,
    switch_count: usize,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    /// Creates a memory with the default [`MemoryConfig`].
    pub fn new() -> Self {
        Self::build(MemoryConfig::default())
    }

    /// Creates a memory with a validated custom configuration.
    pub fn with_config(config: MemoryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: MemoryConfig) -> Self {
        let id = MemoryId::next();
        debug!(memory = %id, ?config, "created memory");
        Self {
            id,
            config,
            history: History::new(id),
            heap: FxHashMap::default(),
            switch_count: 0,
        }
    }

    /// Identifier of this memory.
    pub fn id(&self) -> MemoryId {
        self.id
    }

    /// Active configuration.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Name of the current slice (`""` is the root).
    pub fn current_slice(&self) -> &str {
        self.history.name_of(self.history.current)
    }

    /// Deep-wraps the draft node `root` and everything reachable from it.
    ///
    /// The new entities are unlinked: they join the history on
    /// [`Memory::attach`] or when stored into a linked container.
    ///
    /// # Errors
    /// [`MemoryError::AlreadyVersionable`] if `root` was wrapped before,
    /// [`MemoryError::CrossMemory`] if a reachable node or entity belongs to
    /// another memory, [`MemoryError::NotVersionable`] for a foreign draft ref
    /// or a collected entity. Nothing is allocated on failure.
    pub fn make_versionable(
        &mut self,
        draft: &mut Draft,
        root: DraftRef,
    ) -> Result<EntityId, MemoryError> {
        let (root_id, entities) = draft.wrap(root, &self.history)?;
        for entity in entities {
            let id = entity.as_versionable().id();
            self.history.register(id, entity.kind());
            self.heap.insert(id, entity);
            trace!(entity = %id, "wrapped entity");
        }
        Ok(root_id)
    }

    /// Idempotent re-wrap: returns `value` unchanged when it is a plain value
    /// or an entity of this memory.
    pub fn versionable(&self, value: &Value) -> Result<Value, MemoryError> {
        if let Some(id) = value.as_entity() {
            self.history.get_proxy(id)?;
        }
        Ok(value.clone())
    }

    /// Kind of the entity `id`, if this memory holds it.
    pub fn kind_of(&self, id: EntityId) -> Option<Kind> {
        self.heap.get(&id).map(Entity::kind)
    }

    /// Flags `id` as a diff root: lineage walks stop there.
    pub fn mark_as_diff_root(&mut self, id: EntityId) -> Result<(), MemoryError> {
        self.history.get_proxy(id)?;
        self.history.diff_roots.insert(id);
        Ok(())
    }

    /// Creates a slice as a child of the current slice.
    ///
    /// # Errors
    /// [`MemoryError::DuplicateSlice`] if `name` exists.
    pub fn create(&mut self, name: &str) -> Result<(), MemoryError> {
        self.history.create(name)?;
        debug!(slice = name, parent = self.current_slice(), "created slice");
        Ok(())
    }

    /// Makes `name` the current slice.
    ///
    /// Every entity marked dirty in a slice between the nearest common
    /// ancestor and either end of the switch is invalidated; it rebuilds on
    /// its next access. Every `slices_per_snapshot` switches the
    /// auto-snapshot policy runs.
    ///
    /// # Errors
    /// [`MemoryError::UnknownSlice`] if `name` was never created.
    #[instrument(skip(self))]
    pub fn switch_to(&mut self, name: &str) -> Result<(), MemoryError> {
        let target = self.history.lookup(name)?;
        let current = self.history.current;
        if target == current {
            return Ok(());
        }
        let ancestor = self.history.common_ancestor(current, target);
        let mut touched = self.history.span(current, ancestor);
        touched.extend(self.history.span(target, ancestor));
        self.history.invalidate_slices(&touched);
        self.history.current = target;
        self.switch_count += 1;
        debug!(
            from = self.history.name_of(current),
            to = name,
            slices = touched.len(),
            "switched slice"
        );
        let per = self.config.slices_per_snapshot;
        if self.config.auto_snapshot && self.switch_count % per == 0 {
            self.auto_snapshot();
        }
        Ok(())
    }

    /// Marks `value` as a root and links it into the current slice if it is
    /// not linked yet.
    ///
    /// # Errors
    /// [`MemoryError::NotVersionable`] for a plain value or a collected
    /// entity, [`MemoryError::CrossMemory`] for an entity of another memory,
    /// [`MemoryError::Frozen`] while the current slice has children.
    pub fn attach(&mut self, value: impl Into<Value>) -> Result<(), MemoryError> {
        let value = value.into();
        let id = value.as_entity().ok_or(MemoryError::NotVersionable)?;
        self.history.get_proxy(id)?;
        if self.history.is_frozen() {
            return Err(MemoryError::Frozen);
        }
        self.history.roots.insert(id);
        self.history.link_to_memory(&value)?;
        self.flush_links();
        debug!(entity = %id, slice = self.current_slice(), "attached root");
        Ok(())
    }

    /// `true` while the current slice has children.
    pub fn is_frozen(&self) -> bool {
        self.history.is_frozen()
    }

    /// Deletes the slice `name` and its subtree, then collects every entity no
    /// surviving slice mentions.
    ///
    /// # Errors
    /// [`MemoryError::SliceInUse`] for the root slice or an ancestor of (or
    /// equal to) the current slice, [`MemoryError::UnknownSlice`] otherwise
    /// unknown.
    #[instrument(skip(self))]
    pub fn remove(&mut self, name: &str) -> Result<(), MemoryError> {
        let target = self.history.lookup(name)?;
        if target == self.history.root
            || self.history.is_ancestor_or_self(target, self.history.current)
        {
            return Err(MemoryError::SliceInUse(name.to_owned()));
        }
        let candidates = self.history.delete_subtree(target);
        let collected = self.collect(candidates);
        debug!(slice = name, collected, "removed slice subtree");
        Ok(())
    }

    /// Drops heap entries of ids no live slice mentions. Returns how many.
    pub(crate) fn collect(&mut self, candidates: BTreeSet<EntityId>) -> usize {
        let collected = self.history.collect_garbage(candidates);
        for id in &collected {
            self.heap.remove(id);
            trace!(entity = %id, "collected entity");
        }
        collected.len()
    }

    /// Names of the slices from `name` up to the root, nearest first.
    ///
    /// With `without_snapshot`, every snapshot slice is expanded back into the
    /// slices it replaced (while they still exist).
    pub fn get_path(
        &self,
        name: &str,
        without_snapshot: bool,
    ) -> Result<Vec<String>, MemoryError> {
        let start = self.history.lookup(name)?;
        let mut out = Vec::new();
        for id in self.history.chain(start) {
            self.push_path(id, without_snapshot, &mut out);
        }
        Ok(out)
    }

    fn push_path(&self, id: SliceId, expand: bool, out: &mut Vec<String>) {
        let slice = self.history.slice(id);
        match slice.snapshot_origin {
            Some((from, until)) if expand => {
                for original in self.history.chain(until) {
                    self.push_path(original, expand, out);
                    if original == from {
                        break;
                    }
                }
            }
            _ => out.push(slice.name.clone()),
        }
    }

    /// Runs `op` on entity `id` with the history as its worker, then links
    /// every entity the operation queued. A failed operation discards the
    /// queue.
    pub(crate) fn with_entity<R>(
        &mut self,
        id: EntityId,
        op: impl FnOnce(&mut Entity, &mut dyn MemoryWorker) -> Result<R, MemoryError>,
    ) -> Result<R, MemoryError> {
        let Some(entity) = self.heap.get_mut(&id) else {
            return Err(self.history.missing(id));
        };
        match op(entity, &mut self.history) {
            Ok(value) => {
                self.flush_links();
                Ok(value)
            }
            Err(err) => {
                self.history.pending.clear();
                Err(err)
            }
        }
    }

    /// Links every queued entity into the current slice, recording each
    /// baseline and the parent links of everything it references. An entity
    /// linked on another branch is adopted with its value there.
    fn flush_links(&mut self) {
        while let Some(id) = self.history.pending.pop() {
            if self.history.is_settled(id) {
                continue;
            }
            let references = if self.history.is_linked(id) {
                let Some(references) = self.history.adopt(id) else {
                    continue;
                };
                references
            } else {
                let Some(entity) = self.heap.get_mut(&id) else {
                    continue;
                };
                let stamp = self
                    .history
                    .proxies
                    .get(&id)
                    .map_or(0, |params| params.invalidated_at);
                let baseline = entity.as_versionable_mut().link(stamp);
                self.history.record_link(id, baseline.patch);
                baseline.references
            };
            for (child, attribute) in references {
                self.history.add_slice_proxy_parent(child, id, attribute);
                if !self.history.is_settled(child) && self.heap.contains_key(&child) {
                    self.history.pending.push(child);
                }
            }
        }
    }
}
