//! Stack-disciplined texture unit allocation
//!
//! Nested rendering operations (a light pass sampling G-buffer outputs, a
//! material binding its albedo map, a pool creating a render target) all need
//! texture units for a short while. Rather than tracking physical unit indices
//! globally, each operation opens a child [`TextureUnitContext`] on top of the
//! current one, binds what it needs, and finishes the context when done. On
//! finish the parent's bindings are restored on every unit.
//!
//! # Architecture
//!
//! ```text
//! TextureUnitAllocator
//!     ├── frames[0]          root context, always at the bottom of the stack
//!     ├── frames[1..depth]   spare contexts, pre-allocated at construction
//!     ├── active             stack of frame slots, top is current
//!     └── free               slots available for new children
//! ```
//!
//! No allocation happens after construction: a new child copies its parent's
//! binding table into a spare frame.

use crate::device::{DeviceError, GraphicsDevice, Texture2D, Texture2DParams, TextureUnit};
use crate::foundation::diagnostics::{default_diagnostics, report, Diagnostics, Level};
use std::sync::Arc;

const TARGET: &str = "render_core::texture_units";

/// Result type for texture unit operations
pub type TextureUnitResult<T> = Result<T, TextureUnitError>;

/// Contract violations and exhaustion reported by the allocator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TextureUnitError {
    /// The context is not the top of the stack (or has already finished)
    #[error("Texture unit context is not the active context")]
    ContextNotActive,

    /// Every spare context is in use
    #[error("Texture unit context stack limit reached (depth {depth})")]
    StackLimitReached {
        /// Stack depth at the time of the request
        depth: usize,
    },

    /// Not enough hardware units remain
    #[error("Out of texture units: required {required}, available {available}")]
    UnitsExhausted {
        /// Units that would be in use after the request
        required: u32,
        /// Units the allocator manages
        available: u32,
    },

    /// The root context cannot be finished
    #[error("The root texture unit context cannot be finished")]
    RootContextFinish,

    /// A maximum stack depth of zero was requested
    #[error("Texture unit stack depth must be at least 1")]
    InvalidStackDepth,

    /// The device facade failed
    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Handle to one frame of the texture unit stack.
///
/// Child handles are neither `Clone` nor `Copy`: a child is finished by value,
/// so it cannot be used again afterwards.
#[derive(Debug, PartialEq, Eq)]
pub struct TextureUnitContext {
    slot: usize,
    generation: u32,
}

impl TextureUnitContext {
    /// Whether this handle refers to the root context
    pub const fn is_root(&self) -> bool {
        self.slot == ROOT_SLOT
    }
}

const ROOT_SLOT: usize = 0;

#[derive(Debug)]
struct Frame {
    bindings: Vec<Option<Texture2D>>,
    next: usize,
    generation: u32,
}

impl Frame {
    fn new(unit_count: usize) -> Self {
        Self {
            bindings: vec![None; unit_count],
            next: 0,
            generation: 0,
        }
    }
}

/// Allocator for a fixed set of hardware texture units
#[derive(Debug)]
pub struct TextureUnitAllocator {
    units: Vec<TextureUnit>,
    frames: Vec<Frame>,
    active: Vec<usize>,
    free: Vec<usize>,
    diagnostics: Arc<dyn Diagnostics>,
}

impl TextureUnitAllocator {
    /// Create an allocator over `unit_count` units with at most `max_depth`
    /// contexts alive at once (the root included).
    pub fn new(unit_count: u32, max_depth: usize) -> TextureUnitResult<Self> {
        Self::with_diagnostics(unit_count, max_depth, default_diagnostics())
    }

    /// Create an allocator over every unit the device exposes
    pub fn for_device(device: &dyn GraphicsDevice, max_depth: usize) -> TextureUnitResult<Self> {
        Self::new(device.texture_unit_count(), max_depth)
    }

    /// Create an allocator reporting through the given diagnostics sink
    pub fn with_diagnostics(
        unit_count: u32,
        max_depth: usize,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> TextureUnitResult<Self> {
        if max_depth == 0 {
            return Err(TextureUnitError::InvalidStackDepth);
        }

        let count = unit_count as usize;
        let frames: Vec<Frame> = (0..max_depth).map(|_| Frame::new(count)).collect();
        let mut active = Vec::with_capacity(max_depth);
        active.push(ROOT_SLOT);
        // Spare slots are handed out lowest-first.
        let free: Vec<usize> = (1..max_depth).rev().collect();

        report!(
            diagnostics,
            Level::Debug,
            TARGET,
            "created allocator with {} units, stack depth {}",
            unit_count,
            max_depth
        );

        Ok(Self {
            units: (0..unit_count).map(TextureUnit).collect(),
            frames,
            active,
            free,
            diagnostics,
        })
    }

    /// A handle to the root context
    pub const fn root_context(&self) -> TextureUnitContext {
        TextureUnitContext {
            slot: ROOT_SLOT,
            generation: 0,
        }
    }

    /// Number of units managed
    pub fn unit_count(&self) -> u32 {
        self.units.len() as u32
    }

    /// Number of contexts currently on the stack, the root included
    pub fn depth(&self) -> usize {
        self.active.len()
    }

    /// Maximum number of contexts that may be alive at once
    pub fn max_depth(&self) -> usize {
        self.frames.len()
    }

    /// Units not yet claimed by the current context or its ancestors
    pub fn current_free(&self) -> u32 {
        let top = self.top();
        (self.units.len() - self.frames[top].next) as u32
    }

    /// Whether `context` is the top of the stack
    pub fn is_current(&self, context: &TextureUnitContext) -> bool {
        self.top() == context.slot && self.frames[context.slot].generation == context.generation
    }

    /// The binding table visible to a live context
    pub fn bindings(&self, context: &TextureUnitContext) -> TextureUnitResult<&[Option<Texture2D>]> {
        let live = self.active.contains(&context.slot)
            && self.frames[context.slot].generation == context.generation;
        if live {
            Ok(&self.frames[context.slot].bindings)
        } else {
            Err(TextureUnitError::ContextNotActive)
        }
    }

    /// Push a child of `parent`, which must be the current context.
    ///
    /// The child starts with a copy of the parent's binding table.
    pub fn new_child_context(
        &mut self,
        parent: &TextureUnitContext,
    ) -> TextureUnitResult<TextureUnitContext> {
        self.check_current(parent)?;
        self.push_child(parent.slot)
    }

    /// As [`Self::new_child_context`], also requiring that `reserved` more
    /// units are still free.
    pub fn new_child_context_reserving(
        &mut self,
        parent: &TextureUnitContext,
        reserved: u32,
    ) -> TextureUnitResult<TextureUnitContext> {
        self.check_current(parent)?;
        self.check_units_required(self.frames[parent.slot].next + reserved as usize)?;
        self.push_child(parent.slot)
    }

    /// Bind `texture` to the next free unit of the current context
    pub fn bind_texture_2d(
        &mut self,
        context: &TextureUnitContext,
        device: &mut dyn GraphicsDevice,
        texture: &Texture2D,
    ) -> TextureUnitResult<TextureUnit> {
        self.check_current(context)?;
        let next = self.frames[context.slot].next;
        self.check_units_required(next + 1)?;

        report!(self.diagnostics, Level::Trace, TARGET, "bind {:?}", texture.id);

        let unit = self.units[next];
        device.texture_2d_bind(unit, texture)?;
        let frame = &mut self.frames[context.slot];
        frame.bindings[next] = Some(*texture);
        frame.next += 1;
        Ok(unit)
    }

    /// Allocate a new texture on the next free unit of the current context
    pub fn allocate_texture_2d(
        &mut self,
        context: &TextureUnitContext,
        device: &mut dyn GraphicsDevice,
        params: &Texture2DParams,
    ) -> TextureUnitResult<(TextureUnit, Texture2D)> {
        self.check_current(context)?;
        let next = self.frames[context.slot].next;
        self.check_units_required(next + 1)?;

        report!(
            self.diagnostics,
            Level::Trace,
            TARGET,
            "allocate 2d {}x{} {:?}",
            params.width,
            params.height,
            params.format
        );

        let unit = self.units[next];
        let texture = device.texture_2d_allocate(unit, params)?;
        let frame = &mut self.frames[context.slot];
        frame.bindings[next] = Some(texture);
        frame.next += 1;
        Ok((unit, texture))
    }

    /// Pop `context` and restore its parent's bindings on every unit.
    ///
    /// Units the parent never bound are unbound. Units whose recorded texture
    /// has since been deleted are unbound and forgotten.
    pub fn finish(
        &mut self,
        context: TextureUnitContext,
        device: &mut dyn GraphicsDevice,
    ) -> TextureUnitResult<()> {
        self.check_current(&context)?;
        if context.is_root() {
            return Err(TextureUnitError::RootContextFinish);
        }

        report!(self.diagnostics, Level::Trace, TARGET, "finish");

        self.active.pop();
        let frame = &mut self.frames[context.slot];
        frame.generation = frame.generation.wrapping_add(1);
        frame.next = 0;
        self.free.push(context.slot);

        self.activate(self.top(), device)
    }

    fn activate(&mut self, slot: usize, device: &mut dyn GraphicsDevice) -> TextureUnitResult<()> {
        report!(self.diagnostics, Level::Trace, TARGET, "make current");

        for (index, unit) in self.units.iter().enumerate() {
            match self.frames[slot].bindings[index] {
                None => {
                    report!(self.diagnostics, Level::Trace, TARGET, "[{}]: set unbound", unit.0);
                    device.texture_unit_unbind(*unit)?;
                }
                Some(texture) if device.texture_2d_is_deleted(&texture) => {
                    report!(
                        self.diagnostics,
                        Level::Trace,
                        TARGET,
                        "[{}]: set unbound (deleted)",
                        unit.0
                    );
                    device.texture_unit_unbind(*unit)?;
                    self.frames[slot].bindings[index] = None;
                }
                Some(texture) => {
                    report!(self.diagnostics, Level::Trace, TARGET, "[{}]: set 2D", unit.0);
                    device.texture_2d_bind(*unit, &texture)?;
                }
            }
        }
        Ok(())
    }

    fn push_child(&mut self, parent_slot: usize) -> TextureUnitResult<TextureUnitContext> {
        let Some(slot) = self.free.pop() else {
            return Err(TextureUnitError::StackLimitReached {
                depth: self.active.len(),
            });
        };

        report!(self.diagnostics, Level::Trace, TARGET, "new context");

        let (parent, child) = if parent_slot < slot {
            let (low, high) = self.frames.split_at_mut(slot);
            (&low[parent_slot], &mut high[0])
        } else {
            let (low, high) = self.frames.split_at_mut(parent_slot);
            (&high[0], &mut low[slot])
        };
        child.bindings.copy_from_slice(&parent.bindings);
        child.next = parent.next;

        self.active.push(slot);
        Ok(TextureUnitContext {
            slot,
            generation: child.generation,
        })
    }

    fn check_current(&self, context: &TextureUnitContext) -> TextureUnitResult<()> {
        if self.is_current(context) {
            Ok(())
        } else {
            Err(TextureUnitError::ContextNotActive)
        }
    }

    fn check_units_required(&self, required: usize) -> TextureUnitResult<()> {
        if required > self.units.len() {
            Err(TextureUnitError::UnitsExhausted {
                required: required as u32,
                available: self.units.len() as u32,
            })
        } else {
            Ok(())
        }
    }

    fn top(&self) -> usize {
        self.active.last().copied().unwrap_or(ROOT_SLOT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCall, HeadlessDevice, TextureFormat};
    use crate::foundation::diagnostics::CapturingDiagnostics;

    fn params() -> Texture2DParams {
        Texture2DParams::render_target(8, 8, TextureFormat::Rgba8)
    }

    fn setup(units: u32, depth: usize) -> (TextureUnitAllocator, HeadlessDevice) {
        let _ = env_logger::builder().is_test(true).try_init();
        (
            TextureUnitAllocator::new(units, depth).unwrap(),
            HeadlessDevice::new(units),
        )
    }

    #[test]
    fn test_zero_depth_rejected() {
        assert_eq!(
            TextureUnitAllocator::new(4, 0).unwrap_err(),
            TextureUnitError::InvalidStackDepth
        );
    }

    #[test]
    fn test_root_is_current_initially() {
        let (alloc, _) = setup(4, 2);
        let root = alloc.root_context();
        assert!(alloc.is_current(&root));
        assert!(root.is_root());
        assert_eq!(alloc.depth(), 1);
        assert_eq!(alloc.current_free(), 4);
    }

    #[test]
    fn test_child_on_non_current_context_fails() {
        let (mut alloc, _) = setup(4, 4);
        let root = alloc.root_context();
        let _child = alloc.new_child_context(&root).unwrap();
        assert_eq!(
            alloc.new_child_context(&root).unwrap_err(),
            TextureUnitError::ContextNotActive
        );
    }

    #[test]
    fn test_stack_limit() {
        let (mut alloc, _) = setup(4, 2);
        let root = alloc.root_context();
        let child = alloc.new_child_context(&root).unwrap();
        assert_eq!(
            alloc.new_child_context(&child).unwrap_err(),
            TextureUnitError::StackLimitReached { depth: 2 }
        );
    }

    #[test]
    fn test_reserving_checks_free_units() {
        let (mut alloc, mut device) = setup(4, 4);
        let root = alloc.root_context();
        let texture = device.texture_2d_allocate(TextureUnit(0), &params()).unwrap();
        alloc.bind_texture_2d(&root, &mut device, &texture).unwrap();

        // 1 used + 3 reserved == 4: fits exactly.
        let child = alloc.new_child_context_reserving(&root, 3).unwrap();
        alloc.finish(child, &mut device).unwrap();

        assert_eq!(
            alloc.new_child_context_reserving(&root, 4).unwrap_err(),
            TextureUnitError::UnitsExhausted {
                required: 5,
                available: 4
            }
        );
        assert_eq!(alloc.depth(), 1);
    }

    #[test]
    fn test_bind_assigns_consecutive_units() {
        let (mut alloc, mut device) = setup(3, 2);
        let root = alloc.root_context();
        let (u0, t0) = alloc.allocate_texture_2d(&root, &mut device, &params()).unwrap();
        let (u1, _) = alloc.allocate_texture_2d(&root, &mut device, &params()).unwrap();
        let u2 = alloc.bind_texture_2d(&root, &mut device, &t0).unwrap();
        assert_eq!((u0, u1, u2), (TextureUnit(0), TextureUnit(1), TextureUnit(2)));
        assert_eq!(alloc.current_free(), 0);

        let err = alloc.bind_texture_2d(&root, &mut device, &t0).unwrap_err();
        assert_eq!(
            err,
            TextureUnitError::UnitsExhausted {
                required: 4,
                available: 3
            }
        );
    }

    #[test]
    fn test_child_sees_parent_bindings_plus_its_own() {
        let (mut alloc, mut device) = setup(4, 3);
        let root = alloc.root_context();
        let (_, a) = alloc.allocate_texture_2d(&root, &mut device, &params()).unwrap();

        let child = alloc.new_child_context(&root).unwrap();
        let (unit, b) = alloc.allocate_texture_2d(&child, &mut device, &params()).unwrap();
        assert_eq!(unit, TextureUnit(1));

        let visible = alloc.bindings(&child).unwrap();
        assert_eq!(visible, &[Some(a), Some(b), None, None]);
        assert_eq!(alloc.bindings(&root).unwrap(), &[Some(a), None, None, None]);
    }

    #[test]
    fn test_finish_restores_parent_bindings() {
        let (mut alloc, mut device) = setup(3, 3);
        let root = alloc.root_context();
        let (_, a) = alloc.allocate_texture_2d(&root, &mut device, &params()).unwrap();

        let child = alloc.new_child_context(&root).unwrap();
        let (_, b) = alloc.allocate_texture_2d(&child, &mut device, &params()).unwrap();
        assert_eq!(device.bound_texture(TextureUnit(1)), Some(b.id));

        device.clear_calls();
        alloc.finish(child, &mut device).unwrap();

        assert_eq!(
            device.calls(),
            &[
                DeviceCall::TextureBind {
                    unit: TextureUnit(0),
                    texture: a.id
                },
                DeviceCall::TextureUnbind(TextureUnit(1)),
                DeviceCall::TextureUnbind(TextureUnit(2)),
            ]
        );
        assert!(alloc.is_current(&root));
        assert_eq!(alloc.current_free(), 2);
    }

    #[test]
    fn test_finish_unbinds_deleted_textures() {
        let (mut alloc, mut device) = setup(2, 2);
        let root = alloc.root_context();
        let (_, a) = alloc.allocate_texture_2d(&root, &mut device, &params()).unwrap();
        let child = alloc.new_child_context(&root).unwrap();
        device.texture_2d_delete(&a).unwrap();

        device.clear_calls();
        alloc.finish(child, &mut device).unwrap();
        assert_eq!(device.calls()[0], DeviceCall::TextureUnbind(TextureUnit(0)));
        assert_eq!(alloc.bindings(&root).unwrap(), &[None, None]);
    }

    #[test]
    fn test_finish_requires_top_of_stack() {
        let (mut alloc, mut device) = setup(2, 3);
        let root = alloc.root_context();
        let child = alloc.new_child_context(&root).unwrap();
        let _grandchild = alloc.new_child_context(&child).unwrap();
        assert_eq!(
            alloc.finish(child, &mut device).unwrap_err(),
            TextureUnitError::ContextNotActive
        );
    }

    #[test]
    fn test_root_cannot_finish() {
        let (mut alloc, mut device) = setup(2, 2);
        let root = alloc.root_context();
        assert_eq!(
            alloc.finish(root, &mut device).unwrap_err(),
            TextureUnitError::RootContextFinish
        );
    }

    #[test]
    fn test_stale_handle_detected_after_slot_reuse() {
        let (mut alloc, mut device) = setup(2, 2);
        let root = alloc.root_context();
        let first = alloc.new_child_context(&root).unwrap();
        let stale = TextureUnitContext {
            slot: first.slot,
            generation: first.generation,
        };
        alloc.finish(first, &mut device).unwrap();

        let second = alloc.new_child_context(&root).unwrap();
        assert_eq!(second.slot, stale.slot);
        assert!(!alloc.is_current(&stale));
        assert!(alloc.is_current(&second));
        assert_eq!(
            alloc.finish(stale, &mut device).unwrap_err(),
            TextureUnitError::ContextNotActive
        );
    }

    #[test]
    fn test_full_depth_unwinds_to_root() {
        let depth = 5;
        let (mut alloc, mut device) = setup(8, depth);
        let root = alloc.root_context();
        let (_, a) = alloc.allocate_texture_2d(&root, &mut device, &params()).unwrap();

        let mut stack = Vec::new();
        let mut parent = alloc.root_context();
        for _ in 1..depth {
            let child = alloc.new_child_context(&parent).unwrap();
            alloc.allocate_texture_2d(&child, &mut device, &params()).unwrap();
            parent = TextureUnitContext {
                slot: child.slot,
                generation: child.generation,
            };
            stack.push(child);
        }
        assert_eq!(alloc.depth(), depth);

        while let Some(child) = stack.pop() {
            alloc.finish(child, &mut device).unwrap();
        }

        assert!(alloc.is_current(&root));
        assert_eq!(alloc.bindings(&root).unwrap()[0], Some(a));
        assert_eq!(device.bound_texture(TextureUnit(0)), Some(a.id));
        for unit in 1..8 {
            assert_eq!(device.bound_texture(TextureUnit(unit)), None);
        }
    }

    #[test]
    fn test_trace_records_go_through_injected_sink() {
        let diag = Arc::new(CapturingDiagnostics::new(Level::Trace));
        let mut alloc = TextureUnitAllocator::with_diagnostics(2, 2, diag.clone()).unwrap();
        let mut device = HeadlessDevice::new(2);
        let root = alloc.root_context();
        let child = alloc.new_child_context(&root).unwrap();
        alloc.finish(child, &mut device).unwrap();

        let messages: Vec<String> = diag.records().into_iter().map(|r| r.message).collect();
        assert!(messages.iter().any(|m| m == "new context"));
        assert!(messages.iter().any(|m| m == "finish"));
    }
}
