// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bump allocators for the three memory windows.
//!
//! Every cursor only moves forward: addresses are never reclaimed during a
//! run, so allocations handed out in topological order stay contiguous per
//! subtree.

use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Exclusive end of the 32-bit pools when the platform supplies no limit.
const FOUR_GB: u64 = 1 << 32;

/// The address pool a window cursor allocates from.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum WindowKind {
    /// 32-bit non-prefetchable memory.
    NonPrefetch32,
    /// 32-bit prefetchable memory.
    Prefetch32,
    /// 64-bit prefetchable memory.
    Prefetch64,
}

impl WindowKind {
    /// All window kinds, in register programming order.
    pub const ALL: [WindowKind; 3] = [
        WindowKind::NonPrefetch32,
        WindowKind::Prefetch32,
        WindowKind::Prefetch64,
    ];

    /// Returns the exclusive upper bound imposed by the address width.
    fn architectural_end(self) -> Option<u64> {
        match self {
            WindowKind::NonPrefetch32 | WindowKind::Prefetch32 => Some(FOUR_GB),
            WindowKind::Prefetch64 => None,
        }
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            WindowKind::NonPrefetch32 => "np32",
            WindowKind::Prefetch32 => "p32",
            WindowKind::Prefetch64 => "p64",
        })
    }
}

/// Error returned by [`WindowCursor::allocate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AllocError {
    /// Sizes must be non-zero powers of two.
    #[error("invalid allocation size {size:#x}")]
    InvalidSize {
        /// The requested size.
        size: u64,
    },
    /// The request does not fit below the pool's end.
    #[error("{kind} window exhausted: {size:#x} bytes at {current:#x} crosses {end:#x}")]
    Exhausted {
        /// The pool.
        kind: WindowKind,
        /// The requested size.
        size: u64,
        /// The cursor at the time of the request.
        current: u64,
        /// The exclusive end of the pool.
        end: u64,
    },
    /// The aligned allocation would wrap the address space.
    #[error("{kind} window overflow allocating {size:#x} bytes")]
    Overflow {
        /// The pool.
        kind: WindowKind,
        /// The requested size.
        size: u64,
    },
}

/// Rounds `value` up to the power-of-two `align`.
fn align_up(value: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    Some(value.checked_add(align - 1)? & !(align - 1))
}

/// The bump state of one memory pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowCursor {
    kind: WindowKind,
    current: u64,
    previous_alloc_size: u64,
    owning_bus: Option<u8>,
    end: Option<u64>,
}

impl WindowCursor {
    /// Creates a cursor starting at `base`. `limit` is the exclusive end of
    /// the pool; without one, 32-bit pools end at 4 GiB.
    pub fn new(kind: WindowKind, base: u64, limit: Option<u64>) -> Self {
        Self {
            kind,
            current: base,
            previous_alloc_size: 0,
            owning_bus: None,
            end: limit.or(kind.architectural_end()),
        }
    }

    /// The pool this cursor allocates from.
    pub fn kind(&self) -> WindowKind {
        self.kind
    }

    /// The next free address.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Size of the most recent successful allocation.
    pub fn previous_alloc_size(&self) -> u64 {
        self.previous_alloc_size
    }

    /// Bus of the function that made the most recent allocation.
    pub fn owning_bus(&self) -> Option<u8> {
        self.owning_bus
    }

    /// Exclusive end of the pool, if bounded.
    pub fn end(&self) -> Option<u64> {
        self.end
    }

    /// Allocates `size` bytes aligned to `size`.
    ///
    /// On failure the cursor is left untouched.
    pub fn allocate(&mut self, size: u64) -> Result<u64, AllocError> {
        if !size.is_power_of_two() {
            return Err(AllocError::InvalidSize { size });
        }
        let overflow = || AllocError::Overflow {
            kind: self.kind,
            size,
        };
        let base = align_up(self.current, size).ok_or_else(overflow)?;
        let next = base.checked_add(size).ok_or_else(overflow)?;
        if let Some(end) = self.end {
            if next > end {
                return Err(AllocError::Exhausted {
                    kind: self.kind,
                    size,
                    current: self.current,
                    end,
                });
            }
        }
        self.current = next;
        self.previous_alloc_size = size;
        Ok(base)
    }

    /// Bumps the cursor to the next multiple of `granule`.
    pub fn align_to(&mut self, granule: u64) {
        match align_up(self.current, granule) {
            Some(aligned) => self.current = aligned,
            None => {
                tracing::warn!(kind = %self.kind, current = self.current, "cannot align cursor");
            }
        }
    }
}

/// Cursor values of all three pools at one instant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// [`WindowKind::NonPrefetch32`] cursor.
    pub non_prefetch32: u64,
    /// [`WindowKind::Prefetch32`] cursor.
    pub prefetch32: u64,
    /// [`WindowKind::Prefetch64`] cursor.
    pub prefetch64: u64,
}

impl WindowSnapshot {
    /// Returns the cursor for `kind`.
    pub fn get(&self, kind: WindowKind) -> u64 {
        match kind {
            WindowKind::NonPrefetch32 => self.non_prefetch32,
            WindowKind::Prefetch32 => self.prefetch32,
            WindowKind::Prefetch64 => self.prefetch64,
        }
    }

    /// Returns the addresses of `kind` handed out between `self` and the
    /// later snapshot `after`.
    pub fn delta(&self, after: &WindowSnapshot, kind: WindowKind) -> Range<u64> {
        self.get(kind)..after.get(kind)
    }
}

/// The three pools shared by one enumeration run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowSet {
    non_prefetch32: WindowCursor,
    prefetch32: WindowCursor,
    prefetch64: WindowCursor,
}

impl WindowSet {
    /// Creates a set from three cursors.
    pub fn new(
        non_prefetch32: WindowCursor,
        prefetch32: WindowCursor,
        prefetch64: WindowCursor,
    ) -> Self {
        assert_eq!(non_prefetch32.kind, WindowKind::NonPrefetch32);
        assert_eq!(prefetch32.kind, WindowKind::Prefetch32);
        assert_eq!(prefetch64.kind, WindowKind::Prefetch64);
        Self {
            non_prefetch32,
            prefetch32,
            prefetch64,
        }
    }

    /// Returns the cursor for `kind`.
    pub fn get(&self, kind: WindowKind) -> &WindowCursor {
        match kind {
            WindowKind::NonPrefetch32 => &self.non_prefetch32,
            WindowKind::Prefetch32 => &self.prefetch32,
            WindowKind::Prefetch64 => &self.prefetch64,
        }
    }

    fn get_mut(&mut self, kind: WindowKind) -> &mut WindowCursor {
        match kind {
            WindowKind::NonPrefetch32 => &mut self.non_prefetch32,
            WindowKind::Prefetch32 => &mut self.prefetch32,
            WindowKind::Prefetch64 => &mut self.prefetch64,
        }
    }

    /// Allocates `size` bytes of `kind` on behalf of a function on `bus`.
    pub fn allocate_for(&mut self, kind: WindowKind, bus: u8, size: u64) -> Result<u64, AllocError> {
        let cursor = self.get_mut(kind);
        let base = cursor.allocate(size)?;
        cursor.owning_bus = Some(bus);
        Ok(base)
    }

    /// Aligns every cursor to `granule`.
    pub fn align_to(&mut self, granule: u64) {
        for kind in WindowKind::ALL {
            self.get_mut(kind).align_to(granule);
        }
    }

    /// Aligns every cursor that moved past `since` to `granule`.
    pub fn align_advanced(&mut self, since: &WindowSnapshot, granule: u64) {
        for kind in WindowKind::ALL {
            let cursor = self.get_mut(kind);
            if cursor.current > since.get(kind) {
                cursor.align_to(granule);
            }
        }
    }

    /// Captures the current cursor values.
    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            non_prefetch32: self.non_prefetch32.current,
            prefetch32: self.prefetch32.current,
            prefetch64: self.prefetch64.current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> WindowSet {
        WindowSet::new(
            WindowCursor::new(WindowKind::NonPrefetch32, 0x5000_0000, None),
            WindowCursor::new(WindowKind::Prefetch32, 0x6000_0000, Some(0x6100_0000)),
            WindowCursor::new(WindowKind::Prefetch64, 0x40_0000_0000, None),
        )
    }

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let mut cursor = WindowCursor::new(WindowKind::NonPrefetch32, 0x1000_0010, None);
        let sizes = [0x10, 0x1000, 0x4, 0x10_0000, 0x1000, 0x80];
        let mut allocated: Vec<(u64, u64)> = Vec::new();
        for size in sizes {
            let base = cursor.allocate(size).unwrap();
            assert_eq!(base % size, 0);
            for &(other, other_size) in &allocated {
                assert!(base >= other + other_size || base + size <= other);
            }
            allocated.push((base, size));
        }
        assert_eq!(cursor.previous_alloc_size(), 0x80);
        assert_eq!(allocated[0].0, 0x1000_0010);
        assert_eq!(allocated[1].0, 0x1000_1000);
        assert_eq!(allocated[3].0, 0x1010_0000);
    }

    #[test]
    fn invalid_sizes() {
        let mut cursor = WindowCursor::new(WindowKind::Prefetch64, 0, None);
        assert_eq!(cursor.allocate(0), Err(AllocError::InvalidSize { size: 0 }));
        assert_eq!(
            cursor.allocate(0x3000),
            Err(AllocError::InvalidSize { size: 0x3000 })
        );
        assert_eq!(cursor.current(), 0);
    }

    #[test]
    fn exhaustion_leaves_cursor() {
        let mut set = set();
        set.allocate_for(WindowKind::Prefetch32, 2, 0x80_0000).unwrap();
        let err = set
            .allocate_for(WindowKind::Prefetch32, 3, 0x100_0000)
            .unwrap_err();
        assert!(matches!(err, AllocError::Exhausted { end: 0x6100_0000, .. }));
        let cursor = set.get(WindowKind::Prefetch32);
        assert_eq!(cursor.current(), 0x6080_0000);
        assert_eq!(cursor.owning_bus(), Some(2));
    }

    #[test]
    fn default_32_bit_end() {
        let mut cursor = WindowCursor::new(WindowKind::NonPrefetch32, 0xFFF0_0000, None);
        assert_eq!(cursor.allocate(0x10_0000), Ok(0xFFF0_0000));
        assert!(matches!(
            cursor.allocate(0x1000),
            Err(AllocError::Exhausted { end: FOUR_GB, .. })
        ));
    }

    #[test]
    fn overflow_64_bit() {
        let mut cursor = WindowCursor::new(WindowKind::Prefetch64, u64::MAX - 0xFFF, None);
        assert!(matches!(
            cursor.allocate(0x2000),
            Err(AllocError::Overflow { .. })
        ));
        assert_eq!(
            cursor.allocate(0x1000),
            Err(AllocError::Overflow {
                kind: WindowKind::Prefetch64,
                size: 0x1000
            })
        );
    }

    #[test]
    fn align_advanced_only_touches_moved_cursors() {
        let mut set = set();
        set.align_to(1 << 20);
        let before = set.snapshot();
        set.allocate_for(WindowKind::NonPrefetch32, 1, 0x1000).unwrap();
        set.align_advanced(&before, 1 << 20);
        let after = set.snapshot();
        assert_eq!(
            before.delta(&after, WindowKind::NonPrefetch32),
            0x5000_0000..0x5010_0000
        );
        assert!(before.delta(&after, WindowKind::Prefetch32).is_empty());
        assert!(before.delta(&after, WindowKind::Prefetch64).is_empty());
    }
}
