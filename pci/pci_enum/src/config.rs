// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Platform-supplied inputs to an enumeration run.

use crate::window::WindowCursor;
use crate::window::WindowKind;
use crate::window::WindowSet;
use pci_cfg::ecam::EcamDirectory;
use thiserror::Error;

const FOUR_GB: u64 = 1 << 32;

/// One memory pool: the first address handed out and, optionally, the
/// exclusive end of the pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// First address of the pool.
    pub base: u64,
    /// Exclusive end of the pool.
    pub limit: Option<u64>,
}

impl PoolConfig {
    /// A pool starting at `base` with no platform-imposed end.
    pub const fn unbounded(base: u64) -> Self {
        Self { base, limit: None }
    }

    /// A pool covering `base..limit`.
    pub const fn bounded(base: u64, limit: u64) -> Self {
        Self {
            base,
            limit: Some(limit),
        }
    }
}

/// Everything an enumeration run needs from the platform.
#[derive(Clone, Debug)]
pub struct PlatformConfig {
    /// ECAM windows, walked in order.
    pub ecam: EcamDirectory,
    /// 32-bit non-prefetchable memory.
    pub non_prefetch32: PoolConfig,
    /// 32-bit prefetchable memory.
    pub prefetch32: PoolConfig,
    /// 64-bit prefetchable memory.
    pub prefetch64: PoolConfig,
}

/// A platform configuration that cannot be enumerated.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// No ECAM windows.
    #[error("no ecam windows configured")]
    NoEcamWindows,
    /// A window's bus range is inverted.
    #[error("ecam window {index} has start bus {start_bus:#x} above end bus {end_bus:#x}")]
    InvertedBusRange {
        /// Directory index.
        index: usize,
        /// First bus.
        start_bus: u8,
        /// Last bus.
        end_bus: u8,
    },
    /// Two windows decode the same bus of one segment.
    #[error("ecam windows {first} and {second} overlap in segment {segment}")]
    OverlappingWindows {
        /// Directory index of the earlier window.
        first: usize,
        /// Directory index of the later window.
        second: usize,
        /// The shared segment.
        segment: u32,
    },
    /// A 32-bit pool reaches beyond 4 GiB.
    #[error("{kind} pool {base:#x}..{end:#x} is not below 4GiB")]
    PoolAbove4Gb {
        /// The pool.
        kind: WindowKind,
        /// Pool base.
        base: u64,
        /// Pool end.
        end: u64,
    },
    /// A pool's limit does not lie above its base.
    #[error("{kind} pool limit {limit:#x} is not above base {base:#x}")]
    EmptyPool {
        /// The pool.
        kind: WindowKind,
        /// Pool base.
        base: u64,
        /// Pool limit.
        limit: u64,
    },
}

impl PlatformConfig {
    /// Returns the pool configuration for `kind`.
    pub fn pool(&self, kind: WindowKind) -> &PoolConfig {
        match kind {
            WindowKind::NonPrefetch32 => &self.non_prefetch32,
            WindowKind::Prefetch32 => &self.prefetch32,
            WindowKind::Prefetch64 => &self.prefetch64,
        }
    }

    /// Checks the configuration for problems that would make the walk
    /// meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let windows = self.ecam.windows();
        if windows.is_empty() {
            return Err(ConfigError::NoEcamWindows);
        }
        for (index, window) in windows.iter().enumerate() {
            if window.start_bus > window.end_bus {
                return Err(ConfigError::InvertedBusRange {
                    index,
                    start_bus: window.start_bus,
                    end_bus: window.end_bus,
                });
            }
        }
        for (second, b) in windows.iter().enumerate() {
            for (first, a) in windows[..second].iter().enumerate() {
                if a.segment == b.segment && a.start_bus <= b.end_bus && b.start_bus <= a.end_bus
                {
                    return Err(ConfigError::OverlappingWindows {
                        first,
                        second,
                        segment: a.segment,
                    });
                }
            }
        }

        for kind in WindowKind::ALL {
            let pool = self.pool(kind);
            if let Some(limit) = pool.limit {
                if limit <= pool.base {
                    return Err(ConfigError::EmptyPool {
                        kind,
                        base: pool.base,
                        limit,
                    });
                }
            }
            if kind != WindowKind::Prefetch64 {
                let end = pool.limit.unwrap_or(FOUR_GB);
                if pool.base >= FOUR_GB || end > FOUR_GB {
                    return Err(ConfigError::PoolAbove4Gb {
                        kind,
                        base: pool.base,
                        end,
                    });
                }
            }
        }
        Ok(())
    }

    /// Creates the cursors for a run, positioned at the pool bases.
    pub fn window_set(&self) -> WindowSet {
        let cursor = |kind| {
            let pool = self.pool(kind);
            WindowCursor::new(kind, pool.base, pool.limit)
        };
        WindowSet::new(
            cursor(WindowKind::NonPrefetch32),
            cursor(WindowKind::Prefetch32),
            cursor(WindowKind::Prefetch64),
        )
    }
}
