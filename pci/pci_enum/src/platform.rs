// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Enumeration of every ECAM window a platform describes.

use crate::config::ConfigError;
use crate::config::PlatformConfig;
use crate::enumerate::BusEnumerator;
use crate::normalize;
use crate::table::BdfTable;
use crate::window::WindowKind;
use crate::window::WindowSet;
use pci_cfg::ConfigSpaceAccessor;
use pci_cfg::ecam::EcamWindow;

/// The result of one window's walk.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WindowSummary {
    /// The walked window.
    pub window: EcamWindow,
    /// Highest bus number assigned in the window.
    pub subordinate: u8,
}

/// The result of a full run.
#[derive(Clone, Debug)]
pub struct Enumeration {
    /// Every discovered function.
    pub table: BdfTable,
    /// One entry per ECAM window, in directory order.
    pub windows: Vec<WindowSummary>,
    /// The cursors after the last allocation.
    pub cursors: WindowSet,
}

/// Walks every ECAM window of `config` in order, sharing one set of
/// address pools between them, and clears the primary bus numbers each
/// window's walk left behind.
pub fn enumerate_platform(
    access: &mut impl ConfigSpaceAccessor,
    config: &PlatformConfig,
) -> Result<Enumeration, ConfigError> {
    config.validate()?;

    let mut cursors = config.window_set();
    let mut table = BdfTable::new();
    let mut windows = Vec::with_capacity(config.ecam.len());

    for window in config.ecam.windows() {
        let first_record = table.len();
        let next_secondary = window.start_bus.saturating_add(1);
        let subordinate = if window.start_bus == window.end_bus {
            window.start_bus
        } else {
            BusEnumerator::new(access, *window, &mut cursors, &mut table)
                .enumerate(window.start_bus, next_secondary)
        };
        let bridges = normalize::clear_primary_bus(access, &table, window);

        tracing::info!(
            segment = window.segment,
            start_bus = window.start_bus,
            end_bus = window.end_bus,
            subordinate,
            functions = table.len() - first_record,
            bridges,
            np32 = cursors.get(WindowKind::NonPrefetch32).current(),
            p32 = cursors.get(WindowKind::Prefetch32).current(),
            p64 = cursors.get(WindowKind::Prefetch64).current(),
            "enumerated ecam window"
        );
        windows.push(WindowSummary {
            window: *window,
            subordinate,
        });
    }

    Ok(Enumeration {
        table,
        windows,
        cursors,
    })
}
