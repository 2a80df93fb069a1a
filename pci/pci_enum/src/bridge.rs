// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Programming of a PCI-to-PCI bridge's bus number and memory window
//! registers.

use crate::window::WindowKind;
use crate::window::WindowSnapshot;
use pci_cfg::ConfigSpaceAccessor;
use pci_cfg::Location;
use pci_cfg::spec::cfg_space;
use pci_cfg::spec::cfg_space::HeaderType01;
use std::ops::Range;

/// Granularity of bridge memory windows.
pub const WINDOW_GRANULE: u64 = cfg_space::BRIDGE_WINDOW_GRANULE;

/// Base/limit register pair of a window that decodes nothing.
const CLOSED_BASE: u16 = 0xFFF0;
const CLOSED_LIMIT: u16 = 0x0000;
const CLOSED_BASE_UPPER: u32 = 0xFFFF_FFFF;
const CLOSED_LIMIT_UPPER: u32 = 0;

/// The windows programmed into a bridge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BridgeWindows {
    /// The non-prefetchable window, if open.
    pub memory: Option<Range<u64>>,
    /// The prefetchable window, if open.
    pub prefetch: Option<Range<u64>>,
}

/// Writes the bus number register of the bridge at `loc`.
pub fn program_bus_numbers(
    access: &mut impl ConfigSpaceAccessor,
    loc: Location,
    primary: u8,
    secondary: u8,
    subordinate: u8,
) {
    let latency = cfg_space::BusNumbers::from_bits(
        access.read32(loc, HeaderType01::LATENCY_BUS_NUMBERS.0),
    )
    .secondary_latency_timer();
    let numbers = cfg_space::BusNumbers::new()
        .with_primary(primary)
        .with_secondary(secondary)
        .with_subordinate(subordinate)
        .with_secondary_latency_timer(latency);
    access.write32(loc, HeaderType01::LATENCY_BUS_NUMBERS.0, numbers.into_bits());
}

/// Enables I/O decoding, memory decoding and bus mastering on the bridge.
pub fn enable_forwarding(access: &mut impl ConfigSpaceAccessor, loc: Location) {
    let command = cfg_space::Command::from_bits(
        access.read32(loc, HeaderType01::STATUS_COMMAND.0) as u16,
    )
    .with_pio_enabled(true)
    .with_mmio_enabled(true)
    .with_bus_master(true);
    // Status bits are write-1-to-clear; leave them alone.
    access.write32(
        loc,
        HeaderType01::STATUS_COMMAND.0,
        command.into_bits() as u32,
    );
}

/// Programs closed windows whose bases sit at the cursors in `at`, while the
/// subtree below the bridge is walked.
pub fn program_provisional_windows(
    access: &mut impl ConfigSpaceAccessor,
    loc: Location,
    at: &WindowSnapshot,
) {
    let memory_base = cfg_space::window_register(at.non_prefetch32);
    let (base, limit) = if memory_base > CLOSED_LIMIT {
        (memory_base, CLOSED_LIMIT)
    } else {
        (CLOSED_BASE, CLOSED_LIMIT)
    };
    write_range(access, loc, HeaderType01::MEMORY_RANGE, base, limit);

    let prefetch = at.prefetch64;
    if prefetch >= WINDOW_GRANULE {
        write_range(
            access,
            loc,
            HeaderType01::PREFETCH_RANGE,
            cfg_space::window_register(prefetch),
            CLOSED_LIMIT,
        );
        write_prefetch_upper(access, loc, (prefetch >> 32) as u32, CLOSED_LIMIT_UPPER);
    } else {
        close_prefetch(access, loc);
    }
}

/// Programs the bridge's windows to enclose everything allocated between
/// `before` and `after`.
///
/// Both snapshots must already be aligned to [`WINDOW_GRANULE`]. The
/// prefetchable window comes from the 64-bit pool when that pool advanced,
/// otherwise from the 32-bit prefetchable pool.
///
/// A bridge has a single prefetchable window. If the subtree allocated from
/// both prefetchable pools, the 32-bit prefetchable BARs below the bridge
/// are not forwarded and stay unreachable through it.
pub fn program_windows(
    access: &mut impl ConfigSpaceAccessor,
    loc: Location,
    before: &WindowSnapshot,
    after: &WindowSnapshot,
) -> BridgeWindows {
    let memory = before.delta(after, WindowKind::NonPrefetch32);
    let memory = if memory.is_empty() {
        write_range(access, loc, HeaderType01::MEMORY_RANGE, CLOSED_BASE, CLOSED_LIMIT);
        None
    } else {
        write_range(
            access,
            loc,
            HeaderType01::MEMORY_RANGE,
            cfg_space::window_register(memory.start),
            cfg_space::window_register(memory.end - 1),
        );
        Some(memory)
    };

    let p32 = before.delta(after, WindowKind::Prefetch32);
    let p64 = before.delta(after, WindowKind::Prefetch64);
    let prefetch = match (p64.is_empty(), p32.is_empty()) {
        (false, false) => {
            tracing::warn!(
                %loc,
                p32_start = p32.start,
                p32_end = p32.end,
                "subtree uses both prefetchable pools, only the 64-bit window is forwarded"
            );
            Some(p64)
        }
        (false, true) => Some(p64),
        (true, false) => Some(p32),
        (true, true) => None,
    };
    match &prefetch {
        Some(range) => {
            let last = range.end - 1;
            write_range(
                access,
                loc,
                HeaderType01::PREFETCH_RANGE,
                cfg_space::window_register(range.start),
                cfg_space::window_register(last),
            );
            write_prefetch_upper(access, loc, (range.start >> 32) as u32, (last >> 32) as u32);
        }
        None => close_prefetch(access, loc),
    }

    tracing::debug!(%loc, ?memory, ?prefetch, "programmed bridge windows");
    BridgeWindows { memory, prefetch }
}

fn write_range(
    access: &mut impl ConfigSpaceAccessor,
    loc: Location,
    register: HeaderType01,
    base: u16,
    limit: u16,
) {
    access.write32(loc, register.0, (limit as u32) << 16 | base as u32);
}

fn write_prefetch_upper(
    access: &mut impl ConfigSpaceAccessor,
    loc: Location,
    base_upper: u32,
    limit_upper: u32,
) {
    access.write32(loc, HeaderType01::PREFETCH_BASE_UPPER.0, base_upper);
    access.write32(loc, HeaderType01::PREFETCH_LIMIT_UPPER.0, limit_upper);
}

fn close_prefetch(access: &mut impl ConfigSpaceAccessor, loc: Location) {
    write_range(
        access,
        loc,
        HeaderType01::PREFETCH_RANGE,
        CLOSED_BASE,
        CLOSED_LIMIT,
    );
    write_prefetch_upper(access, loc, CLOSED_BASE_UPPER, CLOSED_LIMIT_UPPER);
}
