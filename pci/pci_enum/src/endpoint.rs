// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Assignment of addresses to a function's BARs.

use crate::bar;
use crate::bar::BarDescriptor;
use crate::bar::BarWidth;
use crate::bar::MemoryKind;
use crate::window::WindowKind;
use crate::window::WindowSet;
use pci_cfg::ConfigSpaceAccessor;
use pci_cfg::Location;

/// The outcome of programming one BAR.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BarAssignment {
    /// The sized BAR.
    pub descriptor: BarDescriptor,
    /// The programmed address, or `None` if the BAR was left unassigned
    /// (I/O BARs, or the pool was exhausted).
    pub address: Option<u64>,
}

/// Returns the pool a memory BAR is allocated from.
///
/// Every 64-bit BAR comes from the 64-bit pool, regardless of its prefetch
/// bit.
pub fn window_for(descriptor: &BarDescriptor) -> WindowKind {
    match (descriptor.width, descriptor.memory_kind) {
        (BarWidth::Bits64, _) => WindowKind::Prefetch64,
        (BarWidth::Bits32, MemoryKind::Prefetchable) => WindowKind::Prefetch32,
        (BarWidth::Bits32, MemoryKind::NonPrefetchable) => WindowKind::NonPrefetch32,
    }
}

/// Sizes and programs BARs `0..bar_count` of the function at `loc`.
pub fn program_bars(
    access: &mut impl ConfigSpaceAccessor,
    windows: &mut WindowSet,
    loc: Location,
    bar_count: u8,
) -> Vec<BarAssignment> {
    let mut assignments = Vec::new();
    let mut index = 0;
    while index < bar_count {
        let Some(probed) = bar::probe(access, loc, index, bar_count) else {
            index += 1;
            continue;
        };
        let descriptor = *probed.descriptor();
        index += descriptor.slots();

        if descriptor.is_io {
            tracing::debug!(%loc, bar = descriptor.index, size = descriptor.size, "skipping i/o bar");
            probed.restore(access);
            assignments.push(BarAssignment {
                descriptor,
                address: None,
            });
            continue;
        }

        let kind = window_for(&descriptor);
        let address = match windows.allocate_for(kind, loc.bus, descriptor.size) {
            Ok(address) => {
                tracing::debug!(
                    %loc,
                    bar = descriptor.index,
                    %kind,
                    size = descriptor.size,
                    address,
                    "assigned bar"
                );
                probed.commit(access, address);
                Some(address)
            }
            Err(err) => {
                tracing::warn!(
                    %loc,
                    bar = descriptor.index,
                    error = &err as &dyn std::error::Error,
                    "bar left disabled"
                );
                probed.disable(access);
                None
            }
        };
        assignments.push(BarAssignment {
            descriptor,
            address,
        });
    }
    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::endpoint;
    use crate::test_helpers::init_tracing;
    use crate::test_helpers::windows;
    use crate::test_helpers::windows_with_np32_limit;
    use pci_cfg::spec::cfg_space::HEADER_TYPE_00_BARS;
    use pci_cfg_emu::DeviceBars;
    use pci_cfg_emu::EmulatedBus;
    use pci_cfg_emu::EmulatedFabric;

    const LOC: Location = Location::new(0, 0, 3, 0);

    fn fabric(bars: DeviceBars) -> EmulatedFabric {
        EmulatedFabric::new()
            .with_root_bus(0, 0, EmulatedBus::new().with_device(3, 0, endpoint(bars)))
    }

    fn device_bar(fabric: &EmulatedFabric, index: usize) -> Option<u64> {
        fabric.function(LOC).unwrap().as_type0().unwrap().bar_address(index)
    }

    #[test]
    fn bars_go_to_matching_pools() {
        init_tracing();
        let mut fabric = fabric(
            DeviceBars::new()
                .memory32(0, 0x1000, false)
                .memory32(1, 0x2000, true)
                .memory64(2, 0x10_0000, false)
                .io(4, 0x20)
                .memory32(5, 0x100, false),
        );
        let mut windows = windows();
        let assignments = program_bars(&mut fabric, &mut windows, LOC, HEADER_TYPE_00_BARS);

        let addresses: Vec<_> = assignments
            .iter()
            .map(|a| (a.descriptor.index, a.address))
            .collect();
        assert_eq!(
            addresses,
            [
                (0, Some(0x1000_0000)),
                (1, Some(0x2000_0000)),
                (2, Some(0x40_0000_0000)),
                (4, None),
                (5, Some(0x1000_1000)),
            ]
        );
        assert_eq!(device_bar(&fabric, 0), Some(0x1000_0000));
        assert_eq!(device_bar(&fabric, 1), Some(0x2000_0000));
        assert_eq!(device_bar(&fabric, 2), Some(0x40_0000_0000));
        assert_eq!(device_bar(&fabric, 5), Some(0x1000_1000));
        assert_eq!(windows.get(WindowKind::NonPrefetch32).owning_bus(), Some(0));
    }

    #[test]
    fn exhausted_pool_disables_bar() {
        init_tracing();
        let mut fabric = fabric(
            DeviceBars::new()
                .memory32(0, 0x100_0000, false)
                .memory32(1, 0x10_0000, false),
        );
        let mut windows = windows_with_np32_limit(Some(0x1080_0000));
        let assignments = program_bars(&mut fabric, &mut windows, LOC, HEADER_TYPE_00_BARS);
        assert_eq!(assignments[0].address, None);
        assert_eq!(assignments[1].address, Some(0x1000_0000));
        assert_eq!(device_bar(&fabric, 0), Some(0));
        assert_eq!(device_bar(&fabric, 1), Some(0x1000_0000));
    }
}
