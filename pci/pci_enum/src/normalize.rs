// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Clearing of the primary bus number left behind by the walk.
//!
//! A later, independent enumeration must not see this run's primary bus
//! numbers. Secondary and subordinate bus numbers stay programmed.

use crate::table::BdfTable;
use pci_cfg::ConfigSpaceAccessor;
use pci_cfg::ecam::EcamWindow;
use pci_cfg::spec::cfg_space::HeaderType01;

const PRIMARY_BUS_MASK: u32 = 0xFFFF_FF00;

/// Clears the primary bus number of every bridge discovered in `window`.
/// Returns the number of bridges touched.
pub fn clear_primary_bus(
    access: &mut impl ConfigSpaceAccessor,
    table: &BdfTable,
    window: &EcamWindow,
) -> usize {
    let mut count = 0;
    for record in table.bridges() {
        let loc = record.location;
        if !window.contains(loc.segment, loc.bus) {
            continue;
        }
        let offset = HeaderType01::LATENCY_BUS_NUMBERS.0;
        let value = access.read32(loc, offset);
        access.write32(loc, offset, value & PRIMARY_BUS_MASK);
        count += 1;
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enumerate::BusEnumerator;
    use crate::test_helpers::bridge;
    use crate::test_helpers::init_tracing;
    use crate::test_helpers::windows;
    use pci_cfg::Location;
    use pci_cfg_emu::DeviceBars;
    use pci_cfg_emu::EmulatedBus;
    use pci_cfg_emu::EmulatedFabric;

    #[test]
    fn primary_bus_reads_zero() {
        init_tracing();
        let window = EcamWindow {
            ecam_base: 0,
            segment: 0,
            start_bus: 0,
            end_bus: 0xFF,
        };
        let mut fabric = EmulatedFabric::new().with_root_bus(
            0,
            0,
            EmulatedBus::new().with_bridge(
                3,
                0,
                bridge(DeviceBars::new()),
                EmulatedBus::new().with_bridge(0, 0, bridge(DeviceBars::new()), EmulatedBus::new()),
            ),
        );
        let mut windows = windows();
        let mut table = BdfTable::new();
        BusEnumerator::new(&mut fabric, window, &mut windows, &mut table).enumerate(0, 1);

        let inner = Location::new(0, 1, 0, 0);
        let numbers = fabric.read32(inner, 0x18);
        fabric.write32(inner, 0x18, numbers | 0x2000_0000);
        assert_eq!(fabric.read32(inner, 0x18), 0x2002_0201);

        assert_eq!(clear_primary_bus(&mut fabric, &table, &window), 2);
        for record in table.bridges() {
            assert_eq!(fabric.read32(record.location, 0x18) & 0xFF, 0);
        }
        assert_eq!(fabric.read32(inner, 0x18), 0x2002_0200);
        assert_eq!(fabric.read32(Location::new(0, 0, 3, 0), 0x18), 0x0002_0100);
    }

    #[test]
    fn other_windows_untouched() {
        init_tracing();
        let mut fabric = EmulatedFabric::new().with_root_bus(
            1,
            0,
            EmulatedBus::new().with_bridge(0, 0, bridge(DeviceBars::new()), EmulatedBus::new()),
        );
        let loc = Location::new(1, 0, 0, 0);
        let mut table = BdfTable::new();
        let mut windows = windows();
        let window = EcamWindow {
            ecam_base: 0,
            segment: 1,
            start_bus: 0,
            end_bus: 0xFF,
        };
        BusEnumerator::new(&mut fabric, window, &mut windows, &mut table).enumerate(0, 1);
        fabric.write32(loc, 0x18, 0x0001_0107);

        let elsewhere = EcamWindow {
            segment: 0,
            ..window
        };
        assert_eq!(clear_primary_bus(&mut fabric, &table, &elsewhere), 0);
        assert_eq!(fabric.read32(loc, 0x18), 0x0001_0107);
        assert_eq!(clear_primary_bus(&mut fabric, &table, &window), 1);
        assert_eq!(fabric.read32(loc, 0x18), 0x0001_0100);
    }
}
