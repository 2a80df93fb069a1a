// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! BAR size discovery.
//!
//! Sizing is destructive: the all-ones pattern written to probe the BAR
//! stays in the register until the returned [`ProbedBar`] is committed,
//! disabled or restored.

use pci_cfg::ConfigSpaceAccessor;
use pci_cfg::Location;
use pci_cfg::spec::cfg_space;

/// Address width of a memory BAR.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BarWidth {
    /// One register.
    Bits32,
    /// Two consecutive registers.
    Bits64,
}

/// Prefetchability of a memory BAR.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MemoryKind {
    /// Reads may have side effects.
    NonPrefetchable,
    /// Reads have no side effects.
    Prefetchable,
}

/// The decoded result of sizing one BAR.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BarDescriptor {
    /// Index of the (first) BAR register.
    pub index: u8,
    /// Address width. Always [`BarWidth::Bits32`] for I/O BARs.
    pub width: BarWidth,
    /// Prefetchability. Always [`MemoryKind::NonPrefetchable`] for I/O BARs.
    pub memory_kind: MemoryKind,
    /// Decoded size; a non-zero power of two.
    pub size: u64,
    /// Whether the BAR decodes I/O space.
    pub is_io: bool,
}

impl BarDescriptor {
    /// Number of BAR registers the BAR occupies.
    pub fn slots(&self) -> u8 {
        match self.width {
            BarWidth::Bits32 => 1,
            BarWidth::Bits64 => 2,
        }
    }
}

/// A sized BAR whose register still holds the sizing pattern.
#[must_use = "a probed BAR must be committed, disabled or restored"]
#[derive(Debug)]
pub struct ProbedBar {
    loc: Location,
    descriptor: BarDescriptor,
    original: u32,
    original_upper: Option<u32>,
}

impl ProbedBar {
    /// The decoded BAR.
    pub fn descriptor(&self) -> &BarDescriptor {
        &self.descriptor
    }

    /// Programs `address` into the BAR, splitting it across both registers
    /// of a 64-bit BAR.
    pub fn commit(self, access: &mut impl ConfigSpaceAccessor, address: u64) {
        debug_assert_eq!(address % self.descriptor.size, 0);
        self.write(access, address as u32, (address >> 32) as u32);
    }

    /// Leaves the BAR programmed to address zero.
    pub fn disable(self, access: &mut impl ConfigSpaceAccessor) {
        self.write(access, 0, 0);
    }

    /// Writes back the values the registers held before probing.
    pub fn restore(self, access: &mut impl ConfigSpaceAccessor) {
        let upper = self.original_upper.unwrap_or(0);
        self.write(access, self.original, upper);
    }

    fn write(&self, access: &mut impl ConfigSpaceAccessor, low: u32, high: u32) {
        let offset = cfg_space::bar_offset(self.descriptor.index);
        access.write32(self.loc, offset, low);
        if self.descriptor.width == BarWidth::Bits64 {
            access.write32(self.loc, offset + 4, high);
        }
    }
}

/// Sizes BAR `index` of the function at `loc`.
///
/// Returns `None` if the BAR is unimplemented, in which case the register
/// has already been restored. `bar_count` is the number of BAR registers in
/// the function's header layout.
pub fn probe(
    access: &mut impl ConfigSpaceAccessor,
    loc: Location,
    index: u8,
    bar_count: u8,
) -> Option<ProbedBar> {
    let offset = cfg_space::bar_offset(index);
    let original = access.read32(loc, offset);
    let bits = cfg_space::BarEncodingBits::from_bits(original);

    if bits.use_pio() {
        access.write32(loc, offset, !0);
        let readback = access.read32(loc, offset);
        let mut mask = readback & !cfg_space::BAR_IO_TYPE_MASK;
        if mask != 0 && mask & 0xFFFF_0000 == 0 {
            // 16-bit I/O decoder: the upper half is hardwired to zero.
            mask |= 0xFFFF_0000;
        }
        if mask == 0 {
            access.write32(loc, offset, original);
            return None;
        }
        return Some(ProbedBar {
            loc,
            descriptor: BarDescriptor {
                index,
                width: BarWidth::Bits32,
                memory_kind: MemoryKind::NonPrefetchable,
                size: lowest_set_bit(mask as u64),
                is_io: true,
            },
            original,
            original_upper: None,
        });
    }

    let width = match (bits.type_64_bit(), bits.below_1mb()) {
        (false, _) => BarWidth::Bits32,
        (true, false) => BarWidth::Bits64,
        (true, true) => {
            tracing::warn!(%loc, bar = index, original, "reserved BAR memory type");
            return None;
        }
    };
    if width == BarWidth::Bits64 && index + 1 >= bar_count {
        tracing::warn!(%loc, bar = index, "64-bit BAR in the last register slot");
        return None;
    }

    let type_bits = original & cfg_space::BAR_MEMORY_TYPE_MASK;
    access.write32(loc, offset, 0xFFFF_FFF0 | type_bits);
    let (mask, original_upper) = match width {
        BarWidth::Bits32 => {
            let low = access.read32(loc, offset) & !cfg_space::BAR_MEMORY_TYPE_MASK;
            (low as u64, None)
        }
        BarWidth::Bits64 => {
            let original_upper = access.read32(loc, offset + 4);
            access.write32(loc, offset + 4, !0);
            let low = access.read32(loc, offset) & !cfg_space::BAR_MEMORY_TYPE_MASK;
            let high = access.read32(loc, offset + 4);
            ((high as u64) << 32 | low as u64, Some(original_upper))
        }
    };

    if mask == 0 {
        access.write32(loc, offset, original);
        if let Some(upper) = original_upper {
            access.write32(loc, offset + 4, upper);
        }
        return None;
    }

    Some(ProbedBar {
        loc,
        descriptor: BarDescriptor {
            index,
            width,
            memory_kind: if bits.prefetchable() {
                MemoryKind::Prefetchable
            } else {
                MemoryKind::NonPrefetchable
            },
            size: lowest_set_bit(mask),
            is_io: false,
        },
        original,
        original_upper,
    })
}

/// Returns the decoded size of a non-zero address mask. For well-formed
/// hardware this equals `!mask + 1`; for malformed masks it is still a power
/// of two.
fn lowest_set_bit(mask: u64) -> u64 {
    debug_assert_ne!(mask, 0);
    mask & mask.wrapping_neg()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::endpoint;
    use crate::test_helpers::init_tracing;
    use pci_cfg_emu::DeviceBars;
    use pci_cfg_emu::EmulatedBus;
    use pci_cfg_emu::EmulatedFabric;
    use pci_cfg_emu::EmulatedFunction;

    const LOC: Location = Location::new(0, 0, 0, 0);

    fn fabric(bars: DeviceBars) -> EmulatedFabric {
        EmulatedFabric::new()
            .with_root_bus(0, 0, EmulatedBus::new().with_device(0, 0, endpoint(bars)))
    }

    #[test]
    fn memory32_non_prefetchable() {
        init_tracing();
        let mut fabric = fabric(DeviceBars::new().memory32(0, 0x1000, false));
        let bar = probe(&mut fabric, LOC, 0, 6).unwrap();
        assert_eq!(
            *bar.descriptor(),
            BarDescriptor {
                index: 0,
                width: BarWidth::Bits32,
                memory_kind: MemoryKind::NonPrefetchable,
                size: 0x1000,
                is_io: false,
            }
        );
        assert_eq!(fabric.read32(LOC, 0x10), 0xFFFF_F000);
        bar.commit(&mut fabric, 0x5000_0000);
        assert_eq!(fabric.read32(LOC, 0x10), 0x5000_0000);
    }

    #[test]
    fn memory64_prefetchable() {
        init_tracing();
        let mut fabric = fabric(DeviceBars::new().memory64(2, 0x1_0000_0000, true));
        let bar = probe(&mut fabric, LOC, 2, 6).unwrap();
        let descriptor = *bar.descriptor();
        assert_eq!(descriptor.width, BarWidth::Bits64);
        assert_eq!(descriptor.memory_kind, MemoryKind::Prefetchable);
        assert_eq!(descriptor.size, 0x1_0000_0000);
        assert_eq!(descriptor.slots(), 2);
        bar.commit(&mut fabric, 0x80_0000_0000);
        assert_eq!(fabric.read32(LOC, 0x18), 0x0000_000C);
        assert_eq!(fabric.read32(LOC, 0x1C), 0x80);
    }

    #[test]
    fn unimplemented_bar() {
        init_tracing();
        let mut fabric = fabric(DeviceBars::new());
        assert!(probe(&mut fabric, LOC, 3, 6).is_none());
        assert_eq!(fabric.read32(LOC, 0x1C), 0);
    }

    #[test]
    fn unimplemented_bars_restore_registers() {
        init_tracing();
        let mut fabric = fabric(DeviceBars::new().memory32(2, 0x1000, false));
        for index in [0, 1, 3, 4, 5] {
            assert!(probe(&mut fabric, LOC, index, 6).is_none());
            assert_eq!(fabric.read32(LOC, cfg_space::bar_offset(index)), 0);
        }
        let bar = probe(&mut fabric, LOC, 2, 6).unwrap();
        assert_eq!(bar.descriptor().size, 0x1000);
        bar.disable(&mut fabric);

        // A 64-bit BAR whose address bits are all hardwired to zero.
        let mut fabric = EmulatedFabric::new().with_root_bus(
            0,
            0,
            EmulatedBus::new().with_function(
                0,
                0,
                EmulatedFunction::Fixed([(0x10, 0x0000_000C)].into_iter().collect()),
            ),
        );
        assert!(probe(&mut fabric, LOC, 0, 6).is_none());
        assert_eq!(fabric.read32(LOC, 0x10), 0x0000_000C);
        assert_eq!(fabric.read32(LOC, 0x14), 0);
    }

    #[test]
    fn io_bar_is_restored() {
        init_tracing();
        let mut fabric = fabric(DeviceBars::new().io(1, 0x40));
        fabric.write32(LOC, 0x14, 0x0000_E000);
        let bar = probe(&mut fabric, LOC, 1, 6).unwrap();
        assert!(bar.descriptor().is_io);
        assert_eq!(bar.descriptor().size, 0x40);
        bar.restore(&mut fabric);
        assert_eq!(fabric.read32(LOC, 0x14), 0x0000_E001);
    }

    #[test]
    fn disable_writes_zero() {
        init_tracing();
        let mut fabric = fabric(DeviceBars::new().memory32(0, 0x10, true));
        fabric.write32(LOC, 0x10, 0x1234_5670);
        let bar = probe(&mut fabric, LOC, 0, 6).unwrap();
        assert_eq!(bar.descriptor().memory_kind, MemoryKind::Prefetchable);
        bar.disable(&mut fabric);
        assert_eq!(fabric.read32(LOC, 0x10), 0x0000_0008);
    }

    #[test]
    fn malformed_mask_still_power_of_two() {
        init_tracing();
        // A BAR whose writable bits are not contiguous.
        let mut fabric = EmulatedFabric::new().with_root_bus(
            0,
            0,
            EmulatedBus::new().with_function(
                0,
                0,
                EmulatedFunction::Fixed([(0x10, 0xF0F0_3000)].into_iter().collect()),
            ),
        );
        let bar = probe(&mut fabric, LOC, 0, 6).unwrap();
        assert_eq!(bar.descriptor().size, 0x1000);
        assert!(bar.descriptor().size.is_power_of_two());
        bar.restore(&mut fabric);
    }

    #[test]
    fn reserved_type_and_last_slot() {
        init_tracing();
        let mut fabric = EmulatedFabric::new().with_root_bus(
            0,
            0,
            EmulatedBus::new().with_function(
                0,
                0,
                EmulatedFunction::Fixed(
                    [(0x10, 0x0000_0006), (0x24, 0x0000_0004)]
                        .into_iter()
                        .collect(),
                ),
            ),
        );
        assert!(probe(&mut fabric, LOC, 0, 6).is_none());
        assert!(probe(&mut fabric, LOC, 5, 6).is_none());
        assert_eq!(fabric.writes(), 0);
    }
}
