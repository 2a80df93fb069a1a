// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! BAR register emulation shared by both header layouts.

use pci_cfg::spec::cfg_space;

/// Smallest memory BAR a device may request.
const MIN_MEMORY_BAR_SIZE: u64 = 16;
/// Smallest I/O BAR a device may request.
const MIN_IO_BAR_SIZE: u64 = 4;

#[derive(Copy, Clone, Debug)]
enum BarDefinition {
    Memory32 { len: u64, prefetchable: bool },
    Memory64 { len: u64, prefetchable: bool },
    Io { len: u64 },
}

/// Container type that describes a device's available BARs.
///
/// Lengths are rounded up to a power of 2, as required by PCI (and inherently
/// required by the BAR representation).
#[derive(Clone, Debug, Default)]
pub struct DeviceBars {
    bars: [Option<BarDefinition>; 6],
}

impl DeviceBars {
    /// Create a new instance of [`DeviceBars`] with no implemented BARs.
    pub fn new() -> DeviceBars {
        DeviceBars::default()
    }

    /// Implement BAR `index` as a 32-bit memory BAR.
    pub fn memory32(mut self, index: usize, len: u64, prefetchable: bool) -> Self {
        self.bars[index] = Some(BarDefinition::Memory32 { len, prefetchable });
        self
    }

    /// Implement BARs `index` and `index + 1` as a single 64-bit memory BAR.
    pub fn memory64(mut self, index: usize, len: u64, prefetchable: bool) -> Self {
        assert!(index < 5, "64-bit BAR needs a second register");
        self.bars[index] = Some(BarDefinition::Memory64 { len, prefetchable });
        self.bars[index + 1] = None;
        self
    }

    /// Implement BAR `index` as an I/O BAR.
    pub fn io(mut self, index: usize, len: u64) -> Self {
        self.bars[index] = Some(BarDefinition::Io { len });
        self
    }
}

/// Emulated BAR registers: writable address bits plus read-only encoding
/// bits.
#[derive(Clone, Debug)]
pub(crate) struct BarBank {
    address_masks: [u32; 6],
    encoding: [u32; 6],
    values: [u32; 6],
    count: usize,
}

impl BarBank {
    pub(crate) fn new(bars: &DeviceBars, count: usize) -> Self {
        let mut address_masks = [0; 6];
        let mut encoding = [0; 6];
        for (index, bar) in bars.bars.iter().enumerate().take(count) {
            let Some(bar) = *bar else { continue };
            match bar {
                BarDefinition::Memory32 { len, prefetchable } => {
                    let len = len.next_power_of_two().max(MIN_MEMORY_BAR_SIZE);
                    address_masks[index] = !(len - 1) as u32;
                    encoding[index] = cfg_space::BarEncodingBits::new()
                        .with_prefetchable(prefetchable)
                        .into_bits();
                }
                BarDefinition::Memory64 { len, prefetchable } => {
                    assert!(index + 1 < count);
                    let len = len.next_power_of_two().max(MIN_MEMORY_BAR_SIZE);
                    let mask64 = !(len - 1);
                    address_masks[index] = mask64 as u32 & !cfg_space::BAR_MEMORY_TYPE_MASK;
                    address_masks[index + 1] = (mask64 >> 32) as u32;
                    encoding[index] = cfg_space::BarEncodingBits::new()
                        .with_type_64_bit(true)
                        .with_prefetchable(prefetchable)
                        .into_bits();
                }
                BarDefinition::Io { len } => {
                    let len = len.next_power_of_two().max(MIN_IO_BAR_SIZE);
                    address_masks[index] = !(len - 1) as u32 & !cfg_space::BAR_IO_TYPE_MASK;
                    encoding[index] = cfg_space::BarEncodingBits::new()
                        .with_use_pio(true)
                        .into_bits();
                }
            }
        }

        Self {
            address_masks,
            encoding,
            values: encoding,
            count,
        }
    }

    pub(crate) fn read(&self, index: usize) -> u32 {
        if index < self.count {
            self.values[index]
        } else {
            0
        }
    }

    pub(crate) fn write(&mut self, index: usize, val: u32) {
        if index < self.count {
            self.values[index] = (val & self.address_masks[index]) | self.encoding[index];
        }
    }

    /// Returns the address currently programmed into BAR `index`, combining
    /// the upper register for 64-bit BARs.
    pub(crate) fn address(&self, index: usize) -> Option<u64> {
        if index >= self.count || self.encoding[index] == 0 && self.address_masks[index] == 0 {
            return None;
        }
        let bits = cfg_space::BarEncodingBits::from_bits(self.encoding[index]);
        if bits.use_pio() {
            return Some((self.values[index] & !cfg_space::BAR_IO_TYPE_MASK) as u64);
        }
        let low = (self.values[index] & !cfg_space::BAR_MEMORY_TYPE_MASK) as u64;
        if bits.type_64_bit() {
            Some((self.values[index + 1] as u64) << 32 | low)
        } else {
            Some(low)
        }
    }
}
