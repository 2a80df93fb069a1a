// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Emulator for the type 01h (PCI-to-PCI bridge) configuration space header.

use crate::bars::BarBank;
use crate::bars::DeviceBars;
use crate::type0::bar_index;
use pci_cfg::spec::cfg_space;
use pci_cfg::spec::hwid::HardwareIds;
use std::ops::RangeInclusive;

const SUPPORTED_COMMAND_BITS: u16 = cfg_space::Command::new()
    .with_pio_enabled(true)
    .with_mmio_enabled(true)
    .with_bus_master(true)
    .with_parity_error_response(true)
    .with_enable_serr(true)
    .with_intx_disable(true)
    .into_bits();

#[derive(Debug, Clone)]
struct ConfigSpaceType1EmulatorState {
    /// The command register
    command: cfg_space::Command,
    /// The subordinate bus number register. Software programs
    /// this register with the highest bus number below the bridge.
    subordinate_bus_number: u8,
    /// The secondary bus number register. Software programs
    /// this register with the bus number assigned to the secondary
    /// side of the bridge.
    secondary_bus_number: u8,
    /// The primary bus number register. Read/write, but not used for
    /// routing.
    primary_bus_number: u8,
    secondary_latency_timer: u8,
    /// Bits 31:20 of the non-prefetchable window base, in register bits 15:4.
    memory_base: u16,
    /// Bits 31:20 of the non-prefetchable window limit. The lower 20 bits are
    /// assumed to be 1s.
    memory_limit: u16,
    prefetch_base: u16,
    prefetch_limit: u16,
    prefetch_base_upper: u32,
    prefetch_limit_upper: u32,
}

impl ConfigSpaceType1EmulatorState {
    fn new() -> Self {
        Self {
            command: cfg_space::Command::new(),
            subordinate_bus_number: 0,
            secondary_bus_number: 0,
            primary_bus_number: 0,
            secondary_latency_timer: 0,
            memory_base: 0,
            memory_limit: 0,
            prefetch_base: 0,
            prefetch_limit: 0,
            prefetch_base_upper: 0,
            prefetch_limit_upper: 0,
        }
    }
}

/// Emulator for the standard Type 1 PCI configuration space header.
#[derive(Debug, Clone)]
pub struct ConfigSpaceType1Emulator {
    hardware_ids: HardwareIds,
    multi_function_bit: bool,
    bars: BarBank,
    state: ConfigSpaceType1EmulatorState,
}

impl ConfigSpaceType1Emulator {
    /// Create a new [`ConfigSpaceType1Emulator`]. Only BARs 0 and 1 of
    /// `bars` are implemented.
    pub fn new(hardware_ids: HardwareIds, bars: DeviceBars) -> Self {
        Self {
            hardware_ids,
            multi_function_bit: false,
            bars: BarBank::new(&bars, cfg_space::HEADER_TYPE_01_BARS.into()),
            state: ConfigSpaceType1EmulatorState::new(),
        }
    }

    /// If the device is multi-function, enable bit 7 in the Header register.
    pub fn with_multi_function_bit(mut self, bit: bool) -> Self {
        self.multi_function_bit = bit;
        self
    }

    /// Returns the current command register.
    pub fn command(&self) -> cfg_space::Command {
        self.state.command
    }

    /// Returns the address programmed into BAR `index`, if implemented.
    pub fn bar_address(&self, index: usize) -> Option<u64> {
        self.bars.address(index)
    }

    /// Returns the raw (primary, secondary, subordinate) bus number registers.
    pub fn bus_numbers(&self) -> (u8, u8, u8) {
        (
            self.state.primary_bus_number,
            self.state.secondary_bus_number,
            self.state.subordinate_bus_number,
        )
    }

    /// Returns the range of bus numbers the bridge is programmed to decode.
    pub fn assigned_bus_range(&self) -> RangeInclusive<u8> {
        let secondary = self.state.secondary_bus_number;
        let subordinate = self.state.subordinate_bus_number;
        if secondary <= subordinate {
            secondary..=subordinate
        } else {
            0..=0
        }
    }

    /// If memory decoding is currently enabled, and the memory window assignment is valid,
    /// returns the 32-bit memory addresses the bridge is programmed to decode.
    pub fn assigned_memory_range(&self) -> Option<RangeInclusive<u32>> {
        let (base_addr, limit_addr) =
            cfg_space::decode_memory_range(self.state.memory_base, self.state.memory_limit);
        if self.state.command.mmio_enabled() && base_addr <= limit_addr {
            Some(base_addr..=limit_addr)
        } else {
            None
        }
    }

    /// If memory decoding is currently enabled, and the prefetchable memory window assignment
    /// is valid, returns the 64-bit prefetchable memory addresses the bridge is programmed to decode.
    pub fn assigned_prefetch_range(&self) -> Option<RangeInclusive<u64>> {
        let (base_low, limit_low) =
            cfg_space::decode_memory_range(self.state.prefetch_base, self.state.prefetch_limit);
        let base_addr = (self.state.prefetch_base_upper as u64) << 32 | base_low as u64;
        let limit_addr = (self.state.prefetch_limit_upper as u64) << 32 | limit_low as u64;
        if self.state.command.mmio_enabled() && base_addr <= limit_addr {
            Some(base_addr..=limit_addr)
        } else {
            None
        }
    }

    /// Read from the config space. `offset` must be 32-bit aligned.
    pub fn read_u32(&self, offset: u16) -> u32 {
        use cfg_space::HeaderType01;

        match HeaderType01(offset) {
            HeaderType01::DEVICE_VENDOR => self.hardware_ids.device_vendor(),
            HeaderType01::STATUS_COMMAND => self.state.command.into_bits() as u32,
            HeaderType01::CLASS_REVISION => self.hardware_ids.class_revision(),
            HeaderType01::BIST_HEADER => cfg_space::BistHeader::new()
                .with_header_layout(cfg_space::HEADER_LAYOUT_BRIDGE)
                .with_multi_function(self.multi_function_bit)
                .into_bits(),
            HeaderType01::BAR0 | HeaderType01::BAR1 => self.bars.read(bar_index(offset)),
            HeaderType01::LATENCY_BUS_NUMBERS => cfg_space::BusNumbers::new()
                .with_primary(self.state.primary_bus_number)
                .with_secondary(self.state.secondary_bus_number)
                .with_subordinate(self.state.subordinate_bus_number)
                .with_secondary_latency_timer(self.state.secondary_latency_timer)
                .into_bits(),
            HeaderType01::MEMORY_RANGE => {
                (self.state.memory_limit as u32) << 16 | self.state.memory_base as u32
            }
            HeaderType01::PREFETCH_RANGE => {
                // Set the low bit in both the limit and base registers to indicate
                // support for 64-bit addressing.
                ((self.state.prefetch_limit | cfg_space::PREFETCH_RANGE_64_BIT) as u32) << 16
                    | (self.state.prefetch_base | cfg_space::PREFETCH_RANGE_64_BIT) as u32
            }
            HeaderType01::PREFETCH_BASE_UPPER => self.state.prefetch_base_upper,
            HeaderType01::PREFETCH_LIMIT_UPPER => self.state.prefetch_limit_upper,
            _ => {
                tracing::trace!(offset, "unhandled type 1 config space read");
                0
            }
        }
    }

    /// Write to the config space. `offset` must be 32-bit aligned.
    pub fn write_u32(&mut self, offset: u16, val: u32) {
        use cfg_space::HeaderType01;

        match HeaderType01(offset) {
            HeaderType01::STATUS_COMMAND => {
                let mut command = cfg_space::Command::from_bits(val as u16);
                if command.into_bits() & !SUPPORTED_COMMAND_BITS != 0 {
                    tracing::warn!(offset, val, "setting invalid command bits");
                    // still do our best
                    command =
                        cfg_space::Command::from_bits(command.into_bits() & SUPPORTED_COMMAND_BITS);
                };
                self.state.command = command;
            }
            HeaderType01::BAR0 | HeaderType01::BAR1 => self.bars.write(bar_index(offset), val),
            HeaderType01::LATENCY_BUS_NUMBERS => {
                let numbers = cfg_space::BusNumbers::from_bits(val);
                self.state.subordinate_bus_number = numbers.subordinate();
                self.state.secondary_bus_number = numbers.secondary();
                self.state.primary_bus_number = numbers.primary();
                self.state.secondary_latency_timer = numbers.secondary_latency_timer();
            }
            HeaderType01::MEMORY_RANGE => {
                self.state.memory_base = val as u16;
                self.state.memory_limit = (val >> 16) as u16;
            }
            HeaderType01::PREFETCH_RANGE => {
                self.state.prefetch_base = val as u16;
                self.state.prefetch_limit = (val >> 16) as u16;
            }
            HeaderType01::PREFETCH_BASE_UPPER => {
                self.state.prefetch_base_upper = val;
            }
            HeaderType01::PREFETCH_LIMIT_UPPER => {
                self.state.prefetch_limit_upper = val;
            }
            // all other base regs are noops
            _ => {
                tracing::trace!(offset, value = val, "unhandled type 1 config space write");
            }
        }
    }
}
