// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Emulator for the type 00h (general device) configuration space header.

use crate::bars::BarBank;
use crate::bars::DeviceBars;
use pci_cfg::spec::cfg_space;
use pci_cfg::spec::hwid::HardwareIds;

const SUPPORTED_COMMAND_BITS: u16 = cfg_space::Command::new()
    .with_pio_enabled(true)
    .with_mmio_enabled(true)
    .with_bus_master(true)
    .with_parity_error_response(true)
    .with_enable_serr(true)
    .with_intx_disable(true)
    .into_bits();

/// Emulator for the standard Type 0 PCI configuration space header.
#[derive(Debug, Clone)]
pub struct ConfigSpaceType0Emulator {
    hardware_ids: HardwareIds,
    multi_function_bit: bool,
    command: cfg_space::Command,
    bars: BarBank,
    latency_timer: u8,
    interrupt_line: u8,
}

impl ConfigSpaceType0Emulator {
    /// Create a new [`ConfigSpaceType0Emulator`]
    pub fn new(hardware_ids: HardwareIds, bars: DeviceBars) -> Self {
        Self {
            hardware_ids,
            multi_function_bit: false,
            command: cfg_space::Command::new(),
            bars: BarBank::new(&bars, cfg_space::HEADER_TYPE_00_BARS.into()),
            latency_timer: 0,
            interrupt_line: 0,
        }
    }

    /// If the device is multi-function, enable bit 7 in the Header register.
    pub fn with_multi_function_bit(mut self, bit: bool) -> Self {
        self.multi_function_bit = bit;
        self
    }

    /// Returns the current command register.
    pub fn command(&self) -> cfg_space::Command {
        self.command
    }

    /// Returns the address programmed into BAR `index`, if implemented.
    pub fn bar_address(&self, index: usize) -> Option<u64> {
        self.bars.address(index)
    }

    /// Raw value of BAR register `index`.
    pub fn bar_register(&self, index: usize) -> u32 {
        self.bars.read(index)
    }

    /// Read from the config space. `offset` must be 32-bit aligned.
    pub fn read_u32(&self, offset: u16) -> u32 {
        use cfg_space::HeaderType00;

        match HeaderType00(offset) {
            HeaderType00::DEVICE_VENDOR => self.hardware_ids.device_vendor(),
            HeaderType00::STATUS_COMMAND => self.command.into_bits() as u32,
            HeaderType00::CLASS_REVISION => self.hardware_ids.class_revision(),
            HeaderType00::BIST_HEADER => cfg_space::BistHeader::new()
                .with_latency_timer(self.latency_timer)
                .with_header_layout(cfg_space::HEADER_LAYOUT_DEVICE)
                .with_multi_function(self.multi_function_bit)
                .into_bits(),
            HeaderType00::BAR0
            | HeaderType00::BAR1
            | HeaderType00::BAR2
            | HeaderType00::BAR3
            | HeaderType00::BAR4
            | HeaderType00::BAR5 => self.bars.read(bar_index(offset)),
            HeaderType00::LATENCY_INTERRUPT => self.interrupt_line as u32,
            _ => {
                tracing::trace!(offset, "unhandled type 0 config space read");
                0
            }
        }
    }

    /// Write to the config space. `offset` must be 32-bit aligned.
    pub fn write_u32(&mut self, offset: u16, val: u32) {
        use cfg_space::HeaderType00;

        match HeaderType00(offset) {
            HeaderType00::STATUS_COMMAND => {
                let mut command = cfg_space::Command::from_bits(val as u16);
                if command.into_bits() & !SUPPORTED_COMMAND_BITS != 0 {
                    tracing::warn!(offset, val, "setting invalid command bits");
                    // still do our best
                    command =
                        cfg_space::Command::from_bits(command.into_bits() & SUPPORTED_COMMAND_BITS);
                }
                self.command = command;
            }
            HeaderType00::BIST_HEADER => {
                self.latency_timer = cfg_space::BistHeader::from_bits(val).latency_timer();
            }
            HeaderType00::BAR0
            | HeaderType00::BAR1
            | HeaderType00::BAR2
            | HeaderType00::BAR3
            | HeaderType00::BAR4
            | HeaderType00::BAR5 => self.bars.write(bar_index(offset), val),
            HeaderType00::LATENCY_INTERRUPT => self.interrupt_line = val as u8,
            _ => {
                tracing::trace!(offset, value = val, "unhandled type 0 config space write");
            }
        }
    }
}

pub(crate) fn bar_index(offset: u16) -> usize {
    ((offset - cfg_space::HeaderType00::BAR0.0) / 4) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use pci_cfg::spec::hwid::ClassCode;
    use pci_cfg::spec::hwid::Subclass;

    fn create_type0_emulator(bars: DeviceBars) -> ConfigSpaceType0Emulator {
        ConfigSpaceType0Emulator::new(
            HardwareIds {
                vendor_id: 0x1414,
                device_id: 0x00B0,
                revision_id: 2,
                prog_if: 0,
                sub_class: Subclass::NONE,
                base_class: ClassCode::NETWORK_CONTROLLER,
            },
            bars,
        )
    }

    #[test]
    fn test_type0_probe() {
        let emu = create_type0_emulator(DeviceBars::new());
        assert_eq!(emu.read_u32(0), 0x00B0_1414);
        assert_eq!(emu.read_u32(8), 0x0200_0002);
        assert_eq!(emu.read_u32(0xC), 0);

        let emu = emu.with_multi_function_bit(true);
        assert_eq!(emu.read_u32(0xC), 0x0080_0000);
    }

    #[test]
    fn test_type0_bar_sizing() {
        let mut emu = create_type0_emulator(DeviceBars::new().memory32(0, 0x4000, false));
        emu.write_u32(0x10, !0);
        assert_eq!(emu.read_u32(0x10), 0xFFFF_C000);
        emu.write_u32(0x14, !0);
        assert_eq!(emu.read_u32(0x14), 0);

        emu.write_u32(0x10, 0xE000_0000);
        assert_eq!(emu.bar_address(0), Some(0xE000_0000));
    }

    #[test]
    fn test_type0_command() {
        let mut emu = create_type0_emulator(DeviceBars::new());
        emu.write_u32(4, 0x0000_0007);
        assert!(emu.command().mmio_enabled());
        assert!(emu.command().pio_enabled());
        assert!(emu.command().bus_master());
        assert_eq!(emu.read_u32(4), 7);
    }
}
