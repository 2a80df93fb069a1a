// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::window::WindowCursor;
use crate::window::WindowKind;
use crate::window::WindowSet;
use pci_cfg::spec::hwid::ClassCode;
use pci_cfg::spec::hwid::HardwareIds;
use pci_cfg::spec::hwid::Subclass;
use pci_cfg_emu::ConfigSpaceType0Emulator;
use pci_cfg_emu::ConfigSpaceType1Emulator;
use pci_cfg_emu::DeviceBars;

/// Routes `tracing` output through the test harness's captured stdout.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

pub fn endpoint(bars: DeviceBars) -> ConfigSpaceType0Emulator {
    ConfigSpaceType0Emulator::new(
        HardwareIds {
            vendor_id: 0x1AF4,
            device_id: 0x1042,
            revision_id: 1,
            prog_if: 0,
            sub_class: Subclass::NONE,
            base_class: ClassCode::MASS_STORAGE_CONTROLLER,
        },
        bars,
    )
}

pub fn bridge(bars: DeviceBars) -> ConfigSpaceType1Emulator {
    ConfigSpaceType1Emulator::new(
        HardwareIds {
            vendor_id: 0x1B36,
            device_id: 0x000C,
            revision_id: 0,
            prog_if: 0,
            sub_class: Subclass::BRIDGE_PCI_TO_PCI,
            base_class: ClassCode::BRIDGE,
        },
        bars,
    )
}

/// Pools at 0x1000_0000 (np32), 0x2000_0000 (p32) and 0x40_0000_0000 (p64).
pub fn windows() -> WindowSet {
    windows_with_np32_limit(None)
}

pub fn windows_with_np32_limit(limit: Option<u64>) -> WindowSet {
    WindowSet::new(
        WindowCursor::new(WindowKind::NonPrefetch32, 0x1000_0000, limit),
        WindowCursor::new(WindowKind::Prefetch32, 0x2000_0000, None),
        WindowCursor::new(WindowKind::Prefetch64, 0x40_0000_0000, None),
    )
}
