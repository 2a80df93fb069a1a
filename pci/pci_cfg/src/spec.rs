// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Types and constants specified by the PCI spec.
//!
//! Everything in here is the architected register layout that firmware and
//! operating systems agree on bit-for-bit. This module MUST NOT contain any
//! vendor-specific constants!

/// Declares a transparent newtype over an integer with a set of named
/// associated constants, so that well-known values can be matched on while
/// unknown values remain representable.
macro_rules! open_enum {
    (
        $(#[$a:meta])*
        $v:vis enum $name:ident: $repr:ty {
            $(
                $(#[$va:meta])*
                $variant:ident = $value:expr,
            )*
        }
    ) => {
        $(#[$a])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        $v struct $name(pub $repr);

        #[allow(missing_docs)]
        impl $name {
            $(
                $(#[$va])*
                pub const $variant: $name = $name($value);
            )*
        }

        impl From<$repr> for $name {
            fn from(v: $repr) -> Self {
                Self(v)
            }
        }

        impl From<$name> for $repr {
            fn from(v: $name) -> Self {
                v.0
            }
        }
    };
}

pub mod hwid {
    //! Hardware ID types and constants

    #![expect(missing_docs)] // constants/fields are self-explanatory

    open_enum! {
        /// ClassCode identifies the PCI device's type.
        ///
        /// Only the values the enumerator dispatches on are named.
        pub enum ClassCode: u8 {
            UNCLASSIFIED = 0x00,
            MASS_STORAGE_CONTROLLER = 0x01,
            NETWORK_CONTROLLER = 0x02,
            DISPLAY_CONTROLLER = 0x03,
            BRIDGE = 0x06,
            /// Vendor specific
            UNASSIGNED = 0xFF,
        }
    }

    open_enum! {
        /// Subclass identifies the PCI device's function within its class.
        pub enum Subclass: u8 {
            NONE = 0x00,

            // Bridge (Class code: 0x06)
            BRIDGE_HOST = 0x00,
            BRIDGE_ISA = 0x01,
            BRIDGE_PCI_TO_PCI = 0x04,
            BRIDGE_OTHER = 0x80,
        }
    }

    /// Vendor ID reported by an empty slot on most host bridges.
    pub const VENDOR_ID_ABSENT: u16 = 0xFFFF;

    /// A collection of hard-coded hardware IDs identifying a function.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct HardwareIds {
        pub vendor_id: u16,
        pub device_id: u16,
        pub revision_id: u8,
        pub prog_if: u8,
        pub sub_class: Subclass,
        pub base_class: ClassCode,
    }

    impl HardwareIds {
        /// Returns the dword at the class/revision offset.
        pub fn class_revision(&self) -> u32 {
            (u8::from(self.base_class) as u32) << 24
                | (u8::from(self.sub_class) as u32) << 16
                | (self.prog_if as u32) << 8
                | self.revision_id as u32
        }

        /// Returns the dword at the device/vendor offset.
        pub fn device_vendor(&self) -> u32 {
            (self.device_id as u32) << 16 | self.vendor_id as u32
        }
    }
}

/// Configuration Space
///
/// Sources: PCI 2.3 Spec - Chapter 6, PCI-to-PCI Bridge Architecture 1.2 -
/// Chapter 3
#[expect(missing_docs)] // primarily offsets/fields with self-explanatory names
pub mod cfg_space {
    use bitfield_struct::bitfield;

    /// Size of a single function's configuration space when accessed
    /// through ECAM.
    pub const CONFIG_SPACE_SIZE: u64 = 4096;
    pub const MAX_DEVICES: u8 = 32;
    pub const MAX_FUNCTIONS: u8 = 8;

    open_enum! {
        /// Offsets into the type 00h configuration space header.
        ///
        /// | Offset | Bits 31-24                 | Bits 23-16  | Bits 15-8           | Bits 7-0             |
        /// |--------|----------------------------|-------------|---------------------|--------------------- |
        /// | 0x0    | Device ID                  |             | Vendor ID           |                      |
        /// | 0x4    | Status                     |             | Command             |                      |
        /// | 0x8    | Class code                 |             |                     | Revision ID          |
        /// | 0xC    | BIST                       | Header type | Latency Timer       | Cache Line Size      |
        /// | 0x10   | Base address #0 (BAR0)     |             |                     |                      |
        /// | 0x14   | Base address #1 (BAR1)     |             |                     |                      |
        /// | 0x18   | Base address #2 (BAR2)     |             |                     |                      |
        /// | 0x1C   | Base address #3 (BAR3)     |             |                     |                      |
        /// | 0x20   | Base address #4 (BAR4)     |             |                     |                      |
        /// | 0x24   | Base address #5 (BAR5)     |             |                     |                      |
        /// | 0x28   | Cardbus CIS Pointer        |             |                     |                      |
        /// | 0x2C   | Subsystem ID               |             | Subsystem Vendor ID |                      |
        /// | 0x30   | Expansion ROM base address |             |                     |                      |
        /// | 0x34   | Reserved                   |             |                     | Capabilities Pointer |
        /// | 0x38   | Reserved                   |             |                     |                      |
        /// | 0x3C   | Max latency                | Min Grant   | Interrupt PIN       | Interrupt Line       |
        pub enum HeaderType00: u16 {
            DEVICE_VENDOR      = 0x00,
            STATUS_COMMAND     = 0x04,
            CLASS_REVISION     = 0x08,
            BIST_HEADER        = 0x0C,
            BAR0               = 0x10,
            BAR1               = 0x14,
            BAR2               = 0x18,
            BAR3               = 0x1C,
            BAR4               = 0x20,
            BAR5               = 0x24,
            CARDBUS_CIS_PTR    = 0x28,
            SUBSYSTEM_ID       = 0x2C,
            EXPANSION_ROM_BASE = 0x30,
            RESERVED_CAP_PTR   = 0x34,
            RESERVED           = 0x38,
            LATENCY_INTERRUPT  = 0x3C,
        }
    }

    pub const HEADER_TYPE_00_BARS: u8 = 6;

    open_enum! {
        /// Offsets into the type 01h configuration space header.
        ///
        /// | Offset | Bits 31-24                       | Bits 23-16             | Bits 15-8                | Bits 7-0             |
        /// |--------|----------------------------------|------------------------|--------------------------|--------------------- |
        /// | 0x0    | Device ID                        |                        | Vendor ID                |                      |
        /// | 0x4    | Status                           |                        | Command                  |                      |
        /// | 0x8    | Class code                       |                        |                          | Revision ID          |
        /// | 0xC    | BIST                             | Header Type            | Latency Timer            | Cache Line Size      |
        /// | 0x10   | Base address #0 (BAR0)           |                        |                          |                      |
        /// | 0x14   | Base address #1 (BAR1)           |                        |                          |                      |
        /// | 0x18   | Secondary Latency Timer          | Subordinate Bus Number | Secondary Bus Number     | Primary Bus Number   |
        /// | 0x1C   | Secondary Status                 |                        | I/O Limit                | I/O Base             |
        /// | 0x20   | Memory Limit                     |                        | Memory Base              |                      |
        /// | 0x24   | Prefetchable Memory Limit        |                        | Prefetchable Memory Base |                      |
        /// | 0x28   | Prefetchable Base Upper 32 Bits  |                        |                          |                      |
        /// | 0x2C   | Prefetchable Limit Upper 32 Bits |                        |                          |                      |
        /// | 0x30   | I/O Limit Upper 16 Bits          |                        | I/O Base Upper 16 Bits   |                      |
        /// | 0x34   | Reserved                         |                        |                          | Capabilities Pointer |
        /// | 0x38   | Expansion ROM Base Address       |                        |                          |                      |
        /// | 0x3C   | Bridge Control                   |                        | Interrupt PIN            | Interrupt Line       |
        pub enum HeaderType01: u16 {
            DEVICE_VENDOR         = 0x00,
            STATUS_COMMAND        = 0x04,
            CLASS_REVISION        = 0x08,
            BIST_HEADER           = 0x0C,
            BAR0                  = 0x10,
            BAR1                  = 0x14,
            LATENCY_BUS_NUMBERS   = 0x18,
            SEC_STATUS_IO_RANGE   = 0x1C,
            MEMORY_RANGE          = 0x20,
            PREFETCH_RANGE        = 0x24,
            PREFETCH_BASE_UPPER   = 0x28,
            PREFETCH_LIMIT_UPPER  = 0x2C,
            IO_RANGE_UPPER        = 0x30,
            RESERVED_CAP_PTR      = 0x34,
            EXPANSION_ROM_BASE    = 0x38,
            BRIDGE_CTRL_INTERRUPT = 0x3C,
        }
    }

    pub const HEADER_TYPE_01_BARS: u8 = 2;

    /// Returns the config space offset of BAR `index`. BARs start at the same
    /// offset in both header layouts.
    pub const fn bar_offset(index: u8) -> u16 {
        HeaderType00::BAR0.0 + index as u16 * 4
    }

    /// BAR in-band encoding bits.
    ///
    /// The low bits of the BAR are not actually part of the address.
    /// Instead, they are used to in-band encode various bits of
    /// metadata about the BAR, and are masked off when determining the
    /// actual address.
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct BarEncodingBits {
        pub use_pio: bool,

        /// Bit 1 of a memory BAR: the legacy "below 1MB" encoding when set
        /// alone.
        pub below_1mb: bool,

        /// False indicates 32 bit.
        /// Only used in MMIO
        pub type_64_bit: bool,
        pub prefetchable: bool,

        #[bits(28)]
        _reserved2: u32,
    }

    /// Mask of the in-band encoding bits of a memory BAR.
    pub const BAR_MEMORY_TYPE_MASK: u32 = 0xF;
    /// Mask of the in-band encoding bits of an I/O BAR.
    pub const BAR_IO_TYPE_MASK: u32 = 0x3;

    /// Command Register
    #[bitfield(u16)]
    #[derive(PartialEq, Eq)]
    pub struct Command {
        pub pio_enabled: bool,
        pub mmio_enabled: bool,
        pub bus_master: bool,
        pub special_cycles: bool,
        pub enable_memory_write_invalidate: bool,
        pub vga_palette_snoop: bool,
        pub parity_error_response: bool,
        /// must be 0
        #[bits(1)]
        _reserved: u16,
        pub enable_serr: bool,
        pub enable_fast_b2b: bool,
        pub intx_disable: bool,
        #[bits(5)]
        _reserved2: u16,
    }

    /// The dword at [`HeaderType00::CLASS_REVISION`].
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct ClassRevision {
        pub revision_id: u8,
        pub prog_if: u8,
        pub sub_class: u8,
        pub base_class: u8,
    }

    /// The dword at [`HeaderType00::BIST_HEADER`].
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct BistHeader {
        pub cache_line_size: u8,
        pub latency_timer: u8,
        /// Header layout: 0 = general device, 1 = PCI-to-PCI bridge,
        /// 2 = CardBus bridge.
        #[bits(7)]
        pub header_layout: u8,
        pub multi_function: bool,
        pub bist: u8,
    }

    pub const HEADER_LAYOUT_DEVICE: u8 = 0;
    pub const HEADER_LAYOUT_BRIDGE: u8 = 1;
    pub const HEADER_LAYOUT_CARDBUS: u8 = 2;

    /// The dword at [`HeaderType01::LATENCY_BUS_NUMBERS`].
    #[bitfield(u32)]
    #[derive(PartialEq, Eq)]
    pub struct BusNumbers {
        pub primary: u8,
        pub secondary: u8,
        pub subordinate: u8,
        pub secondary_latency_timer: u8,
    }

    /// Bridge memory windows are decoded with a 1MB granularity: the
    /// base/limit registers hold address bits 31:20 in register bits 15:4.
    pub const BRIDGE_WINDOW_GRANULE: u64 = 1 << 20;

    /// Low nibble of a prefetchable base/limit register advertising 64-bit
    /// addressing support.
    pub const PREFETCH_RANGE_64_BIT: u16 = 0b0001;

    /// Encodes bits 31:20 of `addr` into the layout of a bridge memory
    /// base/limit register.
    pub const fn window_register(addr: u64) -> u16 {
        ((addr >> 16) as u16) & 0xFFF0
    }

    /// Decodes a bridge (base, limit) register pair into the inclusive 32-bit
    /// address range it describes.
    pub const fn decode_memory_range(base_register: u16, limit_register: u16) -> (u32, u32) {
        let base_addr = ((base_register & !0b1111) as u32) << 16;
        let limit_addr = ((limit_register & !0b1111) as u32) << 16 | 0xF_FFFF;
        (base_addr, limit_addr)
    }
}
