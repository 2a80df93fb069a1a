// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI Express Enhanced Configuration Access Mechanism (ECAM).
//!
//! ECAM exposes the full 4 KiB configuration space of every function at a
//! computable offset from a per-segment base address. The set of windows is
//! supplied by platform configuration.

use crate::ConfigSpaceAccessor;
use crate::location::Location;

/// Size of the ECAM region decoding a single bus.
const ECAM_BUS_SIZE: u64 = 1 << 20;

/// One ECAM region: a segment and the inclusive range of buses it decodes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EcamWindow {
    /// Physical address corresponding to bus 0 of this segment.
    pub ecam_base: u64,
    /// PCIe segment number.
    pub segment: u32,
    /// Lowest valid bus number.
    pub start_bus: u8,
    /// Highest valid bus number.
    pub end_bus: u8,
}

impl EcamWindow {
    /// Returns whether `bus` of `segment` is decoded by this window.
    pub fn contains(&self, segment: u32, bus: u8) -> bool {
        self.segment == segment && (self.start_bus..=self.end_bus).contains(&bus)
    }

    /// Returns the size of the MMIO region backing the window's bus range.
    pub fn ecam_size(&self) -> u64 {
        ecam_size_from_bus_numbers(self.start_bus, self.end_bus)
    }

    /// Returns the physical address of `offset` in the config space of `loc`.
    pub fn address(&self, loc: Location, offset: u16) -> u64 {
        self.ecam_base + loc.ecam_offset(offset)
    }
}

/// Returns the size of an ECAM region spanning `start_bus..=end_bus`.
pub fn ecam_size_from_bus_numbers(start_bus: u8, end_bus: u8) -> u64 {
    assert!(end_bus >= start_bus);
    let bus_count = (end_bus as u64) - (start_bus as u64) + 1;
    bus_count * ECAM_BUS_SIZE
}

/// The platform's table of ECAM windows.
#[derive(Clone, Debug, Default)]
pub struct EcamDirectory {
    windows: Vec<EcamWindow>,
}

impl EcamDirectory {
    /// Creates a directory from an ordered list of windows.
    pub fn new(windows: Vec<EcamWindow>) -> Self {
        Self { windows }
    }

    /// Returns the number of valid entries.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    /// Returns the windows in directory order.
    pub fn windows(&self) -> &[EcamWindow] {
        &self.windows
    }

    /// Returns the first window decoding `bus` of `segment`.
    pub fn find(&self, segment: u32, bus: u8) -> Option<&EcamWindow> {
        self.windows.iter().find(|w| w.contains(segment, bus))
    }
}

/// Raw 32-bit memory-mapped register access.
pub trait MmioAccess {
    /// Reads the dword at physical address `addr`.
    fn read_u32(&mut self, addr: u64) -> u32;
    /// Writes the dword at physical address `addr`.
    fn write_u32(&mut self, addr: u64, value: u32);
}

/// A [`ConfigSpaceAccessor`] that resolves each location through an
/// [`EcamDirectory`] and accesses the resulting address via `M`.
///
/// Accesses to locations no window decodes behave like an empty slot: reads
/// return all-ones, writes are dropped.
pub struct EcamConfigSpace<M> {
    directory: EcamDirectory,
    mmio: M,
}

impl<M: MmioAccess> EcamConfigSpace<M> {
    /// Creates a new ECAM config space accessor.
    pub fn new(directory: EcamDirectory, mmio: M) -> Self {
        Self { directory, mmio }
    }

    /// Returns the window directory.
    pub fn directory(&self) -> &EcamDirectory {
        &self.directory
    }

    /// Consumes the accessor, returning the underlying MMIO implementation.
    pub fn into_inner(self) -> M {
        self.mmio
    }

    fn address(&self, loc: Location, offset: u16) -> Option<u64> {
        let window = self.directory.find(loc.segment, loc.bus)?;
        Some(window.address(loc, offset))
    }
}

impl<M: MmioAccess> ConfigSpaceAccessor for EcamConfigSpace<M> {
    fn read32(&mut self, loc: Location, offset: u16) -> u32 {
        match self.address(loc, offset) {
            Some(addr) => self.mmio.read_u32(addr),
            None => {
                tracing::trace!(%loc, offset, "config read outside of any ecam window");
                !0
            }
        }
    }

    fn write32(&mut self, loc: Location, offset: u16, value: u32) {
        match self.address(loc, offset) {
            Some(addr) => self.mmio.write_u32(addr, value),
            None => {
                tracing::trace!(%loc, offset, value, "config write outside of any ecam window");
            }
        }
    }
}

pub use volatile::VolatileMmio;

mod volatile {
    // UNSAFETY: raw pointer access to platform MMIO.
    #![expect(unsafe_code)]

    use super::MmioAccess;

    /// [`MmioAccess`] through volatile loads and stores at identity-mapped
    /// physical addresses.
    pub struct VolatileMmio(());

    impl VolatileMmio {
        /// Creates a new accessor.
        ///
        /// # Safety
        ///
        /// The caller must guarantee that every address later passed to the
        /// accessor is a mapped, 4-byte aligned device register, and that no
        /// other agent accesses configuration space concurrently.
        pub unsafe fn new() -> Self {
            Self(())
        }
    }

    impl MmioAccess for VolatileMmio {
        fn read_u32(&mut self, addr: u64) -> u32 {
            // SAFETY: guaranteed by the contract of `VolatileMmio::new`.
            unsafe { core::ptr::read_volatile(addr as usize as *const u32) }
        }

        fn write_u32(&mut self, addr: u64, value: u32) {
            // SAFETY: guaranteed by the contract of `VolatileMmio::new`.
            unsafe { core::ptr::write_volatile(addr as usize as *mut u32, value) }
        }
    }
}
