// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! PCI configuration space definitions and access.
//!
//! This crate holds the architected register layouts, the addressing of a
//! single function, and the transport through which the rest of the stack
//! reads and writes configuration space.

pub mod ecam;
pub mod location;
pub mod spec;

pub use location::Location;

/// Byte-addressable access to a function's 4 KiB configuration space.
///
/// Implementations never fail: accesses to absent hardware read all-ones
/// (or zero) and writes to it are dropped, exactly as on a real fabric.
pub trait ConfigSpaceAccessor {
    /// Reads the dword at `offset` in the config space of `loc`. `offset`
    /// must be 32-bit aligned.
    fn read32(&mut self, loc: Location, offset: u16) -> u32;

    /// Writes the dword at `offset` in the config space of `loc`. `offset`
    /// must be 32-bit aligned.
    fn write32(&mut self, loc: Location, offset: u16, value: u32);
}

impl<T: ConfigSpaceAccessor + ?Sized> ConfigSpaceAccessor for &mut T {
    fn read32(&mut self, loc: Location, offset: u16) -> u32 {
        (**self).read32(loc, offset)
    }

    fn write32(&mut self, loc: Location, offset: u16, value: u32) {
        (**self).write32(loc, offset, value)
    }
}
