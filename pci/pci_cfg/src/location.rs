// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Addressing of a single PCI function.

use crate::spec::cfg_space::CONFIG_SPACE_SIZE;
use crate::spec::cfg_space::MAX_DEVICES;
use crate::spec::cfg_space::MAX_FUNCTIONS;
use std::fmt;

const BDF_BUS_SHIFT: u16 = 8;
const BDF_DEVICE_SHIFT: u16 = 3;
const DEVICE_MASK: u8 = MAX_DEVICES - 1;
const FUNCTION_MASK: u8 = MAX_FUNCTIONS - 1;

/// Uniquely addresses one function's configuration space.
///
/// `device` and `function` are only meaningful in `0..32` and `0..8`; the
/// address computations mask them to those widths.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    /// PCI segment (ECAM window group).
    pub segment: u32,
    /// Bus number.
    pub bus: u8,
    /// Device number, `0..32`.
    pub device: u8,
    /// Function number, `0..8`.
    pub function: u8,
}

impl Location {
    /// Creates a new location.
    pub const fn new(segment: u32, bus: u8, device: u8, function: u8) -> Self {
        Self {
            segment,
            bus,
            device,
            function,
        }
    }

    /// Returns whether the device and function numbers are in range.
    pub const fn is_valid(&self) -> bool {
        self.device < MAX_DEVICES && self.function < MAX_FUNCTIONS
    }

    /// Returns the byte offset of `offset` within this function's config
    /// space, relative to the base of its ECAM window:
    /// `bus·32·8·4096 + device·8·4096 + function·4096 + offset`.
    pub const fn ecam_offset(&self, offset: u16) -> u64 {
        let function_index = ((self.bus as u64) * MAX_DEVICES as u64
            + (self.device & DEVICE_MASK) as u64)
            * MAX_FUNCTIONS as u64
            + (self.function & FUNCTION_MASK) as u64;
        // mask to 4-byte alignment within the 4K function space
        function_index * CONFIG_SPACE_SIZE + (offset as u64 & (CONFIG_SPACE_SIZE - 4))
    }

    /// Returns the 16-bit routing ID (`bus << 8 | device << 3 | function`).
    pub const fn routing_id(&self) -> u16 {
        (self.bus as u16) << BDF_BUS_SHIFT
            | ((self.device & DEVICE_MASK) as u16) << BDF_DEVICE_SHIFT
            | (self.function & FUNCTION_MASK) as u16
    }

    /// Rebuilds a location from a segment and a routing ID.
    pub const fn from_routing_id(segment: u32, rid: u16) -> Self {
        Self {
            segment,
            bus: (rid >> BDF_BUS_SHIFT) as u8,
            device: ((rid >> BDF_DEVICE_SHIFT) as u8) & DEVICE_MASK,
            function: (rid as u8) & FUNCTION_MASK,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{}",
            self.segment, self.bus, self.device, self.function
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecam_offset_matches_flattened_layout() {
        let loc = Location::new(0, 1, 2, 3);
        assert_eq!(
            loc.ecam_offset(0x18),
            32 * 8 * 4096 + 2 * 8 * 4096 + 3 * 4096 + 0x18
        );
        assert_eq!(loc.ecam_offset(0x18), (1 << 20) | (2 << 15) | (3 << 12) | 0x18);
    }

    #[test]
    fn ecam_offset_stays_within_function() {
        let loc = Location::new(0, 0, 0, 0);
        assert_eq!(loc.ecam_offset(0xFFF), 0xFFC);
        assert_eq!(loc.ecam_offset(0x1002), 0);
    }

    #[test]
    fn routing_id() {
        let loc = Location::new(3, 0x12, 0x1F, 7);
        assert_eq!(loc.routing_id(), 0x12FF);
        assert_eq!(Location::from_routing_id(3, 0x12FF), loc);
        assert_eq!(loc.to_string(), "0003:12:1f.7");
    }

    #[test]
    fn validity() {
        assert!(Location::new(0, 255, 31, 7).is_valid());
        assert!(!Location::new(0, 0, 32, 0).is_valid());
        assert!(!Location::new(0, 0, 0, 8).is_valid());
    }
}
