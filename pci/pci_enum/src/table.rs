// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The table of functions discovered by an enumeration run.

use pci_cfg::Location;
use pci_cfg::spec::cfg_space;
use pci_cfg::spec::hwid::ClassCode;
use pci_cfg::spec::hwid::Subclass;
use thiserror::Error;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::byteorder::little_endian::U16;
use zerocopy::byteorder::little_endian::U32;

/// How a discovered function is treated by the walk.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    /// A type 0 function; its BARs are programmed.
    EndPoint,
    /// A type 1 function; the bus behind it is walked.
    PciBridge,
    /// A host bridge; not part of the discoverable tree.
    HostBridge,
}

impl HeaderKind {
    /// Classifies a function from its class code and header type registers.
    ///
    /// Returns `None` for header layouts the walk does not handle.
    pub fn classify(
        class: cfg_space::ClassRevision,
        header: cfg_space::BistHeader,
    ) -> Option<HeaderKind> {
        if ClassCode(class.base_class()) == ClassCode::BRIDGE
            && Subclass(class.sub_class()) == Subclass::BRIDGE_HOST
        {
            return Some(HeaderKind::HostBridge);
        }
        match header.header_layout() {
            cfg_space::HEADER_LAYOUT_DEVICE => Some(HeaderKind::EndPoint),
            cfg_space::HEADER_LAYOUT_BRIDGE => Some(HeaderKind::PciBridge),
            _ => None,
        }
    }
}

/// The inclusive range of buses behind a bridge.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BusRange {
    /// Bus immediately behind the bridge.
    pub secondary: u8,
    /// Highest bus behind the bridge.
    pub subordinate: u8,
}

impl BusRange {
    /// Creates a range. Panics if `secondary > subordinate`.
    pub fn new(secondary: u8, subordinate: u8) -> Self {
        assert!(
            secondary <= subordinate,
            "invalid bus range {secondary:#x}..={subordinate:#x}"
        );
        Self {
            secondary,
            subordinate,
        }
    }

    /// Returns whether `bus` is behind the bridge.
    pub fn contains(&self, bus: u8) -> bool {
        (self.secondary..=self.subordinate).contains(&bus)
    }

    /// Returns whether the two ranges share a bus.
    pub fn overlaps(&self, other: &BusRange) -> bool {
        self.secondary <= other.subordinate && other.secondary <= self.subordinate
    }
}

/// One discovered function.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BdfRecord {
    /// Where the function lives.
    pub location: Location,
    /// How the function was treated.
    pub kind: HeaderKind,
    /// Vendor ID.
    pub vendor_id: u16,
    /// Device ID.
    pub device_id: u16,
    /// Class code and revision register.
    pub class_revision: cfg_space::ClassRevision,
    /// Bus numbers assigned to a bridge. `None` for endpoints and for
    /// bridges that could not be given a bus.
    pub bus_range: Option<BusRange>,
}

impl BdfRecord {
    /// Returns the 24-bit class code (base class, subclass, programming
    /// interface).
    pub fn class_code(&self) -> u32 {
        self.class_revision.into_bits() >> 8
    }
}

/// A function the platform expects the walk to discover.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ExpectedDevice {
    /// Where the function should be.
    pub location: Location,
    /// Expected vendor ID.
    pub vendor_id: u16,
    /// Expected device ID.
    pub device_id: u16,
    /// Expected 24-bit class code.
    pub class_code: u32,
}

/// A mismatch between the discovered and the expected hierarchy.
#[expect(missing_docs)] // self-explanatory fields
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HierarchyError {
    #[error("expected {expected} functions, discovered {found}")]
    CountMismatch { expected: usize, found: usize },
    #[error("function {0} not discovered")]
    Missing(Location),
    #[error("vendor id mismatch at {location}: expected {expected:#06x}, found {found:#06x}")]
    VendorMismatch {
        location: Location,
        expected: u16,
        found: u16,
    },
    #[error("device id mismatch at {location}: expected {expected:#06x}, found {found:#06x}")]
    DeviceMismatch {
        location: Location,
        expected: u16,
        found: u16,
    },
    #[error("class code mismatch at {location}: expected {expected:#08x}, found {found:#08x}")]
    ClassMismatch {
        location: Location,
        expected: u32,
        found: u32,
    },
}

/// Fixed-layout record describing one function to a later boot stage.
#[repr(C)]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, IntoBytes, FromBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct HandoffEntry {
    /// Segment number.
    pub segment: U16,
    /// `bus << 8 | device << 3 | function`.
    pub routing_id: U16,
    /// 0 = endpoint, 1 = PCI-to-PCI bridge.
    pub kind: u8,
    /// Secondary bus of a bridge, 0 otherwise.
    pub secondary: u8,
    /// Subordinate bus of a bridge, 0 otherwise.
    pub subordinate: u8,
    /// Must be zero.
    pub reserved: u8,
    /// `device_id << 16 | vendor_id`.
    pub vendor_device: U32,
    /// Class code and revision register.
    pub class_revision: U32,
}

const _: () = assert!(size_of::<HandoffEntry>() == 16);

/// A record that has no [`HandoffEntry`] representation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandoffError {
    /// The entry only carries 16 bits of segment number.
    #[error("segment of {0} does not fit in 16 bits")]
    SegmentOutOfRange(Location),
    /// Host bridges are not part of the handed-off hierarchy.
    #[error("{0} is a host bridge")]
    HostBridge(Location),
}

impl TryFrom<&BdfRecord> for HandoffEntry {
    type Error = HandoffError;

    fn try_from(record: &BdfRecord) -> Result<Self, Self::Error> {
        let location = record.location;
        let segment = u16::try_from(location.segment)
            .map_err(|_| HandoffError::SegmentOutOfRange(location))?;
        let kind = match record.kind {
            HeaderKind::EndPoint => 0,
            HeaderKind::PciBridge => 1,
            HeaderKind::HostBridge => return Err(HandoffError::HostBridge(location)),
        };
        let (secondary, subordinate) = record
            .bus_range
            .map_or((0, 0), |r| (r.secondary, r.subordinate));
        Ok(Self {
            segment: U16::new(segment),
            routing_id: U16::new(location.routing_id()),
            kind,
            secondary,
            subordinate,
            reserved: 0,
            vendor_device: U32::new((record.device_id as u32) << 16 | record.vendor_id as u32),
            class_revision: U32::new(record.class_revision.into_bits()),
        })
    }
}

/// Discovered functions in discovery order: every bridge precedes the
/// functions behind it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BdfTable {
    records: Vec<BdfRecord>,
}

impl BdfTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns whether no function was discovered.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All records, in discovery order.
    pub fn records(&self) -> &[BdfRecord] {
        &self.records
    }

    /// Iterates over all records.
    pub fn iter(&self) -> impl Iterator<Item = &BdfRecord> {
        self.records.iter()
    }

    pub(crate) fn push(&mut self, record: BdfRecord) {
        self.records.push(record);
    }

    pub(crate) fn insert(&mut self, index: usize, record: BdfRecord) {
        self.records.insert(index, record);
    }

    /// Returns the record for `location`.
    pub fn get(&self, location: Location) -> Option<&BdfRecord> {
        self.records.iter().find(|r| r.location == location)
    }

    /// Iterates over bridge records.
    pub fn bridges(&self) -> impl Iterator<Item = &BdfRecord> {
        self.records
            .iter()
            .filter(|r| r.kind == HeaderKind::PciBridge)
    }

    /// Iterates over endpoint records.
    pub fn endpoints(&self) -> impl Iterator<Item = &BdfRecord> {
        self.records.iter().filter(|r| r.kind == HeaderKind::EndPoint)
    }

    /// Returns the bridge whose secondary bus is `bus`.
    pub fn upstream_bridge(&self, segment: u32, bus: u8) -> Option<&BdfRecord> {
        self.bridges().find(|r| {
            r.location.segment == segment && r.bus_range.is_some_and(|range| range.secondary == bus)
        })
    }

    /// Returns the outermost bridge whose bus range contains `bus`.
    pub fn root_port_of(&self, segment: u32, bus: u8) -> Option<&BdfRecord> {
        // Ancestors precede descendants, so the first match is the outermost.
        self.bridges().find(|r| {
            r.location.segment == segment && r.bus_range.is_some_and(|range| range.contains(bus))
        })
    }

    /// Checks the table against the hierarchy the platform describes.
    pub fn verify(&self, expected: &[ExpectedDevice]) -> Result<(), HierarchyError> {
        if expected.len() != self.records.len() {
            return Err(HierarchyError::CountMismatch {
                expected: expected.len(),
                found: self.records.len(),
            });
        }
        for device in expected {
            let location = device.location;
            let record = self
                .get(location)
                .ok_or(HierarchyError::Missing(location))?;
            if record.vendor_id != device.vendor_id {
                return Err(HierarchyError::VendorMismatch {
                    location,
                    expected: device.vendor_id,
                    found: record.vendor_id,
                });
            }
            if record.device_id != device.device_id {
                return Err(HierarchyError::DeviceMismatch {
                    location,
                    expected: device.device_id,
                    found: record.device_id,
                });
            }
            if record.class_code() != device.class_code {
                return Err(HierarchyError::ClassMismatch {
                    location,
                    expected: device.class_code,
                    found: record.class_code(),
                });
            }
        }
        Ok(())
    }

    /// Returns one handoff entry per record, in discovery order.
    pub fn handoff_entries(&self) -> Result<Vec<HandoffEntry>, HandoffError> {
        self.records.iter().map(HandoffEntry::try_from).collect()
    }

    /// Returns the handoff entries serialized back to back.
    pub fn handoff_bytes(&self) -> Result<Vec<u8>, HandoffError> {
        Ok(self.handoff_entries()?.as_bytes().to_vec())
    }
}
