// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The recursive, depth-first bus walk.

use crate::bridge;
use crate::bridge::WINDOW_GRANULE;
use crate::endpoint;
use crate::table::BdfRecord;
use crate::table::BdfTable;
use crate::table::BusRange;
use crate::table::HeaderKind;
use crate::window::WindowSet;
use pci_cfg::ConfigSpaceAccessor;
use pci_cfg::Location;
use pci_cfg::ecam::EcamWindow;
use pci_cfg::spec::cfg_space;
use pci_cfg::spec::cfg_space::HeaderType00;

/// Walks the buses of one ECAM window, assigning bus numbers to bridges and
/// addresses to BARs.
///
/// The window cursors and the table are borrowed for the duration of the
/// walk so that several windows can share them.
pub struct BusEnumerator<'a, A> {
    access: &'a mut A,
    window: EcamWindow,
    windows: &'a mut WindowSet,
    table: &'a mut BdfTable,
}

impl<'a, A: ConfigSpaceAccessor> BusEnumerator<'a, A> {
    /// Creates an enumerator for `window`.
    pub fn new(
        access: &'a mut A,
        window: EcamWindow,
        windows: &'a mut WindowSet,
        table: &'a mut BdfTable,
    ) -> Self {
        Self {
            access,
            window,
            windows,
            table,
        }
    }

    /// Walks `bus`, numbering the buses behind its bridges from
    /// `next_secondary` on. Returns the highest bus number used below `bus`,
    /// or `bus` itself if there are no bridges.
    ///
    /// `next_secondary` must be above `bus`.
    pub fn enumerate(&mut self, bus: u8, next_secondary: u8) -> u8 {
        assert!(next_secondary > bus, "secondary buses are numbered upwards");
        // At most end_bus + 1 bus numbers are handed out, so this fits.
        self.walk(bus, next_secondary.into()) as u8
    }

    fn walk(&mut self, bus: u8, mut next_secondary: u16) -> u16 {
        if bus == self.window.end_bus {
            return bus.into();
        }

        for device in 0..cfg_space::MAX_DEVICES {
            for function in 0..cfg_space::MAX_FUNCTIONS {
                let loc = Location::new(self.window.segment, bus, device, function);
                let id = self.access.read32(loc, HeaderType00::DEVICE_VENDOR.0);
                if id == 0 || id == !0 {
                    continue;
                }

                let class = cfg_space::ClassRevision::from_bits(
                    self.access.read32(loc, HeaderType00::CLASS_REVISION.0),
                );
                let header = cfg_space::BistHeader::from_bits(
                    self.access.read32(loc, HeaderType00::BIST_HEADER.0),
                );
                let record = BdfRecord {
                    location: loc,
                    kind: HeaderKind::EndPoint,
                    vendor_id: id as u16,
                    device_id: (id >> 16) as u16,
                    class_revision: class,
                    bus_range: None,
                };

                match HeaderKind::classify(class, header) {
                    Some(HeaderKind::HostBridge) => {
                        tracing::debug!(%loc, "skipping host bridge");
                    }
                    Some(HeaderKind::PciBridge) => {
                        next_secondary = self.bridge(
                            loc,
                            BdfRecord {
                                kind: HeaderKind::PciBridge,
                                ..record
                            },
                            next_secondary,
                        );
                    }
                    Some(HeaderKind::EndPoint) => {
                        tracing::debug!(
                            %loc,
                            vendor_id = record.vendor_id,
                            device_id = record.device_id,
                            class_code = record.class_code(),
                            "found endpoint"
                        );
                        endpoint::program_bars(
                            self.access,
                            self.windows,
                            loc,
                            cfg_space::HEADER_TYPE_00_BARS,
                        );
                        self.table.push(record);
                    }
                    None => {
                        tracing::warn!(
                            %loc,
                            layout = header.header_layout(),
                            "unsupported header layout"
                        );
                    }
                }

                if function == 0 && !header.multi_function() {
                    break;
                }
            }
        }

        next_secondary - 1
    }

    /// Programs the bridge at `loc` and walks the bus behind it. Returns the
    /// next free bus number.
    fn bridge(&mut self, loc: Location, record: BdfRecord, next_secondary: u16) -> u16 {
        if next_secondary > self.window.end_bus.into() {
            tracing::warn!(
                %loc,
                end_bus = self.window.end_bus,
                "no bus number left for bridge"
            );
            bridge::program_bus_numbers(self.access, loc, 0, 0, 0);
            self.table.push(record);
            return next_secondary;
        }
        let secondary = next_secondary as u8;

        tracing::debug!(
            %loc,
            vendor_id = record.vendor_id,
            device_id = record.device_id,
            secondary,
            "found bridge"
        );

        bridge::enable_forwarding(self.access, loc);
        endpoint::program_bars(
            self.access,
            self.windows,
            loc,
            cfg_space::HEADER_TYPE_01_BARS,
        );

        self.windows.align_to(WINDOW_GRANULE);
        let before = self.windows.snapshot();

        // Route config cycles to the secondary side while it is walked.
        bridge::program_bus_numbers(self.access, loc, loc.bus, secondary, 0xFF);
        bridge::program_provisional_windows(self.access, loc, &before);

        let index = self.table.len();
        let subordinate = self.walk(secondary, next_secondary + 1) as u8;

        bridge::program_bus_numbers(self.access, loc, loc.bus, secondary, subordinate);
        self.windows.align_advanced(&before, WINDOW_GRANULE);
        let after = self.windows.snapshot();
        bridge::program_windows(self.access, loc, &before, &after);

        self.table.insert(
            index,
            BdfRecord {
                bus_range: Some(BusRange::new(secondary, subordinate)),
                ..record
            },
        );
        subordinate as u16 + 1
    }
}
