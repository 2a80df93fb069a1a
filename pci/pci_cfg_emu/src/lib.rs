// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Software model of a PCI fabric's configuration space.
//!
//! Functions are attached to buses, and bridges own the bus behind them.
//! Config accesses are routed the way real hardware routes them: a bus below
//! a bridge is only reachable once the bridge's secondary and subordinate bus
//! number registers claim it.

#![forbid(unsafe_code)]

mod bars;
mod type0;
mod type1;

pub use bars::DeviceBars;
pub use type0::ConfigSpaceType0Emulator;
pub use type1::ConfigSpaceType1Emulator;

use pci_cfg::ConfigSpaceAccessor;
use pci_cfg::Location;
use std::collections::BTreeMap;

/// A single emulated function.
#[derive(Debug, Clone)]
pub enum EmulatedFunction {
    /// A general device (header layout 0).
    Type0(ConfigSpaceType0Emulator),
    /// A PCI-to-PCI bridge and the bus on its secondary side.
    Bridge {
        /// The bridge's own configuration space.
        cfg: ConfigSpaceType1Emulator,
        /// The bus behind the bridge.
        downstream: EmulatedBus,
    },
    /// A fixed register image. Offsets not present read as zero and all
    /// writes are dropped.
    Fixed(BTreeMap<u16, u32>),
}

impl EmulatedFunction {
    /// Returns the type 0 emulator, if this is a general device.
    pub fn as_type0(&self) -> Option<&ConfigSpaceType0Emulator> {
        match self {
            EmulatedFunction::Type0(cfg) => Some(cfg),
            _ => None,
        }
    }

    /// Returns the type 1 emulator, if this is a bridge.
    pub fn as_bridge(&self) -> Option<&ConfigSpaceType1Emulator> {
        match self {
            EmulatedFunction::Bridge { cfg, .. } => Some(cfg),
            _ => None,
        }
    }

    fn read_u32(&self, offset: u16) -> u32 {
        match self {
            EmulatedFunction::Type0(cfg) => cfg.read_u32(offset),
            EmulatedFunction::Bridge { cfg, .. } => cfg.read_u32(offset),
            EmulatedFunction::Fixed(regs) => regs.get(&offset).copied().unwrap_or(0),
        }
    }

    fn write_u32(&mut self, offset: u16, value: u32) {
        match self {
            EmulatedFunction::Type0(cfg) => cfg.write_u32(offset, value),
            EmulatedFunction::Bridge { cfg, .. } => cfg.write_u32(offset, value),
            EmulatedFunction::Fixed(_) => {}
        }
    }
}

/// The functions present on one bus, keyed by (device, function).
#[derive(Debug, Clone, Default)]
pub struct EmulatedBus {
    functions: BTreeMap<(u8, u8), EmulatedFunction>,
}

impl EmulatedBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `f` at `device.function`.
    pub fn with_function(mut self, device: u8, function: u8, f: EmulatedFunction) -> Self {
        assert!(
            device < 32 && function < 8,
            "invalid slot {device:#x}.{function}"
        );
        self.functions.insert((device, function), f);
        self
    }

    /// Attaches a general device at `device.function`.
    pub fn with_device(self, device: u8, function: u8, cfg: ConfigSpaceType0Emulator) -> Self {
        self.with_function(device, function, EmulatedFunction::Type0(cfg))
    }

    /// Attaches a bridge at `device.function`, with `downstream` behind it.
    pub fn with_bridge(
        self,
        device: u8,
        function: u8,
        cfg: ConfigSpaceType1Emulator,
        downstream: EmulatedBus,
    ) -> Self {
        self.with_function(
            device,
            function,
            EmulatedFunction::Bridge { cfg, downstream },
        )
    }

    /// Computes the chain of slots leading from this bus (numbered
    /// `current`) to `target`.
    fn route(&self, current: u8, target: Location, path: &mut Vec<(u8, u8)>) -> bool {
        if target.bus == current {
            let key = (target.device, target.function);
            if self.functions.contains_key(&key) {
                path.push(key);
                return true;
            }
            return false;
        }
        for (&key, f) in &self.functions {
            let EmulatedFunction::Bridge { cfg, downstream } = f else {
                continue;
            };
            let (_, secondary, _) = cfg.bus_numbers();
            if secondary > current && cfg.assigned_bus_range().contains(&target.bus) {
                // The first bridge claiming the bus receives the cycle, even
                // if nothing answers behind it.
                path.push(key);
                return downstream.route(secondary, target, path);
            }
        }
        false
    }

    fn walk(&self, path: &[(u8, u8)]) -> Option<&EmulatedFunction> {
        let (first, rest) = path.split_first()?;
        let f = self.functions.get(first)?;
        if rest.is_empty() {
            return Some(f);
        }
        match f {
            EmulatedFunction::Bridge { downstream, .. } => downstream.walk(rest),
            _ => None,
        }
    }

    fn walk_mut(&mut self, path: &[(u8, u8)]) -> Option<&mut EmulatedFunction> {
        let (first, rest) = path.split_first()?;
        let f = self.functions.get_mut(first)?;
        if rest.is_empty() {
            return Some(f);
        }
        match f {
            EmulatedFunction::Bridge { downstream, .. } => downstream.walk_mut(rest),
            _ => None,
        }
    }
}

/// A set of root buses, each decoded directly by the host.
#[derive(Debug, Default)]
pub struct EmulatedFabric {
    roots: BTreeMap<(u32, u8), EmulatedBus>,
    reads: u64,
    writes: u64,
}

impl EmulatedFabric {
    /// Creates a fabric with no buses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches `bus` as root bus `bus_number` of `segment`.
    pub fn with_root_bus(mut self, segment: u32, bus_number: u8, bus: EmulatedBus) -> Self {
        self.roots.insert((segment, bus_number), bus);
        self
    }

    /// Number of config reads performed so far.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Number of config writes performed so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Returns the function currently reachable at `loc`.
    pub fn function(&self, loc: Location) -> Option<&EmulatedFunction> {
        let (root, path) = self.resolve(loc)?;
        self.roots.get(&root)?.walk(&path)
    }

    fn resolve(&self, loc: Location) -> Option<((u32, u8), Vec<(u8, u8)>)> {
        let mut path = Vec::new();
        for (&(segment, number), bus) in self.roots.range((loc.segment, 0)..=(loc.segment, loc.bus))
        {
            debug_assert_eq!(segment, loc.segment);
            path.clear();
            if bus.route(number, loc, &mut path) {
                return Some(((segment, number), path));
            }
        }
        None
    }
}

impl ConfigSpaceAccessor for EmulatedFabric {
    fn read32(&mut self, loc: Location, offset: u16) -> u32 {
        self.reads += 1;
        let offset = offset & !3;
        match self.function(loc) {
            Some(f) => f.read_u32(offset),
            None => !0,
        }
    }

    fn write32(&mut self, loc: Location, offset: u16, value: u32) {
        self.writes += 1;
        let offset = offset & !3;
        let Some((root, path)) = self.resolve(loc) else {
            tracing::trace!(%loc, offset, value, "write to absent function dropped");
            return;
        };
        if let Some(f) = self.roots.get_mut(&root).and_then(|bus| bus.walk_mut(&path)) {
            f.write_u32(offset, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pci_cfg::spec::hwid::ClassCode;
    use pci_cfg::spec::hwid::HardwareIds;
    use pci_cfg::spec::hwid::Subclass;

    fn bridge() -> ConfigSpaceType1Emulator {
        ConfigSpaceType1Emulator::new(
            HardwareIds {
                vendor_id: 0x1111,
                device_id: 0x2222,
                revision_id: 0,
                prog_if: 0,
                sub_class: Subclass::BRIDGE_PCI_TO_PCI,
                base_class: ClassCode::BRIDGE,
            },
            DeviceBars::new(),
        )
    }

    fn endpoint() -> ConfigSpaceType0Emulator {
        ConfigSpaceType0Emulator::new(
            HardwareIds {
                vendor_id: 0x3333,
                device_id: 0x4444,
                revision_id: 0,
                prog_if: 0,
                sub_class: Subclass::NONE,
                base_class: ClassCode::MASS_STORAGE_CONTROLLER,
            },
            DeviceBars::new(),
        )
    }

    fn fabric() -> EmulatedFabric {
        EmulatedFabric::new().with_root_bus(
            0,
            0,
            EmulatedBus::new().with_bridge(
                1,
                0,
                bridge(),
                EmulatedBus::new().with_device(0, 0, endpoint()),
            ),
        )
    }

    #[test]
    fn absent_reads_all_ones() {
        let mut fabric = fabric();
        assert_eq!(fabric.read32(Location::new(0, 0, 2, 0), 0), !0);
        assert_eq!(fabric.read32(Location::new(1, 0, 1, 0), 0), !0);
        assert_eq!(fabric.read32(Location::new(0, 0, 1, 0), 0), 0x2222_1111);
        assert_eq!(fabric.reads(), 3);
    }

    #[test]
    fn downstream_requires_bus_numbers() {
        let mut fabric = fabric();
        let bridge = Location::new(0, 0, 1, 0);
        let behind = Location::new(0, 5, 0, 0);

        assert_eq!(fabric.read32(behind, 0), !0);

        fabric.write32(bridge, 0x18, 0x0005_0500);
        assert_eq!(fabric.read32(behind, 0), 0x4444_3333);
        assert!(fabric.function(behind).unwrap().as_type0().is_some());

        // Moving the secondary bus makes the old number unreachable.
        fabric.write32(bridge, 0x18, 0x0006_0600);
        assert_eq!(fabric.read32(behind, 0), !0);
        assert_eq!(fabric.read32(Location::new(0, 6, 0, 0), 0), 0x4444_3333);
        assert_eq!(fabric.writes(), 2);
    }

    #[test]
    fn fixed_function_ignores_writes() {
        let mut fabric = EmulatedFabric::new().with_root_bus(
            0,
            0,
            EmulatedBus::new().with_function(
                0,
                0,
                EmulatedFunction::Fixed([(0, 0x1234_5678)].into_iter().collect()),
            ),
        );
        let loc = Location::new(0, 0, 0, 0);
        fabric.write32(loc, 0, 0);
        assert_eq!(fabric.read32(loc, 0), 0x1234_5678);
        assert_eq!(fabric.read32(loc, 8), 0);
    }
}
