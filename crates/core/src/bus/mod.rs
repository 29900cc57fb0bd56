// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{DeviceId, SimResult, SimulationError};

/// A contiguous, non-empty window of the physical address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct AddressRange {
    pub base: u64,
    pub size: u64,
}

impl AddressRange {
    pub fn new(base: u64, size: u64) -> SimResult<Self> {
        if size == 0 {
            return Err(SimulationError::InvalidConfig(format!(
                "empty range at {:#x}",
                base
            )));
        }
        if base.checked_add(size - 1).is_none() {
            return Err(SimulationError::InvalidConfig(format!(
                "range {:#x}+{:#x} wraps the address space",
                base, size
            )));
        }
        Ok(Self { base, size })
    }

    /// Inclusive last address.
    pub fn last(&self) -> u64 {
        self.base + (self.size - 1)
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr <= self.last()
    }

    /// Whether `[addr, addr + len)` lies fully inside this range.
    pub fn contains_span(&self, addr: u64, len: u64) -> bool {
        if len == 0 {
            return self.contains(addr);
        }
        match addr.checked_add(len - 1) {
            Some(end) => self.contains(addr) && end <= self.last(),
            None => false,
        }
    }

    pub fn overlaps(&self, other: &AddressRange) -> bool {
        self.base <= other.last() && other.base <= self.last()
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}-{:#010x}", self.base, self.last())
    }
}

#[derive(Debug)]
pub enum RouteTarget {
    Device(DeviceId),
    /// A nested crossbar. Its aperture is the entry's range.
    Bus(Box<AddressRouter>),
}

#[derive(Debug)]
struct RouteEntry {
    range: AddressRange,
    target: RouteTarget,
}

/// Result of decoding an access: the owning device and the offset into its window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub device: DeviceId,
    pub offset: u64,
    pub range: AddressRange,
}

/// Address decoder for one crossbar.
///
/// Entries are kept sorted by base and are pairwise disjoint. A nested bus is
/// decoded recursively, so the innermost bus that maps an address wins. The
/// router holds no device state and charges no latency of its own.
#[derive(Debug)]
pub struct AddressRouter {
    name: String,
    aperture: Option<AddressRange>,
    entries: Vec<RouteEntry>,
}

impl AddressRouter {
    /// A root crossbar covering the whole address space.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aperture: None,
            entries: Vec::new(),
        }
    }

    /// A crossbar that will be attached to a parent at `aperture`.
    pub fn with_aperture(name: impl Into<String>, aperture: AddressRange) -> Self {
        Self {
            name: name.into(),
            aperture: Some(aperture),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn aperture(&self) -> Option<AddressRange> {
        self.aperture
    }

    pub fn map_device(&mut self, range: AddressRange, device: DeviceId) -> SimResult<()> {
        self.insert(range, RouteTarget::Device(device))
    }

    pub fn attach_bus(&mut self, bus: AddressRouter) -> SimResult<()> {
        let range = bus.aperture.ok_or_else(|| {
            SimulationError::InvalidConfig(format!(
                "bus '{}' has no aperture and cannot be nested",
                bus.name
            ))
        })?;
        self.insert(range, RouteTarget::Bus(Box::new(bus)))
    }

    fn insert(&mut self, range: AddressRange, target: RouteTarget) -> SimResult<()> {
        if let Some(aperture) = self.aperture {
            if !aperture.contains_span(range.base, range.size) {
                return Err(SimulationError::InvalidConfig(format!(
                    "range {} lies outside the aperture {} of bus '{}'",
                    range, aperture, self.name
                )));
            }
        }

        if let Some(existing) = self.entries.iter().find(|e| e.range.overlaps(&range)) {
            return Err(SimulationError::OverlappingRange {
                base: range.base,
                size: range.size,
                existing_base: existing.range.base,
                existing_size: existing.range.size,
            });
        }

        let pos = self.entries.partition_point(|e| e.range.base < range.base);
        self.entries.insert(pos, RouteEntry { range, target });
        Ok(())
    }

    /// Find a nested bus (or this one) by name.
    pub fn find_bus_mut(&mut self, name: &str) -> Option<&mut AddressRouter> {
        if self.name == name {
            return Some(self);
        }
        self.entries.iter_mut().find_map(|e| match &mut e.target {
            RouteTarget::Bus(bus) => bus.find_bus_mut(name),
            RouteTarget::Device(_) => None,
        })
    }

    pub fn find_bus(&self, name: &str) -> Option<&AddressRouter> {
        if self.name == name {
            return Some(self);
        }
        self.entries.iter().find_map(|e| match &e.target {
            RouteTarget::Bus(bus) => bus.find_bus(name),
            RouteTarget::Device(_) => None,
        })
    }

    fn lookup(&self, addr: u64) -> Option<&RouteEntry> {
        let idx = self.entries.partition_point(|e| e.range.base <= addr);
        let entry = self.entries.get(idx.checked_sub(1)?)?;
        entry.range.contains(addr).then_some(entry)
    }

    /// Decode an access of `len` bytes at `addr`.
    ///
    /// Fails with `UnmappedAddress` when the access starts (or runs) outside every
    /// range, and with `StraddlesRegion` when it touches two ranges.
    pub fn route(&self, addr: u64, len: u64) -> SimResult<Route> {
        let len = len.max(1);
        let entry = self
            .lookup(addr)
            .ok_or(SimulationError::UnmappedAddress { addr })?;

        if !entry.range.contains_span(addr, len) {
            let span_last = addr.saturating_add(len - 1);
            let touches_other = self.entries.iter().any(|e| {
                e.range != entry.range && e.range.base <= span_last && e.range.last() >= addr
            });
            return Err(if touches_other {
                SimulationError::StraddlesRegion { addr, len }
            } else {
                SimulationError::UnmappedAddress {
                    addr: entry.range.last().saturating_add(1),
                }
            });
        }

        match &entry.target {
            RouteTarget::Device(device) => Ok(Route {
                device: *device,
                offset: addr - entry.range.base,
                range: entry.range,
            }),
            RouteTarget::Bus(bus) => bus.route(addr, len),
        }
    }

    /// Flattened `(bus, range, device)` view of the map, depth first.
    pub fn mappings(&self) -> Vec<(String, AddressRange, DeviceId)> {
        let mut out = Vec::new();
        self.collect_mappings(&mut out);
        out
    }

    fn collect_mappings(&self, out: &mut Vec<(String, AddressRange, DeviceId)>) {
        for e in &self.entries {
            match &e.target {
                RouteTarget::Device(id) => out.push((self.name.clone(), e.range, *id)),
                RouteTarget::Bus(bus) => bus.collect_mappings(out),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(base: u64, size: u64) -> AddressRange {
        AddressRange::new(base, size).unwrap()
    }

    fn example_router() -> AddressRouter {
        let mut acc = AddressRouter::with_aperture("acc_bus", range(0x1002_0000, 0x1_0000));
        acc.map_device(range(0x1002_0000, 0x40), DeviceId(0)).unwrap();
        acc.map_device(range(0x1002_0040, 0x40), DeviceId(1)).unwrap();
        acc.map_device(range(0x1002_0080, 32 * 1024), DeviceId(2)).unwrap();

        let mut membus = AddressRouter::new("membus");
        membus
            .map_device(range(0x8000_0000, 512 << 20), DeviceId(3))
            .unwrap();
        membus
            .map_device(range(0xA000_0000, 1536 << 20), DeviceId(4))
            .unwrap();
        membus.attach_bus(acc).unwrap();
        membus
    }

    #[test]
    fn test_range_rejects_empty_and_wrapping() {
        assert!(AddressRange::new(0x1000, 0).is_err());
        assert!(AddressRange::new(u64::MAX, 2).is_err());
        assert_eq!(range(u64::MAX, 1).last(), u64::MAX);
    }

    #[test]
    fn test_route_hits_owner() {
        let r = example_router();
        let route = r.route(0x1002_0044, 4).unwrap();
        assert_eq!(route.device, DeviceId(1));
        assert_eq!(route.offset, 4);

        assert_eq!(r.route(0x1002_0080, 256).unwrap().device, DeviceId(2));
        assert_eq!(r.route(0xA000_0000, 8).unwrap().device, DeviceId(4));
        assert_eq!(r.route(0x8000_0000 + (512 << 20) - 1, 1).unwrap().device, DeviceId(3));
    }

    #[test]
    fn test_every_byte_of_a_range_routes_to_it() {
        let r = example_router();
        for addr in 0x1002_0000..0x1002_0040u64 {
            assert_eq!(r.route(addr, 1).unwrap().device, DeviceId(0));
        }
        for addr in (0x1002_0040..0x1002_0080u64).step_by(4) {
            assert_eq!(r.route(addr, 4).unwrap().device, DeviceId(1));
        }
    }

    #[test]
    fn test_unmapped() {
        let r = example_router();
        for addr in [0x0, 0x1002_0000 - 1, 0x4000_0000, 0xFFFF_FFFF_FFFF_FFFF] {
            assert_eq!(
                r.route(addr, 4),
                Err(SimulationError::UnmappedAddress { addr })
            );
        }
        // Inside the accelerator aperture but past the scratchpad.
        let hole = 0x1002_0080 + 32 * 1024;
        assert_eq!(
            r.route(hole, 4),
            Err(SimulationError::UnmappedAddress { addr: hole })
        );
    }

    #[test]
    fn test_straddles() {
        let r = example_router();
        // Last word of the DMA window into the NPU window.
        assert_eq!(
            r.route(0x1002_003C, 8),
            Err(SimulationError::StraddlesRegion {
                addr: 0x1002_003C,
                len: 8
            })
        );
        // Running off the end of the scratchpad into a hole is unmapped.
        let last = 0x1002_0080 + 32 * 1024 - 4;
        assert!(matches!(
            r.route(last, 8),
            Err(SimulationError::UnmappedAddress { .. })
        ));
    }

    #[test]
    fn test_overlap_rejected_for_every_amount() {
        for overlap in [1u64, 2, 0x10, 0x3F, 0x40] {
            let mut r = AddressRouter::new("membus");
            r.map_device(range(0x1000, 0x40), DeviceId(0)).unwrap();
            let base = 0x1000 + 0x40 - overlap;
            let err = r.map_device(range(base, 0x40), DeviceId(1)).unwrap_err();
            assert!(matches!(err, SimulationError::OverlappingRange { .. }));

            // Overlap from below as well.
            let err = r
                .map_device(range(0x1000 - 0x40 + overlap, 0x40), DeviceId(1))
                .unwrap_err();
            assert!(matches!(err, SimulationError::OverlappingRange { .. }));
        }
    }

    #[test]
    fn test_adjacent_ranges_are_fine() {
        let mut r = AddressRouter::new("membus");
        r.map_device(range(0x1000, 0x40), DeviceId(0)).unwrap();
        r.map_device(range(0x1040, 0x40), DeviceId(1)).unwrap();
        r.map_device(range(0x0FC0, 0x40), DeviceId(2)).unwrap();
        assert_eq!(r.route(0x0FFF, 1).unwrap().device, DeviceId(2));
        assert_eq!(r.route(0x1000, 1).unwrap().device, DeviceId(0));
    }

    #[test]
    fn test_nested_aperture_is_enforced() {
        let mut acc = AddressRouter::with_aperture("acc_bus", range(0x1002_0000, 0x1_0000));
        let err = acc
            .map_device(range(0x1002_F000, 0x2000), DeviceId(0))
            .unwrap_err();
        assert!(matches!(err, SimulationError::InvalidConfig(_)));

        // A nested aperture may not overlap a sibling on the parent.
        let mut membus = AddressRouter::new("membus");
        membus.map_device(range(0x1002_8000, 0x100), DeviceId(1)).unwrap();
        assert!(matches!(
            membus.attach_bus(acc),
            Err(SimulationError::OverlappingRange { .. })
        ));
    }

    #[test]
    fn test_find_bus_and_mappings() {
        let mut r = example_router();
        assert!(r.find_bus_mut("acc_bus").is_some());
        assert!(r.find_bus_mut("membus").is_some());
        assert!(r.find_bus_mut("iobus").is_none());

        let map = r.mappings();
        assert_eq!(map.len(), 5);
        assert!(map
            .iter()
            .any(|(bus, range, id)| bus == "acc_bus" && range.base == 0x1002_0040 && *id == DeviceId(1)));
    }
}
