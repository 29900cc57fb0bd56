// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! The assembled platform: device arena, address map and event loop.
//!
//! Devices live in slots indexed by [`DeviceId`]. While a device handles an
//! access or an event it is taken out of its slot, so it can drive traffic
//! through the router (DMA bursts, kernels) into every *other* device. An
//! access that comes back into an empty slot fails with `ReentrantAccess`.

pub mod builder;

use crate::bus::{AddressRange, AddressRouter};
use crate::snapshot::SystemSnapshot;
use crate::{
    AccessWidth, Device, DeviceContext, DeviceId, EventQueue, MemoryPort, ScheduledEvent,
    SimResult, SimulationError, SimulationObserver, StopReason, Tick,
};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
pub struct DeviceSlot {
    pub name: String,
    pub range: AddressRange,
    dev: Option<Box<dyn Device>>,
}

/// Result of a host register or memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Access {
    pub value: u64,
    /// Latency charged by the target device.
    pub latency: Tick,
    pub device: DeviceId,
}

/// Router-backed memory port handed to devices while they dispatch.
struct RoutedPort<'s> {
    router: &'s AddressRouter,
    slots: &'s mut [DeviceSlot],
    observers: &'s [Arc<dyn SimulationObserver>],
}

impl RoutedPort<'_> {
    fn target(&mut self, addr: u64, len: usize) -> SimResult<(u64, &mut DeviceSlot)> {
        let route = self.router.route(addr, len as u64)?;
        let slot = self
            .slots
            .get_mut(route.device.0)
            .ok_or(SimulationError::UnmappedAddress { addr })?;
        if slot.dev.is_none() {
            return Err(SimulationError::ReentrantAccess { addr });
        }
        Ok((route.offset, slot))
    }
}

impl MemoryPort for RoutedPort<'_> {
    fn read_block(&mut self, addr: u64, buf: &mut [u8]) -> SimResult<Tick> {
        let observers = self.observers;
        let (offset, slot) = self.target(addr, buf.len())?;
        let dev = slot
            .dev
            .as_mut()
            .ok_or(SimulationError::ReentrantAccess { addr })?;
        dev.read_block(offset, buf)?;
        for observer in observers {
            observer.on_block_access(&slot.name, buf.len(), false);
        }
        Ok(dev.access_latency())
    }

    fn write_block(&mut self, addr: u64, data: &[u8]) -> SimResult<Tick> {
        let observers = self.observers;
        let (offset, slot) = self.target(addr, data.len())?;
        let dev = slot
            .dev
            .as_mut()
            .ok_or(SimulationError::ReentrantAccess { addr })?;
        dev.write_block(offset, data)?;
        for observer in observers {
            observer.on_block_access(&slot.name, data.len(), true);
        }
        Ok(dev.access_latency())
    }
}

#[derive(Debug)]
pub struct System {
    name: String,
    router: AddressRouter,
    slots: Vec<DeviceSlot>,
    queue: EventQueue,
    pub observers: Vec<Arc<dyn SimulationObserver>>,
}

impl System {
    pub fn new(name: impl Into<String>, root: AddressRouter) -> Self {
        Self {
            name: name.into(),
            router: root,
            slots: Vec::new(),
            queue: EventQueue::new(),
            observers: Vec::new(),
        }
    }

    /// Build from a parsed manifest. See [`builder::build_system`].
    pub fn from_config(manifest: &hetersim_config::SystemManifest) -> anyhow::Result<Self> {
        builder::build_system(manifest)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn now(&self) -> Tick {
        self.queue.now()
    }

    pub fn router(&self) -> &AddressRouter {
        &self.router
    }

    pub fn pending_events(&self) -> usize {
        self.queue.pending()
    }

    pub fn next_event_time(&mut self) -> Option<Tick> {
        self.queue.peek_time()
    }

    pub fn has_bus(&self, name: &str) -> bool {
        self.router.find_bus(name).is_some()
    }

    /// Nest `bus` under the bus called `parent`.
    pub fn attach_bus(&mut self, parent: &str, bus: AddressRouter) -> SimResult<()> {
        self.router
            .find_bus_mut(parent)
            .ok_or_else(|| SimulationError::InvalidConfig(format!("unknown bus '{}'", parent)))?
            .attach_bus(bus)
    }

    /// Map `dev` at `range` on the bus called `bus`.
    pub fn add_device(
        &mut self,
        bus: &str,
        name: impl Into<String>,
        range: AddressRange,
        dev: Box<dyn Device>,
    ) -> SimResult<DeviceId> {
        let name = name.into();
        if self.slots.iter().any(|s| s.name == name) {
            return Err(SimulationError::InvalidConfig(format!(
                "duplicate device name '{}'",
                name
            )));
        }
        let id = DeviceId(self.slots.len());
        self.router
            .find_bus_mut(bus)
            .ok_or_else(|| SimulationError::InvalidConfig(format!("unknown bus '{}'", bus)))?
            .map_device(range, id)?;
        debug!("Mapped {} at {} on {}", name, range, bus);
        self.slots.push(DeviceSlot {
            name,
            range,
            dev: Some(dev),
        });
        Ok(id)
    }

    pub fn devices(&self) -> impl Iterator<Item = (DeviceId, &DeviceSlot)> {
        self.slots.iter().enumerate().map(|(i, s)| (DeviceId(i), s))
    }

    pub fn device_id(&self, name: &str) -> Option<DeviceId> {
        self.slots.iter().position(|s| s.name == name).map(DeviceId)
    }

    pub fn device_name(&self, id: DeviceId) -> Option<&str> {
        self.slots.get(id.0).map(|s| s.name.as_str())
    }

    /// Typed view of a device model.
    pub fn device<T: 'static>(&self, name: &str) -> Option<&T> {
        self.slots
            .iter()
            .find(|s| s.name == name)?
            .dev
            .as_ref()?
            .as_any()?
            .downcast_ref::<T>()
    }

    pub fn device_mut<T: 'static>(&mut self, name: &str) -> Option<&mut T> {
        self.slots
            .iter_mut()
            .find(|s| s.name == name)?
            .dev
            .as_mut()?
            .as_any_mut()?
            .downcast_mut::<T>()
    }

    /// JSON state of one device.
    pub fn device_state(&self, name: &str) -> Option<serde_json::Value> {
        self.slots
            .iter()
            .find(|s| s.name == name)
            .and_then(|s| s.dev.as_ref())
            .map(|d| d.snapshot())
    }

    pub fn snapshot(&self) -> SystemSnapshot {
        SystemSnapshot {
            name: self.name.clone(),
            tick: self.queue.now(),
            pending_events: self.queue.pending(),
            devices: self
                .slots
                .iter()
                .filter_map(|s| s.dev.as_ref().map(|d| (s.name.clone(), d.snapshot())))
                .collect(),
        }
    }

    /// Backdoor port for host block transfers; observers only see device traffic.
    fn port(&mut self) -> RoutedPort<'_> {
        RoutedPort {
            router: &self.router,
            slots: &mut self.slots,
            observers: &[],
        }
    }

    /// Run `f` with the device taken out of its slot and a context bound to it.
    fn dispatch<R>(
        &mut self,
        id: DeviceId,
        addr: u64,
        f: impl FnOnce(&mut dyn Device, &mut DeviceContext<'_>) -> SimResult<R>,
    ) -> SimResult<R> {
        let mut dev = self
            .slots
            .get_mut(id.0)
            .and_then(|s| s.dev.take())
            .ok_or(SimulationError::ReentrantAccess { addr })?;
        let result = {
            let mut port = RoutedPort {
                router: &self.router,
                slots: &mut self.slots,
                observers: &self.observers,
            };
            let mut ctx = DeviceContext::new(id, &mut self.queue, &mut port);
            f(&mut *dev, &mut ctx)
        };
        self.slots[id.0].dev = Some(dev);
        result
    }

    fn notify_access(&self, id: DeviceId, addr: u64, is_write: bool) {
        if let Some(slot) = self.slots.get(id.0) {
            for observer in &self.observers {
                observer.on_access(&slot.name, addr, is_write);
            }
        }
    }

    /// Register-style read at the current simulated time.
    pub fn read(&mut self, addr: u64, width: AccessWidth) -> SimResult<Access> {
        let route = self.router.route(addr, width.bytes())?;
        let (value, latency) = self.dispatch(route.device, addr, |dev, ctx| {
            let value = dev.read(route.offset, width, ctx)?;
            Ok((value, dev.access_latency()))
        })?;
        self.notify_access(route.device, addr, false);
        Ok(Access {
            value,
            latency,
            device: route.device,
        })
    }

    /// Register-style write at the current simulated time.
    pub fn write(&mut self, addr: u64, width: AccessWidth, value: u64) -> SimResult<Access> {
        let route = self.router.route(addr, width.bytes())?;
        let latency = self.dispatch(route.device, addr, |dev, ctx| {
            dev.write(route.offset, width, value & width.mask(), ctx)?;
            Ok(dev.access_latency())
        })?;
        self.notify_access(route.device, addr, true);
        Ok(Access {
            value,
            latency,
            device: route.device,
        })
    }

    /// Block write through the router, e.g. to preload memory.
    pub fn load(&mut self, addr: u64, data: &[u8]) -> SimResult<Tick> {
        self.port().write_block(addr, data)
    }

    /// Block read through the router.
    pub fn dump(&mut self, addr: u64, len: usize) -> SimResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.port().read_block(addr, &mut buf)?;
        Ok(buf)
    }

    fn deliver(&mut self, event: ScheduledEvent) -> SimResult<()> {
        let (name, base) = match self.slots.get(event.owner.0) {
            Some(s) => (s.name.clone(), s.range.base),
            None => return Ok(()),
        };
        debug!("Tick {}: {:?} -> {}", event.time, event.kind, name);
        for observer in &self.observers {
            observer.on_event(&name, event.kind);
        }
        self.dispatch(event.owner, base, |dev, ctx| dev.on_event(&event, ctx))
    }

    /// Deliver the next pending event, whatever its time.
    pub fn step(&mut self) -> SimResult<Option<ScheduledEvent>> {
        match self.queue.pop_due(Tick::MAX) {
            Some(event) => {
                self.deliver(event)?;
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }

    /// Deliver every event due at or before `t` in order, then set the clock
    /// to `t`. Returns the number of delivered events.
    pub fn advance_to(&mut self, t: Tick) -> SimResult<usize> {
        let mut delivered = 0;
        while let Some(event) = self.queue.pop_due(t) {
            self.deliver(event)?;
            delivered += 1;
        }
        self.queue.advance(t);
        Ok(delivered)
    }

    /// Drain the event queue. `max_ticks` is an absolute time limit; events
    /// beyond it stay queued.
    pub fn run(&mut self, max_ticks: Option<Tick>) -> SimResult<StopReason> {
        loop {
            match (self.queue.peek_time(), max_ticks) {
                (None, _) => return Ok(StopReason::Idle),
                (Some(t), Some(max)) if t > max => {
                    self.queue.advance(max);
                    return Ok(StopReason::MaxTicks);
                }
                _ => {
                    self.step()?;
                }
            }
        }
    }

    /// Return every device to its post-construction state. Time keeps running.
    pub fn reset(&mut self) -> SimResult<()> {
        info!("Resetting system '{}'", self.name);
        for i in 0..self.slots.len() {
            let base = self.slots[i].range.base;
            self.dispatch(DeviceId(i), base, |dev, ctx| {
                dev.reset(ctx);
                Ok(())
            })?;
        }
        Ok(())
    }

    pub fn notify_start(&self) {
        for observer in &self.observers {
            observer.on_simulation_start();
        }
    }

    pub fn notify_stop(&self) {
        let tick = self.queue.now();
        for observer in &self.observers {
            observer.on_simulation_stop(tick);
        }
    }
}
