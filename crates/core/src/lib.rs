// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod host;
pub mod memory;
pub mod metrics;
pub mod peripherals;
pub mod sched;
pub mod snapshot;
pub mod system;

use std::any::Any;

pub use bus::{AddressRange, AddressRouter, Route};
pub use hetersim_config::{CompletionPolicy, StopReason};
pub use sched::{EventId, EventKind, EventQueue, ScheduledEvent};
pub use system::System;

mod tests;

/// Simulated time. One tick is one cycle of the 1 GHz system clock.
pub type Tick = u64;

/// Index of a device in the system's device arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub struct DeviceId(pub usize);

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SimulationError {
    #[error("Unmapped access at {addr:#x}")]
    UnmappedAddress { addr: u64 },
    #[error("Access of {len} bytes at {addr:#x} straddles two regions")]
    StraddlesRegion { addr: u64, len: u64 },
    #[error("Range {base:#x}+{size:#x} overlaps existing range {existing_base:#x}+{existing_size:#x}")]
    OverlappingRange {
        base: u64,
        size: u64,
        existing_base: u64,
        existing_size: u64,
    },
    #[error("No {width}-byte register at offset {offset:#x}")]
    BadOffset { offset: u64, width: u64 },
    #[error("Device busy")]
    DeviceBusy,
    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),
    #[error("Scratchpad access of {len} bytes at {addr:#x} leaves the scratchpad window")]
    ScratchpadOverflow { addr: u64, len: u64 },
    #[error("Access of {len} bytes at offset {offset:#x} is out of range")]
    OutOfRange { offset: u64, len: u64 },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Device at {addr:#x} is dispatching and cannot be re-entered")]
    ReentrantAccess { addr: u64 },
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Width of a single register or memory access. Values travel little-endian in a `u64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum AccessWidth {
    Byte = 1,
    Half = 2,
    Word = 4,
    Double = 8,
}

impl AccessWidth {
    pub fn from_bytes(bytes: u8) -> Option<Self> {
        match bytes {
            1 => Some(AccessWidth::Byte),
            2 => Some(AccessWidth::Half),
            4 => Some(AccessWidth::Word),
            8 => Some(AccessWidth::Double),
            _ => None,
        }
    }

    pub fn bytes(self) -> u64 {
        self as u64
    }

    pub fn mask(self) -> u64 {
        match self {
            AccessWidth::Double => u64::MAX,
            w => (1u64 << (w.bytes() * 8)) - 1,
        }
    }
}

/// The scheduling service devices see: "call me back after N ticks".
///
/// Events for the same tick are delivered in the order they were scheduled.
/// Only the owner that scheduled an event may withdraw it.
pub trait Scheduler {
    fn now(&self) -> Tick;
    fn schedule(&mut self, owner: DeviceId, delay: Tick, kind: EventKind) -> EventId;
    fn cancel(&mut self, owner: DeviceId, id: EventId) -> bool;
}

/// Memory-side path used when a device acts as an initiator (DMA data movement,
/// NPU kernels). Returns the latency charged by the target.
pub trait MemoryPort {
    fn read_block(&mut self, addr: u64, buf: &mut [u8]) -> SimResult<Tick>;
    fn write_block(&mut self, addr: u64, data: &[u8]) -> SimResult<Tick>;
}

/// Everything a device may touch while handling an access or an event.
pub struct DeviceContext<'a> {
    owner: DeviceId,
    sched: &'a mut dyn Scheduler,
    port: &'a mut dyn MemoryPort,
}

impl<'a> DeviceContext<'a> {
    pub fn new(owner: DeviceId, sched: &'a mut dyn Scheduler, port: &'a mut dyn MemoryPort) -> Self {
        Self { owner, sched, port }
    }

    pub fn owner(&self) -> DeviceId {
        self.owner
    }

    pub fn now(&self) -> Tick {
        self.sched.now()
    }

    pub fn schedule(&mut self, delay: Tick, kind: EventKind) -> EventId {
        self.sched.schedule(self.owner, delay, kind)
    }

    pub fn cancel(&mut self, id: EventId) -> bool {
        self.sched.cancel(self.owner, id)
    }

    pub fn read_block(&mut self, addr: u64, buf: &mut [u8]) -> SimResult<Tick> {
        self.port.read_block(addr, buf)
    }

    pub fn write_block(&mut self, addr: u64, data: &[u8]) -> SimResult<Tick> {
        self.port.write_block(addr, data)
    }
}

/// A memory-mapped device reachable through the router.
///
/// `read`/`write` are register-style accesses of a fixed width. The block calls
/// are the bulk data path used by DMA bursts; devices without a data window
/// reject them.
pub trait Device: std::fmt::Debug {
    fn read(&mut self, offset: u64, width: AccessWidth, ctx: &mut DeviceContext<'_>)
        -> SimResult<u64>;
    fn write(
        &mut self,
        offset: u64,
        width: AccessWidth,
        value: u64,
        ctx: &mut DeviceContext<'_>,
    ) -> SimResult<()>;

    /// Fixed latency charged to the initiator for every access.
    fn access_latency(&self) -> Tick;

    fn read_block(&mut self, offset: u64, buf: &mut [u8]) -> SimResult<()> {
        Err(SimulationError::BadOffset {
            offset,
            width: buf.len() as u64,
        })
    }

    fn write_block(&mut self, offset: u64, data: &[u8]) -> SimResult<()> {
        Err(SimulationError::BadOffset {
            offset,
            width: data.len() as u64,
        })
    }

    fn on_event(&mut self, _event: &ScheduledEvent, _ctx: &mut DeviceContext<'_>) -> SimResult<()> {
        Ok(())
    }

    /// Return to the post-construction state, withdrawing any scheduled events.
    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) {}

    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
}

/// Trait for observing simulation events in a modular way.
pub trait SimulationObserver: std::fmt::Debug + Send + Sync {
    fn on_simulation_start(&self) {}
    fn on_simulation_stop(&self, _tick: Tick) {}
    fn on_access(&self, _device: &str, _addr: u64, _is_write: bool) {}
    fn on_block_access(&self, _device: &str, _bytes: usize, _is_write: bool) {}
    fn on_event(&self, _device: &str, _kind: EventKind) {}
}
