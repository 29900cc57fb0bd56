// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::regfile::{RegisterDef, RegisterFile, RegisterPolicy, WriteOutcome};
use crate::{
    AccessWidth, CompletionPolicy, Device, DeviceContext, EventId, EventKind, ScheduledEvent,
    SimResult, SimulationError, Tick,
};
use std::any::Any;
use tracing::{debug, info, warn};

pub const DMA_CONTROL: u64 = 0x00;
pub const DMA_STATUS: u64 = 0x04;
pub const DMA_SRC: u64 = 0x08;
pub const DMA_DST: u64 = 0x10;
pub const DMA_LENGTH: u64 = 0x18;
pub const DMA_BURSTS_REMAINING: u64 = 0x1C;
pub const DMA_FAULT_ADDR: u64 = 0x20;

pub const DMA_CONTROL_START: u64 = 1 << 0;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DmaStatusBits: u32 {
        const BUSY = 1 << 0;
        const DONE = 1 << 1;
        const ERROR = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum TransferState {
    Idle,
    Transferring,
    Done,
}

/// A transfer latched from the SRC/DST/LENGTH shadow registers at start.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TransferDescriptor {
    pub src: u64,
    pub dst: u64,
    pub length: u64,
    pub max_burst: u64,
    pub bursts_remaining: u64,
    pub bytes_remaining: u64,
    pub status: TransferState,
}

impl TransferDescriptor {
    pub fn new(src: u64, dst: u64, length: u64, max_burst: u64) -> SimResult<Self> {
        if length == 0 {
            return Err(SimulationError::InvalidTransfer(
                "transfer length is zero".to_string(),
            ));
        }
        if max_burst == 0 {
            return Err(SimulationError::InvalidTransfer(
                "burst size is zero".to_string(),
            ));
        }
        Ok(Self {
            src,
            dst,
            length,
            max_burst,
            bursts_remaining: length.div_ceil(max_burst),
            bytes_remaining: length,
            status: TransferState::Transferring,
        })
    }

    pub fn next_burst_len(&self) -> u64 {
        self.bytes_remaining.min(self.max_burst)
    }

    fn advance(&mut self, moved: u64) {
        // Past the final burst the pointers may step beyond the top of the
        // address space; they are never used again.
        self.src = self.src.wrapping_add(moved);
        self.dst = self.dst.wrapping_add(moved);
        self.bytes_remaining -= moved;
        self.bursts_remaining -= 1;
    }
}

#[derive(Debug, Clone)]
pub struct DmaParams {
    pub pio_size: u64,
    pub pio_latency: Tick,
    pub max_transfer_size: u64,
    pub burst_latency: Tick,
    pub completion: CompletionPolicy,
}

/// Single-channel memory-to-memory DMA engine.
///
/// A transfer is split into `ceil(length / max_transfer_size)` bursts, one
/// event each, spaced `burst_latency` apart. Every burst is one routed block
/// read followed by one routed block write.
#[derive(Debug)]
pub struct DmaEngine {
    params: DmaParams,
    regs: RegisterFile,
    desc: Option<TransferDescriptor>,
    error: bool,
    pending: Option<EventId>,
    staging: Vec<u8>,
    bursts_completed: u64,
    bytes_moved: u64,
}

impl DmaEngine {
    pub fn new(params: DmaParams) -> SimResult<Self> {
        if params.max_transfer_size == 0 {
            return Err(SimulationError::InvalidConfig(
                "DMA max_transfer_size must be greater than zero".to_string(),
            ));
        }
        let status_policy = match params.completion {
            CompletionPolicy::ReadClears => RegisterPolicy::ReadClears,
            CompletionPolicy::Rearm => RegisterPolicy::ReadOnly,
        };
        let regs = RegisterFile::new(
            params.pio_size,
            &[
                RegisterDef::new("CONTROL", DMA_CONTROL, AccessWidth::Word, RegisterPolicy::WriteTrigger),
                RegisterDef::new("STATUS", DMA_STATUS, AccessWidth::Word, status_policy),
                RegisterDef::new("SRC", DMA_SRC, AccessWidth::Double, RegisterPolicy::ReadWrite),
                RegisterDef::new("DST", DMA_DST, AccessWidth::Double, RegisterPolicy::ReadWrite),
                RegisterDef::new("LENGTH", DMA_LENGTH, AccessWidth::Word, RegisterPolicy::ReadWrite),
                RegisterDef::new(
                    "BURSTS_REMAINING",
                    DMA_BURSTS_REMAINING,
                    AccessWidth::Word,
                    RegisterPolicy::ReadOnly,
                ),
                RegisterDef::new("FAULT_ADDR", DMA_FAULT_ADDR, AccessWidth::Double, RegisterPolicy::ReadOnly),
            ],
        )?;
        Ok(Self {
            params,
            regs,
            desc: None,
            error: false,
            pending: None,
            staging: Vec::new(),
            bursts_completed: 0,
            bytes_moved: 0,
        })
    }

    pub fn state(&self) -> TransferState {
        self.desc
            .as_ref()
            .map(|d| d.status)
            .unwrap_or(TransferState::Idle)
    }

    pub fn descriptor(&self) -> Option<&TransferDescriptor> {
        self.desc.as_ref()
    }

    pub fn status_bits(&self) -> DmaStatusBits {
        let mut bits = match self.state() {
            TransferState::Idle => DmaStatusBits::empty(),
            TransferState::Transferring => DmaStatusBits::BUSY,
            TransferState::Done => DmaStatusBits::DONE,
        };
        bits.set(DmaStatusBits::ERROR, self.error);
        bits
    }

    pub fn bursts_completed(&self) -> u64 {
        self.bursts_completed
    }

    pub fn bytes_moved(&self) -> u64 {
        self.bytes_moved
    }

    fn sync_status(&mut self) {
        let remaining = self.desc.as_ref().map(|d| d.bursts_remaining).unwrap_or(0);
        self.regs.set(DMA_STATUS, self.status_bits().bits() as u64);
        self.regs.set(DMA_BURSTS_REMAINING, remaining);
    }

    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> SimResult<()> {
        let startable = match self.state() {
            TransferState::Idle => true,
            TransferState::Done => self.params.completion == CompletionPolicy::Rearm,
            TransferState::Transferring => false,
        };
        if !startable {
            warn!("DMA: start rejected while {:?}", self.state());
            return Err(SimulationError::DeviceBusy);
        }

        let desc = TransferDescriptor::new(
            self.regs.get(DMA_SRC),
            self.regs.get(DMA_DST),
            self.regs.get(DMA_LENGTH),
            self.params.max_transfer_size,
        )
        .inspect_err(|e| warn!("DMA: {}", e))?;

        info!(
            "DMA: transfer {:#x} -> {:#x}, {} bytes in {} bursts",
            desc.src, desc.dst, desc.length, desc.bursts_remaining
        );
        self.desc = Some(desc);
        self.error = false;
        self.regs.set(DMA_FAULT_ADDR, 0);
        self.pending = Some(ctx.schedule(self.params.burst_latency, EventKind::Burst));
        self.sync_status();
        Ok(())
    }

    fn burst(&mut self, ctx: &mut DeviceContext<'_>) {
        let (src, dst, len) = match &self.desc {
            Some(d) if d.status == TransferState::Transferring => (d.src, d.dst, d.next_burst_len()),
            _ => return,
        };

        self.staging.resize(len as usize, 0);
        if let Err(e) = ctx.read_block(src, &mut self.staging) {
            self.abort(ctx, src, e);
            return;
        }
        if let Err(e) = ctx.write_block(dst, &self.staging) {
            self.abort(ctx, dst, e);
            return;
        }
        self.bursts_completed += 1;
        self.bytes_moved += len;

        let remaining = match self.desc.as_mut() {
            Some(d) => {
                d.advance(len);
                d.bursts_remaining
            }
            None => 0,
        };
        debug!(
            "DMA: burst of {} bytes {:#x} -> {:#x}, {} remaining",
            len, src, dst, remaining
        );

        if remaining > 0 {
            self.pending = Some(ctx.schedule(self.params.burst_latency, EventKind::Burst));
        } else {
            if let Some(d) = self.desc.as_mut() {
                d.status = TransferState::Done;
            }
            info!("DMA: transfer done at tick {}", ctx.now());
        }
        self.sync_status();
    }

    fn abort(&mut self, ctx: &mut DeviceContext<'_>, addr: u64, err: SimulationError) {
        if let Some(id) = self.pending.take() {
            ctx.cancel(id);
        }
        warn!("DMA: transfer aborted at {:#x}: {}", addr, err);
        if let Some(d) = self.desc.as_mut() {
            d.status = TransferState::Done;
        }
        self.error = true;
        self.regs.set(DMA_FAULT_ADDR, addr);
        self.sync_status();
    }

    fn read_register(&mut self, offset: u64, width: AccessWidth) -> SimResult<u64> {
        let value = self.regs.read(offset, width)?;
        debug!("DMA: read {:#x} ({} bytes) -> {:#x}", offset, width.bytes(), value);
        if offset == DMA_STATUS {
            if self.state() == TransferState::Done
                && self.params.completion == CompletionPolicy::ReadClears
            {
                debug!("DMA: completion consumed, back to Idle");
                self.desc = None;
                self.error = false;
            }
            self.sync_status();
        }
        Ok(value)
    }
}

impl Device for DmaEngine {
    fn read(&mut self, offset: u64, width: AccessWidth, _ctx: &mut DeviceContext<'_>) -> SimResult<u64> {
        self.read_register(offset, width)
    }

    fn read_block(&mut self, offset: u64, buf: &mut [u8]) -> SimResult<()> {
        let width = self.regs.block_width(offset, buf.len())?;
        let value = self.read_register(offset, width)?;
        buf.copy_from_slice(&value.to_le_bytes()[..buf.len()]);
        Ok(())
    }

    fn write_block(&mut self, offset: u64, data: &[u8]) -> SimResult<()> {
        debug!("DMA: block write {:#x} ({} bytes)", offset, data.len());
        self.regs.write_block(offset, data).map(|_| ())
    }

    fn write(
        &mut self,
        offset: u64,
        width: AccessWidth,
        value: u64,
        ctx: &mut DeviceContext<'_>,
    ) -> SimResult<()> {
        debug!("DMA: write {:#x} ({} bytes) <- {:#x}", offset, width.bytes(), value);
        match self.regs.write(offset, width, value)? {
            WriteOutcome::Trigger(v) if v & DMA_CONTROL_START != 0 => self.start(ctx),
            WriteOutcome::Trigger(_) if self.state() == TransferState::Transferring => {
                warn!("DMA: CONTROL written while transferring");
                Err(SimulationError::DeviceBusy)
            }
            _ => Ok(()),
        }
    }

    fn access_latency(&self) -> Tick {
        self.params.pio_latency
    }

    fn on_event(&mut self, event: &ScheduledEvent, ctx: &mut DeviceContext<'_>) -> SimResult<()> {
        if event.kind != EventKind::Burst || self.pending != Some(event.id) {
            warn!("DMA: ignoring unexpected event {:?}", event);
            return Ok(());
        }
        self.pending = None;
        self.burst(ctx);
        Ok(())
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        if let Some(id) = self.pending.take() {
            ctx.cancel(id);
        }
        self.regs.reset();
        self.desc = None;
        self.error = false;
        self.sync_status();
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.state(),
            "status": self.status_bits().bits(),
            "descriptor": self.desc,
            "bursts_completed": self.bursts_completed,
            "bytes_moved": self.bytes_moved,
            "registers": self.regs.to_json(),
        })
    }
}
