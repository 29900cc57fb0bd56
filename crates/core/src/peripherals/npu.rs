// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Neural processing unit model.
//!
//! The NPU is a PIO-controlled compute engine with a fixed compute interval.
//! Writing the start bit to CONTROL moves it to Busy and schedules a
//! completion event `compute_ticks` later; STATUS reports Idle/Busy/Done.
//! The actual computation is optional: a [`ComputeKernel`] attached to the
//! device runs at completion time against the scratchpad window.

use super::regfile::{RegisterDef, RegisterFile, RegisterPolicy, WriteOutcome};
use crate::{
    AccessWidth, AddressRange, CompletionPolicy, Device, DeviceContext, EventId, EventKind,
    ScheduledEvent, SimResult, SimulationError, Tick,
};
use std::any::Any;
use tracing::{debug, info, warn};

pub const NPU_CONTROL: u64 = 0x00;
pub const NPU_INPUT_ADDR: u64 = 0x08;
pub const NPU_LENGTH: u64 = 0x10;

/// Start bit in CONTROL.
pub const NPU_CONTROL_START: u64 = 1 << 0;
/// Set alongside Done when the attached kernel failed.
pub const NPU_STATUS_ERROR: u64 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum NpuStatus {
    Idle = 0,
    Busy = 1,
    Done = 2,
}

#[derive(Debug, Clone)]
pub struct NpuParams {
    pub pio_size: u64,
    pub scratchpad: AddressRange,
    pub compute_ticks: Tick,
    pub status_offset: u64,
    pub pio_latency: Tick,
    pub completion: CompletionPolicy,
}

/// The computation an NPU performs when its compute interval elapses.
pub trait ComputeKernel: std::fmt::Debug {
    fn run(&mut self, spm: &mut ScratchpadView<'_, '_>) -> SimResult<()>;
}

/// Scratchpad access handed to a kernel. Every access must stay inside the
/// scratchpad window.
pub struct ScratchpadView<'c, 'a> {
    window: AddressRange,
    ctx: &'c mut DeviceContext<'a>,
}

impl<'c, 'a> ScratchpadView<'c, 'a> {
    pub fn new(window: AddressRange, ctx: &'c mut DeviceContext<'a>) -> Self {
        Self { window, ctx }
    }

    pub fn window(&self) -> AddressRange {
        self.window
    }

    fn check(&self, addr: u64, len: usize) -> SimResult<()> {
        if self.window.contains_span(addr, len as u64) {
            Ok(())
        } else {
            Err(SimulationError::ScratchpadOverflow {
                addr,
                len: len as u64,
            })
        }
    }

    pub fn read(&mut self, addr: u64, buf: &mut [u8]) -> SimResult<()> {
        self.check(addr, buf.len())?;
        self.ctx.read_block(addr, buf)?;
        Ok(())
    }

    pub fn write(&mut self, addr: u64, data: &[u8]) -> SimResult<()> {
        self.check(addr, data.len())?;
        self.ctx.write_block(addr, data)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct Npu {
    params: NpuParams,
    regs: RegisterFile,
    status: NpuStatus,
    error: bool,
    /// Completion event and its due time; present exactly while Busy.
    pending: Option<(EventId, Tick)>,
    kernel: Option<Box<dyn ComputeKernel>>,
    invocations: u64,
}

impl Npu {
    pub fn new(params: NpuParams) -> SimResult<Self> {
        let status_policy = match params.completion {
            CompletionPolicy::ReadClears => RegisterPolicy::ReadClears,
            CompletionPolicy::Rearm => RegisterPolicy::ReadOnly,
        };
        let regs = RegisterFile::new(
            params.pio_size,
            &[
                RegisterDef::new("CONTROL", NPU_CONTROL, AccessWidth::Word, RegisterPolicy::WriteTrigger),
                RegisterDef::new("STATUS", params.status_offset, AccessWidth::Word, status_policy),
                RegisterDef::new("INPUT_ADDR", NPU_INPUT_ADDR, AccessWidth::Double, RegisterPolicy::ReadWrite),
                RegisterDef::new("LENGTH", NPU_LENGTH, AccessWidth::Word, RegisterPolicy::ReadWrite),
            ],
        )?;
        Ok(Self {
            params,
            regs,
            status: NpuStatus::Idle,
            error: false,
            pending: None,
            kernel: None,
            invocations: 0,
        })
    }

    pub fn with_kernel(mut self, kernel: Box<dyn ComputeKernel>) -> Self {
        self.kernel = Some(kernel);
        self
    }

    pub fn set_kernel(&mut self, kernel: Box<dyn ComputeKernel>) {
        self.kernel = Some(kernel);
    }

    pub fn status(&self) -> NpuStatus {
        self.status
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    /// Tick at which the running computation completes.
    pub fn pending_completion(&self) -> Option<Tick> {
        self.pending.map(|(_, due)| due)
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }

    pub fn params(&self) -> &NpuParams {
        &self.params
    }

    fn status_bits(&self) -> u64 {
        let err = if self.error { NPU_STATUS_ERROR } else { 0 };
        self.status as u64 | err
    }

    fn sync_status(&mut self) {
        self.regs.set(self.params.status_offset, self.status_bits());
    }

    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> SimResult<()> {
        let startable = match self.status {
            NpuStatus::Idle => true,
            NpuStatus::Done => self.params.completion == CompletionPolicy::Rearm,
            NpuStatus::Busy => false,
        };
        if !startable {
            warn!("NPU: start rejected while {:?}", self.status);
            return Err(SimulationError::DeviceBusy);
        }

        let id = ctx.schedule(self.params.compute_ticks, EventKind::ComputeDone);
        let due = ctx.now().saturating_add(self.params.compute_ticks);
        self.pending = Some((id, due));
        self.status = NpuStatus::Busy;
        self.error = false;
        self.invocations += 1;
        self.sync_status();
        info!(
            "NPU: compute started at tick {} (input {:#x}, {} bytes), done at tick {}",
            ctx.now(),
            self.regs.get(NPU_INPUT_ADDR),
            self.regs.get(NPU_LENGTH),
            due
        );
        Ok(())
    }

    fn complete(&mut self, ctx: &mut DeviceContext<'_>) {
        let window = self.params.scratchpad;
        if let Some(kernel) = self.kernel.as_mut() {
            let mut spm = ScratchpadView::new(window, &mut *ctx);
            if let Err(e) = kernel.run(&mut spm) {
                warn!("NPU: compute kernel failed: {}", e);
                self.error = true;
            }
        }
        self.pending = None;
        self.status = NpuStatus::Done;
        self.sync_status();
        info!("NPU: compute done at tick {}", ctx.now());
    }

    fn read_register(&mut self, offset: u64, width: AccessWidth) -> SimResult<u64> {
        let value = self.regs.read(offset, width)?;
        debug!("NPU: read {:#x} ({} bytes) -> {:#x}", offset, width.bytes(), value);
        if offset == self.params.status_offset {
            if self.status == NpuStatus::Done && self.params.completion == CompletionPolicy::ReadClears {
                debug!("NPU: completion consumed, back to Idle");
                self.status = NpuStatus::Idle;
                self.error = false;
            }
            self.sync_status();
        }
        Ok(value)
    }
}

impl Device for Npu {
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
        debug!("NPU: block write {:#x} ({} bytes)", offset, data.len());
        self.regs.write_block(offset, data).map(|_| ())
    }

    fn write(
        &mut self,
        offset: u64,
        width: AccessWidth,
        value: u64,
        ctx: &mut DeviceContext<'_>,
    ) -> SimResult<()> {
        debug!("NPU: write {:#x} ({} bytes) <- {:#x}", offset, width.bytes(), value);
        match self.regs.write(offset, width, value)? {
            WriteOutcome::Trigger(v) if v & NPU_CONTROL_START != 0 => self.start(ctx),
            WriteOutcome::Trigger(_) if self.status == NpuStatus::Busy => {
                warn!("NPU: CONTROL written while Busy");
                Err(SimulationError::DeviceBusy)
            }
            _ => Ok(()),
        }
    }

    fn access_latency(&self) -> Tick {
        self.params.pio_latency
    }

    fn on_event(&mut self, event: &ScheduledEvent, ctx: &mut DeviceContext<'_>) -> SimResult<()> {
        match (event.kind, self.pending) {
            (EventKind::ComputeDone, Some((id, _))) if id == event.id => {
                self.complete(ctx);
                Ok(())
            }
            _ => {
                warn!("NPU: ignoring unexpected event {:?}", event);
                Ok(())
            }
        }
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) {
        if let Some((id, _)) = self.pending.take() {
            ctx.cancel(id);
        }
        self.regs.reset();
        self.status = NpuStatus::Idle;
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
            "status": self.status,
            "error": self.error,
            "pending_completion": self.pending_completion(),
            "invocations": self.invocations,
            "kernel": self.kernel.is_some(),
            "registers": self.regs.to_json(),
        })
    }
}
