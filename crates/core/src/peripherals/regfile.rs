// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{AccessWidth, SimResult, SimulationError};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum RegisterPolicy {
    ReadWrite,
    /// Device-owned value; host writes are dropped.
    ReadOnly,
    /// Writes are handed to the device as an action and not stored. Reads return 0.
    WriteTrigger,
    /// Device-owned like `ReadOnly`; reading also restores the reset value.
    ReadClears,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RegisterDef {
    pub name: &'static str,
    pub offset: u64,
    pub width: AccessWidth,
    pub policy: RegisterPolicy,
    pub reset: u64,
}

impl RegisterDef {
    pub const fn new(
        name: &'static str,
        offset: u64,
        width: AccessWidth,
        policy: RegisterPolicy,
    ) -> Self {
        Self {
            name,
            offset,
            width,
            policy,
            reset: 0,
        }
    }

    fn end(&self) -> u64 {
        self.offset + self.width.bytes()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    Ignored,
    /// A write to a trigger register; the device decides what it means.
    Trigger(u64),
}

#[derive(Debug, Clone, serde::Serialize)]
struct Register {
    def: RegisterDef,
    value: u64,
}

/// Register block of a PIO device: fixed offsets, widths and access policies
/// declared at construction.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RegisterFile {
    regs: Vec<Register>,
}

impl RegisterFile {
    /// Registers must fit in a window of `window` bytes and may not overlap.
    pub fn new(window: u64, defs: &[RegisterDef]) -> SimResult<Self> {
        let mut regs: Vec<Register> = Vec::with_capacity(defs.len());
        for def in defs {
            if def.end() > window {
                return Err(SimulationError::InvalidConfig(format!(
                    "register {} at {:#x} does not fit a {:#x}-byte window",
                    def.name, def.offset, window
                )));
            }
            if let Some(other) = regs
                .iter()
                .find(|r| def.offset < r.def.end() && r.def.offset < def.end())
            {
                return Err(SimulationError::InvalidConfig(format!(
                    "register {} at {:#x} collides with {} at {:#x}",
                    def.name, def.offset, other.def.name, other.def.offset
                )));
            }
            regs.push(Register {
                def: *def,
                value: def.reset & def.width.mask(),
            });
        }
        Ok(Self { regs })
    }

    fn index(&self, offset: u64, width: AccessWidth) -> SimResult<usize> {
        self.regs
            .iter()
            .position(|r| r.def.offset == offset && r.def.width == width)
            .ok_or(SimulationError::BadOffset {
                offset,
                width: width.bytes(),
            })
    }

    pub fn def(&self, offset: u64, width: AccessWidth) -> SimResult<&RegisterDef> {
        self.index(offset, width).map(|i| &self.regs[i].def)
    }

    pub fn read(&mut self, offset: u64, width: AccessWidth) -> SimResult<u64> {
        let idx = self.index(offset, width)?;
        let reg = &mut self.regs[idx];
        Ok(match reg.def.policy {
            RegisterPolicy::WriteTrigger => 0,
            RegisterPolicy::ReadClears => {
                let value = reg.value;
                reg.value = reg.def.reset;
                value
            }
            RegisterPolicy::ReadWrite | RegisterPolicy::ReadOnly => reg.value,
        })
    }

    pub fn write(&mut self, offset: u64, width: AccessWidth, value: u64) -> SimResult<WriteOutcome> {
        let idx = self.index(offset, width)?;
        let reg = &mut self.regs[idx];
        let value = value & width.mask();
        Ok(match reg.def.policy {
            RegisterPolicy::WriteTrigger => WriteOutcome::Trigger(value),
            RegisterPolicy::ReadOnly | RegisterPolicy::ReadClears => {
                warn!("Write to read-only register {} ignored", reg.def.name);
                WriteOutcome::Ignored
            }
            RegisterPolicy::ReadWrite => {
                reg.value = value;
                WriteOutcome::Stored
            }
        })
    }

    /// Width of the register a block access of `len` bytes at `offset` covers
    /// exactly.
    pub fn block_width(&self, offset: u64, len: usize) -> SimResult<AccessWidth> {
        let width = u8::try_from(len)
            .ok()
            .and_then(AccessWidth::from_bytes)
            .ok_or(SimulationError::BadOffset {
                offset,
                width: len as u64,
            })?;
        self.index(offset, width).map(|_| width)
    }

    /// Block write of one whole register, value little-endian in `data`.
    ///
    /// Trigger registers act only on PIO writes; a block write into one is
    /// rejected.
    pub fn write_block(&mut self, offset: u64, data: &[u8]) -> SimResult<WriteOutcome> {
        let width = self.block_width(offset, data.len())?;
        let def = self.def(offset, width)?;
        if def.policy == RegisterPolicy::WriteTrigger {
            warn!("Block write to trigger register {} rejected", def.name);
            return Err(SimulationError::BadOffset {
                offset,
                width: width.bytes(),
            });
        }
        let value = data
            .iter()
            .rev()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(*b));
        self.write(offset, width, value)
    }

    /// Device-side view of a register, bypassing the access policy.
    pub fn get(&self, offset: u64) -> u64 {
        self.regs
            .iter()
            .find(|r| r.def.offset == offset)
            .map(|r| r.value)
            .unwrap_or(0)
    }

    /// Device-side update of a register, bypassing the access policy.
    pub fn set(&mut self, offset: u64, value: u64) {
        if let Some(r) = self.regs.iter_mut().find(|r| r.def.offset == offset) {
            r.value = value & r.def.width.mask();
        }
    }

    pub fn reset(&mut self) {
        for r in &mut self.regs {
            r.value = r.def.reset;
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.regs
                .iter()
                .map(|r| (r.def.name.to_string(), serde_json::json!(r.value)))
                .collect(),
        )
    }
}
