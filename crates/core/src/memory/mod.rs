// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{AccessWidth, Device, DeviceContext, SimResult, SimulationError, Tick};
use std::any::Any;
use std::collections::HashMap;

const PAGE_SIZE: u64 = 4096;

/// A simple flat memory storage
///
/// Used for the accelerator scratchpad as well as the HBM/DRAM controllers.
/// Offsets are relative to the window the router maps it at. Pages are
/// allocated on first write, so multi-gigabyte controllers cost nothing until
/// touched; unwritten bytes read as zero.
#[derive(Debug)]
pub struct LinearMemory {
    size: u64,
    latency: Tick,
    pages: HashMap<u64, Box<[u8]>>,
}

impl LinearMemory {
    pub fn new(size: u64, latency: Tick) -> Self {
        Self {
            size,
            latency,
            pages: HashMap::new(),
        }
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    fn check(&self, offset: u64, len: u64) -> SimResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(SimulationError::OutOfRange { offset, len }),
        }
    }

    pub fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> SimResult<()> {
        self.check(offset, buf.len() as u64)?;
        let mut addr = offset;
        let mut done = 0;
        while done < buf.len() {
            let page = addr / PAGE_SIZE;
            let in_page = (addr % PAGE_SIZE) as usize;
            let chunk = (PAGE_SIZE as usize - in_page).min(buf.len() - done);
            match self.pages.get(&page) {
                Some(p) => buf[done..done + chunk].copy_from_slice(&p[in_page..in_page + chunk]),
                None => buf[done..done + chunk].fill(0),
            }
            done += chunk;
            addr += chunk as u64;
        }
        Ok(())
    }

    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> SimResult<()> {
        self.check(offset, data.len() as u64)?;
        let mut addr = offset;
        let mut done = 0;
        while done < data.len() {
            let page = addr / PAGE_SIZE;
            let in_page = (addr % PAGE_SIZE) as usize;
            let chunk = (PAGE_SIZE as usize - in_page).min(data.len() - done);
            let p = self
                .pages
                .entry(page)
                .or_insert_with(|| vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
            p[in_page..in_page + chunk].copy_from_slice(&data[done..done + chunk]);
            done += chunk;
            addr += chunk as u64;
        }
        Ok(())
    }
}

impl Device for LinearMemory {
    fn read(&mut self, offset: u64, width: AccessWidth, _ctx: &mut DeviceContext<'_>) -> SimResult<u64> {
        let mut bytes = [0u8; 8];
        self.read_bytes(offset, &mut bytes[..width.bytes() as usize])?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn write(
        &mut self,
        offset: u64,
        width: AccessWidth,
        value: u64,
        _ctx: &mut DeviceContext<'_>,
    ) -> SimResult<()> {
        let bytes = value.to_le_bytes();
        self.write_bytes(offset, &bytes[..width.bytes() as usize])
    }

    fn access_latency(&self) -> Tick {
        self.latency
    }

    fn read_block(&mut self, offset: u64, buf: &mut [u8]) -> SimResult<()> {
        self.read_bytes(offset, buf)
    }

    fn write_block(&mut self, offset: u64, data: &[u8]) -> SimResult<()> {
        self.write_bytes(offset, data)
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "size": self.size,
            "latency": self.latency,
            "resident_pages": self.pages.len(),
        })
    }
}
