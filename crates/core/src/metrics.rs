// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{EventKind, SimulationObserver, Tick};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct PerformanceMetrics {
    access_count: AtomicU64,
    event_count: AtomicU64,
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    end_tick: AtomicU64,
    accesses_by_device: Mutex<BTreeMap<String, u64>>,
    events_by_device: Mutex<BTreeMap<String, u64>>,
}

impl PerformanceMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.access_count.store(0, Ordering::SeqCst);
        self.event_count.store(0, Ordering::SeqCst);
        self.bytes_read.store(0, Ordering::SeqCst);
        self.bytes_written.store(0, Ordering::SeqCst);
        self.end_tick.store(0, Ordering::SeqCst);
        if let Ok(mut m) = self.accesses_by_device.lock() {
            m.clear();
        }
        if let Ok(mut m) = self.events_by_device.lock() {
            m.clear();
        }
    }

    pub fn get_accesses(&self) -> u64 {
        self.access_count.load(Ordering::SeqCst)
    }

    pub fn get_accesses_for(&self, device: &str) -> u64 {
        self.accesses_by_device
            .lock()
            .ok()
            .and_then(|m| m.get(device).copied())
            .unwrap_or(0)
    }

    pub fn get_events(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst)
    }

    pub fn get_events_for(&self, device: &str) -> u64 {
        self.events_by_device
            .lock()
            .ok()
            .and_then(|m| m.get(device).copied())
            .unwrap_or(0)
    }

    /// Bytes moved by device-initiated block traffic, (read, written).
    pub fn get_block_bytes(&self) -> (u64, u64) {
        (
            self.bytes_read.load(Ordering::SeqCst),
            self.bytes_written.load(Ordering::SeqCst),
        )
    }

    pub fn get_end_tick(&self) -> Tick {
        self.end_tick.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> String {
        let (read, written) = self.get_block_bytes();
        let mut out = format!(
            "{} host accesses, {} events, {} bytes read / {} bytes written by bursts",
            self.get_accesses(),
            self.get_events(),
            read,
            written
        );
        if let Ok(m) = self.accesses_by_device.lock() {
            for (name, count) in m.iter() {
                out.push_str(&format!("\n  {:<12} {} accesses, {} events", name, count, self.get_events_for(name)));
            }
        }
        out
    }
}

impl SimulationObserver for PerformanceMetrics {
    fn on_simulation_stop(&self, tick: Tick) {
        self.end_tick.store(tick, Ordering::SeqCst);
    }

    fn on_access(&self, device: &str, _addr: u64, _is_write: bool) {
        self.access_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut m) = self.accesses_by_device.lock() {
            *m.entry(device.to_string()).or_insert(0) += 1;
        }
    }

    fn on_block_access(&self, _device: &str, bytes: usize, is_write: bool) {
        let counter = if is_write {
            &self.bytes_written
        } else {
            &self.bytes_read
        };
        counter.fetch_add(bytes as u64, Ordering::SeqCst);
    }

    fn on_event(&self, device: &str, _kind: EventKind) {
        self.event_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut m) = self.events_by_device.lock() {
            *m.entry(device.to_string()).or_insert(0) += 1;
        }
    }
}
