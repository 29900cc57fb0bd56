// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use super::System;
use crate::bus::{AddressRange, AddressRouter};
use crate::memory::LinearMemory;
use crate::peripherals::dma::{DmaEngine, DmaParams};
use crate::peripherals::npu::{Npu, NpuParams};
use anyhow::Context;
use hetersim_config::{parse_size, BusConfig, SystemManifest};
use std::path::Path;
use tracing::{info, warn};

/// Builds a System from a given system manifest path.
pub fn build_system_from_path(system_path: &Path) -> anyhow::Result<System> {
    info!("Loading system manifest: {:?}", system_path);
    let manifest = SystemManifest::from_file(system_path)?;
    build_system(&manifest)
}

/// Instantiate buses and devices of a validated manifest.
///
/// Nested buses are attached once their parent exists, so manifest order does
/// not matter. Range overlaps and apertures are enforced by the router.
pub fn build_system(manifest: &SystemManifest) -> anyhow::Result<System> {
    let root = manifest
        .root_bus()
        .context("System manifest has no root bus")?;
    let mut system = System::new(&manifest.name, AddressRouter::new(&root.id));

    let mut pending: Vec<&BusConfig> = manifest.buses.iter().filter(|b| b.parent.is_some()).collect();
    while !pending.is_empty() {
        let before = pending.len();
        let mut deferred = Vec::new();
        for bus in pending {
            let parent = bus.parent.as_deref().unwrap_or_default();
            if !system.has_bus(parent) {
                deferred.push(bus);
                continue;
            }
            let range = bus
                .range
                .as_ref()
                .with_context(|| format!("Bus '{}' needs a 'range'", bus.id))?;
            let aperture = AddressRange::new(range.base, parse_size(&range.size)?)
                .with_context(|| format!("Bus '{}' has an invalid range", bus.id))?;
            system
                .attach_bus(parent, AddressRouter::with_aperture(&bus.id, aperture))
                .with_context(|| format!("Failed to attach bus '{}' to '{}'", bus.id, parent))?;
        }
        if deferred.len() == before {
            let ids: Vec<&str> = deferred.iter().map(|b| b.id.as_str()).collect();
            anyhow::bail!("Bus hierarchy is not a tree: cannot place {:?}", ids);
        }
        pending = deferred;
    }

    for mem in &manifest.memories {
        let size = parse_size(&mem.size)?;
        let range = AddressRange::new(mem.base, size)
            .with_context(|| format!("Memory '{}' has an invalid range", mem.id))?;
        system
            .add_device(&mem.bus, &mem.id, range, Box::new(LinearMemory::new(size, mem.latency)))
            .with_context(|| format!("Failed to map memory '{}'", mem.id))?;
    }

    for cfg in &manifest.npus {
        let scratchpad = AddressRange::new(cfg.scratchpad_base, parse_size(&cfg.scratchpad_size)?)
            .with_context(|| format!("NPU '{}' has an invalid scratchpad", cfg.id))?;
        let npu = Npu::new(NpuParams {
            pio_size: cfg.pio_size,
            scratchpad,
            compute_ticks: cfg.compute_ticks,
            status_offset: cfg.status_offset,
            pio_latency: cfg.pio_latency,
            completion: cfg.completion,
        })
        .with_context(|| format!("Failed to create NPU '{}'", cfg.id))?;
        let range = AddressRange::new(cfg.pio_addr, cfg.pio_size)
            .with_context(|| format!("NPU '{}' has an invalid PIO window", cfg.id))?;
        system
            .add_device(&cfg.bus, &cfg.id, range, Box::new(npu))
            .with_context(|| format!("Failed to map NPU '{}'", cfg.id))?;

        // The scratchpad is a plain memory somewhere on the map; a kernel
        // cannot reach it otherwise.
        if let Err(e) = system.router().route(scratchpad.base, scratchpad.size) {
            warn!("NPU '{}': scratchpad {} is not backed by one memory ({})", cfg.id, scratchpad, e);
        }
    }

    for cfg in &manifest.dmas {
        let dma = DmaEngine::new(DmaParams {
            pio_size: cfg.pio_size,
            pio_latency: cfg.pio_latency,
            max_transfer_size: cfg.max_transfer_size,
            burst_latency: cfg.burst_latency,
            completion: cfg.completion,
        })
        .with_context(|| format!("Failed to create DMA '{}'", cfg.id))?;
        let range = AddressRange::new(cfg.pio_addr, cfg.pio_size)
            .with_context(|| format!("DMA '{}' has an invalid PIO window", cfg.id))?;
        system
            .add_device(&cfg.bus, &cfg.id, range, Box::new(dma))
            .with_context(|| format!("Failed to map DMA '{}'", cfg.id))?;
    }

    info!(
        "Built system '{}' with {} devices on {} buses",
        manifest.name,
        system.devices().count(),
        manifest.buses.len()
    );
    Ok(system)
}
