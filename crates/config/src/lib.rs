// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

fn default_pio_size() -> u64 {
    0x40
}

fn default_scratchpad_base() -> u64 {
    0x1002_0080
}

fn default_scratchpad_size() -> String {
    "32KiB".to_string()
}

fn default_compute_ticks() -> u64 {
    1000
}

fn default_status_offset() -> u64 {
    0x04
}

fn default_npu_pio_latency() -> u64 {
    100
}

fn default_dma_pio_latency() -> u64 {
    50
}

fn default_max_transfer_size() -> u64 {
    256
}

fn default_burst_latency() -> u64 {
    100
}

fn default_memory_latency() -> u64 {
    30
}

/// What a completed (Done) device does on the way back to Idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Reading STATUS while Done reports Done once, then resets to Idle.
    /// Starting again before that read is rejected.
    #[default]
    #[serde(alias = "read-clears")]
    ReadClears,
    /// STATUS reads have no side effect; a start while Done re-arms directly.
    #[serde(alias = "re-arm")]
    Rearm,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct MemoryRange {
    pub base: u64,
    pub size: String, // e.g. "32KiB"
}

/// A crossbar. The root bus has no aperture; every other bus names its parent
/// and the aperture it occupies on that parent.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BusConfig {
    pub id: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub range: Option<MemoryRange>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryConfig {
    pub id: String,
    pub bus: String,
    pub base: u64,
    pub size: String,
    /// Fixed access latency in ticks.
    #[serde(default = "default_memory_latency")]
    pub latency: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NpuConfig {
    pub id: String,
    pub bus: String,
    /// Base address of the NPU control block.
    pub pio_addr: u64,
    /// Size of the control register window.
    #[serde(default = "default_pio_size")]
    pub pio_size: u64,
    /// Base address of the scratchpad region visible to the NPU.
    #[serde(default = "default_scratchpad_base")]
    pub scratchpad_base: u64,
    #[serde(default = "default_scratchpad_size")]
    pub scratchpad_size: String,
    /// Nominal compute latency in ticks.
    #[serde(default = "default_compute_ticks")]
    pub compute_ticks: u64,
    /// Offset of the status register.
    #[serde(default = "default_status_offset")]
    pub status_offset: u64,
    #[serde(default = "default_npu_pio_latency")]
    pub pio_latency: u64,
    #[serde(default)]
    pub completion: CompletionPolicy,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DmaConfig {
    pub id: String,
    pub bus: String,
    /// Base address for DMA registers.
    pub pio_addr: u64,
    #[serde(default = "default_pio_size")]
    pub pio_size: u64,
    /// Latency for register accesses.
    #[serde(default = "default_dma_pio_latency")]
    pub pio_latency: u64,
    /// Max bytes per issued DMA burst.
    #[serde(default = "default_max_transfer_size")]
    pub max_transfer_size: u64,
    /// Ticks between consecutive bursts.
    #[serde(default = "default_burst_latency")]
    pub burst_latency: u64,
    #[serde(default)]
    pub completion: CompletionPolicy,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SystemManifest {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub buses: Vec<BusConfig>,
    #[serde(default)]
    pub memories: Vec<MemoryConfig>,
    #[serde(default)]
    pub npus: Vec<NpuConfig>,
    #[serde(default)]
    pub dmas: Vec<DmaConfig>,
}

impl SystemManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read system manifest at {:?}", path))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(yaml).context("Failed to parse System Manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Structural checks that do not need the address map: ids, bus references,
    /// sizes. Range disjointness is enforced when the router is built.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }

        let roots: Vec<&BusConfig> = self.buses.iter().filter(|b| b.parent.is_none()).collect();
        if roots.len() != 1 {
            anyhow::bail!(
                "Exactly one root bus (without 'parent') is required, found {}",
                roots.len()
            );
        }
        if roots[0].range.is_some() {
            anyhow::bail!("Root bus '{}' must not declare a 'range'", roots[0].id);
        }

        let mut ids = HashSet::new();
        let bus_ids: HashSet<&str> = self.buses.iter().map(|b| b.id.as_str()).collect();
        for id in self.device_ids().chain(self.buses.iter().map(|b| b.id.as_str())) {
            if !ids.insert(id) {
                anyhow::bail!("Duplicate id '{}'", id);
            }
        }

        for bus in &self.buses {
            if let Some(parent) = &bus.parent {
                if !bus_ids.contains(parent.as_str()) {
                    anyhow::bail!("Bus '{}' references unknown parent '{}'", bus.id, parent);
                }
                let range = bus
                    .range
                    .as_ref()
                    .with_context(|| format!("Bus '{}' needs a 'range' on its parent", bus.id))?;
                if parse_size(&range.size)? == 0 {
                    anyhow::bail!("Bus '{}' has a zero-sized range", bus.id);
                }
            }
        }

        for (id, bus) in self.device_buses() {
            if !bus_ids.contains(bus) {
                anyhow::bail!("Device '{}' references unknown bus '{}'", id, bus);
            }
        }

        for mem in &self.memories {
            if parse_size(&mem.size)? == 0 {
                anyhow::bail!("Memory '{}' has zero size", mem.id);
            }
        }
        for npu in &self.npus {
            if npu.pio_size == 0 {
                anyhow::bail!("NPU '{}' has a zero-sized PIO window", npu.id);
            }
            if parse_size(&npu.scratchpad_size)? == 0 {
                anyhow::bail!("NPU '{}' has a zero-sized scratchpad", npu.id);
            }
        }
        for dma in &self.dmas {
            if dma.pio_size == 0 {
                anyhow::bail!("DMA '{}' has a zero-sized PIO window", dma.id);
            }
            if dma.max_transfer_size == 0 {
                anyhow::bail!("DMA '{}': 'max_transfer_size' must be greater than zero", dma.id);
            }
        }

        for bus in &self.buses {
            let used = self.device_buses().any(|(_, b)| b == bus.id)
                || self.buses.iter().any(|b| b.parent.as_deref() == Some(&bus.id));
            if !used {
                tracing::warn!("Bus '{}' has nothing attached", bus.id);
            }
        }

        Ok(())
    }

    pub fn root_bus(&self) -> Option<&BusConfig> {
        self.buses.iter().find(|b| b.parent.is_none())
    }

    fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.memories
            .iter()
            .map(|m| m.id.as_str())
            .chain(self.npus.iter().map(|n| n.id.as_str()))
            .chain(self.dmas.iter().map(|d| d.id.as_str()))
    }

    fn device_buses(&self) -> impl Iterator<Item = (&str, &str)> {
        self.memories
            .iter()
            .map(|m| (m.id.as_str(), m.bus.as_str()))
            .chain(self.npus.iter().map(|n| (n.id.as_str(), n.bus.as_str())))
            .chain(self.dmas.iter().map(|d| (d.id.as_str(), d.bus.as_str())))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Every host operation of the scenario ran.
    ScriptComplete,
    /// No scheduled events remain.
    Idle,
    MaxTicks,
    AssertionFailed,
    AccessFault,
}

impl StopReason {
    /// Termination cause string reported at the end of a run.
    pub fn cause(&self) -> &'static str {
        match self {
            StopReason::ScriptComplete => "script complete",
            StopReason::Idle => "event queue empty",
            StopReason::MaxTicks => "simulate() limit reached",
            StopReason::AssertionFailed => "assertion failed",
            StopReason::AccessFault => "access fault",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cause())
    }
}

fn default_width() -> u8 {
    4
}

fn default_mask() -> u64 {
    u64::MAX
}

/// Byte content for `load` and `expect_memory` steps.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Pattern {
    Bytes(Vec<u8>),
    Repeat { byte: u8, len: usize },
    /// `count` little-endian u32 words holding 0, 1, 2, ...
    RampU32 { count: u32 },
}

impl Pattern {
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Pattern::Bytes(b) => b.clone(),
            Pattern::Repeat { byte, len } => vec![*byte; *len],
            Pattern::RampU32 { count } => (0..*count).flat_map(|i| i.to_le_bytes()).collect(),
        }
    }
}

/// One operation of the host initiator standing in for the CPU.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostOp {
    Write {
        addr: u64,
        #[serde(default = "default_width")]
        width: u8,
        value: u64,
    },
    Read {
        addr: u64,
        #[serde(default = "default_width")]
        width: u8,
        #[serde(default)]
        expect: Option<u64>,
        #[serde(default = "default_mask")]
        mask: u64,
    },
    /// Re-read until `(value & mask) == equals`.
    Poll {
        addr: u64,
        #[serde(default = "default_width")]
        width: u8,
        #[serde(default = "default_mask")]
        mask: u64,
        equals: u64,
        #[serde(default)]
        max_polls: Option<u64>,
    },
    Wait {
        ticks: u64,
    },
    Load {
        addr: u64,
        data: Pattern,
    },
    ExpectMemory {
        addr: u64,
        data: Pattern,
    },
    /// Deliver every outstanding event.
    Drain,
}

fn default_max_polls() -> u64 {
    100_000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScenarioLimits {
    #[serde(default)]
    pub max_ticks: Option<u64>,
    #[serde(default = "default_max_polls")]
    pub max_polls: u64,
}

impl Default for ScenarioLimits {
    fn default() -> Self {
        Self {
            max_ticks: None,
            max_polls: default_max_polls(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub schema_version: String,
    #[serde(default)]
    pub name: Option<String>,
    /// System manifest, relative to the scenario file.
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub limits: ScenarioLimits,
    pub steps: Vec<HostOp>,
}

impl Scenario {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to open scenario at {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let scenario: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Scenario YAML")?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != "1.0" {
            anyhow::bail!(
                "Unsupported schema_version '{}'. Supported versions: '1.0'",
                self.schema_version
            );
        }
        if self.limits.max_ticks == Some(0) {
            anyhow::bail!("Limit 'max_ticks' must be greater than zero");
        }
        for (i, step) in self.steps.iter().enumerate() {
            let width = match step {
                HostOp::Write { width, .. }
                | HostOp::Read { width, .. }
                | HostOp::Poll { width, .. } => Some(*width),
                _ => None,
            };
            if let Some(w) = width {
                if !matches!(w, 1 | 2 | 4 | 8) {
                    anyhow::bail!("Step {}: width must be 1, 2, 4 or 8 (got {})", i, w);
                }
            }
        }
        Ok(())
    }
}

/// Byte count from a human size ("32KiB", "512 MiB") or a bare decimal or
/// `0x` hex integer.
pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let trimmed = size_str.trim();
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(&hex.replace('_', ""), 16)
            .map_err(|e| anyhow::anyhow!("Invalid size format '{}': {}", size_str, e));
    }
    if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return trimmed
            .parse::<u64>()
            .map_err(|e| anyhow::anyhow!("Invalid size format '{}': {}", size_str, e));
    }
    let s: Size = trimmed
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format '{}': {}", size_str, e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYSTEM: &str = r#"
name: "mini"
buses:
  - id: membus
  - id: acc_bus
    parent: membus
    range: { base: 0x10020000, size: "64KiB" }
memories:
  - id: spmem
    bus: acc_bus
    base: 0x10020080
    size: "32KiB"
    latency: 10
npus:
  - id: npu
    bus: acc_bus
    pio_addr: 0x10020040
dmas:
  - id: dma
    bus: acc_bus
    pio_addr: 0x10020000
    completion: rearm
"#;

    #[test]
    fn test_manifest_defaults() {
        let m = SystemManifest::from_yaml(SYSTEM).unwrap();
        assert_eq!(m.schema_version, "1.0");
        let npu = &m.npus[0];
        assert_eq!(npu.pio_size, 0x40);
        assert_eq!(npu.scratchpad_base, 0x1002_0080);
        assert_eq!(npu.compute_ticks, 1000);
        assert_eq!(npu.status_offset, 0x04);
        assert_eq!(npu.completion, CompletionPolicy::ReadClears);
        let dma = &m.dmas[0];
        assert_eq!(dma.max_transfer_size, 256);
        assert_eq!(dma.pio_latency, 50);
        assert_eq!(dma.completion, CompletionPolicy::Rearm);
        assert_eq!(m.root_bus().unwrap().id, "membus");
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let yaml = SYSTEM.replace("id: npu", "id: dma");
        let err = SystemManifest::from_yaml(&yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("Duplicate id"));
    }

    #[test]
    fn test_unknown_bus_rejected() {
        let yaml = SYSTEM.replace("bus: acc_bus\n    pio_addr: 0x10020040", "bus: nowhere\n    pio_addr: 0x10020040");
        assert!(SystemManifest::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_zero_burst_size_rejected() {
        let yaml = SYSTEM.replace("completion: rearm", "max_transfer_size: 0");
        assert!(SystemManifest::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_two_roots_rejected() {
        let yaml = SYSTEM.replace("    parent: membus\n", "");
        assert!(SystemManifest::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("32KiB").unwrap(), 32 * 1024);
        assert_eq!(parse_size("512MiB").unwrap(), 512 * 1024 * 1024);
        assert!(parse_size("lots").is_err());
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("0x8000").unwrap(), 0x8000);
        assert_eq!(parse_size("0x1000_0000").unwrap(), 0x1000_0000);
        assert!(parse_size("0xZZ").is_err());
    }

    #[test]
    fn test_scenario_ops() {
        let yaml = r#"
schema_version: "1.0"
steps:
  - op: load
    addr: 0xA0000000
    data: { ramp_u32: { count: 4 } }
  - op: write
    addr: 0x10020040
    value: 1
  - op: poll
    addr: 0x10020044
    mask: 0x2
    equals: 0x2
  - op: wait
    ticks: 10
  - op: drain
"#;
        let s = Scenario::from_yaml(yaml).unwrap();
        assert_eq!(s.steps.len(), 5);
        assert_eq!(s.limits.max_polls, 100_000);
        match &s.steps[1] {
            HostOp::Write { width, value, .. } => {
                assert_eq!(*width, 4);
                assert_eq!(*value, 1);
            }
            other => panic!("unexpected step {:?}", other),
        }
        if let HostOp::Load { data, .. } = &s.steps[0] {
            assert_eq!(data.to_bytes(), vec![0, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]);
        }
    }

    #[test]
    fn test_scenario_bad_width() {
        let yaml = r#"
schema_version: "1.0"
steps:
  - op: read
    addr: 0x0
    width: 3
"#;
        assert!(Scenario::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_stop_reason_cause() {
        assert_eq!(StopReason::ScriptComplete.to_string(), "script complete");
        assert_eq!(StopReason::MaxTicks.cause(), "simulate() limit reached");
    }
}
