// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use hetersim_config::{HostOp, Scenario, ScenarioLimits};
use hetersim_core::host::HostInitiator;
use hetersim_core::metrics::PerformanceMetrics;
use hetersim_core::peripherals::npu::{ComputeKernel, Npu, ScratchpadView, NPU_STATUS_ERROR};
use hetersim_core::system::builder::build_system_from_path;
use hetersim_core::{AccessWidth, SimResult, StopReason, System};
use std::path::PathBuf;
use std::sync::Arc;

fn configs_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../configs")
}

fn example_system() -> anyhow::Result<System> {
    build_system_from_path(&configs_dir().join("systems/npu_system.yaml"))
}

#[test]
fn test_example_address_map() -> anyhow::Result<()> {
    let system = example_system()?;
    let map: Vec<(String, u64, u64)> = system
        .router()
        .mappings()
        .into_iter()
        .map(|(bus, range, _)| (bus, range.base, range.last()))
        .collect();
    assert_eq!(
        map,
        vec![
            ("acc_bus".to_string(), 0x1002_0000, 0x1002_003F),
            ("acc_bus".to_string(), 0x1002_0040, 0x1002_007F),
            ("acc_bus".to_string(), 0x1002_0080, 0x1002_807F),
            ("membus".to_string(), 0x8000_0000, 0x9FFF_FFFF),
            ("membus".to_string(), 0xA000_0000, 0xFFFF_FFFF),
        ]
    );
    Ok(())
}

#[test]
fn test_npu_demo_scenario() -> anyhow::Result<()> {
    let mut system = example_system()?;
    let metrics = Arc::new(PerformanceMetrics::new());
    system.observers.push(metrics.clone());

    let scenario = Scenario::from_file(configs_dir().join("scenarios/npu_demo.yaml"))?;
    let report = HostInitiator::new(&mut system, scenario.limits.clone()).run(&scenario.steps);

    assert!(report.passed(), "{:?}", report.failures);
    assert_eq!(report.steps_run, scenario.steps.len());
    // Two 1024-byte copies of four bursts each, one compute.
    assert_eq!(metrics.get_events_for("dma"), 8);
    assert_eq!(metrics.get_events_for("npu"), 1);
    assert_eq!(metrics.get_block_bytes(), (2048, 2048));
    assert!(report.end_tick > 1000);
    assert_eq!(metrics.get_end_tick(), system.now());
    Ok(())
}

#[test]
fn test_dma_fault_scenario() -> anyhow::Result<()> {
    let mut system = example_system()?;
    let scenario = Scenario::from_file(configs_dir().join("scenarios/dma_fault.yaml"))?;
    let report = HostInitiator::new(&mut system, scenario.limits.clone()).run(&scenario.steps);
    assert_eq!(report.stop_reason, StopReason::ScriptComplete, "{:?}", report.failures);
    assert_eq!(system.pending_events(), 0);
    Ok(())
}

#[test]
fn test_polling_sees_compute_interval() -> anyhow::Result<()> {
    let mut system = example_system()?;
    let mut host = HostInitiator::new(&mut system, ScenarioLimits::default());

    // CONTROL write costs one PIO latency (100), so the start lands at t=0.
    host.write(0x1002_0040, AccessWidth::Word, 1)?;
    let mut polls = 0;
    while host.read(0x1002_0044, AccessWidth::Word)? != 2 {
        polls += 1;
    }
    // Reads at 100, 200, ..., 900 see Busy; the read at 1000 sees Done.
    assert_eq!(polls, 9);
    assert_eq!(host.now(), 1100);
    Ok(())
}

#[derive(Debug)]
struct SumKernel;

/// Sums the first 256 u32 words of the scratchpad and stores the result
/// right behind them.
impl ComputeKernel for SumKernel {
    fn run(&mut self, spm: &mut ScratchpadView<'_, '_>) -> SimResult<()> {
        let base = spm.window().base;
        let mut buf = vec![0u8; 1024];
        spm.read(base, &mut buf)?;
        let sum: u32 = buf
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .sum();
        spm.write(base + 1024, &sum.to_le_bytes())
    }
}

#[derive(Debug)]
struct RunawayKernel;

impl ComputeKernel for RunawayKernel {
    fn run(&mut self, spm: &mut ScratchpadView<'_, '_>) -> SimResult<()> {
        let end = spm.window().base + spm.window().size;
        spm.write(end - 2, &[0u8; 4])
    }
}

#[test]
fn test_kernel_on_scratchpad_data() -> anyhow::Result<()> {
    let mut system = example_system()?;
    system
        .device_mut::<Npu>("npu")
        .expect("npu model")
        .set_kernel(Box::new(SumKernel));

    let mut steps = Scenario::from_file(configs_dir().join("scenarios/npu_demo.yaml"))?.steps;
    steps.truncate(8);
    let report = HostInitiator::new(&mut system, ScenarioLimits::default()).run(&steps);
    assert!(report.passed(), "{:?}", report.failures);

    let out = system.dump(0x1002_0080 + 1024, 4)?;
    assert_eq!(u32::from_le_bytes([out[0], out[1], out[2], out[3]]), (0..256).sum::<u32>());
    Ok(())
}

#[test]
fn test_kernel_overflow_reports_error() -> anyhow::Result<()> {
    let mut system = example_system()?;
    system
        .device_mut::<Npu>("npu")
        .expect("npu model")
        .set_kernel(Box::new(RunawayKernel));

    let steps = vec![
        HostOp::Write { addr: 0x1002_0040, width: 4, value: 1 },
        HostOp::Drain,
        HostOp::Read {
            addr: 0x1002_0044,
            width: 4,
            expect: Some(2 | NPU_STATUS_ERROR),
            mask: u64::MAX,
        },
    ];
    let report = HostInitiator::new(&mut system, ScenarioLimits::default()).run(&steps);
    assert!(report.passed(), "{:?}", report.failures);
    // The scratchpad's last bytes are untouched.
    assert_eq!(system.dump(0x1002_807E, 2)?, vec![0, 0]);
    Ok(())
}

#[test]
fn test_missing_manifest_is_reported() {
    let err = build_system_from_path(&configs_dir().join("systems/missing.yaml")).unwrap_err();
    assert!(err.to_string().contains("Failed to read system manifest"));
}
