// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

#[cfg(test)]
mod integration_tests {
    use crate::metrics::PerformanceMetrics;
    use crate::peripherals::dma::{DmaEngine, DmaStatusBits, DMA_CONTROL, DMA_DST, DMA_FAULT_ADDR, DMA_LENGTH, DMA_SRC, DMA_STATUS};
    use crate::peripherals::npu::{Npu, NpuStatus};
    use crate::{AccessWidth, EventKind, SimulationError, SimulationObserver, StopReason, System};
    use hetersim_config::SystemManifest;
    use std::sync::{Arc, Mutex};

    const MANIFEST: &str = include_str!("../../../configs/systems/npu_system.yaml");

    const DMA: u64 = 0x1002_0000;
    const NPU: u64 = 0x1002_0040;
    const SPM: u64 = 0x1002_0080;
    const DRAM: u64 = 0xA000_0000;

    fn build() -> System {
        let manifest = SystemManifest::from_yaml(MANIFEST).unwrap();
        System::from_config(&manifest).unwrap()
    }

    fn start_dma(sys: &mut System, src: u64, dst: u64, len: u64) {
        sys.write(DMA + DMA_SRC, AccessWidth::Double, src).unwrap();
        sys.write(DMA + DMA_DST, AccessWidth::Double, dst).unwrap();
        sys.write(DMA + DMA_LENGTH, AccessWidth::Word, len).unwrap();
        sys.write(DMA + DMA_CONTROL, AccessWidth::Word, 1).unwrap();
    }

    #[derive(Debug, Default)]
    struct EventLog(Mutex<Vec<(String, EventKind)>>);

    impl SimulationObserver for EventLog {
        fn on_event(&self, device: &str, kind: EventKind) {
            if let Ok(mut v) = self.0.lock() {
                v.push((device.to_string(), kind));
            }
        }
    }

    #[test]
    fn test_npu_busy_then_done() {
        let mut sys = build();
        sys.write(NPU, AccessWidth::Word, 1).unwrap();

        sys.advance_to(500).unwrap();
        assert_eq!(
            sys.read(NPU + 4, AccessWidth::Word).unwrap().value,
            NpuStatus::Busy as u64
        );

        sys.advance_to(999).unwrap();
        assert_eq!(sys.device::<Npu>("npu").unwrap().status(), NpuStatus::Busy);
        sys.advance_to(1000).unwrap();
        assert_eq!(
            sys.read(NPU + 4, AccessWidth::Word).unwrap().value,
            NpuStatus::Done as u64
        );
    }

    #[test]
    fn test_single_burst_scratchpad_to_dram() {
        let mut sys = build();
        let metrics = Arc::new(PerformanceMetrics::new());
        sys.observers.push(metrics.clone());

        let data: Vec<u8> = (0..=255u8).rev().collect();
        sys.load(SPM, &data).unwrap();
        start_dma(&mut sys, SPM, DRAM, 256);

        assert_eq!(sys.run(None).unwrap(), StopReason::Idle);
        assert_eq!(sys.now(), 100);
        assert_eq!(metrics.get_events_for("dma"), 1);
        assert_eq!(metrics.get_block_bytes(), (256, 256));
        assert_eq!(sys.device::<DmaEngine>("dma").unwrap().bursts_completed(), 1);
        assert_eq!(sys.dump(DRAM, 256).unwrap(), data);
        assert_eq!(
            sys.read(DMA + DMA_STATUS, AccessWidth::Word).unwrap().value,
            DmaStatusBits::DONE.bits() as u64
        );
    }

    #[test]
    fn test_host_access_errors() {
        let mut sys = build();
        assert_eq!(
            sys.read(0x4000_0000, AccessWidth::Word),
            Err(SimulationError::UnmappedAddress { addr: 0x4000_0000 })
        );
        // Last word of the DMA window plus first word of the NPU window.
        assert_eq!(
            sys.read(NPU - 4, AccessWidth::Double),
            Err(SimulationError::StraddlesRegion { addr: NPU - 4, len: 8 })
        );
        assert!(matches!(
            sys.read(NPU + 0x0C, AccessWidth::Word),
            Err(SimulationError::BadOffset { .. })
        ));
    }

    #[test]
    fn test_dma_into_own_window_aborts() {
        let mut sys = build();
        start_dma(&mut sys, DMA, DRAM, 16);
        sys.run(None).unwrap();

        let fault = sys.read(DMA + DMA_FAULT_ADDR, AccessWidth::Double).unwrap().value;
        assert_eq!(fault, DMA);
        let status = sys.read(DMA + DMA_STATUS, AccessWidth::Word).unwrap().value;
        assert_eq!(status, (DmaStatusBits::DONE | DmaStatusBits::ERROR).bits() as u64);
    }

    #[test]
    fn test_dma_into_register_window_aborts() {
        let mut sys = build();
        start_dma(&mut sys, SPM, NPU, 16);
        sys.run(None).unwrap();

        let dma = sys.device::<DmaEngine>("dma").unwrap();
        assert!(dma.status_bits().contains(DmaStatusBits::ERROR));
        assert_eq!(dma.bytes_moved(), 0);
        assert_eq!(sys.pending_events(), 0);
        // The NPU never saw the stray data.
        assert_eq!(sys.device::<Npu>("npu").unwrap().status(), NpuStatus::Idle);
    }

    #[test]
    fn test_dma_moves_whole_registers() {
        let mut sys = build();
        sys.write(NPU + 0x10, AccessWidth::Word, 0xABCD).unwrap();
        start_dma(&mut sys, NPU + 0x10, DRAM, 4);
        sys.run(None).unwrap();

        assert_eq!(
            sys.read(DMA + DMA_STATUS, AccessWidth::Word).unwrap().value,
            DmaStatusBits::DONE.bits() as u64
        );
        assert_eq!(sys.dump(DRAM, 4).unwrap(), 0xABCDu32.to_le_bytes());

        // And back into a read/write register from memory.
        sys.load(DRAM + 0x100, &0x8000_1000u64.to_le_bytes()).unwrap();
        start_dma(&mut sys, DRAM + 0x100, NPU + 0x08, 8);
        sys.run(None).unwrap();
        assert_eq!(
            sys.read(NPU + 0x08, AccessWidth::Double).unwrap().value,
            0x8000_1000
        );
    }

    #[test]
    fn test_dma_cannot_start_npu() {
        let mut sys = build();
        sys.load(DRAM, &1u32.to_le_bytes()).unwrap();
        start_dma(&mut sys, DRAM, NPU, 4);
        sys.run(None).unwrap();

        let fault = sys.read(DMA + DMA_FAULT_ADDR, AccessWidth::Double).unwrap().value;
        assert_eq!(fault, NPU);
        assert_eq!(sys.device::<Npu>("npu").unwrap().status(), NpuStatus::Idle);
        assert_eq!(sys.pending_events(), 0);
    }

    #[test]
    fn test_same_tick_events_in_scheduling_order() {
        let mut sys = build();
        let log = Arc::new(EventLog::default());
        sys.observers.push(log.clone());

        sys.write(NPU, AccessWidth::Word, 1).unwrap();
        sys.advance_to(900).unwrap();
        start_dma(&mut sys, SPM, DRAM, 64);
        sys.run(None).unwrap();

        let events = log.0.lock().unwrap().clone();
        assert_eq!(
            events,
            vec![
                ("npu".to_string(), EventKind::ComputeDone),
                ("dma".to_string(), EventKind::Burst),
            ]
        );
        assert_eq!(sys.now(), 1000);
    }

    #[test]
    fn test_run_respects_tick_limit() {
        let mut sys = build();
        sys.write(NPU, AccessWidth::Word, 1).unwrap();
        assert_eq!(sys.run(Some(999)).unwrap(), StopReason::MaxTicks);
        assert_eq!(sys.now(), 999);
        assert_eq!(sys.pending_events(), 1);
        assert_eq!(sys.run(Some(1000)).unwrap(), StopReason::Idle);
    }

    #[test]
    fn test_reset_withdraws_all_events() {
        let mut sys = build();
        sys.write(NPU, AccessWidth::Word, 1).unwrap();
        start_dma(&mut sys, DRAM, SPM, 1024);
        assert_eq!(sys.pending_events(), 2);

        sys.reset().unwrap();
        assert_eq!(sys.pending_events(), 0);
        assert_eq!(sys.run(None).unwrap(), StopReason::Idle);
        assert_eq!(sys.read(NPU + 4, AccessWidth::Word).unwrap().value, 0);
    }

    #[test]
    fn test_snapshot_covers_every_device() {
        let mut sys = build();
        sys.write(NPU, AccessWidth::Word, 1).unwrap();

        let snap = sys.snapshot();
        assert_eq!(snap.pending_events, 1);
        let names: Vec<&str> = snap.devices.keys().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["dma", "dram_ctrl", "hbm_ctrl", "npu", "spmem"]);
        assert_eq!(snap.devices["npu"]["status"], "Busy");
        assert_eq!(snap.devices["npu"]["pending_completion"], 1000);

        let dma = sys.device_state("dma").unwrap();
        assert_eq!(dma["state"], "Idle");
        assert!(sys.device_state("nope").is_none());
    }
}
