// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Host initiator: replays a scenario of register and memory operations
//! against a [`System`] in place of a CPU.
//!
//! The host has its own notion of time. Before every access the system is
//! advanced to the host's time, and the target's access latency is added to
//! it afterwards, so polling loops observe devices at realistic instants.

use crate::system::System;
use crate::{AccessWidth, SimResult, SimulationError, StopReason, Tick};
use hetersim_config::{HostOp, ScenarioLimits};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct HostReport {
    pub stop_reason: StopReason,
    pub end_tick: Tick,
    pub steps_run: usize,
    pub failures: Vec<String>,
}

impl HostReport {
    pub fn passed(&self) -> bool {
        self.stop_reason == StopReason::ScriptComplete && self.failures.is_empty()
    }
}

enum StepError {
    Fault(SimulationError),
    Assertion(String),
    Limit,
}

impl From<SimulationError> for StepError {
    fn from(e: SimulationError) -> Self {
        StepError::Fault(e)
    }
}

pub struct HostInitiator<'s> {
    system: &'s mut System,
    now: Tick,
    limits: ScenarioLimits,
    failures: Vec<String>,
}

impl<'s> HostInitiator<'s> {
    pub fn new(system: &'s mut System, limits: ScenarioLimits) -> Self {
        let now = system.now();
        Self {
            system,
            now,
            limits,
            failures: Vec::new(),
        }
    }

    pub fn now(&self) -> Tick {
        self.now
    }

    pub fn system(&mut self) -> &mut System {
        &mut *self.system
    }

    fn width(addr: u64, bytes: u8) -> SimResult<AccessWidth> {
        AccessWidth::from_bytes(bytes).ok_or(SimulationError::BadOffset {
            offset: addr,
            width: bytes as u64,
        })
    }

    fn check_limit(&self) -> Result<(), StepError> {
        match self.limits.max_ticks {
            Some(max) if self.now > max => Err(StepError::Limit),
            _ => Ok(()),
        }
    }

    pub fn read(&mut self, addr: u64, width: AccessWidth) -> SimResult<u64> {
        self.system.advance_to(self.now)?;
        let access = self.system.read(addr, width)?;
        self.now += access.latency;
        debug!("Host: read {:#x} -> {:#x} (now {})", addr, access.value, self.now);
        Ok(access.value)
    }

    pub fn write(&mut self, addr: u64, width: AccessWidth, value: u64) -> SimResult<()> {
        self.system.advance_to(self.now)?;
        let access = self.system.write(addr, width, value)?;
        self.now += access.latency;
        debug!("Host: write {:#x} <- {:#x} (now {})", addr, value, self.now);
        Ok(())
    }

    pub fn wait(&mut self, ticks: Tick) -> SimResult<()> {
        self.now = self.now.saturating_add(ticks);
        self.system.advance_to(self.now)?;
        Ok(())
    }

    pub fn load(&mut self, addr: u64, data: &[u8]) -> SimResult<()> {
        self.system.advance_to(self.now)?;
        self.now += self.system.load(addr, data)?;
        Ok(())
    }

    pub fn dump(&mut self, addr: u64, len: usize) -> SimResult<Vec<u8>> {
        self.system.advance_to(self.now)?;
        self.system.dump(addr, len)
    }

    /// Deliver every outstanding event, bounded by the tick limit.
    pub fn drain(&mut self) -> SimResult<StopReason> {
        self.system.advance_to(self.now)?;
        let reason = self.system.run(self.limits.max_ticks)?;
        self.now = self.now.max(self.system.now());
        Ok(reason)
    }

    fn exec(&mut self, index: usize, op: &HostOp) -> Result<(), StepError> {
        match op {
            HostOp::Write { addr, width, value } => {
                let width = Self::width(*addr, *width)?;
                self.write(*addr, width, *value)?;
            }
            HostOp::Read {
                addr,
                width,
                expect,
                mask,
            } => {
                let value = self.read(*addr, Self::width(*addr, *width)?)?;
                if let Some(expected) = expect {
                    if value & mask != expected & mask {
                        let msg = format!(
                            "step {}: read {:#x} returned {:#x}, expected {:#x} (mask {:#x})",
                            index, addr, value, expected, mask
                        );
                        warn!("{}", msg);
                        self.failures.push(msg);
                    }
                }
            }
            HostOp::Poll {
                addr,
                width,
                mask,
                equals,
                max_polls,
            } => {
                let width = Self::width(*addr, *width)?;
                let limit = max_polls.unwrap_or(self.limits.max_polls);
                let mut polls = 0;
                loop {
                    self.check_limit()?;
                    let value = self.read(*addr, width)?;
                    polls += 1;
                    if value & mask == *equals {
                        debug!("Host: poll {:#x} satisfied after {} reads", addr, polls);
                        break;
                    }
                    if polls >= limit {
                        return Err(StepError::Assertion(format!(
                            "step {}: {:#x} & {:#x} never became {:#x} in {} polls (last {:#x})",
                            index, addr, mask, equals, polls, value
                        )));
                    }
                }
            }
            HostOp::Wait { ticks } => self.wait(*ticks)?,
            HostOp::Load { addr, data } => self.load(*addr, &data.to_bytes())?,
            HostOp::ExpectMemory { addr, data } => {
                let expected = data.to_bytes();
                let actual = self.dump(*addr, expected.len())?;
                if let Some(pos) = actual.iter().zip(&expected).position(|(a, e)| a != e) {
                    let msg = format!(
                        "step {}: memory at {:#x} is {:#04x}, expected {:#04x}",
                        index,
                        *addr + pos as u64,
                        actual[pos],
                        expected[pos]
                    );
                    warn!("{}", msg);
                    self.failures.push(msg);
                }
            }
            HostOp::Drain => {
                if self.drain()? == StopReason::MaxTicks {
                    return Err(StepError::Limit);
                }
            }
        }
        self.check_limit()
    }

    /// Execute `steps` in order. Access faults and tick-limit hits end the
    /// run; failed expectations are recorded and the run continues.
    pub fn run(&mut self, steps: &[HostOp]) -> HostReport {
        self.system.notify_start();
        let mut stop_reason = None;
        let mut steps_run = 0;

        for (index, op) in steps.iter().enumerate() {
            match self.exec(index, op) {
                Ok(()) => steps_run += 1,
                Err(StepError::Fault(e)) => {
                    let msg = format!("step {}: {}", index, e);
                    warn!("Host: {}", msg);
                    self.failures.push(msg);
                    stop_reason = Some(StopReason::AccessFault);
                    break;
                }
                Err(StepError::Assertion(msg)) => {
                    warn!("Host: {}", msg);
                    self.failures.push(msg);
                    stop_reason = Some(StopReason::AssertionFailed);
                    break;
                }
                Err(StepError::Limit) => {
                    stop_reason = Some(StopReason::MaxTicks);
                    break;
                }
            }
        }

        let stop_reason = match stop_reason {
            Some(reason) => reason,
            None => match self.system.advance_to(self.now) {
                Err(e) => {
                    self.failures.push(e.to_string());
                    StopReason::AccessFault
                }
                Ok(_) if !self.failures.is_empty() => StopReason::AssertionFailed,
                Ok(_) => StopReason::ScriptComplete,
            },
        };

        self.system.notify_stop();
        info!(
            "Host: {} of {} steps, stopped at tick {} ({})",
            steps_run,
            steps.len(),
            self.now,
            stop_reason
        );
        HostReport {
            stop_reason,
            end_tick: self.now.max(self.system.now()),
            steps_run,
            failures: self.failures.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{AddressRange, AddressRouter};
    use crate::memory::LinearMemory;
    use hetersim_config::Pattern;

    fn system() -> System {
        let mut sys = System::new("host", AddressRouter::new("membus"));
        sys.add_device(
            "membus",
            "dram",
            AddressRange::new(0xA000_0000, 0x1_0000).unwrap(),
            Box::new(LinearMemory::new(0x1_0000, 60)),
        )
        .unwrap();
        sys
    }

    #[test]
    fn test_latency_advances_host_time() {
        let mut sys = system();
        let mut host = HostInitiator::new(&mut sys, ScenarioLimits::default());
        host.write(0xA000_0000, AccessWidth::Word, 7).unwrap();
        assert_eq!(host.now(), 60);
        assert_eq!(host.read(0xA000_0000, AccessWidth::Word).unwrap(), 7);
        assert_eq!(host.now(), 120);
    }

    #[test]
    fn test_expect_mismatch_is_recorded_and_run_continues() {
        let mut sys = system();
        let steps = vec![
            HostOp::Write { addr: 0xA000_0000, width: 4, value: 1 },
            HostOp::Read { addr: 0xA000_0000, width: 4, expect: Some(2), mask: u64::MAX },
            HostOp::Write { addr: 0xA000_0004, width: 4, value: 3 },
        ];
        let report = HostInitiator::new(&mut sys, ScenarioLimits::default()).run(&steps);
        assert_eq!(report.stop_reason, StopReason::AssertionFailed);
        assert_eq!(report.steps_run, 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(sys.dump(0xA000_0004, 1).unwrap(), vec![3]);
    }

    #[test]
    fn test_unmapped_access_stops_the_run() {
        let mut sys = system();
        let steps = vec![
            HostOp::Read { addr: 0x4000_0000, width: 4, expect: None, mask: u64::MAX },
            HostOp::Wait { ticks: 10 },
        ];
        let report = HostInitiator::new(&mut sys, ScenarioLimits::default()).run(&steps);
        assert_eq!(report.stop_reason, StopReason::AccessFault);
        assert_eq!(report.steps_run, 0);
        assert!(report.failures[0].contains("Unmapped"));
    }

    #[test]
    fn test_load_and_expect_memory() {
        let mut sys = system();
        let steps = vec![
            HostOp::Load { addr: 0xA000_0100, data: Pattern::RampU32 { count: 4 } },
            HostOp::ExpectMemory {
                addr: 0xA000_0104,
                data: Pattern::Bytes(vec![1, 0, 0, 0, 2]),
            },
        ];
        let report = HostInitiator::new(&mut sys, ScenarioLimits::default()).run(&steps);
        assert!(report.passed(), "{:?}", report.failures);
    }

    #[test]
    fn test_poll_gives_up() {
        let mut sys = system();
        let steps = vec![HostOp::Poll {
            addr: 0xA000_0000,
            width: 4,
            mask: 1,
            equals: 1,
            max_polls: Some(5),
        }];
        let report = HostInitiator::new(&mut sys, ScenarioLimits::default()).run(&steps);
        assert_eq!(report.stop_reason, StopReason::AssertionFailed);
        assert_eq!(report.end_tick, 5 * 60);
    }

    #[test]
    fn test_tick_limit() {
        let mut sys = system();
        let limits = ScenarioLimits {
            max_ticks: Some(1000),
            ..ScenarioLimits::default()
        };
        let steps = vec![HostOp::Wait { ticks: 2000 }, HostOp::Wait { ticks: 1 }];
        let report = HostInitiator::new(&mut sys, limits).run(&steps);
        assert_eq!(report.stop_reason, StopReason::MaxTicks);
        assert_eq!(report.steps_run, 0);
    }
}
