//! Virtual Time Monotonicity
//!
//! Whatever the mix of cores and tick periods, virtual time never moves
//! backwards and no tick is ever skipped or delivered late.

use hal::IrqOutcome;
use parking_lot::Mutex;
use proptest::prelude::*;
use sim_cpu::test_utils::{ScriptedKernel, Task};
use sim_cpu::{KernelRef, SimConfig, Simulator};
use std::sync::Arc;
use tests_determinism::{init_logging, TICK_LINE};

const END_OF_TIME: u64 = 5_000;

/// Runs idle cores ticking at `periods`, returning (time, core) per ISR
fn run_ticking_cores(periods: &[u64]) -> (Vec<(u64, usize)>, Simulator<Task>) {
    init_logging();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let isr_log = Arc::clone(&seen);
    let periods = periods.to_vec();
    let config = SimConfig::default()
        .with_core_count(periods.len())
        .with_end_of_time(END_OF_TIME);
    let sim = Simulator::new(config, move |id| {
        let isr_log = Arc::clone(&isr_log);
        let kernel: KernelRef<Task> = Arc::new(ScriptedKernel::new().with_tick(periods[id.0]).with_isr(
            TICK_LINE,
            move |cpu, _, _| {
                isr_log.lock().push((cpu.time().get_time(), cpu.id().0));
                IrqOutcome::Done
            },
        ));
        kernel
    })
    .unwrap();
    sim.boot_all().unwrap();
    assert_eq!(sim.run(), Ok(END_OF_TIME));
    let seen = seen.lock().clone();
    (seen, sim)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_ticks_arrive_in_time_order(periods in prop::collection::vec(50u64..=1_000, 1..=4)) {
        let (seen, sim) = run_ticking_cores(&periods);

        // Globally non-decreasing
        prop_assert!(seen.windows(2).all(|pair| pair[0].0 <= pair[1].0));
        let records = sim.trace().records();
        prop_assert!(records.windows(2).all(|pair| pair[0].time <= pair[1].time));

        // Per core: every multiple of the period, none skipped
        for (core, period) in periods.iter().enumerate() {
            let times: Vec<u64> = seen
                .iter()
                .filter(|(_, id)| *id == core)
                .map(|(time, _)| *time)
                .collect();
            let expected: Vec<u64> = (1..=END_OF_TIME / period).map(|k| k * period).collect();
            prop_assert_eq!(times, expected);
        }
    }
}

/// Test: cores ticking at the same instant are serviced in core order
#[test]
fn test_simultaneous_ticks_follow_core_order() {
    let (seen, _) = run_ticking_cores(&[250, 250, 250]);
    for chunk in seen.chunks(3) {
        let cores: Vec<usize> = chunk.iter().map(|(_, core)| *core).collect();
        assert_eq!(cores, vec![0, 1, 2]);
        assert!(chunk.iter().all(|(time, _)| *time == chunk[0].0));
    }
    assert_eq!(seen.len(), 3 * (END_OF_TIME / 250) as usize);
}
