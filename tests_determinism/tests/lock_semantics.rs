//! Interrupt Lock Semantics
//!
//! While interrupts are locked, ordinary interrupts neither wake the CPU
//! nor reach an ISR; they stay pending until unlock. Only the timer's
//! wake-up alarm gets through a lock.

use hal::{InterruptHal, IrqOutcome};
use sim_cpu::test_utils::{ScriptedKernel, Task};
use sim_cpu::{CoreEvent, SimConfig};
use tests_determinism::{boot_and_run, single_core, EventLog, TICK_LINE};

fn logging_isr(log: &EventLog) -> impl Fn(&sim_cpu::SimCore<Task>, &ScriptedKernel, core_types::IrqLine) -> IrqOutcome + Send + Sync + 'static {
    let log = log.clone();
    move |cpu, _, _| {
        log.push(format!("isr {}", cpu.time().get_time()));
        IrqOutcome::Done
    }
}

/// Test: a locked halt sleeps through ticks until the wake-up alarm
#[test]
fn test_alarm_wakes_through_lock() {
    let log = EventLog::new();
    let main_log = log.clone();
    let kernel = ScriptedKernel::new()
        .with_tick(100)
        .with_isr(TICK_LINE, logging_isr(&log))
        .with_task(
            "main",
            Task::new(move |ctx| {
                let key = ctx.cpu().irq().lock();
                ctx.cpu().tick().wake_in_time(500);
                ctx.halt();
                main_log.push(format!("woken {}", ctx.now()));
                ctx.cpu().irq().unlock(key);
                main_log.push("unlocked");
                ctx.exit();
            }),
        );
    let sim = single_core(SimConfig::default(), kernel);
    assert_eq!(boot_and_run(&sim), 500);

    assert_eq!(log.entries(), vec!["woken 500", "isr 500", "unlocked"]);
    assert_eq!(
        sim.trace()
            .count_events(|e| matches!(e, CoreEvent::IrqServiced { .. })),
        1
    );
    assert_eq!(
        sim.trace().count_events(|e| matches!(e, CoreEvent::Woken)),
        1
    );
}

/// Test: without an alarm a locked CPU stays halted to the end of time
#[test]
fn test_locked_halt_ignores_ticks() {
    let log = EventLog::new();
    let main_log = log.clone();
    let kernel = ScriptedKernel::new()
        .with_tick(100)
        .with_isr(TICK_LINE, logging_isr(&log))
        .with_task(
            "main",
            Task::new(move |ctx| {
                let _key = ctx.cpu().irq().lock();
                main_log.push("halting");
                ctx.halt();
                main_log.push("woken");
            }),
        );
    let sim = single_core(SimConfig::default().with_end_of_time(1_000), kernel);
    assert_eq!(boot_and_run(&sim), 1_000);

    assert_eq!(log.entries(), vec!["halting"]);
    assert!(sim.cores()[0].irq().is_pending(TICK_LINE));
    assert!(!sim
        .trace()
        .has_event(|e| matches!(e, CoreEvent::IrqServiced { .. } | CoreEvent::Woken)));
}
