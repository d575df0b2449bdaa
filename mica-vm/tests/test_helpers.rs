#![allow(dead_code)]

//! Shared fixtures for the integration tests: a capture-console runtime
//! and hand-assembled program helpers.

use std::cell::RefCell;
use std::rc::Rc;

use mica_vm::irep::{Irep, PoolEntry};
use mica_vm::prelude::*;

pub type Output = Rc<RefCell<Vec<u8>>>;

/// Runtime over a capturing console.
pub fn runtime() -> (Runtime, Output) {
    let (hal, out) = CaptureHal::new();
    let rt = Runtime::new(Box::new(hal), 64 * 1024).expect("runtime");
    (rt, out)
}

/// Runtime whose idle hook drives the given scheduler's clock, so sleep
/// deadlines elapse deterministically in tests.
pub fn runtime_for(sched: &Scheduler) -> (Runtime, Output) {
    let (hal, out) = CaptureHal::new();
    let hal = hal.with_ticker(sched.ticker());
    let rt = Runtime::new(Box::new(hal), 64 * 1024).expect("runtime");
    (rt, out)
}

/// Assemble a compiled unit, interning its symbol names.
pub fn unit(
    rt: &mut Runtime,
    nregs: u16,
    code: Vec<u32>,
    syms: &[&str],
    pools: Vec<PoolEntry>,
    reps: Vec<Rc<Irep>>,
) -> Rc<Irep> {
    Rc::new(Irep {
        nlocals: 0,
        nregs,
        code,
        pools,
        syms: syms.iter().map(|s| rt.intern(s)).collect(),
        reps,
    })
}

/// Code-only unit.
pub fn code_unit(rt: &mut Runtime, nregs: u16, code: Vec<u32>) -> Rc<Irep> {
    unit(rt, nregs, code, &[], vec![], vec![])
}

/// Run one VM to halt outside the scheduler.
pub fn run_to_halt(rt: &mut Runtime, irep: Rc<Irep>) -> Vm {
    // tests run many short programs back to back; once the id bitmap is
    // exhausted, reuse id 1 (nothing here runs concurrently)
    let id = rt.assign_vm_id().unwrap_or(1);
    let mut vm = Vm::new(rt, id, irep);
    let state = vm.run(rt);
    assert!(
        matches!(state, RunState::Halted | RunState::Aborted),
        "program did not halt: {state:?}"
    );
    vm
}

/// Captured console output as a string.
pub fn text(out: &Output) -> String {
    String::from_utf8_lossy(&out.borrow()).into_owned()
}
