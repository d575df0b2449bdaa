//! Cooperative scheduling: sleep interleaving, fairness, priorities and
//! teardown accounting.

mod test_helpers;

use mica_asm::ops;
use mica_vm::irep::PoolEntry;
use mica_vm::prelude::*;

use test_helpers::*;

/// `count.times { sleep 1; puts letter }`
fn sleeper(rt: &mut Runtime, letter: &str, count: i32) -> std::rc::Rc<Irep> {
    looper(rt, letter, count, 1)
}

/// `count.times { sleep secs; puts letter }`; `secs == 0` is a plain yield.
fn looper(rt: &mut Runtime, letter: &str, count: i32, secs: i32) -> std::rc::Rc<Irep> {
    unit(
        rt,
        8,
        vec![
            ops::loadi(1, count),
            // loop: while r1 > 0
            ops::move_(2, 1),
            ops::loadi(3, 0),
            ops::gt(2),
            ops::jmpnot(2, 9),
            ops::loadself(4),
            ops::loadi(5, secs),
            ops::send(4, 0, 1), // sleep
            ops::loadself(4),
            ops::string(5, 0),
            ops::send(4, 1, 1), // puts
            ops::subi(1, 1),
            ops::jmp(-11),
            ops::stop(),
        ],
        &["sleep", "puts"],
        vec![PoolEntry::Str(letter.as_bytes().to_vec())],
        vec![],
    )
}

fn lines(out: &Output) -> Vec<String> {
    text(out).lines().map(str::to_string).collect()
}

#[test]
fn two_sleepers_interleave_one_emission_per_tick_window() {
    let mut sched = Scheduler::new();
    let (mut rt, out) = runtime_for(&sched);
    let a = sleeper(&mut rt, "a", 5);
    let b = sleeper(&mut rt, "b", 5);
    sched.create_task_irep(&mut rt, a, 0).unwrap();
    sched.create_task_irep(&mut rt, b, 0).unwrap();
    let code = sched.run(&mut rt);
    assert!(code.is_ok());

    let printed = lines(&out);
    assert_eq!(printed.len(), 10);
    assert_eq!(printed.iter().filter(|l| *l == "a").count(), 5);
    assert_eq!(printed.iter().filter(|l| *l == "b").count(), 5);
    // never two consecutive emissions from the same VM
    for pair in printed.windows(2) {
        assert_ne!(pair[0], pair[1], "output was {printed:?}");
    }
}

#[test]
fn equal_priority_yielders_share_quanta_fairly() {
    let mut sched = Scheduler::new();
    let (mut rt, out) = runtime_for(&sched);
    let a = looper(&mut rt, "a", 6, 0);
    let b = looper(&mut rt, "b", 6, 0);
    sched.create_task_irep(&mut rt, a, 3).unwrap();
    sched.create_task_irep(&mut rt, b, 3).unwrap();
    sched.run(&mut rt);

    let printed = lines(&out);
    assert_eq!(printed.len(), 12);
    // over any window of n quanta each vm received at least n/2 - 1
    for window in printed.windows(4) {
        let a_count = window.iter().filter(|l| *l == "a").count();
        assert!((1..=3).contains(&a_count), "unfair window {window:?}");
    }
}

#[test]
fn lower_priority_value_runs_first() {
    let mut sched = Scheduler::new();
    let (mut rt, out) = runtime_for(&sched);
    let bg = looper(&mut rt, "b", 3, 0);
    let fg = looper(&mut rt, "f", 3, 0);
    sched.create_task_irep(&mut rt, bg, 7).unwrap();
    sched.create_task_irep(&mut rt, fg, 0).unwrap();
    sched.run(&mut rt);
    // the foreground task finishes before the background one starts
    assert_eq!(text(&out), "f\nf\nf\nb\nb\nb\n");
}

#[test]
fn halted_tasks_leave_no_pool_usage_behind() {
    let mut sched = Scheduler::new();
    let (mut rt, out) = runtime_for(&sched);
    let before = rt.statistics().used;
    let prog = unit(
        &mut rt,
        6,
        vec![
            ops::loadi(2, 1),
            ops::loadi(3, 2),
            ops::loadi(4, 3),
            ops::array(1, 2, 3),
            ops::loadself(4),
            ops::string(5, 0),
            ops::send(4, 0, 1),
            ops::stop(),
        ],
        &["puts"],
        vec![PoolEntry::Str(b"done".to_vec())],
        vec![],
    );
    sched.create_task_irep(&mut rt, prog, 0).unwrap();
    let code = sched.run(&mut rt);
    assert!(code.is_ok());
    assert_eq!(text(&out), "done\n");
    assert_eq!(rt.statistics().used, before);
    assert_eq!(rt.heap.live_count(), 0);
    assert_eq!(sched.task_count(), 0);
}

#[test]
fn aborted_tasks_are_reclaimed_by_the_owner_sweep() {
    let mut sched = Scheduler::new();
    let (mut rt, _) = runtime_for(&sched);
    let before = rt.statistics().used;
    // build an array, then abort without releasing registers
    let prog = code_unit(
        &mut rt,
        6,
        vec![
            ops::loadi(2, 1),
            ops::loadi(3, 2),
            ops::array(1, 2, 2),
            ops::abort(),
        ],
    );
    sched.create_task_irep(&mut rt, prog, 0).unwrap();
    sched.run(&mut rt);
    assert_eq!(rt.statistics().used, before);
    assert_eq!(rt.heap.live_count(), 0);
}

#[test]
fn a_failing_vm_is_reaped_and_its_code_surfaces() {
    let mut sched = Scheduler::new();
    let (mut rt, out) = runtime_for(&sched);
    let bad = code_unit(&mut rt, 3, vec![0x7f]);
    let good = sleeper(&mut rt, "a", 2);
    sched.create_task_irep(&mut rt, bad, 0).unwrap();
    sched.create_task_irep(&mut rt, good, 0).unwrap();
    let code = sched.run(&mut rt);
    assert_eq!(code, ErrorCode::from(RuntimeErrorKind::BytecodeFormat));
    // the healthy task still ran to completion
    assert_eq!(lines(&out), ["a", "a"]);
}

#[test]
fn task_slots_are_bounded_and_recycled() {
    let mut sched = Scheduler::new();
    let (mut rt, _) = runtime_for(&sched);
    let mut made = 0;
    loop {
        let prog = code_unit(&mut rt, 2, vec![ops::stop()]);
        match sched.create_task_irep(&mut rt, prog, 0) {
            Ok(_) => made += 1,
            Err(VmError::TooManyVms) => break,
            Err(e) => panic!("unexpected error {e}"),
        }
    }
    assert_eq!(made, mica_vm::consts::MAX_VM_COUNT);
    sched.run(&mut rt);
    assert_eq!(sched.task_count(), 0);
    let prog = code_unit(&mut rt, 2, vec![ops::stop()]);
    assert!(sched.create_task_irep(&mut rt, prog, 0).is_ok());
}
