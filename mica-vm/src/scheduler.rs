//! Cooperative multi-VM scheduler.
//!
//! Several VMs share one physical thread. The scheduler owns the VMs and
//! rotates among the ready ones by priority (lower value runs first) with
//! round-robin on ties. Time comes from [`Ticker::tick`], designed to be
//! driven from a periodic timer interrupt: it touches nothing but
//! word-sized atomics — the tick counter, per-slot states and wake
//! deadlines, and the preemption flag that cuts the running VM's quantum
//! at its next instruction boundary.
//!
//! A context switch happens only between instructions, and only at a
//! yielding built-in, a halt, or the preemption check at the top of the
//! dispatch loop.

use alloc::rc::Rc;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::consts::MAX_VM_COUNT;
use crate::error::{ErrorCode, VmError};
use crate::irep::Irep;
use crate::runtime::Runtime;
use crate::vm::{RunState, Vm};

const STATE_VACANT: u8 = 0;
const STATE_READY: u8 = 1;
const STATE_RUNNING: u8 = 2;
const STATE_WAITING: u8 = 3;

/// Per-slot scheduling words, shared with the interrupt handler.
#[derive(Debug)]
struct TaskControl {
    state: AtomicU8,
    priority: AtomicU8,
    wake_at: AtomicU32,
    preempt: AtomicBool,
}

impl TaskControl {
    fn vacant() -> Self {
        Self {
            state: AtomicU8::new(STATE_VACANT),
            priority: AtomicU8::new(0),
            wake_at: AtomicU32::new(0),
            preempt: AtomicBool::new(false),
        }
    }
}

/// The ISR-facing clock and slot table.
///
/// Clone the [`Arc`] out of [`Scheduler::ticker`] and call [`Ticker::tick`]
/// from the host's periodic timer. Every operation is lock-free and
/// signal-safe.
#[derive(Debug)]
pub struct Ticker {
    now: AtomicU32,
    slots: [TaskControl; MAX_VM_COUNT],
}

impl Ticker {
    fn new() -> Self {
        Self {
            now: AtomicU32::new(0),
            slots: core::array::from_fn(|_| TaskControl::vacant()),
        }
    }

    /// Current tick count.
    pub fn now(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }

    /// Advance one scheduling unit: promote waiters whose deadline
    /// elapsed and cut the running VM's quantum.
    pub fn tick(&self) {
        let t = self.now.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        for slot in &self.slots {
            match slot.state.load(Ordering::Relaxed) {
                STATE_WAITING => {
                    let wake = slot.wake_at.load(Ordering::Relaxed);
                    if t.wrapping_sub(wake) < u32::MAX / 2 {
                        let _ = slot.state.compare_exchange(
                            STATE_WAITING,
                            STATE_READY,
                            Ordering::Relaxed,
                            Ordering::Relaxed,
                        );
                    }
                }
                STATE_RUNNING => slot.preempt.store(true, Ordering::Relaxed),
                _ => {}
            }
        }
    }

    pub(crate) fn take_preempt(&self, slot: usize) -> bool {
        self.slots[slot].preempt.swap(false, Ordering::Relaxed)
    }

    fn promote_waiters(&self) {
        let t = self.now();
        for slot in &self.slots {
            if slot.state.load(Ordering::Relaxed) == STATE_WAITING {
                let wake = slot.wake_at.load(Ordering::Relaxed);
                if t.wrapping_sub(wake) < u32::MAX / 2 {
                    let _ = slot.state.compare_exchange(
                        STATE_WAITING,
                        STATE_READY,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    );
                }
            }
        }
    }
}

#[derive(Debug)]
struct Task {
    vm: Vm,
}

/// Owner of the VMs and the dispatch rotation.
#[derive(Debug)]
pub struct Scheduler {
    ticker: Arc<Ticker>,
    tasks: Vec<Option<Task>>,
    cursor: usize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Empty scheduler.
    pub fn new() -> Self {
        Self {
            ticker: Arc::new(Ticker::new()),
            tasks: (0..MAX_VM_COUNT).map(|_| None).collect(),
            cursor: 0,
        }
    }

    /// The shared clock handle for the host's timer interrupt.
    pub fn ticker(&self) -> Arc<Ticker> {
        self.ticker.clone()
    }

    /// Number of live tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_some()).count()
    }

    /// Load a bytecode container and register a VM for it.
    ///
    /// Lower `priority` values run first. Returns the VM id.
    pub fn create_task(
        &mut self,
        rt: &mut Runtime,
        blob: &[u8],
        priority: u8,
    ) -> Result<u8, VmError> {
        let irep = rt.load(blob)?;
        self.create_task_irep(rt, irep, priority)
    }

    /// Register a VM for an already-loaded IREP tree.
    pub fn create_task_irep(
        &mut self,
        rt: &mut Runtime,
        irep: Rc<Irep>,
        priority: u8,
    ) -> Result<u8, VmError> {
        let Some(slot) = self.tasks.iter().position(Option::is_none) else {
            return Err(VmError::TooManyVms);
        };
        let Some(id) = rt.assign_vm_id() else {
            return Err(VmError::TooManyVms);
        };
        let mut vm = Vm::new(rt, id, irep);
        vm.attach_ticker(self.ticker.clone(), slot);
        let control = &self.ticker.slots[slot];
        control.priority.store(priority, Ordering::Relaxed);
        control.wake_at.store(0, Ordering::Relaxed);
        control.preempt.store(false, Ordering::Relaxed);
        control.state.store(STATE_READY, Ordering::Relaxed);
        self.tasks[slot] = Some(Task { vm });
        tracing::debug!(vm = id, slot, priority, "task created");
        Ok(id)
    }

    fn pick(&mut self) -> Option<usize> {
        let n = self.tasks.len();
        let mut best: Option<(usize, u8)> = None;
        for k in 1..=n {
            let idx = (self.cursor + k) % n;
            let control = &self.ticker.slots[idx];
            if control.state.load(Ordering::Relaxed) != STATE_READY {
                continue;
            }
            let prio = control.priority.load(Ordering::Relaxed);
            if best.map(|(_, p)| prio < p).unwrap_or(true) {
                best = Some((idx, prio));
            }
        }
        let (idx, _) = best?;
        self.cursor = idx;
        Some(idx)
    }

    /// Dispatch until every task has halted.
    ///
    /// Returns the error word of the last VM that failed, or the normal
    /// halt word. When nothing is ready the host's `idle_cpu` hook runs;
    /// the timer interrupt (or the hook itself, in tests) must advance the
    /// ticker or sleepers will never wake.
    pub fn run(&mut self, rt: &mut Runtime) -> ErrorCode {
        let mut code = ErrorCode::OK;
        loop {
            self.ticker.promote_waiters();
            let Some(slot) = self.pick() else {
                if self.task_count() == 0 {
                    break;
                }
                rt.console.hal_mut().idle_cpu();
                continue;
            };
            let control = &self.ticker.slots[slot];
            control.preempt.store(false, Ordering::Relaxed);
            control.state.store(STATE_RUNNING, Ordering::Relaxed);
            let task = self.tasks[slot].as_mut().expect("picked slot is occupied");
            let state = task.vm.run(rt);
            tracing::trace!(vm = task.vm.id(), ?state, "quantum ended");
            match state {
                RunState::Preempted => control.state.store(STATE_READY, Ordering::Relaxed),
                RunState::Sleeping(0) => control.state.store(STATE_READY, Ordering::Relaxed),
                RunState::Sleeping(ticks) => {
                    let wake = self.ticker.now().wrapping_add(ticks);
                    control.wake_at.store(wake, Ordering::Relaxed);
                    control.state.store(STATE_WAITING, Ordering::Relaxed);
                }
                RunState::Halted | RunState::Aborted => {
                    let mut task = self.tasks[slot].take().expect("picked slot is occupied");
                    if !task.vm.error_code().is_ok() {
                        code = task.vm.error_code();
                        tracing::warn!(vm = task.vm.id(), %code, "vm reaped with error");
                    }
                    task.vm.close(rt, state == RunState::Halted);
                    rt.release_vm(task.vm.id());
                    self.ticker.slots[slot]
                        .state
                        .store(STATE_VACANT, Ordering::Relaxed);
                }
            }
        }
        code
    }
}
