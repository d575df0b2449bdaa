//! [`Vm`] implementation: per-VM state and the dispatch loop.
//!
//! A VM executes over a private window into its fixed register file.
//! Register 0 of the active window is `self`. Calls push [`CallInfo`]
//! records; returns pop them. Dispatch is atomic from the language's
//! perspective: preemption is observed only between instructions, at the
//! top of the loop.

use alloc::format;
use alloc::rc::Rc;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use mica_asm::Instruction;

use crate::class::ClassId;
use crate::consts::MAX_REGS_SIZE;
use crate::error::{ErrorCode, RuntimeErrorKind};
use crate::irep::Irep;
use crate::runtime::Runtime;
use crate::scheduler::Ticker;
use crate::symbol::SymId;
use crate::value::Value;

mod arith;
mod calls;
mod exec;

/// What pushed a call frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    /// Ordinary method entry.
    Method,
    /// Send half of a block invocation; its saved window base is what the
    /// upvar walk reads.
    BlockSend,
    /// Entry half of a block invocation; a normal return pops the pair.
    ProcEntry,
    /// Class body execution.
    ClassExec,
}

/// Saved frame enabling return from a call.
#[derive(Debug, Clone)]
pub(crate) struct CallInfo {
    pub(crate) current_regs: usize,
    pub(crate) pc_irep: Rc<Irep>,
    pub(crate) pc: usize,
    pub(crate) mid: SymId,
    pub(crate) n_args: usize,
    pub(crate) target_class: ClassId,
    pub(crate) kind: FrameKind,
}

/// Why the dispatch loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// The ticker cut the quantum; the VM is still runnable.
    Preempted,
    /// The VM yielded for this many ticks (zero: plain yield).
    Sleeping(u32),
    /// The VM halted; its [`Vm::error_code`] distinguishes STOP from a
    /// fatal failure.
    Halted,
    /// The VM halted without releasing its registers.
    Aborted,
}

pub(crate) enum Step {
    Next,
    Stop,
    Abort,
}

/// One virtual machine.
#[derive(Debug)]
pub struct Vm {
    id: u8,
    pc_irep: Rc<Irep>,
    pc: usize,
    regs: Vec<Value>,
    current_regs: usize,
    callinfo: Vec<CallInfo>,
    target_class: ClassId,
    error_code: ErrorCode,
    last_error: Option<RuntimeErrorKind>,
    sleep_request: Option<u32>,
    regs_released: bool,
    ticker: Option<(Arc<Ticker>, usize)>,
}

impl Vm {
    /// Bind a VM to a top-level compiled unit.
    ///
    /// `id` should come from [`Runtime::assign_vm_id`]; register 0 holds
    /// the top-level `self` (nil).
    pub fn new(rt: &Runtime, id: u8, irep: Rc<Irep>) -> Self {
        let mut regs = vec![Value::Empty; MAX_REGS_SIZE];
        regs[0] = Value::Nil;
        Self {
            id,
            pc_irep: irep,
            pc: 0,
            regs,
            current_regs: 0,
            callinfo: Vec::new(),
            target_class: rt.wk.object,
            error_code: ErrorCode::OK,
            last_error: None,
            sleep_request: None,
            regs_released: false,
            ticker: None,
        }
    }

    /// This VM's id.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Error word; non-zero after a fatal failure.
    pub fn error_code(&self) -> ErrorCode {
        self.error_code
    }

    /// Most recent diagnosed (non-fatal) failure, if any.
    pub fn last_error(&self) -> Option<RuntimeErrorKind> {
        self.last_error
    }

    /// Read a register of the active window, by copy.
    pub fn register(&self, r: usize) -> Value {
        self.get(r)
    }

    pub(crate) fn attach_ticker(&mut self, ticker: Arc<Ticker>, slot: usize) {
        self.ticker = Some((ticker, slot));
    }

    /// Ask the scheduler to park this VM for `ticks` (callable from
    /// built-ins; takes effect at the next instruction boundary).
    pub fn request_sleep(&mut self, ticks: u32) {
        self.sleep_request = Some(ticks);
    }

    /// Run until preemption, yield or halt.
    pub fn run(&mut self, rt: &mut Runtime) -> RunState {
        loop {
            if self.preempted() {
                return RunState::Preempted;
            }
            if !self.error_code.is_ok() {
                // a built-in or an opcode reported an unrecoverable failure
                return RunState::Halted;
            }
            let raw = match self.pc_irep.code.get(self.pc) {
                Some(&raw) => raw,
                None => {
                    self.fail(RuntimeErrorKind::BytecodeFormat);
                    return RunState::Halted;
                }
            };
            self.pc += 1;
            match self.step(rt, Instruction::new(raw)) {
                Step::Next => {}
                Step::Stop => {
                    self.release_registers(rt);
                    return RunState::Halted;
                }
                Step::Abort => return RunState::Aborted,
            }
            if let Some(ticks) = self.sleep_request.take() {
                return RunState::Sleeping(ticks);
            }
        }
    }

    /// Release everything this VM still holds. `release_regs` is false for
    /// the ABORT path, which leaves the register file to the bulk
    /// reclaimer.
    pub fn close(&mut self, rt: &mut Runtime, release_regs: bool) {
        if release_regs && !self.regs_released {
            self.release_registers(rt);
        }
        self.callinfo.clear();
    }

    // ----- register file access -----------------------------------------

    pub(crate) fn get(&self, r: usize) -> Value {
        self.regs
            .get(self.current_regs + r)
            .copied()
            .unwrap_or(Value::Empty)
    }

    pub(crate) fn take(&mut self, r: usize) -> Value {
        let abs = self.current_regs + r;
        match self.regs.get_mut(abs) {
            Some(slot) => core::mem::replace(slot, Value::Empty),
            None => Value::Empty,
        }
    }

    pub(crate) fn reg_absolute(&self, abs: usize) -> Value {
        self.regs.get(abs).copied().unwrap_or(Value::Empty)
    }

    pub(crate) fn set_reg(&mut self, rt: &mut Runtime, r: usize, v: Value) {
        let abs = self.current_regs + r;
        self.set_reg_absolute(rt, abs, v);
    }

    pub(crate) fn set_reg_absolute(&mut self, rt: &mut Runtime, abs: usize, v: Value) {
        if abs >= self.regs.len() {
            rt.release(&v);
            self.fail(RuntimeErrorKind::BytecodeFormat);
            return;
        }
        let old = core::mem::replace(&mut self.regs[abs], v);
        rt.release(&old);
    }

    fn release_registers(&mut self, rt: &mut Runtime) {
        for i in 0..self.regs.len() {
            if self.regs[i].is_refcounted() {
                let v = core::mem::replace(&mut self.regs[i], Value::Empty);
                rt.release(&v);
            }
        }
        self.regs_released = true;
    }

    // ----- failure paths ------------------------------------------------

    /// Print a diagnostic and record the kind; execution continues.
    pub(crate) fn diag(&mut self, rt: &mut Runtime, kind: RuntimeErrorKind, msg: &str) {
        tracing::warn!(vm = self.id, %kind, msg, "diagnostic");
        rt.console.print(&format!("{msg} ({kind})\n"));
        self.last_error = Some(kind);
    }

    /// Record an unrecoverable failure; the dispatch loop halts at the
    /// next boundary and the scheduler reaps the VM.
    pub(crate) fn fail(&mut self, kind: RuntimeErrorKind) {
        tracing::error!(vm = self.id, %kind, "fatal vm error");
        self.last_error = Some(kind);
        self.error_code = kind.into();
    }

    fn preempted(&self) -> bool {
        match &self.ticker {
            Some((t, slot)) => t.take_preempt(*slot),
            None => false,
        }
    }

    pub(crate) fn sym_at(&self, i: usize) -> Option<SymId> {
        self.pc_irep.syms.get(i).copied()
    }

    pub(crate) fn bad_bytecode(&mut self) -> Step {
        self.fail(RuntimeErrorKind::BytecodeFormat);
        Step::Abort
    }

    pub(crate) fn window_fits(&self, base: usize, nregs: u16) -> bool {
        base + nregs as usize <= self.regs.len()
    }

    pub(crate) fn jump(&mut self, sbx: i32) -> Step {
        // pc already advanced past the jump; offsets are relative to the
        // jump instruction itself
        let target = (self.pc as i64 - 1) + sbx as i64;
        if target < 0 || target as usize > self.pc_irep.code.len() {
            return self.bad_bytecode();
        }
        self.pc = target as usize;
        Step::Next
    }
}
