//! Call discipline: SEND and friends, argument marshalling, returns and
//! the lexical upvar walk.

use alloc::borrow::ToOwned;
use alloc::format;

use mica_asm::{Instruction, RETURN_BREAK};

use crate::builtins::Argv;
use crate::class::{ClassId, ProcBody};
use crate::error::RuntimeErrorKind;
use crate::runtime::Runtime;
use crate::symbol::SymId;
use crate::value::Value;
use crate::vm::{CallInfo, FrameKind, Step, Vm};

impl Vm {
    pub(crate) fn op_send(&mut self, rt: &mut Runtime, ins: Instruction, with_block: bool) -> Step {
        let (ra, nargs) = (ins.a(), ins.c());
        let Some(mid) = self.sym_at(ins.b()) else {
            return self.bad_bytecode();
        };
        if with_block {
            let bslot = ra + nargs + 1;
            let bv = self.get(bslot);
            if !matches!(bv, Value::Nil | Value::Empty | Value::Proc(_)) {
                // undefined in the source dialect; diagnosed and dropped
                self.diag(rt, RuntimeErrorKind::TypeError, "block argument is not a proc");
                let old = self.take(bslot);
                rt.release(&old);
                self.set_reg(rt, bslot, Value::Nil);
            }
        }
        self.dispatch(rt, ra, mid, nargs, with_block)
    }

    /// Method dispatch for an argument window already laid out at `ra`:
    /// `[recv, arg1..argn, block]`.
    pub(crate) fn dispatch(
        &mut self,
        rt: &mut Runtime,
        ra: usize,
        mid: SymId,
        nargs: usize,
        with_block: bool,
    ) -> Step {
        let recv = self.get(ra);
        if let Value::Proc(r) = recv {
            if mid == rt.wk.sym_call {
                return self.call_proc(rt, ra, nargs, r);
            }
        }
        let cls = rt.class_of(&recv);
        let found = rt
            .classes
            .find_method(cls, mid)
            .map(|(p, defining)| (p.body.clone(), defining));
        self.invoke(rt, ra, mid, nargs, with_block, found)
    }

    fn invoke(
        &mut self,
        rt: &mut Runtime,
        ra: usize,
        mid: SymId,
        nargs: usize,
        with_block: bool,
        found: Option<(ProcBody, ClassId)>,
    ) -> Step {
        let abs = self.current_regs + ra;
        match found {
            None => {
                let name = rt.sym_name(mid).to_owned();
                self.diag(
                    rt,
                    RuntimeErrorKind::UndefinedMethod,
                    &format!("undefined method '{name}'"),
                );
                self.release_call_slots(rt, ra, nargs, with_block);
                self.set_reg(rt, ra, Value::Nil);
                Step::Next
            }
            Some((ProcBody::Builtin(f), _)) => {
                f(
                    self,
                    rt,
                    Argv {
                        base: abs,
                        argc: nargs,
                    },
                );
                self.release_call_slots(rt, ra, nargs, with_block);
                Step::Next
            }
            Some((ProcBody::Irep(body), defining)) => {
                if !self.window_fits(abs, body.nregs) {
                    self.diag(rt, RuntimeErrorKind::OutOfMemory, "register file exhausted");
                    self.fail(RuntimeErrorKind::OutOfMemory);
                    return Step::Next;
                }
                self.callinfo.push(CallInfo {
                    current_regs: self.current_regs,
                    pc_irep: self.pc_irep.clone(),
                    pc: self.pc,
                    mid,
                    n_args: nargs,
                    target_class: self.target_class,
                    kind: FrameKind::Method,
                });
                self.current_regs = abs;
                self.pc_irep = body;
                self.pc = 0;
                self.target_class = defining;
                Step::Next
            }
        }
    }

    fn release_call_slots(&mut self, rt: &mut Runtime, ra: usize, nargs: usize, with_block: bool) {
        let last = ra + nargs + usize::from(with_block);
        for i in (ra + 1)..=last {
            let v = self.take(i);
            rt.release(&v);
        }
    }

    /// Block invocation: `Proc#call` pushes a send record and an entry
    /// record, so the `depth*2+1` upvar walk lands on the defining frame.
    fn call_proc(&mut self, rt: &mut Runtime, ra: usize, nargs: usize, pr: crate::heap::Ref) -> Step {
        let abs = self.current_regs + ra;
        let Some(rec) = rt.heap.proc_record(pr) else {
            self.diag(rt, RuntimeErrorKind::TypeError, "stale proc");
            return Step::Next;
        };
        match rec.body {
            ProcBody::Builtin(f) => {
                f(
                    self,
                    rt,
                    Argv {
                        base: abs,
                        argc: nargs,
                    },
                );
                self.release_call_slots(rt, ra, nargs, false);
                Step::Next
            }
            ProcBody::Irep(body) => {
                if !self.window_fits(abs, body.nregs) {
                    self.diag(rt, RuntimeErrorKind::OutOfMemory, "register file exhausted");
                    self.fail(RuntimeErrorKind::OutOfMemory);
                    return Step::Next;
                }
                self.callinfo.push(CallInfo {
                    current_regs: self.current_regs,
                    pc_irep: self.pc_irep.clone(),
                    pc: self.pc,
                    mid: rt.wk.sym_call,
                    n_args: nargs,
                    target_class: self.target_class,
                    kind: FrameKind::BlockSend,
                });
                self.callinfo.push(CallInfo {
                    current_regs: abs,
                    pc_irep: self.pc_irep.clone(),
                    pc: self.pc,
                    mid: rt.wk.sym_call,
                    n_args: nargs,
                    target_class: self.target_class,
                    kind: FrameKind::ProcEntry,
                });
                self.current_regs = abs;
                self.pc_irep = body;
                self.pc = 0;
                Step::Next
            }
        }
    }

    /// Invoke the proc held in `self` (register 0 of the window).
    pub(crate) fn op_call(&mut self, rt: &mut Runtime) -> Step {
        let Value::Proc(pr) = self.get(0) else {
            self.diag(rt, RuntimeErrorKind::TypeError, "self is not a proc");
            return Step::Next;
        };
        let Some(rec) = rt.heap.proc_record(pr) else {
            self.diag(rt, RuntimeErrorKind::TypeError, "stale proc");
            return Step::Next;
        };
        match rec.body {
            ProcBody::Builtin(f) => {
                f(
                    self,
                    rt,
                    Argv {
                        base: self.current_regs,
                        argc: 0,
                    },
                );
                Step::Next
            }
            ProcBody::Irep(body) => {
                if !self.window_fits(self.current_regs, body.nregs) {
                    self.fail(RuntimeErrorKind::OutOfMemory);
                    return Step::Next;
                }
                self.callinfo.push(CallInfo {
                    current_regs: self.current_regs,
                    pc_irep: self.pc_irep.clone(),
                    pc: self.pc,
                    mid: rt.wk.sym_call,
                    n_args: 0,
                    target_class: self.target_class,
                    kind: FrameKind::Method,
                });
                self.pc_irep = body;
                self.pc = 0;
                Step::Next
            }
        }
    }

    pub(crate) fn op_super(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let (ra, nargs) = (ins.a(), ins.c());
        let mid = self
            .callinfo
            .iter()
            .rev()
            .find(|ci| ci.kind == FrameKind::Method)
            .map(|ci| ci.mid);
        let Some(mid) = mid else {
            self.diag(rt, RuntimeErrorKind::TypeError, "super outside a method");
            return Step::Next;
        };
        let superclass = rt.classes.get(self.target_class).superclass;
        let Some(start) = superclass else {
            self.diag(rt, RuntimeErrorKind::UndefinedMethod, "no superclass");
            self.set_reg(rt, ra, Value::Nil);
            return Step::Next;
        };
        let selfv = self.get(0);
        rt.dup(&selfv);
        self.set_reg(rt, ra, selfv);
        let found = rt
            .classes
            .find_method(start, mid)
            .map(|(p, defining)| (p.body.clone(), defining));
        self.invoke(rt, ra, mid, nargs, false, found)
    }

    /// Adjust `pc` past defaulted-optional initializers when the caller
    /// supplied more than the mandatory count.
    pub(crate) fn op_enter(&mut self, ins: Instruction) -> Step {
        let ax = ins.ax();
        let mandatory = ((ax >> 18) & 0x1f) as usize;
        let optional = ((ax >> 13) & 0x1f) as usize;
        if optional > 0 {
            let n_args = self
                .callinfo
                .last()
                .map(|ci| ci.n_args)
                .unwrap_or(mandatory);
            let skip = n_args.saturating_sub(mandatory).min(optional);
            self.pc += skip;
        }
        Step::Next
    }

    pub(crate) fn op_return(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let retv = self.take(ins.a());
        if self.callinfo.is_empty() {
            self.set_reg(rt, 0, retv);
            return Step::Stop;
        }

        let base = self.current_regs;
        let nregs = self.pc_irep.nregs as usize;
        for i in (base + 1)..(base + nregs).min(self.regs.len()) {
            let v = core::mem::replace(&mut self.regs[i], Value::Empty);
            rt.release(&v);
        }

        let ci = if ins.b() == RETURN_BREAK {
            // unwind every record sharing this register base, then one more
            while self.callinfo.last().map(|c| c.current_regs) == Some(base) {
                self.callinfo.pop();
            }
            match self.callinfo.pop() {
                Some(c) => c,
                None => {
                    self.set_reg_absolute(rt, base, retv);
                    return Step::Stop;
                }
            }
        } else {
            let mut c = match self.callinfo.pop() {
                Some(c) => c,
                None => {
                    self.set_reg_absolute(rt, base, retv);
                    return Step::Stop;
                }
            };
            if c.kind == FrameKind::ProcEntry {
                // pop the paired send record and resume from it
                match self.callinfo.pop() {
                    Some(outer) => c = outer,
                    None => {
                        self.set_reg_absolute(rt, base, retv);
                        return Step::Stop;
                    }
                }
            }
            c
        };

        // the callee window's register 0 is the caller's result slot
        self.set_reg_absolute(rt, base, retv);
        self.current_regs = ci.current_regs;
        self.pc_irep = ci.pc_irep;
        self.pc = ci.pc;
        self.target_class = ci.target_class;
        Step::Next
    }

    /// Window base of the frame `depth` lexical levels up, read through
    /// the call-info chain: each block level contributes a send/entry
    /// record pair, so the walk hops `depth*2+1` records from the tail.
    ///
    /// A proc used past its defining frame's return walks off the chain;
    /// that is undefined behavior at the language level, surfaced here as
    /// `None` (nil result plus a diagnostic, never a memory error).
    fn upvar_base(&self, depth: usize) -> Option<usize> {
        self.callinfo
            .len()
            .checked_sub(2 + depth * 2)
            .map(|i| self.callinfo[i].current_regs)
    }

    pub(crate) fn op_getupvar(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let (a, b, depth) = (ins.a(), ins.b(), ins.c());
        match self.upvar_base(depth) {
            Some(base) if base + b < self.regs.len() => {
                let v = self.regs[base + b];
                rt.dup(&v);
                self.set_reg(rt, a, v);
            }
            _ => {
                self.diag(rt, RuntimeErrorKind::TypeError, "upvar frame is gone");
                self.set_reg(rt, a, Value::Nil);
            }
        }
        Step::Next
    }

    pub(crate) fn op_setupvar(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let (a, b, depth) = (ins.a(), ins.b(), ins.c());
        let v = self.get(a);
        match self.upvar_base(depth) {
            Some(base) if base + b < self.regs.len() => {
                rt.dup(&v);
                self.set_reg_absolute(rt, base + b, v);
            }
            _ => {
                self.diag(rt, RuntimeErrorKind::TypeError, "upvar frame is gone");
            }
        }
        Step::Next
    }

    pub(crate) fn op_blkpush(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let bx = ins.bx();
        let m1 = ((bx >> 10) & 0x3f) as usize;
        let r = ((bx >> 9) & 1) as usize;
        let m2 = ((bx >> 4) & 0x1f) as usize;
        let lv = (bx & 0xf) as usize;
        let offset = m1 + r + m2 + 1;
        let base = if lv == 0 {
            Some(self.current_regs)
        } else {
            self.upvar_base(lv - 1)
        };
        match base {
            Some(b) if b + offset < self.regs.len() => {
                let v = self.regs[b + offset];
                if matches!(v, Value::Proc(_)) {
                    rt.dup(&v);
                    self.set_reg(rt, ins.a(), v);
                } else {
                    self.diag(rt, RuntimeErrorKind::TypeError, "no block given");
                    self.set_reg(rt, ins.a(), Value::Nil);
                }
            }
            _ => {
                self.diag(rt, RuntimeErrorKind::TypeError, "no block given");
                self.set_reg(rt, ins.a(), Value::Nil);
            }
        }
        Step::Next
    }

    pub(crate) fn op_exec(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let a = ins.a();
        let Value::Class(cls) = self.get(a) else {
            self.diag(rt, RuntimeErrorKind::TypeError, "exec target is not a class");
            return Step::Next;
        };
        let irep = self.pc_irep.clone();
        let Some(child) = irep.reps.get(ins.bx() as usize).cloned() else {
            return self.bad_bytecode();
        };
        let abs = self.current_regs + a;
        if !self.window_fits(abs, child.nregs) {
            self.fail(RuntimeErrorKind::OutOfMemory);
            return Step::Next;
        }
        self.callinfo.push(CallInfo {
            current_regs: self.current_regs,
            pc_irep: self.pc_irep.clone(),
            pc: self.pc,
            mid: SymId::INVALID,
            n_args: 0,
            target_class: self.target_class,
            kind: FrameKind::ClassExec,
        });
        self.current_regs = abs;
        self.pc_irep = child;
        self.pc = 0;
        self.target_class = cls;
        Step::Next
    }
}
