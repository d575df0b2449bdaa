//! Instruction dispatch.
//!
//! One match keyed on the opcode, delegating to the helper families in
//! the sibling modules. The opcode numbering is fixed by the bytecode
//! format (see `mica-asm`).

use alloc::borrow::ToOwned;
use alloc::format;
use alloc::vec::Vec;

use mica_asm::{Instruction, Opcode};

use crate::class::{ProcBody, RProc};
use crate::error::RuntimeErrorKind;
use crate::irep::PoolEntry;
use crate::runtime::Runtime;
use crate::value::Value;
use crate::vm::{Step, Vm};

impl Vm {
    #[tracing::instrument(level = "trace", skip_all)]
    pub(crate) fn step(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let op = ins.opcode();
        tracing::trace!(vm = self.id, pc = self.pc - 1, %op, "dispatch");
        #[cfg(feature = "debug")]
        self.trace_window(ins);
        match op {
            Opcode::NOP => Step::Next,
            Opcode::MOVE => {
                let v = self.get(ins.b());
                rt.dup(&v);
                self.set_reg(rt, ins.a(), v);
                Step::Next
            }
            Opcode::LOADL => self.op_loadl(rt, ins),
            Opcode::LOADI => {
                self.set_reg(rt, ins.a(), Value::Fixnum(ins.sbx() as i64));
                Step::Next
            }
            Opcode::LOADSYM => match self.sym_at(ins.bx() as usize) {
                Some(s) => {
                    self.set_reg(rt, ins.a(), Value::Symbol(s));
                    Step::Next
                }
                None => self.bad_bytecode(),
            },
            Opcode::LOADNIL => {
                self.set_reg(rt, ins.a(), Value::Nil);
                Step::Next
            }
            Opcode::LOADSELF => {
                let v = self.get(0);
                rt.dup(&v);
                self.set_reg(rt, ins.a(), v);
                Step::Next
            }
            Opcode::LOADT => {
                self.set_reg(rt, ins.a(), Value::True);
                Step::Next
            }
            Opcode::LOADF => {
                self.set_reg(rt, ins.a(), Value::False);
                Step::Next
            }

            Opcode::GETGLOBAL => match self.sym_at(ins.bx() as usize) {
                Some(sym) => {
                    let v = rt.get_global(sym).unwrap_or(Value::Nil);
                    rt.dup(&v);
                    self.set_reg(rt, ins.a(), v);
                    Step::Next
                }
                None => self.bad_bytecode(),
            },
            Opcode::SETGLOBAL => match self.sym_at(ins.bx() as usize) {
                Some(sym) => {
                    let v = self.get(ins.a());
                    rt.dup(&v);
                    rt.set_global(sym, v);
                    Step::Next
                }
                None => self.bad_bytecode(),
            },
            Opcode::GETIV => self.op_getiv(rt, ins),
            Opcode::SETIV => self.op_setiv(rt, ins),
            Opcode::GETCONST | Opcode::GETMCNST => match self.sym_at(ins.bx() as usize) {
                Some(sym) => {
                    match rt.get_const(sym) {
                        Some(v) => {
                            rt.dup(&v);
                            self.set_reg(rt, ins.a(), v);
                        }
                        None => {
                            let name = rt.sym_name(sym).to_owned();
                            self.diag(
                                rt,
                                RuntimeErrorKind::UninitializedConstant,
                                &format!("uninitialized constant {name}"),
                            );
                            self.set_reg(rt, ins.a(), Value::Nil);
                        }
                    }
                    Step::Next
                }
                None => self.bad_bytecode(),
            },
            Opcode::SETCONST => match self.sym_at(ins.bx() as usize) {
                Some(sym) => {
                    let v = self.get(ins.a());
                    rt.dup(&v);
                    rt.set_const(sym, v);
                    Step::Next
                }
                None => self.bad_bytecode(),
            },
            Opcode::GETUPVAR => self.op_getupvar(rt, ins),
            Opcode::SETUPVAR => self.op_setupvar(rt, ins),

            Opcode::JMP => self.jump(ins.sbx()),
            Opcode::JMPIF => {
                if self.get(ins.a()).is_truthy() {
                    self.jump(ins.sbx())
                } else {
                    Step::Next
                }
            }
            Opcode::JMPNOT => {
                if self.get(ins.a()).is_truthy() {
                    Step::Next
                } else {
                    self.jump(ins.sbx())
                }
            }

            Opcode::SEND => self.op_send(rt, ins, false),
            Opcode::SENDB => self.op_send(rt, ins, true),
            Opcode::CALL => self.op_call(rt),
            Opcode::SUPER => self.op_super(rt, ins),
            Opcode::ARGARY => {
                tracing::trace!(vm = self.id, "argary has no effect");
                Step::Next
            }
            Opcode::ENTER => self.op_enter(ins),
            Opcode::RETURN => self.op_return(rt, ins),
            Opcode::BLKPUSH => self.op_blkpush(rt, ins),

            Opcode::ADD | Opcode::SUB | Opcode::MUL | Opcode::DIV => self.op_arith(rt, ins, op),
            Opcode::ADDI | Opcode::SUBI => self.op_arith_imm(rt, ins, op),
            Opcode::EQ | Opcode::LT | Opcode::LE | Opcode::GT | Opcode::GE => {
                self.op_compare(rt, ins, op)
            }

            Opcode::ARRAY => self.op_array(rt, ins),
            Opcode::STRING => self.op_string(rt, ins),
            Opcode::STRCAT => self.op_strcat(rt, ins),
            Opcode::HASH => self.op_hash(rt, ins),
            Opcode::LAMBDA => self.op_lambda(rt, ins),
            Opcode::RANGE => self.op_range(rt, ins),

            Opcode::CLASS => self.op_class(rt, ins),
            Opcode::EXEC => self.op_exec(rt, ins),
            Opcode::METHOD => self.op_method(rt, ins),
            Opcode::SCLASS => Step::Next,
            Opcode::TCLASS => {
                let cls = self.target_class;
                self.set_reg(rt, ins.a(), Value::Class(cls));
                Step::Next
            }

            Opcode::STOP => Step::Stop,
            Opcode::ABORT => Step::Abort,
            Opcode::UNKNOWN => self.bad_bytecode(),
        }
    }

    #[cfg(feature = "debug")]
    fn trace_window(&self, ins: Instruction) {
        let hi = (self.current_regs + 8).min(self.regs.len());
        tracing::debug!(
            vm = self.id,
            raw = ins.raw(),
            base = self.current_regs,
            window = ?&self.regs[self.current_regs..hi],
            "window"
        );
    }

    fn op_loadl(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let irep = self.pc_irep.clone();
        match irep.pools.get(ins.bx() as usize) {
            Some(PoolEntry::Int(n)) => {
                self.set_reg(rt, ins.a(), Value::Fixnum(*n));
                Step::Next
            }
            #[cfg(feature = "float")]
            Some(PoolEntry::Float(f)) => {
                self.set_reg(rt, ins.a(), Value::Float(*f));
                Step::Next
            }
            Some(PoolEntry::Str(bytes)) => self.materialize_string(rt, ins.a(), bytes.clone()),
            None => self.bad_bytecode(),
        }
    }

    #[cfg(feature = "string")]
    fn materialize_string(&mut self, rt: &mut Runtime, a: usize, bytes: Vec<u8>) -> Step {
        match rt.new_string(self.id, bytes) {
            Some(v) => self.set_reg(rt, a, v),
            None => self.fail(RuntimeErrorKind::OutOfMemory),
        }
        Step::Next
    }

    #[cfg(not(feature = "string"))]
    fn materialize_string(&mut self, rt: &mut Runtime, a: usize, _bytes: Vec<u8>) -> Step {
        self.diag(rt, RuntimeErrorKind::TypeError, "string support disabled");
        self.set_reg(rt, a, Value::Nil);
        Step::Next
    }

    fn op_string(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let irep = self.pc_irep.clone();
        match irep.pools.get(ins.bx() as usize) {
            Some(PoolEntry::Str(bytes)) => self.materialize_string(rt, ins.a(), bytes.clone()),
            Some(_) => {
                self.diag(rt, RuntimeErrorKind::TypeError, "pool entry is not a string");
                self.set_reg(rt, ins.a(), Value::Nil);
                Step::Next
            }
            None => self.bad_bytecode(),
        }
    }

    fn op_strcat(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        #[cfg(feature = "string")]
        {
            match (self.get(ins.a()), self.get(ins.b())) {
                (Value::Str(ra), Value::Str(rb)) => {
                    let tail = rt.heap.string_bytes(rb).unwrap_or(&[]).to_vec();
                    let Runtime { heap, pool, .. } = rt;
                    if let Err(kind) = heap.string_append(pool, ra, &tail) {
                        self.fail(kind);
                    }
                }
                _ => {
                    self.diag(rt, RuntimeErrorKind::TypeError, "concat needs two strings");
                }
            }
        }
        #[cfg(not(feature = "string"))]
        {
            let _ = ins;
            self.diag(rt, RuntimeErrorKind::TypeError, "string support disabled");
        }
        Step::Next
    }

    fn op_array(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let (b, n) = (ins.b(), ins.c());
        let mut values = Vec::with_capacity(n);
        for i in 0..n {
            values.push(self.take(b + i));
        }
        match rt.new_array(self.id, values) {
            Some(v) => self.set_reg(rt, ins.a(), v),
            None => self.fail(RuntimeErrorKind::OutOfMemory),
        }
        Step::Next
    }

    fn op_hash(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let (b, pairs) = (ins.b(), ins.c());
        let mut entries = Vec::with_capacity(pairs * 2);
        for i in 0..pairs * 2 {
            entries.push(self.take(b + i));
        }
        match rt.new_hash(self.id, entries) {
            Some(v) => self.set_reg(rt, ins.a(), v),
            None => self.fail(RuntimeErrorKind::OutOfMemory),
        }
        Step::Next
    }

    fn op_range(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let b = ins.b();
        let first = self.take(b);
        let last = self.take(b + 1);
        match rt.new_range(self.id, first, last, ins.c() != 0) {
            Some(v) => self.set_reg(rt, ins.a(), v),
            None => self.fail(RuntimeErrorKind::OutOfMemory),
        }
        Step::Next
    }

    fn op_lambda(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let irep = self.pc_irep.clone();
        let child_idx = (ins.bx() >> 2) as usize;
        let Some(child) = irep.reps.get(child_idx).cloned() else {
            return self.bad_bytecode();
        };
        let rec = RProc {
            mid: rt.wk.sym_call,
            body: ProcBody::Irep(child),
        };
        match rt.new_proc(self.id, rec) {
            Some(v) => self.set_reg(rt, ins.a(), v),
            None => self.fail(RuntimeErrorKind::OutOfMemory),
        }
        Step::Next
    }

    fn op_getiv(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let Some(iv) = self.ivar_sym(rt, ins.bx() as usize) else {
            return self.bad_bytecode();
        };
        match self.get(0) {
            Value::Instance(r) => {
                let v = rt.heap.iv_get(r, iv).unwrap_or(Value::Nil);
                rt.dup(&v);
                self.set_reg(rt, ins.a(), v);
            }
            _ => {
                self.diag(rt, RuntimeErrorKind::TypeError, "self has no instance variables");
                self.set_reg(rt, ins.a(), Value::Nil);
            }
        }
        Step::Next
    }

    fn op_setiv(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let Some(iv) = self.ivar_sym(rt, ins.bx() as usize) else {
            return self.bad_bytecode();
        };
        match self.get(0) {
            Value::Instance(r) => {
                let v = self.get(ins.a());
                rt.dup(&v);
                let Runtime { heap, pool, .. } = rt;
                if let Err(kind) = heap.iv_set(pool, r, iv, v) {
                    self.fail(kind);
                }
            }
            _ => {
                self.diag(rt, RuntimeErrorKind::TypeError, "self has no instance variables");
            }
        }
        Step::Next
    }

    // the bytecode carries `@name`; the variable is keyed without the sigil
    fn ivar_sym(&mut self, rt: &mut Runtime, idx: usize) -> Option<crate::symbol::SymId> {
        let sym = self.sym_at(idx)?;
        let Some(stripped) = rt.sym_name(sym).strip_prefix('@').map(ToOwned::to_owned) else {
            return Some(sym);
        };
        let iv = rt.intern(&stripped);
        // on table overflow fall back to keying with the sigiled symbol
        Some(if iv.is_valid() { iv } else { sym })
    }

    fn op_class(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let a = ins.a();
        let Some(name) = self.sym_at(ins.b()) else {
            return self.bad_bytecode();
        };
        let superclass = match self.get(a + 1) {
            Value::Class(c) => c,
            Value::Nil | Value::Empty => rt.wk.object,
            _ => {
                self.diag(rt, RuntimeErrorKind::TypeError, "superclass must be a class");
                rt.wk.object
            }
        };
        let cls = rt.classes.define_class(name, Some(superclass));
        rt.set_const(name, Value::Class(cls));
        self.set_reg(rt, a, Value::Class(cls));
        Step::Next
    }

    fn op_method(&mut self, rt: &mut Runtime, ins: Instruction) -> Step {
        let a = ins.a();
        let Some(mid) = self.sym_at(ins.b()) else {
            return self.bad_bytecode();
        };
        let Value::Class(cls) = self.get(a) else {
            self.diag(rt, RuntimeErrorKind::TypeError, "method target is not a class");
            return Step::Next;
        };
        let Value::Proc(pr) = self.get(a + 1) else {
            self.diag(rt, RuntimeErrorKind::TypeError, "method body is not a proc");
            return Step::Next;
        };
        let Some(mut rec) = rt.heap.proc_record(pr) else {
            self.diag(rt, RuntimeErrorKind::TypeError, "method body is not a proc");
            return Step::Next;
        };
        rec.mid = mid;
        rt.classes.define_method(cls, rec);
        let consumed = self.take(a + 1);
        rt.release(&consumed);
        Step::Next
    }
}
