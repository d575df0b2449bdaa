//! Arithmetic and comparison fast paths.
//!
//! Pure FIXNUM/FIXNUM and FIXNUM/FLOAT operand pairs are computed inline;
//! FIXNUM arithmetic wraps (two's complement). Every other receiver falls
//! back to a regular SEND with the operator symbol, so containers and user
//! classes keep their method semantics.

use mica_asm::{Instruction, Opcode};

use crate::error::RuntimeErrorKind;
use crate::runtime::Runtime;
use crate::value::{self, Value};
use crate::vm::{Step, Vm};

impl Vm {
    pub(crate) fn op_arith(&mut self, rt: &mut Runtime, ins: Instruction, op: Opcode) -> Step {
        let a = ins.a();
        let (x, y) = (self.get(a), self.get(a + 1));
        match (x, y) {
            (Value::Fixnum(i), Value::Fixnum(j)) => {
                let v = match op {
                    Opcode::ADD => Value::Fixnum(i.wrapping_add(j)),
                    Opcode::SUB => Value::Fixnum(i.wrapping_sub(j)),
                    Opcode::MUL => Value::Fixnum(i.wrapping_mul(j)),
                    _ => {
                        if j == 0 {
                            self.diag(rt, RuntimeErrorKind::Arithmetic, "divided by 0");
                            self.set_reg(rt, a, Value::Nil);
                            return Step::Next;
                        }
                        Value::Fixnum(i.wrapping_div(j))
                    }
                };
                self.set_reg(rt, a, v);
                Step::Next
            }
            #[cfg(feature = "float")]
            (Value::Fixnum(i), Value::Float(g)) => {
                self.set_reg(rt, a, Value::Float(float_op(op, i as f64, g)));
                Step::Next
            }
            #[cfg(feature = "float")]
            (Value::Float(f), Value::Fixnum(j)) => {
                self.set_reg(rt, a, Value::Float(float_op(op, f, j as f64)));
                Step::Next
            }
            #[cfg(feature = "float")]
            (Value::Float(f), Value::Float(g)) => {
                self.set_reg(rt, a, Value::Float(float_op(op, f, g)));
                Step::Next
            }
            _ => {
                let mid = match op {
                    Opcode::ADD => rt.wk.sym_plus,
                    Opcode::SUB => rt.wk.sym_minus,
                    Opcode::MUL => rt.wk.sym_star,
                    _ => rt.wk.sym_slash,
                };
                self.dispatch(rt, a, mid, 1, false)
            }
        }
    }

    pub(crate) fn op_arith_imm(&mut self, rt: &mut Runtime, ins: Instruction, op: Opcode) -> Step {
        let a = ins.a();
        let c = ins.c() as i64;
        let imm = if op == Opcode::ADDI { c } else { c.wrapping_neg() };
        match self.get(a) {
            Value::Fixnum(i) => self.set_reg(rt, a, Value::Fixnum(i.wrapping_add(imm))),
            #[cfg(feature = "float")]
            Value::Float(f) => self.set_reg(rt, a, Value::Float(f + imm as f64)),
            _ => {
                // no method fallback exists for the immediate forms
                self.diag(rt, RuntimeErrorKind::TypeError, "operand is not numeric");
                self.set_reg(rt, a, Value::Nil);
            }
        }
        Step::Next
    }

    pub(crate) fn op_compare(&mut self, rt: &mut Runtime, ins: Instruction, op: Opcode) -> Step {
        let a = ins.a();
        let (x, y) = (self.get(a), self.get(a + 1));
        if x.is_refcounted() || y.is_refcounted() {
            let mid = match op {
                Opcode::EQ => rt.wk.sym_eq,
                Opcode::LT => rt.wk.sym_lt,
                Opcode::LE => rt.wk.sym_le,
                Opcode::GT => rt.wk.sym_gt,
                _ => rt.wk.sym_ge,
            };
            return self.dispatch(rt, a, mid, 1, false);
        }
        let ord = value::compare(&rt.heap, &x, &y);
        let truth = match op {
            Opcode::EQ => ord == core::cmp::Ordering::Equal,
            Opcode::LT => ord == core::cmp::Ordering::Less,
            Opcode::LE => ord != core::cmp::Ordering::Greater,
            Opcode::GT => ord == core::cmp::Ordering::Greater,
            _ => ord != core::cmp::Ordering::Less,
        };
        self.set_reg(rt, a, if truth { Value::True } else { Value::False });
        Step::Next
    }
}

#[cfg(feature = "float")]
fn float_op(op: Opcode, f: f64, g: f64) -> f64 {
    match op {
        Opcode::ADD => f + g,
        Opcode::SUB => f - g,
        Opcode::MUL => f * g,
        _ => f / g,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeErrorKind;
    use crate::hal::CaptureHal;
    use crate::irep::Irep;
    use crate::vm::RunState;
    use alloc::boxed::Box;
    use alloc::rc::Rc;
    use alloc::vec;
    use alloc::vec::Vec;
    use mica_asm::ops;
    use test_case::test_case;

    fn run(code: Vec<u32>) -> (Vm, Runtime) {
        let (hal, _) = CaptureHal::new();
        let mut rt = Runtime::new(Box::new(hal), 32 * 1024).expect("runtime");
        let irep = Rc::new(Irep {
            nregs: 6,
            code,
            ..Irep::default()
        });
        let id = rt.assign_vm_id().expect("vm id");
        let mut vm = Vm::new(&rt, id, irep);
        assert_eq!(vm.run(&mut rt), RunState::Halted);
        (vm, rt)
    }

    #[test_case(ops::add(1), 7, 5, Value::Fixnum(12) ; "add")]
    #[test_case(ops::sub(1), 7, 5, Value::Fixnum(2) ; "sub")]
    #[test_case(ops::mul(1), 7, 5, Value::Fixnum(35) ; "mul")]
    #[test_case(ops::div(1), 7, 2, Value::Fixnum(3) ; "div truncates")]
    #[test_case(ops::div(1), -7, 2, Value::Fixnum(-3) ; "div truncates toward zero")]
    #[test_case(ops::eq(1), 5, 5, Value::True ; "eq")]
    #[test_case(ops::eq(1), 5, 6, Value::False ; "eq mismatch")]
    #[test_case(ops::lt(1), 5, 7, Value::True ; "lt")]
    #[test_case(ops::le(1), 7, 5, Value::False ; "le")]
    #[test_case(ops::gt(1), 7, 5, Value::True ; "gt")]
    #[test_case(ops::ge(1), 5, 7, Value::False ; "ge")]
    fn fixnum_pairs_use_the_fast_path(op: u32, x: i32, y: i32, expect: Value) {
        let (vm, _) = run(vec![ops::loadi(1, x), ops::loadi(2, y), op, ops::stop()]);
        assert_eq!(vm.register(1), expect);
        assert!(vm.last_error().is_none());
    }

    #[test_case(ops::addi(1, 3), Value::Fixnum(4) ; "addi")]
    #[test_case(ops::subi(1, 3), Value::Fixnum(-2) ; "subi")]
    fn immediate_forms_apply_to_fixnums(op: u32, expect: Value) {
        let (vm, _) = run(vec![ops::loadi(1, 1), op, ops::stop()]);
        assert_eq!(vm.register(1), expect);
    }

    #[test]
    fn non_numeric_receiver_falls_back_to_method_dispatch() {
        // nil has no `+`, so the fallback send misses
        let (vm, _) = run(vec![
            ops::loadnil(1),
            ops::loadi(2, 1),
            ops::add(1),
            ops::stop(),
        ]);
        assert_eq!(vm.register(1), Value::Nil);
        assert_eq!(vm.last_error(), Some(RuntimeErrorKind::UndefinedMethod));
    }

    #[test]
    fn mixed_fixnum_operand_reports_a_type_error_via_the_builtin() {
        let (vm, _) = run(vec![
            ops::loadi(1, 1),
            ops::loadnil(2),
            ops::add(1),
            ops::stop(),
        ]);
        assert_eq!(vm.register(1), Value::Nil);
        assert_eq!(vm.last_error(), Some(RuntimeErrorKind::TypeError));
    }
}
