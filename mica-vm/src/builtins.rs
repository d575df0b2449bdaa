//! Argument marshalling and the built-in method kernel.
//!
//! Built-ins are plain functions registered on classes through the same
//! chain embedders use (see [`Runtime::define_method`]). The calling
//! convention mirrors the dispatcher's register layout: the receiver sits
//! in the first register of the window, arguments follow, and the return
//! value overwrites the receiver slot.

use alloc::format;
use alloc::string::String;
use core::cmp::Ordering;

use crate::consts::TICKS_PER_SECOND;
use crate::error::{RuntimeErrorKind, VmError};
use crate::runtime::Runtime;
use crate::value::Value;
use crate::vm::Vm;

/// Receiver/argument window of a built-in call.
///
/// `regs[base]` holds the receiver and receives the return value;
/// `argc` arguments follow it. The argument and block slots are released
/// by the dispatcher after the call returns, so a built-in that stores or
/// returns an argument must take its own reference first.
#[derive(Debug, Clone, Copy)]
pub struct Argv {
    pub(crate) base: usize,
    pub(crate) argc: usize,
}

impl Argv {
    /// Number of arguments.
    pub fn argc(&self) -> usize {
        self.argc
    }

    /// The receiver, by copy.
    pub fn recv(&self, vm: &Vm) -> Value {
        vm.reg_absolute(self.base)
    }

    /// The `i`-th argument (0-based), by copy; nil when absent.
    pub fn arg(&self, vm: &Vm, i: usize) -> Value {
        if i < self.argc {
            vm.reg_absolute(self.base + 1 + i)
        } else {
            Value::Nil
        }
    }

    /// The `i`-th argument as an integer, truncating floats.
    pub fn fixnum_arg(&self, vm: &Vm, i: usize) -> Option<i64> {
        match self.arg(vm, i) {
            Value::Fixnum(n) => Some(n),
            #[cfg(feature = "float")]
            Value::Float(f) => Some(f as i64),
            _ => None,
        }
    }

    /// The `i`-th argument's string bytes.
    #[cfg(feature = "string")]
    pub fn string_arg<'r>(&self, vm: &Vm, rt: &'r Runtime, i: usize) -> Option<&'r [u8]> {
        match self.arg(vm, i) {
            Value::Str(r) => rt.heap.string_bytes(r),
            _ => None,
        }
    }

    /// Write the return value, releasing whatever the slot held.
    ///
    /// Ownership of `v` transfers to the register file.
    pub fn set_return(&self, vm: &mut Vm, rt: &mut Runtime, v: Value) {
        vm.set_reg_absolute(rt, self.base, v);
    }
}

// ----- Object ----------------------------------------------------------

fn puts(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if argv.argc() == 0 {
        rt.console.print("\n");
    }
    for i in 0..argv.argc() {
        let v = argv.arg(vm, i);
        let Runtime {
            heap,
            symbols,
            classes,
            console,
            ..
        } = rt;
        let mut line = crate::console::to_s(heap, symbols, classes, &v);
        line.push('\n');
        console.print(&line);
    }
    argv.set_return(vm, rt, Value::Nil);
}

fn print(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    for i in 0..argv.argc() {
        let v = argv.arg(vm, i);
        let Runtime {
            heap,
            symbols,
            classes,
            console,
            ..
        } = rt;
        let text = crate::console::to_s(heap, symbols, classes, &v);
        console.print(&text);
    }
    argv.set_return(vm, rt, Value::Nil);
}

fn p(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let mut last = Value::Nil;
    for i in 0..argv.argc() {
        let v = argv.arg(vm, i);
        let Runtime {
            heap,
            symbols,
            classes,
            console,
            ..
        } = rt;
        let mut line = crate::console::inspect(heap, symbols, classes, &v);
        line.push('\n');
        console.print(&line);
        last = v;
    }
    rt.dup(&last);
    argv.set_return(vm, rt, last);
}

fn class(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let cls = rt.class_of(&argv.recv(vm));
    argv.set_return(vm, rt, Value::Class(cls));
}

fn to_s(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let v = argv.recv(vm);
    let Runtime {
        heap,
        symbols,
        classes,
        ..
    } = rt;
    let text = crate::console::to_s(heap, symbols, classes, &v);
    string_or_nil(vm, rt, argv, text);
}

fn inspect(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let v = argv.recv(vm);
    let Runtime {
        heap,
        symbols,
        classes,
        ..
    } = rt;
    let text = crate::console::inspect(heap, symbols, classes, &v);
    string_or_nil(vm, rt, argv, text);
}

#[cfg(feature = "string")]
fn string_or_nil(vm: &mut Vm, rt: &mut Runtime, argv: Argv, text: String) {
    match rt.new_string(vm.id(), text.into_bytes()) {
        Some(v) => argv.set_return(vm, rt, v),
        None => vm.fail(RuntimeErrorKind::OutOfMemory),
    }
}

#[cfg(not(feature = "string"))]
fn string_or_nil(vm: &mut Vm, rt: &mut Runtime, argv: Argv, _text: String) {
    argv.set_return(vm, rt, Value::Nil);
}

fn nil_q(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let is_nil = matches!(argv.recv(vm), Value::Nil);
    argv.set_return(vm, rt, bool_value(is_nil));
}

fn not(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let falsy = !argv.recv(vm).is_truthy();
    argv.set_return(vm, rt, bool_value(falsy));
}

fn eq(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let equal = rt.compare(&argv.recv(vm), &argv.arg(vm, 0)) == Ordering::Equal;
    argv.set_return(vm, rt, bool_value(equal));
}

fn neq(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let equal = rt.compare(&argv.recv(vm), &argv.arg(vm, 0)) == Ordering::Equal;
    argv.set_return(vm, rt, bool_value(!equal));
}

fn lt(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    ordered(vm, rt, argv, |o| o == Ordering::Less)
}

fn le(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    ordered(vm, rt, argv, |o| o != Ordering::Greater)
}

fn gt(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    ordered(vm, rt, argv, |o| o == Ordering::Greater)
}

fn ge(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    ordered(vm, rt, argv, |o| o != Ordering::Less)
}

fn ordered(vm: &mut Vm, rt: &mut Runtime, argv: Argv, test: fn(Ordering) -> bool) {
    let ord = rt.compare(&argv.recv(vm), &argv.arg(vm, 0));
    argv.set_return(vm, rt, bool_value(test(ord)));
}

fn bool_value(b: bool) -> Value {
    if b {
        Value::True
    } else {
        Value::False
    }
}

fn new(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let Value::Class(cls) = argv.recv(vm) else {
        vm.diag(rt, RuntimeErrorKind::TypeError, "new needs a class receiver");
        argv.set_return(vm, rt, Value::Nil);
        return;
    };
    match rt.new_instance(vm.id(), cls) {
        Some(v) => argv.set_return(vm, rt, v),
        None => vm.fail(RuntimeErrorKind::OutOfMemory),
    }
}

// ----- scheduling primitives -------------------------------------------

fn sleep(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let ticks = match argv.arg(vm, 0) {
        Value::Nil => 0,
        Value::Fixnum(n) if n >= 0 => (n as u32).saturating_mul(TICKS_PER_SECOND),
        #[cfg(feature = "float")]
        Value::Float(f) if f >= 0.0 => (f * TICKS_PER_SECOND as f64) as u32,
        _ => {
            vm.diag(rt, RuntimeErrorKind::TypeError, "bad sleep duration");
            argv.set_return(vm, rt, Value::Nil);
            return;
        }
    };
    vm.request_sleep(ticks);
    argv.set_return(vm, rt, Value::Nil);
}

fn sleep_ms(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let Some(ms) = argv.fixnum_arg(vm, 0).filter(|ms| *ms >= 0) else {
        vm.diag(rt, RuntimeErrorKind::TypeError, "bad sleep duration");
        argv.set_return(vm, rt, Value::Nil);
        return;
    };
    let ticks = (ms as u64).saturating_mul(TICKS_PER_SECOND as u64) / 1000;
    vm.request_sleep(ticks.min(u32::MAX as u64) as u32);
    argv.set_return(vm, rt, Value::Nil);
}

// ----- numerics --------------------------------------------------------

fn num_to_i(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let v = match argv.recv(vm) {
        Value::Fixnum(n) => Value::Fixnum(n),
        #[cfg(feature = "float")]
        Value::Float(f) => Value::Fixnum(f as i64),
        _ => Value::Nil,
    };
    argv.set_return(vm, rt, v);
}

#[cfg(feature = "float")]
fn num_to_f(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let v = match argv.recv(vm) {
        Value::Fixnum(n) => Value::Float(n as f64),
        Value::Float(f) => Value::Float(f),
        _ => Value::Nil,
    };
    argv.set_return(vm, rt, v);
}

fn num_neg(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let v = match argv.recv(vm) {
        Value::Fixnum(n) => Value::Fixnum(n.wrapping_neg()),
        #[cfg(feature = "float")]
        Value::Float(f) => Value::Float(-f),
        _ => Value::Nil,
    };
    argv.set_return(vm, rt, v);
}

fn num_abs(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let v = match argv.recv(vm) {
        Value::Fixnum(n) => Value::Fixnum(n.wrapping_abs()),
        #[cfg(feature = "float")]
        Value::Float(f) => Value::Float(if f < 0.0 { -f } else { f }),
        _ => Value::Nil,
    };
    argv.set_return(vm, rt, v);
}

// Sign follows the divisor, like the source language's modulo.
fn int_mod(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let (Value::Fixnum(a), Some(b)) = (argv.recv(vm), argv.fixnum_arg(vm, 0)) else {
        vm.diag(rt, RuntimeErrorKind::TypeError, "bad modulo operand");
        argv.set_return(vm, rt, Value::Nil);
        return;
    };
    if b == 0 {
        vm.diag(rt, RuntimeErrorKind::Arithmetic, "divided by 0");
        argv.set_return(vm, rt, Value::Nil);
        return;
    }
    let mut r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        r = r.wrapping_add(b);
    }
    argv.set_return(vm, rt, Value::Fixnum(r));
}

fn num_type_error(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let cls = rt.class_of(&argv.arg(vm, 0));
    let name = String::from(rt.sym_name(rt.classes.get(cls).name));
    vm.diag(
        rt,
        RuntimeErrorKind::TypeError,
        &format!("{name} cannot be coerced"),
    );
    argv.set_return(vm, rt, Value::Nil);
}

// ----- math ------------------------------------------------------------

#[cfg(feature = "math")]
fn math_arg(vm: &Vm, argv: Argv) -> Option<f64> {
    match argv.arg(vm, 0) {
        Value::Fixnum(n) => Some(n as f64),
        Value::Float(f) => Some(f),
        _ => None,
    }
}

#[cfg(feature = "math")]
fn math_sqrt(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    match math_arg(vm, argv) {
        Some(x) => argv.set_return(vm, rt, Value::Float(libm::sqrt(x))),
        None => {
            vm.diag(rt, RuntimeErrorKind::TypeError, "bad math operand");
            argv.set_return(vm, rt, Value::Nil);
        }
    }
}

#[cfg(feature = "math")]
fn math_sin(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    match math_arg(vm, argv) {
        Some(x) => argv.set_return(vm, rt, Value::Float(libm::sin(x))),
        None => {
            vm.diag(rt, RuntimeErrorKind::TypeError, "bad math operand");
            argv.set_return(vm, rt, Value::Nil);
        }
    }
}

#[cfg(feature = "math")]
fn math_cos(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    match math_arg(vm, argv) {
        Some(x) => argv.set_return(vm, rt, Value::Float(libm::cos(x))),
        None => {
            vm.diag(rt, RuntimeErrorKind::TypeError, "bad math operand");
            argv.set_return(vm, rt, Value::Nil);
        }
    }
}

/// Register the whole kernel. Called once from [`Runtime::new`].
pub(crate) fn install(rt: &mut Runtime) -> Result<(), VmError> {
    let object = rt.wk.object;
    rt.define_method(object, "puts", puts)?;
    rt.define_method(object, "print", print)?;
    rt.define_method(object, "p", p)?;
    rt.define_method(object, "class", class)?;
    rt.define_method(object, "to_s", to_s)?;
    rt.define_method(object, "inspect", inspect)?;
    rt.define_method(object, "nil?", nil_q)?;
    rt.define_method(object, "!", not)?;
    rt.define_method(object, "==", eq)?;
    rt.define_method(object, "!=", neq)?;
    rt.define_method(object, "<", lt)?;
    rt.define_method(object, "<=", le)?;
    rt.define_method(object, ">", gt)?;
    rt.define_method(object, ">=", ge)?;
    rt.define_method(object, "new", new)?;
    rt.define_method(object, "sleep", sleep)?;
    rt.define_method(object, "sleep_ms", sleep_ms)?;

    let integer = rt.wk.integer;
    rt.define_method(integer, "to_i", num_to_i)?;
    rt.define_method(integer, "-@", num_neg)?;
    rt.define_method(integer, "abs", num_abs)?;
    rt.define_method(integer, "%", int_mod)?;
    rt.define_method(integer, "+", num_type_error)?;
    rt.define_method(integer, "-", num_type_error)?;
    rt.define_method(integer, "*", num_type_error)?;
    rt.define_method(integer, "/", num_type_error)?;
    #[cfg(feature = "float")]
    {
        rt.define_method(integer, "to_f", num_to_f)?;
        let float = rt.wk.float;
        rt.define_method(float, "to_i", num_to_i)?;
        rt.define_method(float, "to_f", num_to_f)?;
        rt.define_method(float, "-@", num_neg)?;
        rt.define_method(float, "abs", num_abs)?;
        rt.define_method(float, "+", num_type_error)?;
        rt.define_method(float, "-", num_type_error)?;
        rt.define_method(float, "*", num_type_error)?;
        rt.define_method(float, "/", num_type_error)?;
    }

    crate::containers::array::install(rt)?;
    crate::containers::hash::install(rt)?;
    crate::containers::range::install(rt)?;
    #[cfg(feature = "string")]
    crate::containers::string::install(rt)?;

    #[cfg(feature = "math")]
    {
        let math = rt.wk.math;
        rt.define_method(math, "sqrt", math_sqrt)?;
        rt.define_method(math, "sin", math_sin)?;
        rt.define_method(math, "cos", math_cos)?;
    }

    Ok(())
}
