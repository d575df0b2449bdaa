//! Endpoint-pair payload and methods.

use alloc::vec::Vec;

use crate::builtins::Argv;
use crate::error::{RuntimeErrorKind, VmError};
use crate::runtime::Runtime;
use crate::value::Value;
use crate::vm::Vm;

/// Range payload: two endpoints and an exclusive-end flag.
#[derive(Debug)]
pub struct RRange {
    /// Start of the range.
    pub first: Value,
    /// End of the range.
    pub last: Value,
    /// Whether `last` is excluded.
    pub exclusive: bool,
}

impl RRange {
    /// Pool footprint of a range.
    pub const FOOTPRINT: usize = 48;
}

fn with_recv_range(vm: &mut Vm, rt: &mut Runtime, argv: Argv) -> Option<crate::heap::Ref> {
    match argv.recv(vm) {
        Value::Range(r) => Some(r),
        _ => {
            vm.diag(rt, RuntimeErrorKind::TypeError, "receiver is not a range");
            argv.set_return(vm, rt, Value::Nil);
            None
        }
    }
}

fn endpoint(rt: &Runtime, r: crate::heap::Ref, last: bool) -> (Value, bool) {
    match rt.heap.get(r) {
        Some(crate::heap::Obj::Range(rng)) => {
            (if last { rng.last } else { rng.first }, rng.exclusive)
        }
        _ => (Value::Nil, false),
    }
}

fn first(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_range(vm, rt, argv) {
        let (v, _) = endpoint(rt, r, false);
        rt.heap.dup(&v);
        argv.set_return(vm, rt, v);
    }
}

fn last(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_range(vm, rt, argv) {
        let (v, _) = endpoint(rt, r, true);
        rt.heap.dup(&v);
        argv.set_return(vm, rt, v);
    }
}

fn exclude_end_q(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_range(vm, rt, argv) {
        let (_, exclusive) = endpoint(rt, r, true);
        argv.set_return(vm, rt, if exclusive { Value::True } else { Value::False });
    }
}

fn to_a(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let Some(r) = with_recv_range(vm, rt, argv) else {
        return;
    };
    let (first, _) = endpoint(rt, r, false);
    let (last, exclusive) = endpoint(rt, r, true);
    let (Value::Fixnum(a), Value::Fixnum(b)) = (first, last) else {
        vm.diag(rt, RuntimeErrorKind::TypeError, "range endpoints are not integers");
        argv.set_return(vm, rt, Value::Nil);
        return;
    };
    let end = if exclusive { b } else { b.saturating_add(1) };
    let values: Vec<Value> = (a..end).map(Value::Fixnum).collect();
    match rt.new_array(vm.id(), values) {
        Some(v) => argv.set_return(vm, rt, v),
        None => vm.fail(RuntimeErrorKind::OutOfMemory),
    }
}

pub(crate) fn install(rt: &mut Runtime) -> Result<(), VmError> {
    let cls = rt.wk.range;
    rt.define_method(cls, "first", first)?;
    rt.define_method(cls, "last", last)?;
    rt.define_method(cls, "exclude_end?", exclude_end_q)?;
    rt.define_method(cls, "to_a", to_a)?;
    Ok(())
}
