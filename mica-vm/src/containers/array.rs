//! Dynamic array payload and methods.

use alloc::vec::Vec;
use core::mem::size_of;

use crate::builtins::Argv;
use crate::error::{RuntimeErrorKind, VmError};
use crate::runtime::Runtime;
use crate::value::Value;
use crate::vm::Vm;

/// Array payload. `cap` is the element capacity charged against the pool;
/// growth is geometric.
#[derive(Debug)]
pub struct RArray {
    /// Charged element capacity.
    pub cap: usize,
    /// Live elements.
    pub data: Vec<Value>,
}

impl RArray {
    const MIN_CAP: usize = 4;

    /// Seed an array, charging at least the minimum capacity.
    pub fn with_values(data: Vec<Value>) -> Self {
        Self {
            cap: data.len().max(Self::MIN_CAP),
            data,
        }
    }

    /// Pool footprint of an array with `cap` element slots.
    pub const fn footprint(cap: usize) -> usize {
        16 + cap * size_of::<Value>()
    }
}

fn with_recv_array(vm: &mut Vm, rt: &mut Runtime, argv: Argv) -> Option<crate::heap::Ref> {
    match argv.recv(vm) {
        Value::Array(r) => Some(r),
        _ => {
            vm.diag(rt, RuntimeErrorKind::TypeError, "receiver is not an array");
            argv.set_return(vm, rt, Value::Nil);
            None
        }
    }
}

fn element_index(len: usize, idx: i64) -> Option<usize> {
    if idx < 0 {
        let back = (-idx) as usize;
        if back > len {
            return None;
        }
        Some(len - back)
    } else {
        Some(idx as usize)
    }
}

fn size(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_array(vm, rt, argv) {
        let n = rt.heap.array_len(r).unwrap_or(0) as i64;
        argv.set_return(vm, rt, Value::Fixnum(n));
    }
}

fn get(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let Some(r) = with_recv_array(vm, rt, argv) else {
        return;
    };
    let len = rt.heap.array_len(r).unwrap_or(0);
    let v = argv
        .fixnum_arg(vm, 0)
        .and_then(|i| element_index(len, i))
        .and_then(|i| rt.heap.array_get(r, i))
        .unwrap_or(Value::Nil);
    rt.heap.dup(&v);
    argv.set_return(vm, rt, v);
}

fn set(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let Some(r) = with_recv_array(vm, rt, argv) else {
        return;
    };
    let len = rt.heap.array_len(r).unwrap_or(0);
    let Some(idx) = argv.fixnum_arg(vm, 0).and_then(|i| element_index(len, i)) else {
        vm.diag(rt, RuntimeErrorKind::TypeError, "bad array index");
        argv.set_return(vm, rt, Value::Nil);
        return;
    };
    let v = argv.arg(vm, 1);
    rt.dup(&v);
    let Runtime { heap, pool, .. } = rt;
    if let Err(kind) = heap.array_set(pool, r, idx, v) {
        vm.fail(kind);
        return;
    }
    rt.dup(&v);
    argv.set_return(vm, rt, v);
}

fn push(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let Some(r) = with_recv_array(vm, rt, argv) else {
        return;
    };
    let v = argv.arg(vm, 0);
    rt.dup(&v);
    let Runtime { heap, pool, .. } = rt;
    if let Err(kind) = heap.array_push(pool, r, v) {
        vm.fail(kind);
        return;
    }
    let recv = argv.recv(vm);
    rt.dup(&recv);
    argv.set_return(vm, rt, recv);
}

fn pop(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let Some(r) = with_recv_array(vm, rt, argv) else {
        return;
    };
    let v = rt.heap.array_pop(r).unwrap_or(Value::Nil);
    argv.set_return(vm, rt, v);
}

fn first(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_array(vm, rt, argv) {
        let v = rt.heap.array_get(r, 0).unwrap_or(Value::Nil);
        rt.heap.dup(&v);
        argv.set_return(vm, rt, v);
    }
}

fn last(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_array(vm, rt, argv) {
        let len = rt.heap.array_len(r).unwrap_or(0);
        let v = len
            .checked_sub(1)
            .and_then(|i| rt.heap.array_get(r, i))
            .unwrap_or(Value::Nil);
        rt.heap.dup(&v);
        argv.set_return(vm, rt, v);
    }
}

fn clear(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_array(vm, rt, argv) {
        let Runtime { heap, pool, .. } = rt;
        heap.array_clear(pool, r);
        let recv = argv.recv(vm);
        rt.dup(&recv);
        argv.set_return(vm, rt, recv);
    }
}

fn empty_q(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_array(vm, rt, argv) {
        let empty = rt.heap.array_len(r).unwrap_or(0) == 0;
        argv.set_return(vm, rt, if empty { Value::True } else { Value::False });
    }
}

pub(crate) fn install(rt: &mut Runtime) -> Result<(), VmError> {
    let cls = rt.wk.array;
    rt.define_method(cls, "size", size)?;
    rt.define_method(cls, "length", size)?;
    rt.define_method(cls, "[]", get)?;
    rt.define_method(cls, "[]=", set)?;
    rt.define_method(cls, "push", push)?;
    rt.define_method(cls, "<<", push)?;
    rt.define_method(cls, "pop", pop)?;
    rt.define_method(cls, "first", first)?;
    rt.define_method(cls, "last", last)?;
    rt.define_method(cls, "clear", clear)?;
    rt.define_method(cls, "empty?", empty_q)?;
    Ok(())
}
