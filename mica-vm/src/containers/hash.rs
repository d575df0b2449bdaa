//! Ordered key/value sequence payload and methods.
//!
//! Entries are stored flat as `[k0, v0, k1, v1, ...]` in insertion order
//! and probed linearly, which beats real hashing for the table sizes seen
//! on the target hardware.

use alloc::vec::Vec;
use core::mem::size_of;

use itertools::Itertools;

use crate::builtins::Argv;
use crate::error::{RuntimeErrorKind, VmError};
use crate::runtime::Runtime;
use crate::value::Value;
use crate::vm::Vm;

/// Hash payload. `cap` counts value slots (two per pair).
#[derive(Debug)]
pub struct RHash {
    /// Charged value-slot capacity.
    pub cap: usize,
    /// Flat key/value sequence.
    pub entries: Vec<Value>,
}

impl RHash {
    const MIN_CAP: usize = 8;

    /// Seed a hash from a flat entry sequence.
    pub fn with_entries(entries: Vec<Value>) -> Self {
        Self {
            cap: entries.len().max(Self::MIN_CAP),
            entries,
        }
    }

    /// Pool footprint of a hash with `cap` value slots.
    pub const fn footprint(cap: usize) -> usize {
        16 + cap * size_of::<Value>()
    }

    /// Iterate pairs in insertion order.
    pub fn pairs(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries.iter().tuples()
    }
}

fn with_recv_hash(vm: &mut Vm, rt: &mut Runtime, argv: Argv) -> Option<crate::heap::Ref> {
    match argv.recv(vm) {
        Value::Hash(r) => Some(r),
        _ => {
            vm.diag(rt, RuntimeErrorKind::TypeError, "receiver is not a hash");
            argv.set_return(vm, rt, Value::Nil);
            None
        }
    }
}

fn get(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_hash(vm, rt, argv) {
        let key = argv.arg(vm, 0);
        let v = rt.heap.hash_get(r, &key).unwrap_or(Value::Nil);
        rt.heap.dup(&v);
        argv.set_return(vm, rt, v);
    }
}

fn set(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    let Some(r) = with_recv_hash(vm, rt, argv) else {
        return;
    };
    let key = argv.arg(vm, 0);
    let v = argv.arg(vm, 1);
    rt.dup(&key);
    rt.dup(&v);
    let Runtime { heap, pool, .. } = rt;
    if let Err(kind) = heap.hash_set(pool, r, key, v) {
        vm.fail(kind);
        return;
    }
    rt.dup(&v);
    argv.set_return(vm, rt, v);
}

fn size(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_hash(vm, rt, argv) {
        let n = rt.heap.hash_len(r).unwrap_or(0) as i64;
        argv.set_return(vm, rt, Value::Fixnum(n));
    }
}

fn key_q(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_hash(vm, rt, argv) {
        let key = argv.arg(vm, 0);
        let found = rt.heap.hash_index(r, &key).is_some();
        argv.set_return(vm, rt, if found { Value::True } else { Value::False });
    }
}

fn collect_half(rt: &Runtime, r: crate::heap::Ref, values: bool) -> Vec<Value> {
    match rt.heap.get(r) {
        Some(crate::heap::Obj::Hash(h)) => h
            .entries
            .iter()
            .skip(values as usize)
            .step_by(2)
            .copied()
            .collect(),
        _ => Vec::new(),
    }
}

fn keys(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_hash(vm, rt, argv) {
        let ks = collect_half(rt, r, false);
        for k in &ks {
            rt.heap.dup(k);
        }
        match rt.new_array(vm.id(), ks) {
            Some(v) => argv.set_return(vm, rt, v),
            None => vm.fail(RuntimeErrorKind::OutOfMemory),
        }
    }
}

fn values(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_hash(vm, rt, argv) {
        let vs = collect_half(rt, r, true);
        for v in &vs {
            rt.heap.dup(v);
        }
        match rt.new_array(vm.id(), vs) {
            Some(v) => argv.set_return(vm, rt, v),
            None => vm.fail(RuntimeErrorKind::OutOfMemory),
        }
    }
}

fn empty_q(vm: &mut Vm, rt: &mut Runtime, argv: Argv) {
    if let Some(r) = with_recv_hash(vm, rt, argv) {
        let empty = rt.heap.hash_len(r).unwrap_or(0) == 0;
        argv.set_return(vm, rt, if empty { Value::True } else { Value::False });
    }
}

pub(crate) fn install(rt: &mut Runtime) -> Result<(), VmError> {
    let cls = rt.wk.hash;
    rt.define_method(cls, "[]", get)?;
    rt.define_method(cls, "[]=", set)?;
    rt.define_method(cls, "size", size)?;
    rt.define_method(cls, "length", size)?;
    rt.define_method(cls, "key?", key_q)?;
    rt.define_method(cls, "has_key?", key_q)?;
    rt.define_method(cls, "keys", keys)?;
    rt.define_method(cls, "values", values)?;
    rt.define_method(cls, "empty?", empty_q)?;
    Ok(())
}
