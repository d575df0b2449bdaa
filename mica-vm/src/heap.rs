//! Refcounted object heap.
//!
//! Heap objects live in slots addressed by [`Ref`] handles. Every slot is
//! backed by a block in the fixed [`MemoryPool`] sized to the object's
//! footprint, so pool statistics track live objects, growth is charged
//! against the caller's budget, and a dead VM's objects can be reclaimed
//! in bulk by owner tag.
//!
//! Reference cycles are not collected; they leak until the owning VM is
//! torn down.

use alloc::vec::Vec;
use core::cmp::Ordering;

use itertools::Itertools;

use crate::class::{ClassId, RProc};
use crate::containers::array::RArray;
use crate::containers::hash::RHash;
use crate::containers::range::RRange;
#[cfg(feature = "string")]
use crate::containers::string::RString;
use crate::error::RuntimeErrorKind;
use crate::memory::{BlockRef, MemoryPool};
use crate::symbol::SymId;
use crate::value::{self, Value};

/// Handle to a heap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ref(u32);

impl Ref {
    pub(crate) const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Payload of a heap slot.
#[derive(Debug)]
pub enum Obj {
    /// Dynamic array.
    Array(RArray),
    /// Byte string.
    #[cfg(feature = "string")]
    Str(RString),
    /// Endpoint pair.
    Range(RRange),
    /// Ordered key/value sequence.
    Hash(RHash),
    /// Class instance.
    Instance(RInstance),
    /// Captured callable.
    Proc(RProc),
}

/// Instance payload: class and a linear symbol-to-value variable list.
#[derive(Debug)]
pub struct RInstance {
    /// Class of the instance.
    pub class: ClassId,
    /// Instance variables in definition order.
    pub ivars: Vec<(SymId, Value)>,
}

impl RInstance {
    const IVAR_SLOT: usize = 24;

    fn footprint(ivars: usize) -> usize {
        16 + ivars * Self::IVAR_SLOT
    }
}

impl Obj {
    fn footprint(&self) -> usize {
        match self {
            Obj::Array(a) => RArray::footprint(a.cap),
            #[cfg(feature = "string")]
            Obj::Str(s) => RString::footprint(s.cap),
            Obj::Range(_) => RRange::FOOTPRINT,
            Obj::Hash(h) => RHash::footprint(h.cap),
            Obj::Instance(i) => RInstance::footprint(i.ivars.len()),
            Obj::Proc(_) => 32,
        }
    }

    fn into_children(self) -> Vec<Value> {
        match self {
            Obj::Array(a) => a.data,
            #[cfg(feature = "string")]
            Obj::Str(_) => Vec::new(),
            Obj::Range(r) => {
                let mut v = Vec::with_capacity(2);
                v.push(r.first);
                v.push(r.last);
                v
            }
            Obj::Hash(h) => h.entries,
            Obj::Instance(i) => i.ivars.into_iter().map(|(_, v)| v).collect(),
            Obj::Proc(_) => Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Slot {
    ref_count: u32,
    vm_id: u8,
    block: BlockRef,
    obj: Obj,
}

/// Slab of refcounted objects, pool-backed.
#[derive(Debug, Default)]
pub struct Heap {
    slots: Vec<Option<Slot>>,
    vacant: Vec<u32>,
}

impl Heap {
    /// Empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Current reference count of a slot; zero for a vacant handle.
    pub fn ref_count(&self, r: Ref) -> u32 {
        self.slot(r).map(|s| s.ref_count).unwrap_or(0)
    }

    fn slot(&self, r: Ref) -> Option<&Slot> {
        self.slots.get(r.index()).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, r: Ref) -> Option<&mut Slot> {
        self.slots.get_mut(r.index()).and_then(Option::as_mut)
    }

    /// Borrow an object.
    pub fn get(&self, r: Ref) -> Option<&Obj> {
        self.slot(r).map(|s| &s.obj)
    }

    /// Borrow an object mutably.
    pub fn get_mut(&mut self, r: Ref) -> Option<&mut Obj> {
        self.slot_mut(r).map(|s| &mut s.obj)
    }

    /// Allocate a slot with one reference, charging the pool.
    pub fn alloc(&mut self, pool: &mut MemoryPool, vm_id: u8, obj: Obj) -> Option<Ref> {
        let block = pool.alloc(vm_id, obj.footprint())?;
        let slot = Slot {
            ref_count: 1,
            vm_id,
            block,
            obj,
        };
        let idx = match self.vacant.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(slot);
                i
            }
            None => {
                self.slots.push(Some(slot));
                (self.slots.len() - 1) as u32
            }
        };
        Some(Ref(idx))
    }

    /// Allocate an array seeded with `values`.
    pub fn alloc_array(
        &mut self,
        pool: &mut MemoryPool,
        vm_id: u8,
        values: Vec<Value>,
    ) -> Option<Value> {
        self.alloc(pool, vm_id, Obj::Array(RArray::with_values(values)))
            .map(Value::Array)
    }

    /// Allocate a string holding `bytes`.
    #[cfg(feature = "string")]
    pub fn alloc_string(
        &mut self,
        pool: &mut MemoryPool,
        vm_id: u8,
        bytes: Vec<u8>,
    ) -> Option<Value> {
        self.alloc(pool, vm_id, Obj::Str(RString::with_bytes(bytes)))
            .map(Value::Str)
    }

    /// Allocate a range over two endpoints.
    pub fn alloc_range(
        &mut self,
        pool: &mut MemoryPool,
        vm_id: u8,
        first: Value,
        last: Value,
        exclusive: bool,
    ) -> Option<Value> {
        self.alloc(
            pool,
            vm_id,
            Obj::Range(RRange {
                first,
                last,
                exclusive,
            }),
        )
        .map(Value::Range)
    }

    /// Allocate a hash seeded with a flat `[k0, v0, k1, v1, ...]` sequence.
    pub fn alloc_hash(
        &mut self,
        pool: &mut MemoryPool,
        vm_id: u8,
        entries: Vec<Value>,
    ) -> Option<Value> {
        self.alloc(pool, vm_id, Obj::Hash(RHash::with_entries(entries)))
            .map(Value::Hash)
    }

    /// Allocate an instance of `class` with no variables set.
    pub fn alloc_instance(
        &mut self,
        pool: &mut MemoryPool,
        vm_id: u8,
        class: ClassId,
    ) -> Option<Value> {
        self.alloc(
            pool,
            vm_id,
            Obj::Instance(RInstance {
                class,
                ivars: Vec::new(),
            }),
        )
        .map(Value::Instance)
    }

    /// Allocate a proc object.
    pub fn alloc_proc(&mut self, pool: &mut MemoryPool, vm_id: u8, p: RProc) -> Option<Value> {
        self.alloc(pool, vm_id, Obj::Proc(p)).map(Value::Proc)
    }

    /// Take one more reference to a refcounted value; no-op otherwise.
    pub fn dup(&mut self, v: &Value) {
        if let Some(r) = v.heap_ref() {
            match self.slot_mut(r) {
                Some(slot) => slot.ref_count += 1,
                None => tracing::warn!(slot = r.index(), "dup of vacant heap slot"),
            }
        }
    }

    /// Drop one reference; at zero the object is destroyed, its pool block
    /// freed and its children released transitively.
    pub fn release(&mut self, pool: &mut MemoryPool, v: &Value) {
        if let Some(r) = v.heap_ref() {
            self.release_ref(pool, r);
        }
    }

    fn release_ref(&mut self, pool: &mut MemoryPool, r: Ref) {
        let Some(slot) = self.slot_mut(r) else {
            tracing::warn!(slot = r.index(), "release of vacant heap slot");
            return;
        };
        if slot.ref_count > 1 {
            slot.ref_count -= 1;
            return;
        }
        let slot = self.slots[r.index()].take().expect("slot checked above");
        pool.free(slot.block);
        self.vacant.push(r.index() as u32);
        for child in slot.obj.into_children() {
            self.release(pool, &child);
        }
    }

    /// Reassign the owner tag of an object (shallow).
    pub fn retag(&mut self, pool: &mut MemoryPool, v: &Value, vm_id: u8) {
        if let Some(r) = v.heap_ref() {
            if let Some(slot) = self.slot_mut(r) {
                slot.vm_id = vm_id;
                let block = slot.block;
                pool.retag(block, vm_id);
            }
        }
    }

    /// Drop every object tagged with `vm_id`, without touching children.
    ///
    /// Children owned by other parties keep their counts; this is the bulk
    /// reclamation path for a terminated VM, paired with
    /// [`MemoryPool::free_all`].
    pub fn free_all(&mut self, pool: &mut MemoryPool, vm_id: u8) {
        for i in 0..self.slots.len() {
            if self.slots[i].as_ref().map(|s| s.vm_id) == Some(vm_id) {
                let slot = self.slots[i].take().expect("occupancy checked");
                pool.free(slot.block);
                self.vacant.push(i as u32);
            }
        }
    }

    fn grow(
        &mut self,
        pool: &mut MemoryPool,
        r: Ref,
        footprint: usize,
    ) -> Result<(), RuntimeErrorKind> {
        let (block, vm_id) = match self.slot(r) {
            Some(s) => (s.block, s.vm_id),
            None => return Err(RuntimeErrorKind::TypeError),
        };
        let moved = pool
            .realloc(block, vm_id, footprint)
            .ok_or(RuntimeErrorKind::OutOfMemory)?;
        if let Some(slot) = self.slot_mut(r) {
            slot.block = moved;
        }
        Ok(())
    }

    // ----- arrays -------------------------------------------------------

    /// Append to an array, growing geometrically.
    pub fn array_push(
        &mut self,
        pool: &mut MemoryPool,
        r: Ref,
        v: Value,
    ) -> Result<(), RuntimeErrorKind> {
        let (len, cap) = match self.get(r) {
            Some(Obj::Array(a)) => (a.data.len(), a.cap),
            _ => return Err(RuntimeErrorKind::TypeError),
        };
        if len == cap {
            let new_cap = (cap * 2).max(4);
            self.grow(pool, r, RArray::footprint(new_cap))?;
            if let Some(Obj::Array(a)) = self.get_mut(r) {
                a.cap = new_cap;
            }
        }
        if let Some(Obj::Array(a)) = self.get_mut(r) {
            a.data.push(v);
        }
        Ok(())
    }

    /// Remove and return the last element; ownership moves to the caller.
    pub fn array_pop(&mut self, r: Ref) -> Option<Value> {
        match self.get_mut(r) {
            Some(Obj::Array(a)) => a.data.pop(),
            _ => None,
        }
    }

    /// Element copy at `idx`; the caller duplicates if it keeps the value.
    pub fn array_get(&self, r: Ref, idx: usize) -> Option<Value> {
        match self.get(r) {
            Some(Obj::Array(a)) => a.data.get(idx).copied(),
            _ => None,
        }
    }

    /// Store into an array, extending with nil and releasing the replaced
    /// element.
    pub fn array_set(
        &mut self,
        pool: &mut MemoryPool,
        r: Ref,
        idx: usize,
        v: Value,
    ) -> Result<(), RuntimeErrorKind> {
        loop {
            let len = match self.get(r) {
                Some(Obj::Array(a)) => a.data.len(),
                _ => return Err(RuntimeErrorKind::TypeError),
            };
            if idx < len {
                break;
            }
            self.array_push(pool, r, Value::Nil)?;
        }
        let old = match self.get_mut(r) {
            Some(Obj::Array(a)) => core::mem::replace(&mut a.data[idx], v),
            _ => return Err(RuntimeErrorKind::TypeError),
        };
        self.release(pool, &old);
        Ok(())
    }

    /// Array length, if `r` is an array.
    pub fn array_len(&self, r: Ref) -> Option<usize> {
        match self.get(r) {
            Some(Obj::Array(a)) => Some(a.data.len()),
            _ => None,
        }
    }

    /// Release all elements and empty the array; capacity is kept.
    pub fn array_clear(&mut self, pool: &mut MemoryPool, r: Ref) {
        let drained = match self.get_mut(r) {
            Some(Obj::Array(a)) => core::mem::take(&mut a.data),
            _ => return,
        };
        for v in drained {
            self.release(pool, &v);
        }
    }

    // ----- strings ------------------------------------------------------

    /// Byte view of a string.
    #[cfg(feature = "string")]
    pub fn string_bytes(&self, r: Ref) -> Option<&[u8]> {
        match self.get(r) {
            Some(Obj::Str(s)) => Some(&s.bytes),
            _ => None,
        }
    }

    /// Append bytes to a string in place, growing geometrically.
    #[cfg(feature = "string")]
    pub fn string_append(
        &mut self,
        pool: &mut MemoryPool,
        r: Ref,
        tail: &[u8],
    ) -> Result<(), RuntimeErrorKind> {
        let (len, cap) = match self.get(r) {
            Some(Obj::Str(s)) => (s.bytes.len(), s.cap),
            _ => return Err(RuntimeErrorKind::TypeError),
        };
        let need = len + tail.len();
        if need > cap {
            let new_cap = need.next_power_of_two().max(8);
            self.grow(pool, r, RString::footprint(new_cap))?;
            if let Some(Obj::Str(s)) = self.get_mut(r) {
                s.cap = new_cap;
            }
        }
        if let Some(Obj::Str(s)) = self.get_mut(r) {
            s.bytes.extend_from_slice(tail);
        }
        Ok(())
    }

    // ----- hashes -------------------------------------------------------

    /// Position of `key` in a hash's entry sequence, by linear probe.
    pub fn hash_index(&self, r: Ref, key: &Value) -> Option<usize> {
        let entries = match self.get(r) {
            Some(Obj::Hash(h)) => &h.entries,
            _ => return None,
        };
        entries
            .iter()
            .step_by(2)
            .position(|k| value::compare(self, k, key) == Ordering::Equal)
            .map(|i| i * 2)
    }

    /// Value stored under `key`, by copy.
    pub fn hash_get(&self, r: Ref, key: &Value) -> Option<Value> {
        let idx = self.hash_index(r, key)?;
        match self.get(r) {
            Some(Obj::Hash(h)) => h.entries.get(idx + 1).copied(),
            _ => None,
        }
    }

    /// Insert or overwrite; keys keep insertion order. Takes ownership of
    /// `key` and `v`, releasing whatever they replace.
    pub fn hash_set(
        &mut self,
        pool: &mut MemoryPool,
        r: Ref,
        key: Value,
        v: Value,
    ) -> Result<(), RuntimeErrorKind> {
        if let Some(idx) = self.hash_index(r, &key) {
            let old = match self.get_mut(r) {
                Some(Obj::Hash(h)) => core::mem::replace(&mut h.entries[idx + 1], v),
                _ => return Err(RuntimeErrorKind::TypeError),
            };
            // the stored key stays; the probe copy is surplus
            self.release(pool, &key);
            self.release(pool, &old);
            return Ok(());
        }
        let (len, cap) = match self.get(r) {
            Some(Obj::Hash(h)) => (h.entries.len(), h.cap),
            _ => return Err(RuntimeErrorKind::TypeError),
        };
        if len + 2 > cap {
            let new_cap = (cap * 2).max(8);
            self.grow(pool, r, RHash::footprint(new_cap))?;
            if let Some(Obj::Hash(h)) = self.get_mut(r) {
                h.cap = new_cap;
            }
        }
        if let Some(Obj::Hash(h)) = self.get_mut(r) {
            h.entries.push(key);
            h.entries.push(v);
        }
        Ok(())
    }

    /// Number of key/value pairs.
    pub fn hash_len(&self, r: Ref) -> Option<usize> {
        match self.get(r) {
            Some(Obj::Hash(h)) => Some(h.entries.len() / 2),
            _ => None,
        }
    }

    // ----- instances ----------------------------------------------------

    /// Instance variable copy; the caller duplicates if it keeps the value.
    pub fn iv_get(&self, r: Ref, name: SymId) -> Option<Value> {
        match self.get(r) {
            Some(Obj::Instance(i)) => i
                .ivars
                .iter()
                .find(|(s, _)| *s == name)
                .map(|(_, v)| *v),
            _ => None,
        }
    }

    /// Set an instance variable, taking ownership of `v` and releasing any
    /// replaced value.
    pub fn iv_set(
        &mut self,
        pool: &mut MemoryPool,
        r: Ref,
        name: SymId,
        v: Value,
    ) -> Result<(), RuntimeErrorKind> {
        let existing = match self.get(r) {
            Some(Obj::Instance(i)) => i.ivars.iter().position(|(s, _)| *s == name),
            _ => return Err(RuntimeErrorKind::TypeError),
        };
        match existing {
            Some(idx) => {
                let old = match self.get_mut(r) {
                    Some(Obj::Instance(i)) => core::mem::replace(&mut i.ivars[idx].1, v),
                    _ => return Err(RuntimeErrorKind::TypeError),
                };
                self.release(pool, &old);
            }
            None => {
                let count = match self.get(r) {
                    Some(Obj::Instance(i)) => i.ivars.len(),
                    _ => return Err(RuntimeErrorKind::TypeError),
                };
                self.grow(pool, r, RInstance::footprint(count + 1))?;
                if let Some(Obj::Instance(i)) = self.get_mut(r) {
                    i.ivars.push((name, v));
                }
            }
        }
        Ok(())
    }

    /// Class of an instance.
    pub fn instance_class(&self, r: Ref) -> Option<ClassId> {
        match self.get(r) {
            Some(Obj::Instance(i)) => Some(i.class),
            _ => None,
        }
    }

    /// Clone of a proc's callable record.
    pub fn proc_record(&self, r: Ref) -> Option<RProc> {
        match self.get(r) {
            Some(Obj::Proc(p)) => Some(p.clone()),
            _ => None,
        }
    }

    // ----- comparison ---------------------------------------------------

    fn compare_seq<'a>(
        &self,
        a: impl Iterator<Item = &'a Value>,
        b: impl Iterator<Item = &'a Value>,
    ) -> Ordering {
        for pair in a.zip_longest(b) {
            match pair {
                itertools::EitherOrBoth::Both(x, y) => {
                    let ord = value::compare(self, x, y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                itertools::EitherOrBoth::Left(_) => return Ordering::Greater,
                itertools::EitherOrBoth::Right(_) => return Ordering::Less,
            }
        }
        Ordering::Equal
    }

    fn hash_value_for<'a>(&self, h: &'a RHash, key: &Value) -> Option<&'a Value> {
        h.entries
            .iter()
            .tuples()
            .find(|&(k, _)| value::compare(self, k, key) == Ordering::Equal)
            .map(|(_, v)| v)
    }

    // hashes order by key set, independent of insertion order, then by
    // the values stored under each key
    fn compare_hashes(&self, x: &RHash, y: &RHash) -> Ordering {
        let mut xk: Vec<&Value> = x.entries.iter().step_by(2).collect();
        let mut yk: Vec<&Value> = y.entries.iter().step_by(2).collect();
        xk.sort_by(|&a, &b| value::compare(self, a, b));
        yk.sort_by(|&a, &b| value::compare(self, a, b));
        let keys = self.compare_seq(xk.iter().copied(), yk.iter().copied());
        if keys != Ordering::Equal {
            return keys;
        }
        for k in xk {
            let xv = self.hash_value_for(x, k).unwrap_or(&Value::Nil);
            let yv = self.hash_value_for(y, k).unwrap_or(&Value::Nil);
            let ord = value::compare(self, xv, yv);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Content comparison of two heap objects of the same kind.
    pub fn compare_objects(&self, a: Ref, b: Ref) -> Ordering {
        match (self.get(a), self.get(b)) {
            (Some(Obj::Array(x)), Some(Obj::Array(y))) => {
                self.compare_seq(x.data.iter(), y.data.iter())
            }
            #[cfg(feature = "string")]
            (Some(Obj::Str(x)), Some(Obj::Str(y))) => x.bytes.cmp(&y.bytes),
            (Some(Obj::Range(x)), Some(Obj::Range(y))) => {
                value::compare(self, &x.first, &y.first)
                    .then_with(|| value::compare(self, &x.last, &y.last))
                    .then_with(|| x.exclusive.cmp(&y.exclusive))
            }
            (Some(Obj::Hash(x)), Some(Obj::Hash(y))) => self.compare_hashes(x, y),
            _ => a.cmp(&b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use quickcheck_macros::quickcheck;

    fn fixture() -> (MemoryPool, Heap) {
        (MemoryPool::new(8192), Heap::new())
    }

    #[quickcheck]
    fn dup_release_pairs_restore_the_count(pairs: u8) {
        let (mut pool, mut heap) = fixture();
        let baseline = pool.statistics().used;
        let v = heap
            .alloc_array(&mut pool, 1, vec![Value::Fixnum(1)])
            .unwrap();
        let r = v.heap_ref().unwrap();
        for _ in 0..pairs {
            heap.dup(&v);
        }
        assert_eq!(heap.ref_count(r), 1 + pairs as u32);
        for _ in 0..pairs {
            heap.release(&mut pool, &v);
        }
        assert_eq!(heap.ref_count(r), 1);
        heap.release(&mut pool, &v);
        assert_eq!(heap.ref_count(r), 0);
        assert_eq!(heap.live_count(), 0);
        assert_eq!(pool.statistics().used, baseline);
    }

    #[test]
    fn releasing_a_container_releases_its_children() {
        let (mut pool, mut heap) = fixture();
        let child = heap.alloc_array(&mut pool, 1, vec![]).unwrap();
        heap.dup(&child); // one count for us, one for the parent
        let parent = heap.alloc_array(&mut pool, 1, vec![child]).unwrap();
        heap.release(&mut pool, &parent);
        assert_eq!(heap.ref_count(child.heap_ref().unwrap()), 1);
        heap.release(&mut pool, &child);
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn array_push_grows_and_charges_the_pool() {
        let (mut pool, mut heap) = fixture();
        let v = heap.alloc_array(&mut pool, 1, vec![]).unwrap();
        let r = v.heap_ref().unwrap();
        let before = pool.statistics().used;
        for i in 0..32 {
            heap.array_push(&mut pool, r, Value::Fixnum(i)).unwrap();
        }
        assert_eq!(heap.array_len(r), Some(32));
        assert!(pool.statistics().used > before);
        heap.release(&mut pool, &v);
        assert_eq!(pool.statistics().used, 0);
    }

    #[test]
    fn array_growth_fails_cleanly_when_the_pool_runs_out() {
        let mut pool = MemoryPool::new(256);
        let mut heap = Heap::new();
        let v = heap.alloc_array(&mut pool, 1, vec![]).unwrap();
        let r = v.heap_ref().unwrap();
        let mut failed = false;
        for i in 0..10_000 {
            if heap.array_push(&mut pool, r, Value::Fixnum(i)).is_err() {
                failed = true;
                break;
            }
        }
        assert!(failed);
        // the array is still usable after the failed growth
        assert!(heap.array_len(r).unwrap() > 0);
    }

    #[test]
    fn hash_keeps_insertion_order_and_overwrites() {
        let (mut pool, mut heap) = fixture();
        let v = heap.alloc_hash(&mut pool, 1, vec![]).unwrap();
        let r = v.heap_ref().unwrap();
        heap.hash_set(&mut pool, r, Value::Fixnum(2), Value::Fixnum(20))
            .unwrap();
        heap.hash_set(&mut pool, r, Value::Fixnum(1), Value::Fixnum(10))
            .unwrap();
        heap.hash_set(&mut pool, r, Value::Fixnum(2), Value::Fixnum(22))
            .unwrap();
        assert_eq!(heap.hash_len(r), Some(2));
        assert_eq!(heap.hash_get(r, &Value::Fixnum(2)), Some(Value::Fixnum(22)));
        assert_eq!(heap.hash_index(r, &Value::Fixnum(2)), Some(0));
    }

    #[test]
    fn hashes_compare_as_key_sets_regardless_of_insertion_order() {
        let (mut pool, mut heap) = fixture();
        let a = heap.alloc_hash(&mut pool, 1, vec![]).unwrap();
        let b = heap.alloc_hash(&mut pool, 1, vec![]).unwrap();
        let (ra, rb) = (a.heap_ref().unwrap(), b.heap_ref().unwrap());
        heap.hash_set(&mut pool, ra, Value::Fixnum(1), Value::Fixnum(10))
            .unwrap();
        heap.hash_set(&mut pool, ra, Value::Fixnum(2), Value::Fixnum(20))
            .unwrap();
        heap.hash_set(&mut pool, rb, Value::Fixnum(2), Value::Fixnum(20))
            .unwrap();
        heap.hash_set(&mut pool, rb, Value::Fixnum(1), Value::Fixnum(10))
            .unwrap();
        assert_eq!(value::compare(&heap, &a, &b), Ordering::Equal);

        // same key set, one differing value
        heap.hash_set(&mut pool, rb, Value::Fixnum(2), Value::Fixnum(21))
            .unwrap();
        assert_ne!(value::compare(&heap, &a, &b), Ordering::Equal);

        // missing key orders by key set, not values
        let c = heap.alloc_hash(&mut pool, 1, vec![]).unwrap();
        let rc = c.heap_ref().unwrap();
        heap.hash_set(&mut pool, rc, Value::Fixnum(1), Value::Fixnum(10))
            .unwrap();
        assert_eq!(value::compare(&heap, &c, &a), Ordering::Less);
        assert_eq!(value::compare(&heap, &a, &c), Ordering::Greater);
    }

    #[test]
    fn free_all_reclaims_only_the_dead_vms_objects() {
        let (mut pool, mut heap) = fixture();
        let mine = heap.alloc_array(&mut pool, 1, vec![]).unwrap();
        let theirs = heap.alloc_array(&mut pool, 2, vec![]).unwrap();
        heap.free_all(&mut pool, 1);
        assert_eq!(heap.ref_count(mine.heap_ref().unwrap()), 0);
        assert_eq!(heap.ref_count(theirs.heap_ref().unwrap()), 1);
        heap.release(&mut pool, &theirs);
        assert_eq!(pool.statistics().used, 0);
    }

    #[cfg(feature = "string")]
    #[test]
    fn string_append_extends_in_place() {
        let (mut pool, mut heap) = fixture();
        let v = heap
            .alloc_string(&mut pool, 1, b"mica".to_vec())
            .unwrap();
        let r = v.heap_ref().unwrap();
        heap.string_append(&mut pool, r, b" vm").unwrap();
        assert_eq!(heap.string_bytes(r), Some(&b"mica vm"[..]));
    }
}
