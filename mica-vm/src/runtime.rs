//! Process-global interpreter state and the embedding surface.
//!
//! Everything the VMs share — pool, heap, symbols, classes, globals,
//! constants, console — lives in one [`Runtime`] passed explicitly to
//! every entry point. The cooperative invariant protects it: only the
//! running VM executes, and built-ins never suspend mid-operation.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cmp::Ordering;

use hashbrown::HashMap;

use crate::builtins;
use crate::class::{BuiltinFn, ClassId, ClassRegistry, ProcBody, RProc};
use crate::console::Console;
use crate::consts::MAX_VM_COUNT;
use crate::error::{LoadError, VmError};
use crate::hal::Hal;
use crate::heap::Heap;
use crate::irep::Irep;
use crate::loader;
use crate::memory::{MemoryPool, Statistics, GLOBAL_VM_ID};
use crate::symbol::{SymId, SymbolTable};
use crate::value::{self, Value};

use alloc::rc::Rc;

/// Classes and symbols resolved once at startup.
#[derive(Debug, Clone, Copy)]
pub struct WellKnown {
    /// Root of the hierarchy; holds the built-in kernel.
    pub object: ClassId,
    /// Class of `nil`.
    pub nil_class: ClassId,
    /// Class of `true`.
    pub true_class: ClassId,
    /// Class of `false`.
    pub false_class: ClassId,
    /// Class of fixnums.
    pub integer: ClassId,
    /// Class of floats.
    #[cfg(feature = "float")]
    pub float: ClassId,
    /// Class of symbols.
    pub symbol: ClassId,
    /// Class of procs.
    pub proc: ClassId,
    /// Class of strings.
    #[cfg(feature = "string")]
    pub string: ClassId,
    /// Class of arrays.
    pub array: ClassId,
    /// Class of hashes.
    pub hash: ClassId,
    /// Class of ranges.
    pub range: ClassId,
    /// Math module-class.
    #[cfg(feature = "math")]
    pub math: ClassId,
    /// `call`
    pub sym_call: SymId,
    /// `+`
    pub sym_plus: SymId,
    /// `-`
    pub sym_minus: SymId,
    /// `*`
    pub sym_star: SymId,
    /// `/`
    pub sym_slash: SymId,
    /// `==`
    pub sym_eq: SymId,
    /// `<`
    pub sym_lt: SymId,
    /// `<=`
    pub sym_le: SymId,
    /// `>`
    pub sym_gt: SymId,
    /// `>=`
    pub sym_ge: SymId,
}

/// Process-global interpreter state.
#[derive(Debug)]
pub struct Runtime {
    /// Fixed-pool allocator; the capacity authority for runtime objects.
    pub pool: MemoryPool,
    /// Refcounted object heap.
    pub heap: Heap,
    /// Process-wide symbol table.
    pub symbols: SymbolTable,
    /// Class registry.
    pub classes: ClassRegistry,
    /// Global variable store, shared by every VM.
    pub globals: HashMap<SymId, Value>,
    /// Constant store; class constants land here too.
    pub consts: HashMap<SymId, Value>,
    /// Console routed through the host HAL.
    pub console: Console,
    /// Startup-resolved classes and symbols.
    pub wk: WellKnown,
    vm_id_bitmap: u32,
}

impl Runtime {
    /// Initialize the interpreter over a `pool_size`-byte memory budget.
    pub fn new(mut hal: Box<dyn Hal>, pool_size: usize) -> Result<Self, VmError> {
        hal.init();
        let mut symbols = SymbolTable::new();
        let mut classes = ClassRegistry::new();
        let mut consts = HashMap::new();

        let class = |classes: &mut ClassRegistry,
                         consts: &mut HashMap<SymId, Value>,
                         symbols: &mut SymbolTable,
                         name: &str,
                         superclass: Option<ClassId>|
         -> Result<ClassId, VmError> {
            let sym = symbols.intern(name);
            if !sym.is_valid() {
                return Err(VmError::SymbolTableFull);
            }
            let id = classes.define_class(sym, superclass);
            consts.insert(sym, Value::Class(id));
            Ok(id)
        };

        let object = class(&mut classes, &mut consts, &mut symbols, "Object", None)?;
        let nil_class = class(&mut classes, &mut consts, &mut symbols, "NilClass", Some(object))?;
        let true_class = class(&mut classes, &mut consts, &mut symbols, "TrueClass", Some(object))?;
        let false_class =
            class(&mut classes, &mut consts, &mut symbols, "FalseClass", Some(object))?;
        let integer = class(&mut classes, &mut consts, &mut symbols, "Integer", Some(object))?;
        #[cfg(feature = "float")]
        let float = class(&mut classes, &mut consts, &mut symbols, "Float", Some(object))?;
        let symbol = class(&mut classes, &mut consts, &mut symbols, "Symbol", Some(object))?;
        let proc = class(&mut classes, &mut consts, &mut symbols, "Proc", Some(object))?;
        #[cfg(feature = "string")]
        let string = class(&mut classes, &mut consts, &mut symbols, "String", Some(object))?;
        let array = class(&mut classes, &mut consts, &mut symbols, "Array", Some(object))?;
        let hash = class(&mut classes, &mut consts, &mut symbols, "Hash", Some(object))?;
        let range = class(&mut classes, &mut consts, &mut symbols, "Range", Some(object))?;
        #[cfg(feature = "math")]
        let math = class(&mut classes, &mut consts, &mut symbols, "Math", Some(object))?;

        let wk = WellKnown {
            object,
            nil_class,
            true_class,
            false_class,
            integer,
            #[cfg(feature = "float")]
            float,
            symbol,
            proc,
            #[cfg(feature = "string")]
            string,
            array,
            hash,
            range,
            #[cfg(feature = "math")]
            math,
            sym_call: symbols.intern("call"),
            sym_plus: symbols.intern("+"),
            sym_minus: symbols.intern("-"),
            sym_star: symbols.intern("*"),
            sym_slash: symbols.intern("/"),
            sym_eq: symbols.intern("=="),
            sym_lt: symbols.intern("<"),
            sym_le: symbols.intern("<="),
            sym_gt: symbols.intern(">"),
            sym_ge: symbols.intern(">="),
        };

        let mut rt = Self {
            pool: MemoryPool::new(pool_size),
            heap: Heap::new(),
            symbols,
            classes,
            globals: HashMap::new(),
            consts,
            console: Console::new(hal),
            wk,
            vm_id_bitmap: 0,
        };
        builtins::install(&mut rt)?;
        tracing::debug!(pool = pool_size, "runtime initialized");
        Ok(rt)
    }

    /// Intern a symbol name.
    pub fn intern(&mut self, name: &str) -> SymId {
        self.symbols.intern(name)
    }

    /// Symbol name with a placeholder fallback.
    pub fn sym_name(&self, id: SymId) -> &str {
        self.symbols.name(id).unwrap_or("?")
    }

    /// Take one more reference to a value.
    pub fn dup(&mut self, v: &Value) {
        self.heap.dup(v);
    }

    /// Drop one reference to a value.
    pub fn release(&mut self, v: &Value) {
        let Self { heap, pool, .. } = self;
        heap.release(pool, v);
    }

    /// Total-order comparison (see [`value::compare`]).
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        value::compare(&self.heap, a, b)
    }

    /// The class a method search on `v` starts from.
    pub fn class_of(&self, v: &Value) -> ClassId {
        match v {
            Value::Empty | Value::Nil => self.wk.nil_class,
            Value::True => self.wk.true_class,
            Value::False => self.wk.false_class,
            Value::Fixnum(_) => self.wk.integer,
            #[cfg(feature = "float")]
            Value::Float(_) => self.wk.float,
            Value::Symbol(_) => self.wk.symbol,
            Value::Class(c) => *c,
            Value::Instance(r) => self.heap.instance_class(*r).unwrap_or(self.wk.object),
            Value::Proc(_) => self.wk.proc,
            Value::Array(_) => self.wk.array,
            #[cfg(feature = "string")]
            Value::Str(_) => self.wk.string,
            Value::Range(_) => self.wk.range,
            Value::Hash(_) => self.wk.hash,
        }
    }

    /// Define (or look up) a class and bind it as a constant.
    pub fn define_class(
        &mut self,
        name: &str,
        superclass: Option<ClassId>,
    ) -> Result<ClassId, VmError> {
        let sym = self.symbols.intern(name);
        if !sym.is_valid() {
            return Err(VmError::SymbolTableFull);
        }
        let id = self
            .classes
            .define_class(sym, superclass.or(Some(self.wk.object)));
        self.consts.insert(sym, Value::Class(id));
        Ok(id)
    }

    /// Register a host built-in on a class.
    pub fn define_method(
        &mut self,
        cls: ClassId,
        name: &str,
        f: BuiltinFn,
    ) -> Result<(), VmError> {
        let mid = self.symbols.intern(name);
        if !mid.is_valid() {
            return Err(VmError::SymbolTableFull);
        }
        self.classes.define_method(
            cls,
            RProc {
                mid,
                body: ProcBody::Builtin(f),
            },
        );
        Ok(())
    }

    /// Parse a bytecode container, interning its symbols.
    pub fn load(&mut self, blob: &[u8]) -> Result<Rc<Irep>, LoadError> {
        loader::load(&mut self.symbols, blob)
    }

    // ----- object constructors -----------------------------------------

    /// New instance of `cls`, owned by `vm_id`.
    pub fn new_instance(&mut self, vm_id: u8, cls: ClassId) -> Option<Value> {
        let Self { heap, pool, .. } = self;
        heap.alloc_instance(pool, vm_id, cls)
    }

    /// New array owning `values`.
    pub fn new_array(&mut self, vm_id: u8, values: Vec<Value>) -> Option<Value> {
        let Self { heap, pool, .. } = self;
        heap.alloc_array(pool, vm_id, values)
    }

    /// New string owning `bytes`.
    #[cfg(feature = "string")]
    pub fn new_string(&mut self, vm_id: u8, bytes: Vec<u8>) -> Option<Value> {
        let Self { heap, pool, .. } = self;
        heap.alloc_string(pool, vm_id, bytes)
    }

    /// New hash owning a flat entry sequence.
    pub fn new_hash(&mut self, vm_id: u8, entries: Vec<Value>) -> Option<Value> {
        let Self { heap, pool, .. } = self;
        heap.alloc_hash(pool, vm_id, entries)
    }

    /// New range owning its endpoints.
    pub fn new_range(
        &mut self,
        vm_id: u8,
        first: Value,
        last: Value,
        exclusive: bool,
    ) -> Option<Value> {
        let Self { heap, pool, .. } = self;
        heap.alloc_range(pool, vm_id, first, last, exclusive)
    }

    /// New proc object.
    pub fn new_proc(&mut self, vm_id: u8, p: RProc) -> Option<Value> {
        let Self { heap, pool, .. } = self;
        heap.alloc_proc(pool, vm_id, p)
    }

    // ----- globals and constants ----------------------------------------

    /// Store a global, taking ownership of `v`.
    ///
    /// Heap values are retagged process-global so a writer VM's teardown
    /// does not sweep them out from under other readers.
    pub fn set_global(&mut self, name: SymId, v: Value) {
        {
            let Self { heap, pool, .. } = self;
            heap.retag(pool, &v, GLOBAL_VM_ID);
        }
        if let Some(old) = self.globals.insert(name, v) {
            self.release(&old);
        }
    }

    /// Read a global by copy; the caller duplicates if it keeps the value.
    pub fn get_global(&self, name: SymId) -> Option<Value> {
        self.globals.get(&name).copied()
    }

    /// Store a constant, taking ownership of `v`.
    pub fn set_const(&mut self, name: SymId, v: Value) {
        {
            let Self { heap, pool, .. } = self;
            heap.retag(pool, &v, GLOBAL_VM_ID);
        }
        if let Some(old) = self.consts.insert(name, v) {
            self.release(&old);
        }
    }

    /// Read a constant by copy.
    pub fn get_const(&self, name: SymId) -> Option<Value> {
        self.consts.get(&name).copied()
    }

    // ----- VM lifecycle -------------------------------------------------

    /// Claim a VM id from the bitmap; ids start at 1 (0 is process-global).
    pub fn assign_vm_id(&mut self) -> Option<u8> {
        for id in 1..=MAX_VM_COUNT as u8 {
            let bit = 1u32 << id;
            if self.vm_id_bitmap & bit == 0 {
                self.vm_id_bitmap |= bit;
                return Some(id);
            }
        }
        None
    }

    /// Return a VM id and reclaim everything still tagged with it.
    pub fn release_vm(&mut self, id: u8) {
        {
            let Self { heap, pool, .. } = self;
            heap.free_all(pool, id);
        }
        self.pool.free_all(id);
        self.vm_id_bitmap &= !(1u32 << id);
        tracing::debug!(vm = id, "vm resources reclaimed");
    }

    /// Pool usage snapshot.
    pub fn statistics(&self) -> Statistics {
        self.pool.statistics()
    }

    /// Release everything the stores still reference.
    pub fn cleanup(&mut self) {
        let globals: Vec<Value> = self.globals.drain().map(|(_, v)| v).collect();
        let consts: Vec<Value> = self.consts.drain().map(|(_, v)| v).collect();
        for v in globals.iter().chain(consts.iter()) {
            self.release(v);
        }
    }
}
