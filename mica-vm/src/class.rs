//! Classes, method chains and procs.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::fmt;

use crate::irep::Irep;
use crate::symbol::SymId;

/// Index of a class in the registry. Classes are static: once defined they
/// live for the rest of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u16);

impl ClassId {
    pub(crate) const fn index(&self) -> usize {
        self.0 as usize
    }
}

/// Entry point of a host-defined method.
///
/// Built-ins receive the calling VM, the runtime and the receiver window;
/// they return by writing into the window's first register (see
/// [`Argv`](crate::builtins::Argv)).
pub type BuiltinFn = fn(&mut crate::vm::Vm, &mut crate::runtime::Runtime, crate::builtins::Argv);

/// Executable body of a method or proc.
#[derive(Clone)]
pub enum ProcBody {
    /// Host function.
    Builtin(BuiltinFn),
    /// Compiled bytecode unit.
    Irep(Rc<Irep>),
}

impl fmt::Debug for ProcBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcBody::Builtin(_) => f.write_str("ProcBody::Builtin"),
            ProcBody::Irep(_) => f.write_str("ProcBody::Irep"),
        }
    }
}

/// A callable bound to a symbol: either a host built-in or a bytecode
/// method, linked into a class's method chain or captured as a proc value.
#[derive(Debug, Clone)]
pub struct RProc {
    /// Bound method symbol.
    pub mid: SymId,
    /// The body to execute.
    pub body: ProcBody,
}

/// One class: interned name, optional superclass, method chain.
#[derive(Debug)]
pub struct Class {
    /// Interned class name.
    pub name: SymId,
    /// Parent in the single-inheritance hierarchy; `None` only for the
    /// root class.
    pub superclass: Option<ClassId>,
    procs: Vec<RProc>,
}

impl Class {
    /// The method chain, most recently defined first.
    pub fn procs(&self) -> &[RProc] {
        &self.procs
    }
}

/// Global class table with superclass-chain method lookup.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<Class>,
}

impl ClassRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing class of this name or chain a new one.
    pub fn define_class(&mut self, name: SymId, superclass: Option<ClassId>) -> ClassId {
        if let Some(id) = self.find_by_name(name) {
            return id;
        }
        self.classes.push(Class {
            name,
            superclass,
            procs: Vec::new(),
        });
        ClassId((self.classes.len() - 1) as u16)
    }

    /// Find a class by its interned name.
    pub fn find_by_name(&self, name: SymId) -> Option<ClassId> {
        self.classes
            .iter()
            .position(|c| c.name == name)
            .map(|i| ClassId(i as u16))
    }

    /// Borrow a class record.
    pub fn get(&self, id: ClassId) -> &Class {
        &self.classes[id.index()]
    }

    /// Prepend a method to a class's chain.
    ///
    /// One pass of deduplication runs at define time: an older method with
    /// the same symbol further down the chain is unlinked, so overriding
    /// frees the shadowed entry immediately.
    pub fn define_method(&mut self, cls: ClassId, m: RProc) {
        let procs = &mut self.classes[cls.index()].procs;
        procs.insert(0, m);
        if let Some(dup) = procs[1..].iter().position(|p| p.mid == procs[0].mid) {
            procs.remove(dup + 1);
        }
    }

    /// Walk the superclass chain from `cls` and return the first method
    /// bound to `mid`, together with its defining class.
    pub fn find_method(&self, cls: ClassId, mid: SymId) -> Option<(&RProc, ClassId)> {
        let mut cur = Some(cls);
        while let Some(id) = cur {
            let class = self.get(id);
            if let Some(p) = class.procs.iter().find(|p| p.mid == mid) {
                return Some((p, id));
            }
            cur = class.superclass;
        }
        None
    }

    /// Number of defined classes.
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether no class is defined yet.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    fn noop(_: &mut crate::vm::Vm, _: &mut crate::runtime::Runtime, _: crate::builtins::Argv) {}
    fn noop2(_: &mut crate::vm::Vm, _: &mut crate::runtime::Runtime, _: crate::builtins::Argv) {}

    fn method(mid: SymId) -> RProc {
        RProc {
            mid,
            body: ProcBody::Builtin(noop),
        }
    }

    #[test]
    fn define_class_is_idempotent_by_name() {
        let mut syms = SymbolTable::new();
        let mut reg = ClassRegistry::new();
        let name = syms.intern("Widget");
        let root = reg.define_class(syms.intern("Object"), None);
        let a = reg.define_class(name, Some(root));
        let b = reg.define_class(name, Some(root));
        assert_eq!(a, b);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn lookup_walks_the_superclass_chain() {
        let mut syms = SymbolTable::new();
        let mut reg = ClassRegistry::new();
        let root = reg.define_class(syms.intern("Object"), None);
        let mid_a = reg.define_class(syms.intern("A"), Some(root));
        let leaf = reg.define_class(syms.intern("B"), Some(mid_a));
        let hello = syms.intern("hello");
        reg.define_method(mid_a, method(hello));

        let (_, defined_in) = reg.find_method(leaf, hello).expect("inherited");
        assert_eq!(defined_in, mid_a);
        assert!(reg.find_method(root, hello).is_none());
    }

    #[test]
    fn subclass_override_wins_without_touching_the_parent() {
        let mut syms = SymbolTable::new();
        let mut reg = ClassRegistry::new();
        let root = reg.define_class(syms.intern("Object"), None);
        let parent = reg.define_class(syms.intern("A"), Some(root));
        let child = reg.define_class(syms.intern("B"), Some(parent));
        let hello = syms.intern("hello");
        reg.define_method(parent, method(hello));
        reg.define_method(
            child,
            RProc {
                mid: hello,
                body: ProcBody::Builtin(noop2),
            },
        );

        let (_, defined_in) = reg.find_method(child, hello).expect("overridden");
        assert_eq!(defined_in, child);
        assert_eq!(reg.get(parent).procs().len(), 1);
        assert_eq!(reg.get(child).procs().len(), 1);
    }

    #[test]
    fn redefinition_unlinks_the_shadowed_entry() {
        let mut syms = SymbolTable::new();
        let mut reg = ClassRegistry::new();
        let cls = reg.define_class(syms.intern("Object"), None);
        let hello = syms.intern("hello");
        let other = syms.intern("other");
        reg.define_method(cls, method(hello));
        reg.define_method(cls, method(other));
        reg.define_method(cls, method(hello));
        assert_eq!(reg.get(cls).procs().len(), 2);
        assert_eq!(reg.get(cls).procs()[0].mid, hello);
    }
}
