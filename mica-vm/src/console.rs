//! Console output and value rendering.
//!
//! Diagnostics and the `puts`/`print`/`p` built-ins all funnel through
//! [`Console`], which routes bytes to the host via the HAL.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use core::fmt;

use crate::class::ClassRegistry;
use crate::hal::Hal;
use crate::heap::{Heap, Obj};
use crate::symbol::SymbolTable;
use crate::value::Value;

/// Byte sink over the host console descriptor.
pub struct Console {
    hal: Box<dyn Hal>,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Console")
    }
}

impl Console {
    /// Host descriptor console bytes are written to.
    pub const STDOUT: i32 = 1;

    /// Wrap a HAL.
    pub fn new(hal: Box<dyn Hal>) -> Self {
        Self { hal }
    }

    /// Write raw bytes.
    pub fn write(&mut self, bytes: &[u8]) {
        self.hal.write(Self::STDOUT, bytes);
    }

    /// Write a string.
    pub fn print(&mut self, s: &str) {
        self.write(s.as_bytes());
    }

    /// Flush the console descriptor.
    pub fn flush(&mut self) {
        self.hal.flush(Self::STDOUT);
    }

    /// Direct HAL access (scheduler idling, host extensions).
    pub fn hal_mut(&mut self) -> &mut dyn Hal {
        &mut *self.hal
    }
}

// integral floats render with a trailing .1 digit, the way the source
// language prints them; f64::trunc lives in std, so go through a cast
#[cfg(feature = "float")]
fn format_float(f: f64) -> String {
    let integral = f.is_finite() && f.abs() < 1e15 && f == (f as i64) as f64;
    if integral {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

/// Render a value the way `puts` prints it.
pub fn to_s(heap: &Heap, symbols: &SymbolTable, classes: &ClassRegistry, v: &Value) -> String {
    match v {
        Value::Empty | Value::Nil => String::new(),
        #[cfg(feature = "string")]
        Value::Str(r) => match heap.string_bytes(*r) {
            Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            None => String::new(),
        },
        _ => inspect(heap, symbols, classes, v),
    }
}

/// Render a value the way `p` prints it.
pub fn inspect(heap: &Heap, symbols: &SymbolTable, classes: &ClassRegistry, v: &Value) -> String {
    match v {
        Value::Empty | Value::Nil => String::from("nil"),
        Value::False => String::from("false"),
        Value::True => String::from("true"),
        Value::Fixnum(n) => format!("{n}"),
        #[cfg(feature = "float")]
        Value::Float(f) => format_float(*f),
        Value::Symbol(s) => format!(":{}", symbols.name(*s).unwrap_or("?")),
        Value::Class(c) => {
            let name = classes.get(*c).name;
            String::from(symbols.name(name).unwrap_or("?"))
        }
        Value::Instance(r) => match heap.instance_class(*r) {
            Some(c) => {
                let name = classes.get(c).name;
                format!("#<{}>", symbols.name(name).unwrap_or("?"))
            }
            None => String::from("#<?>"),
        },
        Value::Proc(_) => String::from("#<Proc>"),
        #[cfg(feature = "string")]
        Value::Str(r) => match heap.string_bytes(*r) {
            Some(bytes) => format!("\"{}\"", String::from_utf8_lossy(bytes)),
            None => String::from("\"\""),
        },
        Value::Array(r) => match heap.get(*r) {
            Some(Obj::Array(a)) => {
                let mut out = String::from("[");
                for (i, e) in a.data.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&inspect(heap, symbols, classes, e));
                }
                out.push(']');
                out
            }
            _ => String::from("[]"),
        },
        Value::Hash(r) => match heap.get(*r) {
            Some(Obj::Hash(h)) => {
                let mut out = String::from("{");
                for (i, (k, val)) in h.pairs().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&inspect(heap, symbols, classes, k));
                    out.push_str("=>");
                    out.push_str(&inspect(heap, symbols, classes, val));
                }
                out.push('}');
                out
            }
            _ => String::from("{}"),
        },
        Value::Range(r) => match heap.get(*r) {
            Some(Obj::Range(rng)) => format!(
                "{}{}{}",
                inspect(heap, symbols, classes, &rng.first),
                if rng.exclusive { "..." } else { ".." },
                inspect(heap, symbols, classes, &rng.last),
            ),
            _ => String::from(".."),
        },
    }
}
