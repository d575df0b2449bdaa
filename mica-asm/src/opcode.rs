use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
/// Operation codes of the 32-bit instruction word.
///
/// The numbering is part of the bytecode format; gaps in the sequence
/// belong to operations of the source language's full dialect that this
/// interpreter does not execute. An unrecognized byte decodes to
/// [`Opcode::UNKNOWN`] and aborts the executing VM.
pub enum Opcode {
    /// No operation.
    NOP = 0x00,
    /// `R(A) := R(B)`
    MOVE = 0x01,
    /// `R(A) := Pool(Bx)`
    LOADL = 0x02,
    /// `R(A) := sBx`
    LOADI = 0x03,
    /// `R(A) := Syms(Bx)`
    LOADSYM = 0x04,
    /// `R(A) := nil`
    LOADNIL = 0x05,
    /// `R(A) := self`
    LOADSELF = 0x06,
    /// `R(A) := true`
    LOADT = 0x07,
    /// `R(A) := false`
    LOADF = 0x08,
    /// `R(A) := getglobal(Syms(Bx))`
    GETGLOBAL = 0x09,
    /// `setglobal(Syms(Bx), R(A))`
    SETGLOBAL = 0x0a,
    /// `R(A) := ivget(Syms(Bx))` — the symbol carries a leading `@`.
    GETIV = 0x0d,
    /// `ivset(Syms(Bx), R(A))`
    SETIV = 0x0e,
    /// `R(A) := constget(Syms(Bx))`
    GETCONST = 0x11,
    /// `constset(Syms(Bx), R(A))`
    SETCONST = 0x12,
    /// `R(A) := R(A)::Syms(Bx)` — resolved in the flat constant table.
    GETMCNST = 0x13,
    /// `R(A) := uvget(B, C)` — lexical upvar at register `B`, depth `C`.
    GETUPVAR = 0x15,
    /// `uvset(B, C, R(A))`
    SETUPVAR = 0x16,
    /// `pc += sBx`, relative to this instruction.
    JMP = 0x17,
    /// `if R(A) then pc += sBx`
    JMPIF = 0x18,
    /// `if !R(A) then pc += sBx`
    JMPNOT = 0x19,
    /// `R(A) := call(R(A), Syms(B), R(A+1), ..., R(A+C))`
    SEND = 0x20,
    /// [`SEND`](Opcode::SEND) with a block argument at `R(A+C+1)`.
    SENDB = 0x21,
    /// Enter the proc held in `self`.
    CALL = 0x23,
    /// `R(A) := super(R(A+1), ..., R(A+C))`
    SUPER = 0x24,
    /// Argument-array fetch for block invocation; executed as a no-op.
    ARGARY = 0x25,
    /// Marshal the received arguments against the signature packed in `Ax`.
    ENTER = 0x26,
    /// Return `R(A)`; `B` selects the return mode.
    RETURN = 0x29,
    /// `R(A) := block` from the environment `Bx` describes.
    BLKPUSH = 0x2b,
    /// `R(A) := R(A) + R(A+1)`
    ADD = 0x2c,
    /// `R(A) := R(A) + C`
    ADDI = 0x2d,
    /// `R(A) := R(A) - R(A+1)`
    SUB = 0x2e,
    /// `R(A) := R(A) - C`
    SUBI = 0x2f,
    /// `R(A) := R(A) * R(A+1)`
    MUL = 0x30,
    /// `R(A) := R(A) / R(A+1)`
    DIV = 0x31,
    /// `R(A) := R(A) == R(A+1)`
    EQ = 0x32,
    /// `R(A) := R(A) < R(A+1)`
    LT = 0x33,
    /// `R(A) := R(A) <= R(A+1)`
    LE = 0x34,
    /// `R(A) := R(A) > R(A+1)`
    GT = 0x35,
    /// `R(A) := R(A) >= R(A+1)`
    GE = 0x36,
    /// `R(A) := [R(B), ..., R(B+C-1)]`
    ARRAY = 0x37,
    /// `R(A) := str_dup(Pool(Bx))`
    STRING = 0x3d,
    /// `R(A) := R(A).concat(R(B))`
    STRCAT = 0x3e,
    /// `R(A) := {R(B): R(B+1), ..., R(B+2C-2): R(B+2C-1)}`
    HASH = 0x3f,
    /// `R(A) := lambda(Reps(Bz))`
    LAMBDA = 0x40,
    /// `R(A) := range(R(B), R(B+1), C)` — `C` non-zero excludes the end.
    RANGE = 0x41,
    /// `R(A) := newclass(Syms(B), R(A+1))`
    CLASS = 0x43,
    /// Execute `Reps(Bx)` with the class in `R(A)` as `self`.
    EXEC = 0x45,
    /// `R(A).define_method(Syms(B), R(A+1))`
    METHOD = 0x46,
    /// Singleton class fetch; not supported, executed as a no-op.
    SCLASS = 0x47,
    /// `R(A) := target_class`
    TCLASS = 0x48,
    /// Halt the VM and release its registers.
    STOP = 0x4a,
    /// Halt the VM without releasing its registers.
    ABORT = 0x4b,
    /// Catch-all for bytes outside the implemented set.
    UNKNOWN = 0x7f,
}

/// `RETURN` mode: ordinary method return.
pub const RETURN_NORMAL: usize = 0;
/// `RETURN` mode: block break.
pub const RETURN_BREAK: usize = 1;
/// `RETURN` mode: explicit `return` from within a block body.
pub const RETURN_RETURN: usize = 2;

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<u8> for Opcode {
    fn from(b: u8) -> Self {
        use Opcode::*;
        match b {
            0x00 => NOP,
            0x01 => MOVE,
            0x02 => LOADL,
            0x03 => LOADI,
            0x04 => LOADSYM,
            0x05 => LOADNIL,
            0x06 => LOADSELF,
            0x07 => LOADT,
            0x08 => LOADF,
            0x09 => GETGLOBAL,
            0x0a => SETGLOBAL,
            0x0d => GETIV,
            0x0e => SETIV,
            0x11 => GETCONST,
            0x12 => SETCONST,
            0x13 => GETMCNST,
            0x15 => GETUPVAR,
            0x16 => SETUPVAR,
            0x17 => JMP,
            0x18 => JMPIF,
            0x19 => JMPNOT,
            0x20 => SEND,
            0x21 => SENDB,
            0x23 => CALL,
            0x24 => SUPER,
            0x25 => ARGARY,
            0x26 => ENTER,
            0x29 => RETURN,
            0x2b => BLKPUSH,
            0x2c => ADD,
            0x2d => ADDI,
            0x2e => SUB,
            0x2f => SUBI,
            0x30 => MUL,
            0x31 => DIV,
            0x32 => EQ,
            0x33 => LT,
            0x34 => LE,
            0x35 => GT,
            0x36 => GE,
            0x37 => ARRAY,
            0x3d => STRING,
            0x3e => STRCAT,
            0x3f => HASH,
            0x40 => LAMBDA,
            0x41 => RANGE,
            0x43 => CLASS,
            0x45 => EXEC,
            0x46 => METHOD,
            0x47 => SCLASS,
            0x48 => TCLASS,
            0x4a => STOP,
            0x4b => ABORT,
            _ => UNKNOWN,
        }
    }
}
