//! Constructors producing raw instruction words.
//!
//! These are the write side of [`Instruction`](crate::Instruction): each
//! function packs one operation into its encoding shape. Hosts and tests
//! use them to assemble code sequences in memory without going through a
//! compiler.

use crate::{Instruction, Opcode};

const fn abc(op: Opcode, a: u32, b: u32, c: u32) -> u32 {
    ((a & 0x1ff) << 23) | ((b & 0x1ff) << 14) | ((c & 0x7f) << 7) | (op as u32 & 0x7f)
}

const fn abx(op: Opcode, a: u32, bx: u32) -> u32 {
    ((a & 0x1ff) << 23) | ((bx & 0xffff) << 7) | (op as u32 & 0x7f)
}

const fn asbx(op: Opcode, a: u32, sbx: i32) -> u32 {
    abx(op, a, (sbx + Instruction::SBX_BIAS) as u32)
}

const fn ax(op: Opcode, ax: u32) -> u32 {
    ((ax & 0x01ff_ffff) << 7) | (op as u32 & 0x7f)
}

/// `NOP`
pub const fn nop() -> u32 {
    abc(Opcode::NOP, 0, 0, 0)
}

/// `R(a) := R(b)`
pub const fn move_(a: u8, b: u8) -> u32 {
    abc(Opcode::MOVE, a as u32, b as u32, 0)
}

/// `R(a) := Pool(bx)`
pub const fn loadl(a: u8, bx: u16) -> u32 {
    abx(Opcode::LOADL, a as u32, bx as u32)
}

/// `R(a) := value`
pub const fn loadi(a: u8, value: i32) -> u32 {
    asbx(Opcode::LOADI, a as u32, value)
}

/// `R(a) := Syms(bx)`
pub const fn loadsym(a: u8, bx: u16) -> u32 {
    abx(Opcode::LOADSYM, a as u32, bx as u32)
}

/// `R(a) := nil`
pub const fn loadnil(a: u8) -> u32 {
    abc(Opcode::LOADNIL, a as u32, 0, 0)
}

/// `R(a) := self`
pub const fn loadself(a: u8) -> u32 {
    abc(Opcode::LOADSELF, a as u32, 0, 0)
}

/// `R(a) := true`
pub const fn loadt(a: u8) -> u32 {
    abc(Opcode::LOADT, a as u32, 0, 0)
}

/// `R(a) := false`
pub const fn loadf(a: u8) -> u32 {
    abc(Opcode::LOADF, a as u32, 0, 0)
}

/// `R(a) := getglobal(Syms(bx))`
pub const fn getglobal(a: u8, bx: u16) -> u32 {
    abx(Opcode::GETGLOBAL, a as u32, bx as u32)
}

/// `setglobal(Syms(bx), R(a))`
pub const fn setglobal(a: u8, bx: u16) -> u32 {
    abx(Opcode::SETGLOBAL, a as u32, bx as u32)
}

/// `R(a) := ivget(Syms(bx))`
pub const fn getiv(a: u8, bx: u16) -> u32 {
    abx(Opcode::GETIV, a as u32, bx as u32)
}

/// `ivset(Syms(bx), R(a))`
pub const fn setiv(a: u8, bx: u16) -> u32 {
    abx(Opcode::SETIV, a as u32, bx as u32)
}

/// `R(a) := constget(Syms(bx))`
pub const fn getconst(a: u8, bx: u16) -> u32 {
    abx(Opcode::GETCONST, a as u32, bx as u32)
}

/// `constset(Syms(bx), R(a))`
pub const fn setconst(a: u8, bx: u16) -> u32 {
    abx(Opcode::SETCONST, a as u32, bx as u32)
}

/// `R(a) := R(a)::Syms(bx)`
pub const fn getmcnst(a: u8, bx: u16) -> u32 {
    abx(Opcode::GETMCNST, a as u32, bx as u32)
}

/// `R(a) := uvget(b, depth)`
pub const fn getupvar(a: u8, b: u8, depth: u8) -> u32 {
    abc(Opcode::GETUPVAR, a as u32, b as u32, depth as u32)
}

/// `uvset(b, depth, R(a))`
pub const fn setupvar(a: u8, b: u8, depth: u8) -> u32 {
    abc(Opcode::SETUPVAR, a as u32, b as u32, depth as u32)
}

/// `pc += offset`
pub const fn jmp(offset: i32) -> u32 {
    asbx(Opcode::JMP, 0, offset)
}

/// `if R(a) then pc += offset`
pub const fn jmpif(a: u8, offset: i32) -> u32 {
    asbx(Opcode::JMPIF, a as u32, offset)
}

/// `if !R(a) then pc += offset`
pub const fn jmpnot(a: u8, offset: i32) -> u32 {
    asbx(Opcode::JMPNOT, a as u32, offset)
}

/// `R(a) := call(R(a), Syms(b), nargs)`
pub const fn send(a: u8, b: u8, nargs: u8) -> u32 {
    abc(Opcode::SEND, a as u32, b as u32, nargs as u32)
}

/// [`send`] with a block argument at `R(a + nargs + 1)`.
pub const fn sendb(a: u8, b: u8, nargs: u8) -> u32 {
    abc(Opcode::SENDB, a as u32, b as u32, nargs as u32)
}

/// Enter the proc held in `self`.
pub const fn call() -> u32 {
    abc(Opcode::CALL, 0, 0, 0)
}

/// `R(a) := super(R(a+1), ..., R(a+nargs))`
pub const fn super_(a: u8, nargs: u8) -> u32 {
    abc(Opcode::SUPER, a as u32, 0, nargs as u32)
}

/// Argument-array fetch (executed as a no-op).
pub const fn argary(a: u8, bx: u16) -> u32 {
    abx(Opcode::ARGARY, a as u32, bx as u32)
}

/// `ENTER` with a fully packed signature.
///
/// Fields, in order: mandatory args, optional args, rest flag, trailing
/// mandatory args, keyword args, keyword-dict flag, block flag.
pub const fn enter_sig(m1: u8, o: u8, r: u8, m2: u8, k: u8, d: u8, b: u8) -> u32 {
    ax(
        Opcode::ENTER,
        ((m1 as u32 & 0x1f) << 18)
            | ((o as u32 & 0x1f) << 13)
            | ((r as u32 & 1) << 12)
            | ((m2 as u32 & 0x1f) << 7)
            | ((k as u32 & 0x1f) << 2)
            | ((d as u32 & 1) << 1)
            | (b as u32 & 1),
    )
}

/// `ENTER` for the common signature of `m` mandatory and `o` optional args.
pub const fn enter(m: u8, o: u8) -> u32 {
    enter_sig(m, o, 0, 0, 0, 0, 0)
}

/// Return `R(a)` with the given mode (see [`RETURN_NORMAL`][crate::RETURN_NORMAL]).
pub const fn ret(a: u8, mode: usize) -> u32 {
    abc(Opcode::RETURN, a as u32, mode as u32, 0)
}

/// `R(a) := block` from the environment `bx` describes.
pub const fn blkpush(a: u8, bx: u16) -> u32 {
    abx(Opcode::BLKPUSH, a as u32, bx as u32)
}

/// Pack a `BLKPUSH` environment descriptor.
pub const fn blkpush_env(m1: u8, r: u8, m2: u8, lv: u8) -> u16 {
    (((m1 as u16) & 0x3f) << 10)
        | (((r as u16) & 1) << 9)
        | (((m2 as u16) & 0x1f) << 4)
        | ((lv as u16) & 0xf)
}

/// `R(a) := R(a) + R(a+1)`
pub const fn add(a: u8) -> u32 {
    abc(Opcode::ADD, a as u32, 0, 1)
}

/// `R(a) := R(a) + c`
pub const fn addi(a: u8, c: u8) -> u32 {
    abc(Opcode::ADDI, a as u32, 0, c as u32)
}

/// `R(a) := R(a) - R(a+1)`
pub const fn sub(a: u8) -> u32 {
    abc(Opcode::SUB, a as u32, 0, 1)
}

/// `R(a) := R(a) - c`
pub const fn subi(a: u8, c: u8) -> u32 {
    abc(Opcode::SUBI, a as u32, 0, c as u32)
}

/// `R(a) := R(a) * R(a+1)`
pub const fn mul(a: u8) -> u32 {
    abc(Opcode::MUL, a as u32, 0, 1)
}

/// `R(a) := R(a) / R(a+1)`
pub const fn div(a: u8) -> u32 {
    abc(Opcode::DIV, a as u32, 0, 1)
}

/// `R(a) := R(a) == R(a+1)`
pub const fn eq(a: u8) -> u32 {
    abc(Opcode::EQ, a as u32, 0, 1)
}

/// `R(a) := R(a) < R(a+1)`
pub const fn lt(a: u8) -> u32 {
    abc(Opcode::LT, a as u32, 0, 1)
}

/// `R(a) := R(a) <= R(a+1)`
pub const fn le(a: u8) -> u32 {
    abc(Opcode::LE, a as u32, 0, 1)
}

/// `R(a) := R(a) > R(a+1)`
pub const fn gt(a: u8) -> u32 {
    abc(Opcode::GT, a as u32, 0, 1)
}

/// `R(a) := R(a) >= R(a+1)`
pub const fn ge(a: u8) -> u32 {
    abc(Opcode::GE, a as u32, 0, 1)
}

/// `R(a) := [R(b), ..., R(b+count-1)]`
pub const fn array(a: u8, b: u8, count: u8) -> u32 {
    abc(Opcode::ARRAY, a as u32, b as u32, count as u32)
}

/// `R(a) := str_dup(Pool(bx))`
pub const fn string(a: u8, bx: u16) -> u32 {
    abx(Opcode::STRING, a as u32, bx as u32)
}

/// `R(a) := R(a).concat(R(b))`
pub const fn strcat(a: u8, b: u8) -> u32 {
    abc(Opcode::STRCAT, a as u32, b as u32, 0)
}

/// `R(a) := hash(R(b), ..., R(b+2*pairs-1))`
pub const fn hash(a: u8, b: u8, pairs: u8) -> u32 {
    abc(Opcode::HASH, a as u32, b as u32, pairs as u32)
}

/// `R(a) := lambda(Reps(bz))`
pub const fn lambda(a: u8, bz: u16) -> u32 {
    abx(Opcode::LAMBDA, a as u32, (bz as u32) << 2)
}

/// `R(a) := range(R(b), R(b+1))`; `exclusive` drops the end point.
pub const fn range(a: u8, b: u8, exclusive: bool) -> u32 {
    abc(Opcode::RANGE, a as u32, b as u32, exclusive as u32)
}

/// `R(a) := newclass(Syms(b), R(a+1))`
pub const fn class(a: u8, b: u8) -> u32 {
    abc(Opcode::CLASS, a as u32, b as u32, 0)
}

/// Execute `Reps(bx)` with the class in `R(a)` as `self`.
pub const fn exec(a: u8, bx: u16) -> u32 {
    abx(Opcode::EXEC, a as u32, bx as u32)
}

/// `R(a).define_method(Syms(b), R(a+1))`
pub const fn method(a: u8, b: u8) -> u32 {
    abc(Opcode::METHOD, a as u32, b as u32, 0)
}

/// Singleton class fetch (executed as a no-op).
pub const fn sclass(a: u8) -> u32 {
    abc(Opcode::SCLASS, a as u32, 0, 0)
}

/// `R(a) := target_class`
pub const fn tclass(a: u8) -> u32 {
    abc(Opcode::TCLASS, a as u32, 0, 0)
}

/// Halt and release registers.
pub const fn stop() -> u32 {
    abc(Opcode::STOP, 0, 0, 0)
}

/// Halt without releasing registers.
pub const fn abort() -> u32 {
    abc(Opcode::ABORT, 0, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Instruction;

    #[test]
    fn every_shape_survives_decode() {
        let cases: &[(u32, Opcode)] = &[
            (nop(), Opcode::NOP),
            (move_(1, 2), Opcode::MOVE),
            (loadi(1, -7), Opcode::LOADI),
            (jmpnot(2, 4), Opcode::JMPNOT),
            (sendb(5, 0, 3), Opcode::SENDB),
            (enter(2, 1), Opcode::ENTER),
            (ret(1, crate::RETURN_BREAK), Opcode::RETURN),
            (lambda(2, 1), Opcode::LAMBDA),
            (stop(), Opcode::STOP),
            (abort(), Opcode::ABORT),
        ];
        for (raw, op) in cases {
            assert_eq!(Instruction::new(*raw).opcode(), *op);
        }
    }

    #[test]
    fn lambda_carries_child_index_in_upper_bz_bits() {
        let ins = Instruction::new(lambda(1, 5));
        assert_eq!(ins.bx() >> 2, 5);
    }

    #[test]
    fn blkpush_env_packs_and_unpacks() {
        let bx = blkpush_env(2, 1, 0, 3);
        assert_eq!(bx >> 10 & 0x3f, 2);
        assert_eq!(bx >> 9 & 1, 1);
        assert_eq!(bx >> 4 & 0x1f, 0);
        assert_eq!(bx & 0xf, 3);
    }
}
