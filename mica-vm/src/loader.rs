//! Bytecode container loader and dumper.
//!
//! Container layout: a 12-byte header (magic `RITE`, a 4-byte ASCII
//! version, the big-endian total size), then sections, each tagged with a
//! 4-byte kind and a big-endian 32-bit content length: `IREP` (one
//! recursive compiled-unit record), `DBG ` and `LV  ` (skipped), `END `
//! (terminator). All multi-byte integers are big-endian.
//!
//! A record is `{nlocals:u16, nregs:u16, rlen:u16, ilen:u32, code[ilen*4],
//! plen:u32, pool*plen, slen:u32, sym*slen, rep*rlen}`. With the
//! `strict-alignment` feature the code array is realigned to a 4-byte
//! boundary relative to the container start, for targets that trap on
//! unaligned word loads. Pool entries carry a one-byte kind and a two-byte
//! length; numeric payloads are ASCII. Symbols are length-prefixed names.
//!
//! Structural errors reject the whole container without installing
//! anything. [`dump`] is the exact inverse of [`load`].

use alloc::format;
use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::error::LoadError;
use crate::irep::{Irep, PoolEntry};
use crate::symbol::SymbolTable;

/// Container magic.
pub const MAGIC: [u8; 4] = *b"RITE";

/// Supported container version.
pub const VERSION: [u8; 4] = *b"0003";

const POOL_STR: u8 = 0;
const POOL_INT: u8 = 1;
const POOL_FLOAT: u8 = 2;

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn pos(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], LoadError> {
        if n > self.remaining() {
            return Err(LoadError::Truncated);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, LoadError> {
        Ok(self.take(1)?[0])
    }

    fn u16_be(&mut self) -> Result<u16, LoadError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32_be(&mut self) -> Result<u32, LoadError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    #[cfg(feature = "strict-alignment")]
    fn align4(&mut self, end: usize) -> Result<(), LoadError> {
        while self.pos % 4 != 0 {
            if self.pos >= end {
                return Err(LoadError::Truncated);
            }
            self.take(1)?;
        }
        Ok(())
    }
}

/// Parse a container into an IREP tree, interning its symbols.
pub fn load(symbols: &mut SymbolTable, blob: &[u8]) -> Result<Rc<Irep>, LoadError> {
    let mut cur = Cursor::new(blob);
    if cur.take(4)? != MAGIC {
        return Err(LoadError::BadMagic);
    }
    if cur.take(4)? != VERSION {
        return Err(LoadError::BadVersion);
    }
    if cur.u32_be()? as usize != blob.len() {
        return Err(LoadError::SizeMismatch);
    }
    let mut irep = None;
    loop {
        if cur.remaining() == 0 {
            return Err(LoadError::MissingEnd);
        }
        let k = cur.take(4)?;
        let kind = [k[0], k[1], k[2], k[3]];
        let len = cur.u32_be()? as usize;
        if len > cur.remaining() {
            return Err(LoadError::Truncated);
        }
        let end = cur.pos() + len;
        match &kind {
            b"IREP" => {
                irep = Some(parse_record(symbols, &mut cur, end)?);
                cur.seek(end);
            }
            b"DBG " | b"LV  " => cur.seek(end),
            b"END " => {
                return irep.ok_or(LoadError::MissingIrep);
            }
            _ => {
                tracing::debug!(?kind, "rejecting container section");
                return Err(LoadError::UnknownSection(kind));
            }
        }
    }
}

fn parse_record(
    symbols: &mut SymbolTable,
    cur: &mut Cursor<'_>,
    end: usize,
) -> Result<Rc<Irep>, LoadError> {
    let nlocals = cur.u16_be()?;
    let nregs = cur.u16_be()?;
    let rlen = cur.u16_be()?;
    let ilen = cur.u32_be()? as usize;
    #[cfg(feature = "strict-alignment")]
    cur.align4(end)?;
    if ilen
        .checked_mul(4)
        .map_or(true, |n| n > end.saturating_sub(cur.pos()))
    {
        return Err(LoadError::CodeOverrun);
    }
    let mut code = Vec::with_capacity(ilen);
    for _ in 0..ilen {
        code.push(cur.u32_be()?);
    }

    let plen = cur.u32_be()? as usize;
    let mut pools = Vec::new();
    for _ in 0..plen {
        let kind = cur.u8()?;
        let len = cur.u16_be()? as usize;
        if len > end.saturating_sub(cur.pos()) {
            return Err(LoadError::PoolOverrun);
        }
        let payload = cur.take(len)?;
        match kind {
            POOL_STR => pools.push(PoolEntry::Str(payload.to_vec())),
            POOL_INT => {
                let s = core::str::from_utf8(payload).map_err(|_| LoadError::BadLiteral)?;
                pools.push(PoolEntry::Int(s.parse().map_err(|_| LoadError::BadLiteral)?));
            }
            POOL_FLOAT => {
                #[cfg(feature = "float")]
                {
                    let s = core::str::from_utf8(payload).map_err(|_| LoadError::BadLiteral)?;
                    pools.push(PoolEntry::Float(
                        s.parse().map_err(|_| LoadError::BadLiteral)?,
                    ));
                }
                #[cfg(not(feature = "float"))]
                {
                    let _ = payload;
                    return Err(LoadError::FloatUnsupported);
                }
            }
            k => return Err(LoadError::BadPoolKind(k)),
        }
    }

    let slen = cur.u32_be()? as usize;
    let mut syms = Vec::new();
    for _ in 0..slen {
        let n = cur.u16_be()? as usize;
        if n > end.saturating_sub(cur.pos()) {
            return Err(LoadError::Truncated);
        }
        let name = core::str::from_utf8(cur.take(n)?).map_err(|_| LoadError::BadLiteral)?;
        let id = symbols.intern(name);
        if !id.is_valid() {
            return Err(LoadError::SymbolTableFull);
        }
        syms.push(id);
    }

    let mut reps = Vec::with_capacity(rlen as usize);
    for _ in 0..rlen {
        reps.push(parse_record(symbols, cur, end)?);
    }
    if cur.pos() > end {
        return Err(LoadError::Truncated);
    }
    Ok(Rc::new(Irep {
        nlocals,
        nregs,
        code,
        pools,
        syms,
        reps,
    }))
}

/// Serialize an IREP tree into a container; the inverse of [`load`].
pub fn dump(symbols: &SymbolTable, irep: &Irep) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION);
    out.extend_from_slice(&[0; 4]);

    out.extend_from_slice(b"IREP");
    let len_at = out.len();
    out.extend_from_slice(&[0; 4]);
    dump_record(symbols, irep, &mut out);
    let sec_len = (out.len() - len_at - 4) as u32;
    out[len_at..len_at + 4].copy_from_slice(&sec_len.to_be_bytes());

    out.extend_from_slice(b"END ");
    out.extend_from_slice(&0u32.to_be_bytes());

    let total = out.len() as u32;
    out[8..12].copy_from_slice(&total.to_be_bytes());
    out
}

fn dump_record(symbols: &SymbolTable, irep: &Irep, out: &mut Vec<u8>) {
    out.extend_from_slice(&irep.nlocals.to_be_bytes());
    out.extend_from_slice(&irep.nregs.to_be_bytes());
    out.extend_from_slice(&(irep.reps.len() as u16).to_be_bytes());
    out.extend_from_slice(&(irep.code.len() as u32).to_be_bytes());
    #[cfg(feature = "strict-alignment")]
    while out.len() % 4 != 0 {
        out.push(0);
    }
    for word in &irep.code {
        out.extend_from_slice(&word.to_be_bytes());
    }

    out.extend_from_slice(&(irep.pools.len() as u32).to_be_bytes());
    for entry in &irep.pools {
        match entry {
            PoolEntry::Str(bytes) => {
                out.push(POOL_STR);
                out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            PoolEntry::Int(n) => {
                out.push(POOL_INT);
                let text = format!("{n}");
                out.extend_from_slice(&(text.len() as u16).to_be_bytes());
                out.extend_from_slice(text.as_bytes());
            }
            #[cfg(feature = "float")]
            PoolEntry::Float(f) => {
                out.push(POOL_FLOAT);
                let text = format!("{f}");
                out.extend_from_slice(&(text.len() as u16).to_be_bytes());
                out.extend_from_slice(text.as_bytes());
            }
        }
    }

    out.extend_from_slice(&(irep.syms.len() as u32).to_be_bytes());
    for sym in &irep.syms {
        let name = symbols.name(*sym).unwrap_or("");
        out.extend_from_slice(&(name.len() as u16).to_be_bytes());
        out.extend_from_slice(name.as_bytes());
    }

    for rep in &irep.reps {
        dump_record(symbols, rep, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn sample(symbols: &mut SymbolTable) -> Irep {
        let child = Irep {
            nlocals: 1,
            nregs: 3,
            code: vec![mica_asm::ops::loadi(1, 42), mica_asm::ops::ret(1, 0)],
            pools: vec![PoolEntry::Int(-7), PoolEntry::Str(b"hi".to_vec())],
            syms: vec![symbols.intern("hello")],
            reps: vec![],
        };
        Irep {
            nlocals: 2,
            nregs: 5,
            code: vec![mica_asm::ops::nop(), mica_asm::ops::stop()],
            pools: vec![PoolEntry::Int(99)],
            syms: vec![symbols.intern("puts"), symbols.intern("x")],
            reps: vec![Rc::new(child)],
        }
    }

    #[test]
    fn dump_then_load_reproduces_the_tree() {
        let mut symbols = SymbolTable::new();
        let tree = sample(&mut symbols);
        let blob = dump(&symbols, &tree);
        let loaded = load(&mut symbols, &blob).expect("round trip");
        assert_eq!(*loaded, tree);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut symbols = SymbolTable::new();
        let tree = sample(&mut symbols);
        let mut blob = dump(&symbols, &tree);
        blob[0] = b'X';
        assert_eq!(load(&mut symbols, &blob), Err(LoadError::BadMagic));
    }

    #[test]
    fn size_field_must_match_the_blob() {
        let mut symbols = SymbolTable::new();
        let tree = sample(&mut symbols);
        let mut blob = dump(&symbols, &tree);
        blob[11] = blob[11].wrapping_add(1);
        assert_eq!(load(&mut symbols, &blob), Err(LoadError::SizeMismatch));
    }

    #[test]
    fn overlong_code_length_is_rejected_without_installing() {
        let mut symbols = SymbolTable::new();
        let tree = sample(&mut symbols);
        let mut blob = dump(&symbols, &tree);
        // the root record's ilen lives right after the section tag+len
        let ilen_at = 12 + 8 + 6;
        blob[ilen_at..ilen_at + 4].copy_from_slice(&0xffff_ffffu32.to_be_bytes());
        assert_eq!(load(&mut symbols, &blob), Err(LoadError::CodeOverrun));
    }

    #[test]
    fn missing_end_is_rejected() {
        let mut symbols = SymbolTable::new();
        let tree = sample(&mut symbols);
        let mut blob = dump(&symbols, &tree);
        let cut = blob.len() - 8;
        blob.truncate(cut);
        let total = blob.len() as u32;
        blob[8..12].copy_from_slice(&total.to_be_bytes());
        assert_eq!(load(&mut symbols, &blob), Err(LoadError::MissingEnd));
    }

    #[cfg(feature = "float")]
    #[test]
    fn float_pool_entries_round_trip() {
        let mut symbols = SymbolTable::new();
        let tree = Irep {
            pools: vec![PoolEntry::Float(3.5), PoolEntry::Float(-0.25)],
            ..Irep::default()
        };
        let blob = dump(&symbols, &tree);
        let loaded = load(&mut symbols, &blob).expect("round trip");
        assert_eq!(*loaded, tree);
    }
}
