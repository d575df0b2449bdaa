//! Container loader: structural rejection and dump/load round trips.

mod test_helpers;

use std::rc::Rc;

use mica_asm::ops;
use mica_vm::irep::{Irep, PoolEntry};
use mica_vm::loader::{dump, load, MAGIC, VERSION};
use mica_vm::prelude::*;
use mica_vm::symbol::SymbolTable;

use quickcheck::{Arbitrary, Gen};
use quickcheck_macros::quickcheck;
use test_helpers::*;

#[derive(Debug, Clone)]
struct ArbTree(Irep);

fn arbitrary_irep(g: &mut Gen, depth: usize) -> Irep {
    let n = usize::arbitrary(g);
    let mut pools = Vec::new();
    for _ in 0..n % 4 {
        pools.push(match u8::arbitrary(g) % 3 {
            0 => PoolEntry::Int(i64::arbitrary(g)),
            #[cfg(feature = "float")]
            1 => {
                let f = f64::arbitrary(g);
                PoolEntry::Float(if f.is_nan() { 0.5 } else { f })
            }
            _ => PoolEntry::Str(Vec::<u8>::arbitrary(g)),
        });
    }
    let mut reps = Vec::new();
    if depth < 3 {
        for _ in 0..usize::arbitrary(g) % 3 {
            reps.push(Rc::new(arbitrary_irep(g, depth + 1)));
        }
    }
    Irep {
        nlocals: u16::arbitrary(g) % 16,
        nregs: u16::arbitrary(g) % 32,
        code: (0..usize::arbitrary(g) % 16)
            .map(|_| u32::arbitrary(g))
            .collect(),
        pools,
        syms: Vec::new(),
        reps,
    }
}

impl Arbitrary for ArbTree {
    fn arbitrary(g: &mut Gen) -> Self {
        ArbTree(arbitrary_irep(g, 0))
    }
}

#[quickcheck]
fn dump_load_round_trips_structurally(tree: ArbTree) {
    let mut symbols = SymbolTable::new();
    let blob = dump(&symbols, &tree.0);
    let loaded = load(&mut symbols, &blob).expect("round trip");
    assert_eq!(*loaded, tree.0);
}

#[test]
fn symbols_round_trip_through_the_intern_table() {
    let mut symbols = SymbolTable::new();
    let tree = Irep {
        syms: vec![
            symbols.intern("puts"),
            symbols.intern("sleep"),
            symbols.intern("@count"),
        ],
        ..Irep::default()
    };
    let blob = dump(&symbols, &tree);
    let first = load(&mut symbols, &blob).expect("first load");
    let second_blob = dump(&symbols, &first);
    let again = load(&mut symbols, &second_blob).expect("second load");
    assert_eq!(*first, tree);
    assert_eq!(first, again);
}

#[test]
fn a_runtime_loads_its_own_dump_and_executes_it() {
    let (mut rt, out) = runtime();
    let prog = unit(
        &mut rt,
        5,
        vec![
            ops::loadself(1),
            ops::loadl(2, 0),
            ops::send(1, 0, 1),
            ops::stop(),
        ],
        &["puts"],
        vec![PoolEntry::Int(41)],
        vec![],
    );
    let blob = mica_vm::loader::dump(&rt.symbols, &prog);
    let loaded = rt.load(&blob).expect("load");
    run_to_halt(&mut rt, loaded);
    assert_eq!(text(&out), "41\n");
}

#[test]
fn truncated_code_claims_are_rejected_before_any_install() {
    let mut symbols = SymbolTable::new();
    let tree = Irep {
        nregs: 4,
        code: vec![ops::nop(), ops::stop()],
        ..Irep::default()
    };
    let mut blob = dump(&symbols, &tree);
    // the record's ilen field sits just past the section tag and length
    let ilen_at = 12 + 8 + 6;
    blob[ilen_at..ilen_at + 4].copy_from_slice(&0x00ff_ffffu32.to_be_bytes());
    assert_eq!(load(&mut symbols, &blob), Err(LoadError::CodeOverrun));
    assert_eq!(symbols.len(), 0);
}

#[test]
fn header_fields_are_validated() {
    let mut symbols = SymbolTable::new();
    let blob = dump(&symbols, &Irep::default());

    let mut bad = blob.clone();
    bad[..4].copy_from_slice(b"LITE");
    assert_eq!(load(&mut symbols, &bad), Err(LoadError::BadMagic));

    let mut bad = blob.clone();
    bad[4..8].copy_from_slice(b"0009");
    assert_eq!(load(&mut symbols, &bad), Err(LoadError::BadVersion));

    let mut bad = blob;
    bad[8..12].copy_from_slice(&999u32.to_be_bytes());
    assert_eq!(load(&mut symbols, &bad), Err(LoadError::SizeMismatch));
}

#[test]
fn unknown_sections_are_rejected_and_debug_sections_skipped() {
    let mut symbols = SymbolTable::new();
    let good = dump(&symbols, &Irep::default());

    // splice a DBG section in front of END
    let end_at = good.len() - 8;
    let mut with_dbg = good[..end_at].to_vec();
    with_dbg.extend_from_slice(b"DBG ");
    with_dbg.extend_from_slice(&2u32.to_be_bytes());
    with_dbg.extend_from_slice(&[0xaa, 0xbb]);
    with_dbg.extend_from_slice(&good[end_at..]);
    let total = with_dbg.len() as u32;
    with_dbg[8..12].copy_from_slice(&total.to_be_bytes());
    assert!(load(&mut symbols, &with_dbg).is_ok());

    let mut unknown = with_dbg.clone();
    let dbg_at = end_at;
    unknown[dbg_at..dbg_at + 4].copy_from_slice(b"XXXX");
    assert_eq!(
        load(&mut symbols, &unknown),
        Err(LoadError::UnknownSection(*b"XXXX"))
    );
}

#[test]
fn magic_and_version_are_ascii_constants() {
    assert_eq!(&MAGIC, b"RITE");
    assert_eq!(&VERSION, b"0003");
}
