//! Interpreter parameters.
//!
//! All limits are compile-time choices, sized for microcontroller targets.

use static_assertions::const_assert;

/// Maximum number of concurrently live VMs.
pub const MAX_VM_COUNT: usize = 5;

/// Register file length of one VM.
pub const MAX_REGS_SIZE: usize = 100;

/// Capacity of the process-wide symbol table.
pub const MAX_SYMBOL_COUNT: usize = 256;

/// Scheduler ticks per second; one tick is one scheduling unit.
///
/// The host's periodic timer must call [`Ticker::tick`](crate::scheduler::Ticker::tick)
/// at this cadence for sleeps to run in real time.
pub const TICKS_PER_SECOND: u32 = 100;

/// Allocation granularity of the memory pool, in bytes.
pub const POOL_ALIGN: usize = 8;

/// Accounting overhead charged per pool block, in bytes.
pub const BLOCK_HEADER_SIZE: usize = 8;

// VM ids are allocated from a 32-bit bitmap; id 0 tags process-global blocks.
const_assert!(MAX_VM_COUNT <= 31);
const_assert!(MAX_REGS_SIZE >= 8);
const_assert!(MAX_SYMBOL_COUNT <= u16::MAX as usize);
const_assert!(POOL_ALIGN.is_power_of_two());
