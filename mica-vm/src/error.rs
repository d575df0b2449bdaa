//! Error types of the interpreter layers.

use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
/// Closed set of runtime failure kinds.
///
/// Most of these are diagnosed on the console and execution continues with
/// a nil result; only a few terminate the VM (see the dispatch loop).
pub enum RuntimeErrorKind {
    /// The memory pool is exhausted.
    OutOfMemory = 0x01,
    /// Method lookup missed on the receiver's class chain.
    UndefinedMethod = 0x02,
    /// A constant was read before any assignment.
    UninitializedConstant = 0x03,
    /// Operand types do not match a fast path that cannot fall back.
    TypeError = 0x04,
    /// The bytecode is structurally invalid.
    BytecodeFormat = 0x05,
    /// The symbol table reached its fixed capacity.
    SymbolTableFull = 0x06,
    /// Integer division by zero.
    Arithmetic = 0x07,
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RuntimeErrorKind {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
/// Error word carried by a VM and returned from `run`; zero is a normal
/// halt.
pub struct ErrorCode(u32);

impl ErrorCode {
    /// Normal halt.
    pub const OK: ErrorCode = ErrorCode(0);

    /// Whether this is the normal-halt word.
    pub const fn is_ok(&self) -> bool {
        self.0 == 0
    }

    /// The raw word.
    pub const fn word(&self) -> u32 {
        self.0
    }
}

impl From<RuntimeErrorKind> for ErrorCode {
    fn from(kind: RuntimeErrorKind) -> Self {
        ErrorCode(kind as u32)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Loader rejection reasons. A rejected container installs nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum LoadError {
    /// The container does not start with the expected magic.
    #[display(fmt = "bad container magic")]
    BadMagic,
    /// The container version is not supported.
    #[display(fmt = "unsupported container version")]
    BadVersion,
    /// The size field disagrees with the byte length of the blob.
    #[display(fmt = "container size field disagrees with the blob")]
    SizeMismatch,
    /// A section carries an unrecognized 4-byte kind.
    #[display(fmt = "unknown section kind {_0:?}")]
    UnknownSection([u8; 4]),
    /// A section or record ends before its declared contents.
    #[display(fmt = "section or record is truncated")]
    Truncated,
    /// A code array claims more space than its container holds.
    #[display(fmt = "code section overruns its container")]
    CodeOverrun,
    /// A literal pool claims more space than its record holds.
    #[display(fmt = "literal pool overruns its record")]
    PoolOverrun,
    /// A literal pool entry carries an unknown kind byte.
    #[display(fmt = "unknown literal pool kind {_0}")]
    BadPoolKind(u8),
    /// A numeric or symbol payload failed to parse.
    #[display(fmt = "malformed literal or symbol payload")]
    BadLiteral,
    /// A float literal appeared in a build without float support.
    #[display(fmt = "float literal in a build without float support")]
    FloatUnsupported,
    /// Interning a symbol section entry overflowed the symbol table.
    #[display(fmt = "symbol table capacity exceeded while interning")]
    SymbolTableFull,
    /// The container holds no IREP section.
    #[display(fmt = "container has no IREP section")]
    MissingIrep,
    /// The section stream ended without an END section.
    #[display(fmt = "missing END section")]
    MissingEnd,
}

#[cfg(feature = "std")]
impl std::error::Error for LoadError {}

/// Failures surfaced by the embedding API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum VmError {
    /// The memory pool is exhausted.
    #[display(fmt = "memory pool exhausted")]
    OutOfMemory,
    /// The bytecode container was rejected.
    #[display(fmt = "bytecode rejected: {_0}")]
    Load(LoadError),
    /// Every VM slot is occupied.
    #[display(fmt = "all VM slots are in use")]
    TooManyVms,
    /// The symbol table is full.
    #[display(fmt = "symbol table full")]
    SymbolTableFull,
}

impl From<LoadError> for VmError {
    fn from(e: LoadError) -> Self {
        VmError::Load(e)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for VmError {}
