//! The machine-independent code generation core and its targets.

use std::{collections::HashSet, env, error::Error, fmt};
use strum::EnumString;
use thiserror::Error;

/// A failure to compile a method.
#[derive(Error, Debug)]
pub enum CompilationError {
    #[error("General error: {0}")]
    /// Compilation failed for reasons that are of interest to whoever is driving the code
    /// generator (e.g. an operation this target does not support).
    General(String),
    #[error("Internal error: {0}")]
    /// Something went wrong when compiling that is probably the result of a bug in the code
    /// generator or in the IR handed to it.
    InternalError(String),
    #[error("Internal error: {0}")]
    /// A limit was exceeded (e.g. the assembler could not reach a fixed point, or an index type
    /// overflowed).
    LimitExceeded(String),
    #[error("Internal error: {0:}")]
    /// Compilation failed because a register file was exhausted: the IR has more simultaneously
    /// live values than the allocator can service.
    ResourceExhausted(Box<dyn Error + Send + Sync>),
}

fn index_overflow(typ: &str) -> CompilationError {
    CompilationError::LimitExceeded(format!("index overflow: {}", typ))
}

// Generate common methods for 32-bit index types.
macro_rules! index_32bit {
    ($struct:ident) => {
        impl $struct {
            pub(crate) fn new(v: usize) -> Result<Self, $crate::compile::CompilationError> {
                u32::try_from(v)
                    .map_err(|_| $crate::compile::index_overflow(stringify!($struct)))
                    .map(|u| Self(u))
            }

            pub(crate) fn to_u32(self) -> u32 {
                self.0
            }
        }

        impl From<usize> for $struct {
            /// Required for TiVec. **DO NOT USE INTERNALLY as this can `panic`!** Instead, use
            /// [Self::new].
            fn from(v: usize) -> Self {
                Self::new(v).unwrap()
            }
        }

        impl From<$struct> for usize {
            // Required for TiVec.
            fn from(v: $struct) -> Self {
                // A `u32` always fits in the `usize` of the platforms we support.
                v.0 as usize
            }
        }
    };
}

pub(crate) mod assemble;
pub mod codegen;
mod driver;
pub mod lir;
mod loadstore;
pub mod method;
pub mod mips;
pub mod regalloc;
pub mod switch;
mod target;

pub use driver::{Compiler, GenFn, MethodJob};
pub use target::{AssemblerStatus, ConditionCode, OpKind, OpSize, TargetCodegen};

/// An optimisation that the code generator performs unless told otherwise.
#[derive(Copy, Clone, Debug, EnumString, Eq, Hash, PartialEq)]
pub enum Opt {
    /// Run the register promotion pass.
    #[strum(serialize = "promote-regs")]
    PromoteRegs,
    /// Retroactively turn dead stores to a value's home slot into nops.
    #[strum(serialize = "suppress-loads")]
    SuppressLoads,
    /// Turn register self-copies into nops.
    #[strum(serialize = "safe-opts")]
    SafeOptimizations,
}

/// The options a [codegen::Codegen] is run with.
#[derive(Clone, Debug, Default)]
pub struct CompilerOptions {
    disabled: HashSet<Opt>,
    /// Dump the register pool, promotion map and LIR as compilation proceeds.
    pub verbose: bool,
}

impl CompilerOptions {
    /// Read the options from the environment: `QCG_DISABLE_OPT=<opt>[,...,<opt>]` disables the
    /// named optimisations.
    pub fn from_env() -> Result<Self, Box<dyn Error>> {
        let mut opts = Self::default();
        if let Ok(x) = env::var("QCG_DISABLE_OPT") {
            for s in x.split(',').filter(|s| !s.is_empty()) {
                let opt = s
                    .parse::<Opt>()
                    .map_err(|_| format!("Invalid QCG_DISABLE_OPT value: {s}"))?;
                opts.disable(opt);
            }
        }
        opts.verbose = crate::log::verbose_lir();
        Ok(opts)
    }

    /// Disable the optimisation `opt`.
    pub fn disable(&mut self, opt: Opt) -> &mut Self {
        self.disabled.insert(opt);
        self
    }

    /// Is the optimisation `opt` enabled?
    pub fn enabled(&self, opt: Opt) -> bool {
        !self.disabled.contains(&opt)
    }
}

/// A compiled method: the machine code and the frame metadata consumed by stack walkers.
#[derive(Clone, PartialEq)]
pub struct CompiledMethod {
    /// The instructions followed by the literal pool, switch tables and fill-array data.
    pub code: Vec<u8>,
    pub frame_size: u32,
    pub core_spill_mask: u32,
    pub fp_spill_mask: u32,
    /// ULEB128 encoded `[total, pc2dex_count, (native_offset, dex_offset)*]`.
    pub mapping_table: Vec<u8>,
    /// ULEB128 encoded `[len, vreg*]` in spill order.
    pub vmap_table: Vec<u8>,
    /// Literal pool words that the loader must patch.
    pub patches: Vec<LiteralPatch>,
}

impl fmt::Debug for CompiledMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledMethod")
            .field("code_len", &self.code.len())
            .field("frame_size", &self.frame_size)
            .field("core_spill_mask", &format_args!("{:#x}", self.core_spill_mask))
            .field("fp_spill_mask", &format_args!("{:#x}", self.fp_spill_mask))
            .finish()
    }
}

/// What a literal-pool word refers to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PatchKind {
    /// The entry point of a method's code.
    Code,
    /// A method object.
    Method,
}

/// A literal pool word at `literal_offset` in [CompiledMethod::code] that holds a reference to
/// `target_idx`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LiteralPatch {
    pub kind: PatchKind,
    pub target_idx: u32,
    pub literal_offset: u32,
}

/// Append `v` to `buf` in unsigned LEB128 form.
pub(crate) fn push_uleb128(buf: &mut Vec<u8>, mut v: u32) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}
