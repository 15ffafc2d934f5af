//! A method-at-a-time register allocator and LIR emitter for register-based bytecode.
//!
//! The front-end describes a method's values as [MethodIr]; a [Codegen] then
//! owns the register file, the LIR list and the deferred data tables for exactly one method while
//! the front-end drives it. Independent methods can be compiled in parallel with
//! [compile::Compiler].

#![allow(clippy::upper_case_acronyms)]
#![allow(clippy::comparison_chain)]
#![allow(clippy::too_many_arguments)]

pub mod compile;
mod job_queue;
mod log;

pub use compile::{
    CompilationError, CompiledMethod, Compiler, CompilerOptions, GenFn, MethodJob, Opt,
    codegen::Codegen,
    method::{MethodIr, SReg, SsaReg, VReg},
    mips::MipsTarget,
    regalloc::{LocKind, PhysReg, RegClass, ValueLocation},
};
