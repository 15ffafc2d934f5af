//! Compiling methods: one [Codegen] per method, optionally many methods in parallel.

use super::{
    codegen::Codegen, method::MethodIr, mips::MipsTarget, CompilationError, CompiledMethod,
    CompilerOptions,
};
use crate::{
    job_queue::{Job, JobQueue},
    log::{
        stats::{Stats, TimingState},
        Log, Verbosity,
    },
};
use std::{error::Error, sync::mpsc, sync::Arc};

/// The front-end's code generation for one method: emits the method's LIR into the [Codegen] it
/// is given, after promotion and frame layout have run.
pub type GenFn = Box<dyn FnOnce(&mut Codegen<MipsTarget>) -> Result<(), CompilationError> + Send>;

/// A method to be compiled.
pub struct MethodJob {
    /// A name for the method, used only in log messages.
    pub name: String,
    pub ir: MethodIr,
    pub gen: GenFn,
}

impl MethodJob {
    pub fn new(name: impl Into<String>, ir: MethodIr, gen: GenFn) -> Self {
        Self {
            name: name.into(),
            ir,
            gen,
        }
    }
}

/// Everything a compilation shares with its siblings.
struct Shared {
    log: Log,
    stats: Stats,
    opts: CompilerOptions,
    smp: bool,
}

impl Shared {
    fn compile(&self, job: MethodJob) -> Result<CompiledMethod, CompilationError> {
        let MethodJob { name, ir, gen } = job;
        self.log
            .log(Verbosity::MethodEvent, &format!("start compiling: {name}"));
        let mut cg = Codegen::new(MipsTarget::new(self.smp), self.opts.clone(), ir);
        let r = self.run(&mut cg, gen);
        self.stats.timing_state(TimingState::None);
        match r {
            Ok(m) => {
                if cg.assembler_retries > 0 {
                    self.log.log(
                        Verbosity::AssemblerEvent,
                        &format!(
                            "{name}: {} assembler retries, {} long branches",
                            cg.assembler_retries, cg.long_branches
                        ),
                    );
                }
                self.stats
                    .method_compiled_ok(cg.assembler_retries, cg.long_branches, cg.regs_promoted);
                self.log
                    .log(Verbosity::MethodEvent, &format!("stop compiling: {name}"));
                Ok(m)
            }
            Err(e) => {
                self.stats.method_compiled_err();
                let level = match e {
                    CompilationError::General(_) | CompilationError::ResourceExhausted(_) => {
                        Verbosity::Warning
                    }
                    CompilationError::InternalError(_) | CompilationError::LimitExceeded(_) => {
                        Verbosity::Error
                    }
                };
                self.log
                    .log(level, &format!("compiling {name} failed: {e}"));
                Err(e)
            }
        }
    }

    fn run(
        &self,
        cg: &mut Codegen<MipsTarget>,
        gen: GenFn,
    ) -> Result<CompiledMethod, CompilationError> {
        self.stats.timing_state(TimingState::Promoting);
        cg.simple_reg_alloc()?;
        self.stats.timing_state(TimingState::Generating);
        gen(cg)?;
        self.stats.timing_state(TimingState::Assembling);
        cg.assemble_method()?;
        cg.get_compiled_method()
    }
}

/// A MIPS method compiler. Methods are independent of each other: [Compiler::compile_methods]
/// compiles them on a pool of worker threads.
pub struct Compiler {
    shared: Arc<Shared>,
    job_queue: Arc<JobQueue>,
}

impl Compiler {
    /// Create a compiler configured from the environment (`QCGD_LOG`, `QCGD_LOG_LIR`,
    /// `QCGD_LOG_STATS`, `QCG_DISABLE_OPT`, `QCG_JOBS`).
    pub fn new(smp: bool) -> Result<Self, Box<dyn Error>> {
        Ok(Self::with_options(
            Log::new()?,
            CompilerOptions::from_env()?,
            JobQueue::new()?,
            smp,
        ))
    }

    fn with_options(log: Log, opts: CompilerOptions, job_queue: Arc<JobQueue>, smp: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                log,
                stats: Stats::new(),
                opts,
                smp,
            }),
            job_queue,
        }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.shared.opts
    }

    /// Compile one method on this thread.
    pub fn compile_method(&self, job: MethodJob) -> Result<CompiledMethod, CompilationError> {
        self.shared.compile(job)
    }

    /// Compile `jobs` in parallel, returning their results in the order the jobs were given.
    pub fn compile_methods(
        &self,
        jobs: Vec<MethodJob>,
    ) -> Vec<Result<CompiledMethod, CompilationError>> {
        let n = jobs.len();
        let (tx, rx) = mpsc::channel();
        for (i, job) in jobs.into_iter().enumerate() {
            let tx = tx.clone();
            let shared = Arc::clone(&self.shared);
            self.job_queue.push(Job::new(Box::new(move || {
                // The receiver only goes away if this compiler has been dropped.
                tx.send((i, shared.compile(job))).ok();
            })));
        }
        drop(tx);
        let mut results = rx.iter().take(n).collect::<Vec<_>>();
        results.sort_unstable_by_key(|(i, _)| *i);
        results.into_iter().map(|(_, r)| r).collect()
    }
}

impl Drop for Compiler {
    fn drop(&mut self) {
        self.job_queue.shutdown();
        self.shared.stats.output();
    }
}
