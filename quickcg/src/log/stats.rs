//! This module records statistics about the compiler. "Durations" are wall-clock time, so they
//! inevitably fail to account for context switches and the like: treat them as a rough guide.

#[cfg(not(test))]
use std::env;
use parking_lot::Mutex;
use std::{
    cell::Cell,
    fs,
    time::{Duration, Instant},
};
use strum::{Display, EnumCount, EnumIter, IntoEnumIterator};

/// Record compiler statistics if enabled. Outside of tests, this is only enabled if the end user
/// defines the environment variable `QCGD_LOG_STATS`. In tests, this is always enabled, with
/// output being sent to `stderr`.
pub(crate) struct Stats {
    // Most runs will not record statistics, so the check for "are any stats to be recorded?" is a
    // null check: only if they are do we have to lock a `Mutex`.
    inner: Option<Mutex<StatsInner>>,
}

struct StatsInner {
    /// The path to write output. If exactly equal to `-`, output will be written to stderr.
    output_path: String,
    /// How many methods were compiled successfully?
    methods_compiled_ok: u64,
    /// How many methods failed to compile?
    methods_compiled_err: u64,
    /// How many times did the assembler have to re-lay out a method?
    assembler_retries: u64,
    /// How many branches were rewritten into long form?
    long_branches: u64,
    /// How many Dalvik registers were promoted to callee-save registers?
    regs_promoted: u64,
    /// The time spent in each [TimingState].
    durations: [Duration; TimingState::COUNT],
}

impl Stats {
    #[cfg(not(test))]
    pub fn new() -> Self {
        Self {
            inner: env::var("QCGD_LOG_STATS")
                .ok()
                .map(|p| Mutex::new(StatsInner::new(p))),
        }
    }

    #[cfg(test)]
    pub fn new() -> Self {
        Self {
            inner: Some(Mutex::new(StatsInner::new("-".to_string()))),
        }
    }

    /// If `QCGD_LOG_STATS` was specified, update `inner` by running the function `f`, otherwise
    /// return immediately without calling `f`.
    fn update_with<F>(&self, f: F)
    where
        F: FnOnce(&mut StatsInner),
    {
        if let Some(mtx) = &self.inner {
            f(&mut mtx.lock());
        }
    }

    /// Record a successfully compiled method, with the work its compilation needed.
    pub fn method_compiled_ok(&self, assembler_retries: u32, long_branches: u32, regs_promoted: u32) {
        self.update_with(|inner| {
            inner.methods_compiled_ok += 1;
            inner.assembler_retries += u64::from(assembler_retries);
            inner.long_branches += u64::from(long_branches);
            inner.regs_promoted += u64::from(regs_promoted);
        });
    }

    /// Increment the "a method failed to compile" count.
    pub fn method_compiled_err(&self) {
        self.update_with(|inner| inner.methods_compiled_err += 1);
    }

    /// Change the [TimingState] the current thread is in.
    pub fn timing_state(&self, new_state: TimingState) {
        self.update_with(|inner| {
            let now = Instant::now();
            let (prev_state, then) = COMPILE_STATE.replace((new_state, now));
            let d = now.saturating_duration_since(then);
            inner.durations[prev_state as usize] =
                inner.durations[prev_state as usize].saturating_add(d);
        });
    }

    /// Output these statistics to the appropriate output path.
    pub(crate) fn output(&self) {
        self.update_with(|inner| inner.output());
    }
}

impl StatsInner {
    fn new(output_path: String) -> Self {
        Self {
            output_path,
            methods_compiled_ok: 0,
            methods_compiled_err: 0,
            assembler_retries: 0,
            long_branches: 0,
            regs_promoted: 0,
            durations: [Duration::new(0, 0); TimingState::COUNT],
        }
    }

    fn output(&self) {
        let json = self.to_json();
        if self.output_path == "-" {
            eprintln!("{json}");
        } else {
            fs::write(&self.output_path, json).ok();
        }
    }

    /// Turn these statistics into JSON. The fields are sorted by name so that the output can be
    /// matched textually.
    fn to_json(&self) -> String {
        fn fmt_duration(d: Duration) -> String {
            format!("{}.{:03}", d.as_secs(), d.subsec_millis())
        }

        let mut fields = vec![
            (
                "methods_compiled_ok".to_owned(),
                self.methods_compiled_ok.to_string(),
            ),
            (
                "methods_compiled_err".to_owned(),
                self.methods_compiled_err.to_string(),
            ),
            (
                "assembler_retries".to_owned(),
                self.assembler_retries.to_string(),
            ),
            ("long_branches".to_owned(), self.long_branches.to_string()),
            ("regs_promoted".to_owned(), self.regs_promoted.to_string()),
        ];
        for v in TimingState::iter() {
            let s = v.to_string();
            if !s.is_empty() {
                fields.push((s, fmt_duration(self.durations[v as usize])));
            }
        }
        fields.sort_unstable_by(|(k1, _), (k2, _)| k1.cmp(k2));
        format!(
            r#"{{
    {}
}}"#,
            fields
                .iter()
                .map(|(x, y)| format!(r#""{x}": {y}"#))
                .collect::<Vec<_>>()
                .join(",\n    ")
        )
    }
}

/// The different timing states a compiler thread can go through.
#[repr(u8)]
#[derive(Copy, Clone, Display, EnumCount, EnumIter)]
// New states must keep the variants in `0..TimingState::COUNT` (i.e. no `= <int>`), and their
// `to_string` is the JSON key. States whose `to_string` is empty are not output.
pub(crate) enum TimingState {
    /// The "we don't know what this thread is doing" state. Not output.
    #[strum(to_string = "")]
    None,
    /// Promoting registers and laying out the frame.
    #[strum(to_string = "duration_promoting")]
    Promoting,
    /// Running the front-end's code generation.
    #[strum(to_string = "duration_generating")]
    Generating,
    /// Assembling and building the mapping tables.
    #[strum(to_string = "duration_assembling")]
    Assembling,
}

thread_local! {
    static COMPILE_STATE: Cell<(TimingState, Instant)> = Cell::new((TimingState::None, Instant::now()));
}
