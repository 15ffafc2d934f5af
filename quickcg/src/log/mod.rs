//! The implementation of the `QCGD_LOG*` environment variables.
//!
//! Note that the LIR dumps are only available when the `qcgd` feature is enabled: otherwise we
//! expose no-op functions.

use std::{env, error::Error, fs::File, io::Write, path::PathBuf};
use strum::{EnumCount, FromRepr};

pub(crate) mod stats;

/// How verbose should the compiler's normal logging be?
#[repr(u8)]
#[derive(Copy, Clone, Debug, EnumCount, FromRepr, PartialEq, PartialOrd)]
pub(crate) enum Verbosity {
    /// Disable logging entirely.
    Disabled,
    /// Log errors.
    Error,
    /// Log warnings.
    Warning,
    /// Log the start, end and failure of each method compilation.
    MethodEvent,
    /// Log assembler retries and branch expansions.
    AssemblerEvent,
}

pub(crate) struct Log {
    /// The requested [Verbosity] level for logging.
    level: Verbosity,
    /// The path to write to. `None` means stderr.
    path: Option<PathBuf>,
}

impl Log {
    pub(crate) fn new() -> Result<Self, Box<dyn Error>> {
        match env::var("QCGD_LOG") {
            Ok(s) => Self::from_spec(&s),
            Err(_) => Ok(Self {
                path: None,
                level: Verbosity::Error,
            }),
        }
    }

    /// Parse a `[<path|->:]<level>` specification.
    pub(crate) fn from_spec(s: &str) -> Result<Self, Box<dyn Error>> {
        let (path, level) = match s.split(':').collect::<Vec<_>>()[..] {
            [path, level] => {
                if path == "-" {
                    (None, level)
                } else {
                    let path = PathBuf::from(path);
                    // Truncate any previous log so that we only ever append to this run's.
                    File::create(&path).ok();
                    (Some(path), level)
                }
            }
            [level] => (None, level),
            [..] => return Err("QCGD_LOG must be of the format `[<path|->:]<level>`".into()),
        };
        let level = level
            .parse::<u8>()
            .map_err(|e| format!("Invalid QCGD_LOG level '{s}': {e}"))?;
        let max_level = Verbosity::COUNT - 1;
        let level = Verbosity::from_repr(level)
            .ok_or_else(|| format!("QCGD_LOG level {level} exceeds maximum {max_level}"))?;
        Ok(Self { path, level })
    }

    /// Log `msg` with the [Verbosity] level `level`.
    ///
    /// # Panics
    ///
    /// If `level == Verbosity::Disabled`.
    pub(crate) fn log(&self, level: Verbosity, msg: &str) {
        if level <= self.level {
            let prefix = match level {
                Verbosity::Disabled => panic!(),
                Verbosity::Error => "qcg-error",
                Verbosity::Warning => "qcg-warning",
                Verbosity::MethodEvent => "qcg-method-event",
                Verbosity::AssemblerEvent => "qcg-assembler-event",
            };
            match &self.path {
                Some(p) => {
                    let s = format!("{prefix}: {msg}\n");
                    File::options()
                        .append(true)
                        .open(p)
                        .map(|mut x| x.write(s.as_bytes()))
                        .ok();
                }
                None => {
                    eprintln!("{prefix}: {msg}");
                }
            }
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub(crate) enum LirPhase {
    /// The register pool after promotion.
    RegPool,
    /// The sorted use counts and the promotion map.
    Promotion,
    /// The final LIR listing.
    Lir,
    /// The final LIR listing including nop'd instructions and resource masks.
    LirFull,
}

#[cfg(not(feature = "qcgd"))]
mod internals {
    use super::LirPhase;
    pub(crate) fn should_log_lir(_: LirPhase) -> bool {
        false
    }
    pub(crate) fn log_lir(_: &str) {}
    pub(crate) fn verbose_lir() -> bool {
        false
    }
}

#[cfg(feature = "qcgd")]
mod internals {
    use super::LirPhase;
    use std::{collections::HashSet, env, error::Error, fs::File, io::Write, sync::LazyLock};

    static LOG_LIR: LazyLock<Option<(String, HashSet<LirPhase>)>> = LazyLock::new(|| {
        let mut log_phases = HashSet::new();
        if let Ok(x) = env::var("QCGD_LOG_LIR") {
            let (path, phases) = match x.split(':').collect::<Vec<_>>().as_slice() {
                [path, phases] => (*path, *phases),
                [phases] => ("-", *phases),
                _ => panic!("QCGD_LOG_LIR must be of the format '[<path>:]<phase_1>[,...,<phase_n>]'"),
            };
            for x in phases.split(',') {
                match LirPhase::from_str(x) {
                    Ok(p) => {
                        log_phases.insert(p);
                    }
                    Err(e) => panic!("{e}"),
                }
            }
            if path != "-" {
                // Truncate any previous log so that we only ever append to this run's.
                File::create(path).ok();
            }
            Some((path.to_string(), log_phases))
        } else {
            None
        }
    });

    impl LirPhase {
        pub(super) fn from_str(s: &str) -> Result<Self, Box<dyn Error>> {
            match s {
                "regpool" => Ok(Self::RegPool),
                "promotion" => Ok(Self::Promotion),
                "lir" => Ok(Self::Lir),
                "lir-full" => Ok(Self::LirFull),
                _ => Err(format!("Invalid QCGD_LOG_LIR value: {s}").into()),
            }
        }
    }

    pub(crate) fn should_log_lir(phase: LirPhase) -> bool {
        if let Some(true) = LOG_LIR.as_ref().map(|(_, phases)| phases.contains(&phase)) {
            return true;
        }
        false
    }

    pub(crate) fn log_lir(s: &str) {
        match LOG_LIR.as_ref().map(|(p, _)| p.as_str()) {
            Some("-") => eprint!("{s}"),
            Some(x) => {
                File::options()
                    .append(true)
                    .open(x)
                    .map(|mut x| x.write(s.as_bytes()))
                    .ok();
            }
            None => (),
        }
    }

    /// Has any LIR dump been requested?
    pub(crate) fn verbose_lir() -> bool {
        LOG_LIR.as_ref().is_some_and(|(_, phases)| !phases.is_empty())
    }
}

pub(crate) use internals::{log_lir, should_log_lir, verbose_lir};
