use super::exit_result::{ExitResult, EXIT_FAILURE, EXIT_USAGE};
use crate::{
    commands::{
        t2c_options::{T2cOptions, T2cSubCommand},
        T2cCommand,
    },
    corpus::{
        packer::{self, PackStats},
        CorpusDb,
    },
    log::LogLevel::{LogDebug, LogInfo, LogWarn},
    prog::{
        builder::{build_program, BuildResult},
        call_selector::{CallSelector, DefaultCallSelector},
        encoding_exec::{serialize_for_exec, ExecError, EXEC_BUFFER_SIZE},
        memory::fill_out_memory,
        validation::{validate, ValidationError},
        Program,
    },
    scoped_fd::ScopedFd,
    target::{get_target, Target, TargetError},
    trace::{trace_parser, tree_walker::walk},
};
use libc::pid_t;
use nix::{fcntl::OFlag, sys::stat::Mode};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

pub const TARGET_OS: &str = "linux";
pub const TARGET_ARCH: &str = "amd64";

#[derive(Debug)]
pub enum ConvertError {
    Usage(&'static str),
    Target(TargetError),
    Io { path: PathBuf, err: io::Error },
    /// The builder or resolver produced a program the target rejects.
    Validation { file: String, err: ValidationError },
}

impl ConvertError {
    pub fn exit_code(&self) -> i32 {
        match self {
            ConvertError::Usage(_) => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }
}

impl Display for ConvertError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConvertError::Usage(msg) => write!(f, "{}", msg),
            ConvertError::Target(e) => write!(f, "cannot load syscall descriptions: {}", e),
            ConvertError::Io { path, err } => write!(f, "{}: {}", path.display(), err),
            ConvertError::Validation { file, err } => {
                write!(f, "error validating program from {}: {}", file, err)
            }
        }
    }
}

impl Error for ConvertError {}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ConvertError + '_ {
    move |err| ConvertError::Io {
        path: path.to_owned(),
        err,
    }
}

/// Counters for the summary printed at the end of a run.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct ConvertStats {
    pub files: usize,
    pub empty_files: usize,
    /// Unreadable files and files whose process tree could not be walked.
    pub bad_files: usize,
    pub processes: usize,
    pub accepted: usize,
    /// Processes with no call the target could describe.
    pub no_calls: usize,
    pub unresolved: usize,
    pub too_large: usize,
    pub skipped_records: usize,
    pub pack: PackStats,
}

pub struct ConvertCommand {
    file: Option<PathBuf>,
    dir: Option<PathBuf>,
    deserialize: Option<PathBuf>,
    corpus: PathBuf,
    keep_existing: bool,
}

impl ConvertCommand {
    pub fn new(options: &T2cOptions) -> ConvertCommand {
        match options.cmd.clone() {
            T2cSubCommand::Convert {
                file,
                dir,
                deserialize,
                corpus,
                keep_existing,
            } => ConvertCommand {
                file,
                dir,
                deserialize,
                corpus,
                keep_existing,
            },
            _ => panic!("Unexpected T2cSubCommand variant. Not a `Convert` variant!"),
        }
    }

    pub fn convert(&self) -> Result<ConvertStats, ConvertError> {
        let names = self.trace_files()?;
        let target = get_target(TARGET_OS, TARGET_ARCH).map_err(ConvertError::Target)?;
        if let Some(dir) = &self.deserialize {
            fs::create_dir_all(dir).map_err(io_error(dir))?;
        }

        let selector = DefaultCallSelector::default();
        let mut stats = ConvertStats::default();
        let mut exec_buf = vec![0u8; EXEC_BUFFER_SIZE];
        let mut programs: Vec<Program> = Vec::new();

        log!(
            LogInfo,
            "parsing {} traces for {}/{}",
            names.len(),
            target.os,
            target.arch
        );
        for (i, path) in names.iter().enumerate() {
            log!(
                LogDebug,
                "parsing file {}/{}: {}",
                i + 1,
                names.len(),
                path.display()
            );
            stats.files += 1;
            let accepted = self.convert_file(&target, &selector, path, &mut exec_buf, &mut stats)?;
            programs.extend(accepted);
        }

        stats.pack = self.pack(&programs)?;
        Ok(stats)
    }

    /// The trace files to read, in processing order.
    fn trace_files(&self) -> Result<Vec<PathBuf>, ConvertError> {
        match (&self.file, &self.dir) {
            (Some(file), None) => Ok(vec![file.clone()]),
            (None, Some(dir)) => {
                let mut names = Vec::new();
                for entry in fs::read_dir(dir).map_err(io_error(dir))? {
                    let entry = entry.map_err(io_error(dir))?;
                    let path = entry.path();
                    if entry.file_type().map_err(io_error(&path))?.is_dir() {
                        continue;
                    }
                    names.push(path);
                }
                names.sort();
                Ok(names)
            }
            (Some(_), Some(_)) => Err(ConvertError::Usage(
                "--file and --dir can't be used together",
            )),
            (None, None) => Err(ConvertError::Usage("--file or --dir must be specified")),
        }
    }

    /// Programs accepted from one trace file. Only fatal errors are returned.
    fn convert_file<'t>(
        &self,
        target: &'t Target,
        selector: &dyn CallSelector,
        path: &Path,
        exec_buf: &mut [u8],
        stats: &mut ConvertStats,
    ) -> Result<Vec<Program<'t>>, ConvertError> {
        let tree = match trace_parser::parse(path) {
            Ok(Some(tree)) => tree,
            Ok(None) => {
                log!(LogDebug, "file: {} is empty", path.display());
                stats.empty_files += 1;
                return Ok(Vec::new());
            }
            Err(e) => {
                log!(LogWarn, "could not read {}: {}", path.display(), e);
                stats.bad_files += 1;
                return Ok(Vec::new());
            }
        };

        let built: Vec<(pid_t, BuildResult<'t>)> = match walk(&tree, tree.root_pid, |node| {
            (node.pid, build_program(target, selector, &node.records))
        }) {
            Ok(built) => built,
            Err(e) => {
                log!(LogWarn, "{}: {}, skipping file", tree.filename, e);
                stats.bad_files += 1;
                return Ok(Vec::new());
            }
        };

        let mut accepted = Vec::new();
        for (i, (pid, result)) in built.into_iter().enumerate() {
            stats.processes += 1;
            stats.skipped_records += result.skipped;
            let mut program = result.program;
            if program.is_empty() {
                log!(LogDebug, "{}: process {} has no usable calls", tree.filename, pid);
                stats.no_calls += 1;
                continue;
            }
            match fill_out_memory(target, &mut program) {
                Ok(regions) if !regions.is_empty() => log!(
                    LogDebug,
                    "{}: process {}: {} bytes in {} memory regions",
                    tree.filename,
                    pid,
                    regions.iter().map(|(r, _)| r.size()).sum::<u64>(),
                    regions.len()
                ),
                Ok(_) => (),
                Err(e) => {
                    log!(LogDebug, "failed to fill out memory: {}", e);
                    stats.unresolved += 1;
                    continue;
                }
            }
            validate(target, &program).map_err(|err| ConvertError::Validation {
                file: tree.filename.clone(),
                err,
            })?;
            match serialize_for_exec(&program, exec_buf) {
                Ok(_) => (),
                Err(e @ ExecError::BufferOverflow { .. }) => {
                    log!(LogDebug, "{}: process {}: program is too large: {}", tree.filename, pid, e);
                    stats.too_large += 1;
                    continue;
                }
                Err(e) => fatal!("validated program from {} failed to encode: {}", tree.filename, e),
            }

            if let Some(dir) = &self.deserialize {
                write_program(&dir.join(format!("{}{}", tree.filename, i)), &program)?;
            }
            stats.accepted += 1;
            accepted.push(program);
        }
        Ok(accepted)
    }

    fn pack(&self, programs: &[Program]) -> Result<PackStats, ConvertError> {
        if !self.keep_existing {
            match fs::remove_file(&self.corpus) {
                Err(e) if e.kind() != ErrorKind::NotFound => {
                    return Err(io_error(&self.corpus)(e));
                }
                _ => (),
            }
        }
        let mut db = CorpusDb::open(&self.corpus).map_err(io_error(&self.corpus))?;
        if !db.is_empty() {
            log!(
                LogInfo,
                "adding to {} existing records in {}",
                db.len(),
                self.corpus.display()
            );
        }
        let stats = packer::pack(&mut db, programs).map_err(io_error(&self.corpus))?;
        log!(LogInfo, "finished!");
        Ok(stats)
    }
}

fn write_program(path: &Path, program: &Program) -> Result<(), ConvertError> {
    let fd = ScopedFd::open_path_with_mode(
        path,
        OFlag::O_CLOEXEC | OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
        Mode::S_IRUSR | Mode::S_IWUSR | Mode::S_IRGRP,
    )
    .map_err(io_error(path))?;
    fd.write_all(&program.serialize()).map_err(io_error(path))
}

impl T2cCommand for ConvertCommand {
    fn run(&mut self) -> ExitResult<()> {
        match self.convert() {
            Ok(stats) => {
                log!(
                    LogInfo,
                    "{} files ({} empty, {} skipped), {} processes: {} accepted, \
                     {} without calls, {} unresolved, {} too large; {} records unsupported",
                    stats.files,
                    stats.empty_files,
                    stats.bad_files,
                    stats.processes,
                    stats.accepted,
                    stats.no_calls,
                    stats.unresolved,
                    stats.too_large,
                    stats.skipped_records
                );
                log!(
                    LogInfo,
                    "saved {} programs to {} ({} with disambiguated keys)",
                    stats.pack.saved,
                    self.corpus.display(),
                    stats.pack.disambiguated
                );
                ExitResult::Ok(())
            }
            Err(e) => {
                let code = e.exit_code();
                ExitResult::err_from(e, code)
            }
        }
    }
}
