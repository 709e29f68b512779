use std::path::PathBuf;
use structopt::{clap::AppSettings, StructOpt};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "trace2corpus",
    about = "Turn strace output into a seed corpus of syscall programs",
    after_help = "Use T2C_LOG to control logging; e.g. T2C_LOG=all:info,builder:debug"
)]
#[structopt(global_settings = &[AppSettings::UnifiedHelpMessage])]
pub struct T2cOptions {
    #[structopt(subcommand)]
    pub cmd: T2cSubCommand,
}

#[derive(Clone, Debug, StructOpt)]
pub enum T2cSubCommand {
    /// Convert strace output into programs and pack them into a corpus database
    #[structopt(name = "convert")]
    Convert {
        /// A single strace output file (`strace -f -s 65500 -v -xx -o <file>`)
        #[structopt(short = "f", long, parse(from_os_str))]
        file: Option<PathBuf>,

        /// A directory of strace output files. Subdirectories are ignored
        #[structopt(short = "d", long, parse(from_os_str))]
        dir: Option<PathBuf>,

        /// Also write every accepted program in text form into this directory
        #[structopt(long, parse(from_os_str))]
        deserialize: Option<PathBuf>,

        /// Where to write the corpus database
        #[structopt(short = "c", long, default_value = "corpus.db", parse(from_os_str))]
        corpus: PathBuf,

        /// Add to an existing corpus database instead of replacing it
        #[structopt(long)]
        keep_existing: bool,
    },

    /// List the records of a corpus database
    #[structopt(name = "dump")]
    Dump {
        #[structopt(parse(from_os_str))]
        corpus: PathBuf,

        /// One JSON object per record instead of program text
        #[structopt(long)]
        json: bool,
    },
}
