#[macro_use]
extern crate lazy_static;

#[macro_use]
mod log;
mod commands;
mod corpus;
mod kernel_abi;
mod kernel_metadata;
mod prog;
mod scoped_fd;
mod target;
mod trace;
mod util;

use crate::commands::{
    convert_command::ConvertCommand,
    dump_command::DumpCommand,
    exit_result::ExitResult,
    t2c_options::{T2cOptions, T2cSubCommand},
    T2cCommand,
};
use structopt::StructOpt;

fn main() -> ExitResult<()> {
    let options = T2cOptions::from_args();

    match &options.cmd {
        T2cSubCommand::Convert { .. } => ConvertCommand::new(&options).run(),
        T2cSubCommand::Dump { .. } => DumpCommand::new(&options).run(),
    }
}
