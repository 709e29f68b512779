use exit_result::ExitResult;

pub mod convert_command;
pub mod dump_command;
pub mod exit_result;
pub mod t2c_options;

pub trait T2cCommand {
    fn run(&mut self) -> ExitResult<()>;
}
