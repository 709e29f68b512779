use std::{
    error::Error,
    process::{ExitCode, Termination},
};

/// Exit code for failures while converting or packing.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for contradictory or missing command line input.
pub const EXIT_USAGE: i32 = 2;

pub enum ExitResult<T: Termination> {
    Ok(T),
    Err(Box<dyn Error>, i32),
}

impl<T: Termination> ExitResult<T> {
    pub fn err_from<E: Error + 'static>(e: E, code: i32) -> ExitResult<T> {
        ExitResult::Err(Box::new(e), code)
    }

    pub fn code(&self) -> i32 {
        match self {
            ExitResult::Ok(_) => 0,
            ExitResult::Err(_, c) => *c,
        }
    }
}

impl<T: Termination> Termination for ExitResult<T> {
    fn report(self) -> ExitCode {
        let code = self.code();
        match self {
            ExitResult::Ok(t) => t.report(),
            ExitResult::Err(b, _) => {
                eprintln!("Error: {}", b);
                ExitCode::from(code as u8)
            }
        }
    }
}
