//! External command execution

use crate::error::{Error, Result};
use crate::types::CommandOutput;
use std::process::Command;

/// Runs an external program and captures its output
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Run and return stdout, mapping a non-zero exit through `classify`
    fn run_checked(
        &self,
        program: &str,
        args: &[&str],
        classify: &dyn Fn(&str, &str) -> Error,
    ) -> Result<String> {
        let output = self.run(program, args)?;
        if !output.success {
            let command = format!("{program} {}", args.join(" "));
            return Err(classify(&command, &output.stderr_str()));
        }
        Ok(output.stdout_str())
    }
}

impl<T: CommandRunner + ?Sized> CommandRunner for &T {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        (**self).run(program, args)
    }
}

/// Runner that spawns real processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        log::trace!("Running: {program} {}", args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                command: format!("{program} {}", args.join(" ")),
                stderr: format!("failed to execute: {e}"),
            })?;
        Ok(output.into())
    }
}
