use std::io::Write;

/// Abstraction over user-facing output.
///
/// Command modules use this trait instead of `println!`/`eprintln!`; logs go
/// through `tracing` to stderr and never mix with command output.
pub trait UserOutput: Send + Sync {
    /// Informational line, e.g. one row of a listing.
    fn status(&self, message: &str);

    fn success(&self, message: &str);

    fn warning(&self, message: &str);

    fn error(&self, message: &str);

    /// A blank line separator.
    fn blank(&self);
}

/// Standard CLI output, stdout for results and stderr for problems.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
        std::io::stderr().flush().ok();
    }

    fn blank(&self) {
        println!();
    }
}
