//! Application error type.
//!
//! Every fallible operation returns `Result<_, AppError>`. The error carries the
//! process exit code so `main` can report and exit without further mapping:
//!
//! - `2`: input problems (missing/unreadable files, malformed JSON/regions/expressions)
//! - `4`: fitting problems (nothing to fit, non-finite statistic, singular systems)

/// Exit code for input and I/O failures.
pub const EXIT_INPUT: u8 = 2;
/// Exit code for fit failures.
pub const EXIT_FIT: u8 = 4;

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    /// Shorthand for an input/I/O error (exit code 2).
    pub fn input(message: impl Into<String>) -> Self {
        Self::new(EXIT_INPUT, message)
    }

    /// Shorthand for a fitting error (exit code 4).
    pub fn fit(message: impl Into<String>) -> Self {
        Self::new(EXIT_FIT, message)
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
