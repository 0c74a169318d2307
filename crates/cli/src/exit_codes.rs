//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 3-9     | run              | Pipeline run outcomes                    |
//!
//! Mismatched reconciliation rows are a normal result, not an error: they
//! are reported but exit 0.

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable config file.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Run (3-9)
// =============================================================================

/// Configuration failed to parse or validate. Nothing was processed.
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// The run finished but some scope failed: a system root could not be
/// listed, or an output table could not be written.
pub const EXIT_PARTIAL: u8 = 4;
