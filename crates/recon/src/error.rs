use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconError {
    /// TOML/JSON parse or deserialization error.
    ConfigParse(String),
    /// Config validation error (empty mapping, bad date format, etc.).
    ConfigValidation(String),
    /// System root or practitioner folder could not be listed.
    DirectoryRead { path: PathBuf, message: String },
    /// One source file could not be read as a table.
    FileRead { path: PathBuf, message: String },
    /// No configured column intersects the file's headers.
    SchemaMismatch { path: PathBuf, headers: Vec<String> },
    /// Every file of a system yielded nothing.
    NoData { system: String },
    /// Neither recognized period column is present on the summary side.
    ReconciliationKey { available: Vec<String> },
    /// Reference table could not be read.
    Reference { path: PathBuf, message: String },
    /// Required column missing from the reference table.
    MissingColumn { table: String, column: String },
    /// Output table could not be written.
    Write { path: PathBuf, message: String },
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::DirectoryRead { path, message } => {
                write!(f, "cannot read directory {}: {message}", path.display())
            }
            Self::FileRead { path, message } => {
                write!(f, "cannot read {}: {message}", path.display())
            }
            Self::SchemaMismatch { path, headers } => {
                write!(
                    f,
                    "{}: no configured column matches headers [{}]",
                    path.display(),
                    headers.join(", ")
                )
            }
            Self::NoData { system } => write!(f, "system '{system}': no data extracted"),
            Self::ReconciliationKey { available } => {
                write!(
                    f,
                    "neither 'Date Post' nor 'Month' found; available columns: [{}]",
                    available.join(", ")
                )
            }
            Self::Reference { path, message } => {
                write!(f, "cannot read reference table {}: {message}", path.display())
            }
            Self::MissingColumn { table, column } => {
                write!(f, "{table}: missing column '{column}'")
            }
            Self::Write { path, message } => {
                write!(f, "cannot write {}: {message}", path.display())
            }
        }
    }
}

impl std::error::Error for ReconError {}

impl ReconError {
    /// Short machine-friendly kind, used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigParse(_) | Self::ConfigValidation(_) => "config_error",
            Self::DirectoryRead { .. } => "directory_read_error",
            Self::FileRead { .. } => "file_read_error",
            Self::SchemaMismatch { .. } => "schema_mismatch_error",
            Self::NoData { .. } => "no_data_error",
            Self::ReconciliationKey { .. } => "reconciliation_key_error",
            Self::Reference { .. } | Self::MissingColumn { .. } => "reference_error",
            Self::Write { .. } => "write_error",
        }
    }

    /// Whether this error aborts the whole run rather than one file or system.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConfigParse(_) | Self::ConfigValidation(_))
    }
}
