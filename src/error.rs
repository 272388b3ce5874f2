use std::error::Error;
use std::fmt;

/// Crate error type for data-access and pipeline operations.
#[derive(Debug)]
pub enum GeoflowError {
    /// Wraps errors returned by `rusqlite`.
    Sql(rusqlite::Error),
    /// Wraps errors returned by the `wkb` crate.
    Wkb(wkb::error::WkbError),
    /// Wraps I/O errors from the import/export drivers.
    Io(std::io::Error),
    /// Wraps errors returned by the `csv` crate.
    Csv(csv::Error),
    /// Wraps errors returned by `serde_json`.
    Json(serde_json::Error),
    /// Named table does not exist in the database.
    NoSuchTable {
        table_name: String,
    },
    /// A table with the same name already exists.
    TableAlreadyExists {
        table_name: String,
    },
    /// The table has no geometry-typed column.
    MissingGeometryColumn {
        table_name: String,
    },
    /// Operation requires a stable table location but the wrapper is
    /// backed by a raw query result.
    NoTableLocation {
        operation: &'static str,
    },
    /// A column type declared in SQLite metadata is not supported by this crate.
    UnsupportedColumnType {
        column: String,
        declared_type: String,
    },
    /// A geometry type name in metadata could not be mapped to a supported WKB geometry type.
    UnsupportedGeometryType(String),
    /// Invalid or mixed `z` / `m` dimension flags in GeoPackage metadata.
    InvalidDimension {
        z: i8,
        m: i8,
    },
    /// File extension does not select any import/export driver.
    UnsupportedFormat {
        extension: String,
    },
    /// `ST_Transform` has no closed form for this SRID pair.
    UnsupportedTransform {
        from: u32,
        to: u32,
    },
    /// Invalid GeoPackage geometry flags byte.
    InvalidGeometryFlags(u8),
    /// GeoPackage geometry blob is too short for the fixed header.
    InvalidGeometryLength {
        len: usize,
        minimum: usize,
    },
    /// Referenced `srs_id` does not exist in `gpkg_spatial_ref_sys`.
    MissingSpatialRefSysId {
        srs_id: u32,
    },
    /// Dynamic `Value` type did not match the expected conversion target.
    ValueTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// Numeric conversion failed because the value is out of range.
    ValueOutOfRange {
        target: &'static str,
    },
    /// Requested column does not exist in the row.
    MissingColumn {
        column: String,
    },
    /// A mandatory process input had neither a supplied value nor a default.
    MissingInput {
        process: String,
        input: String,
    },
    /// A supplied process input value violated the declared kind.
    InputTypeMismatch {
        process: String,
        input: String,
        expected: &'static str,
        actual: &'static str,
    },
    /// A referenced input or output name is not declared by the process.
    UnknownPort {
        process: String,
        port: String,
    },
    /// Two sources were linked into the same input or alias.
    DuplicateLink {
        target: String,
    },
    /// The mapper link graph left nodes that can never become runnable.
    UnresolvedLink {
        process: String,
    },
    /// A pre/post-condition check with the stop action failed.
    CheckFailed {
        process: String,
        message: String,
    },
    /// Write operation attempted on a read-only connection.
    ReadOnly,
    Message(String),
}

impl fmt::Display for GeoflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(err) => write!(f, "{err}"),
            Self::Wkb(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::Csv(err) => write!(f, "{err}"),
            Self::Json(err) => write!(f, "{err}"),
            Self::NoSuchTable { table_name } => write!(f, "no such table: {table_name}"),
            Self::TableAlreadyExists { table_name } => {
                write!(f, "table already exists: {table_name}")
            }
            Self::MissingGeometryColumn { table_name } => {
                write!(f, "no geometry column found for table: {table_name}")
            }
            Self::NoTableLocation { operation } => {
                write!(
                    f,
                    "{operation} requires a table location, not a query result"
                )
            }
            Self::UnsupportedColumnType {
                column,
                declared_type,
            } => write!(
                f,
                "unsupported column type for column '{column}': {declared_type}"
            ),
            Self::UnsupportedGeometryType(ty) => write!(f, "unsupported geometry type: {ty}"),
            Self::InvalidDimension { z, m } => {
                write!(f, "invalid or mixed geometry dimension (z={z}, m={m})")
            }
            Self::UnsupportedFormat { extension } => {
                write!(f, "no driver for file extension: {extension}")
            }
            Self::UnsupportedTransform { from, to } => {
                write!(f, "no transform available from SRID {from} to {to}")
            }
            Self::InvalidGeometryFlags(flags) => {
                write!(f, "invalid gpkg geometry flags: {flags:#04x}")
            }
            Self::InvalidGeometryLength { len, minimum } => {
                write!(
                    f,
                    "invalid gpkg geometry length: got {len} bytes, expected at least {minimum}"
                )
            }
            Self::MissingSpatialRefSysId { srs_id } => {
                write!(f, "srs_id {srs_id} not found in gpkg_spatial_ref_sys")
            }
            Self::ValueTypeMismatch { expected, actual } => {
                write!(f, "expected {expected}, got {actual}")
            }
            Self::ValueOutOfRange { target } => {
                write!(f, "value out of range for {target}")
            }
            Self::MissingColumn { column } => write!(f, "missing column: {column}"),
            Self::MissingInput { process, input } => {
                write!(
                    f,
                    "process '{process}': mandatory input '{input}' not supplied"
                )
            }
            Self::InputTypeMismatch {
                process,
                input,
                expected,
                actual,
            } => write!(
                f,
                "process '{process}': input '{input}' expected {expected}, got {actual}"
            ),
            Self::UnknownPort { process, port } => {
                write!(
                    f,
                    "process '{process}' declares no input or output named '{port}'"
                )
            }
            Self::DuplicateLink { target } => {
                write!(f, "'{target}' already has a linked source")
            }
            Self::UnresolvedLink { process } => {
                write!(
                    f,
                    "process '{process}' can never run; link graph is cyclic or incomplete"
                )
            }
            Self::CheckFailed { process, message } => {
                write!(f, "check failed for process '{process}': {message}")
            }
            Self::ReadOnly => write!(f, "operation not allowed on read-only connection"),
            Self::Message(message) => write!(f, "{message}"),
        }
    }
}

impl Error for GeoflowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sql(err) => Some(err),
            Self::Wkb(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Csv(err) => Some(err),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for GeoflowError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sql(err)
    }
}

impl From<wkb::error::WkbError> for GeoflowError {
    fn from(err: wkb::error::WkbError) -> Self {
        Self::Wkb(err)
    }
}

impl From<std::io::Error> for GeoflowError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for GeoflowError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

impl From<serde_json::Error> for GeoflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

pub type Result<T> = std::result::Result<T, GeoflowError>;
