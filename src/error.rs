//! Error taxonomy: every failure carries a domain and a code within it.
//!
//! Client callbacks return [`Error`] as well; errors they produce while
//! decoding or fetching data are forwarded through the `Conversion`,
//! `Compression` and `Io` domains and wrapped with the failing offset or
//! segment where the container knows it.

/// Errors forwarded out of client callbacks without further interpretation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid argument: {0}")]
    Argument(#[from] ArgumentError),
    #[error("conversion failed: {0}")]
    Conversion(#[source] BoxError),
    #[error("compression failed: {0}")]
    Compression(#[source] BoxError),
    #[error("i/o error: {0}")]
    Io(#[from] IoError),
    #[error("invalid input: {0}")]
    Input(#[from] InputError),
    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
    #[error("output error: {0}")]
    Output(#[from] OutputError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// A caller passed a value the operation cannot work with.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ArgumentError {
    #[error("invalid {0}")]
    InvalidValue(&'static str),
    #[error("{0} less than zero")]
    ValueLessThanZero(&'static str),
    #[error("{0} zero or less")]
    ValueZeroOrLess(&'static str),
    #[error("{0} exceeds maximum")]
    ValueExceedsMaximum(&'static str),
    #[error("{0} too small")]
    ValueTooSmall(&'static str),
    #[error("{0} too large")]
    ValueTooLarge(&'static str),
    #[error("{0} out of bounds")]
    ValueOutOfBounds(&'static str),
    #[error("unsupported {0}")]
    UnsupportedValue(&'static str),
    #[error("conflicting {0}")]
    ConflictingValue(&'static str),
}

/// Failures at the boundary to backing storage, either detected by a
/// container or forwarded from a callback.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum IoError {
    #[error("unable to open resource")]
    OpenFailed,
    #[error("unable to close resource")]
    CloseFailed,
    #[error("seek of segment {segment} to offset {offset} failed")]
    SeekFailed {
        segment: usize,
        offset: i64,
        #[source]
        source: Option<BoxError>,
    },
    #[error("read at offset {offset} failed")]
    ReadFailed {
        offset: i64,
        #[source]
        source: Option<BoxError>,
    },
    #[error("write failed")]
    WriteFailed,
    #[error("access denied")]
    AccessDenied,
    #[error("invalid resource")]
    InvalidResource,
    #[error("ioctl failed")]
    IoctlFailed,
    #[error("unlink failed")]
    UnlinkFailed,
}

/// The bytes handed to a callback did not look like what it expected.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum InputError {
    #[error("invalid data")]
    InvalidData,
    #[error("signature mismatch")]
    SignatureMismatch,
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("value mismatch")]
    ValueMismatch,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MemoryError {
    #[error("insufficient memory")]
    Insufficient,
    #[error("unable to copy memory")]
    CopyFailed,
    #[error("unable to set memory")]
    SetFailed,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum OutputError {
    #[error("insufficient space")]
    InsufficientSpace,
}

/// An operation could not complete against the container's current state.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RuntimeError {
    #[error("missing {0}")]
    ValueMissing(&'static str),
    #[error("{0} already set")]
    ValueAlreadySet(&'static str),
    #[error("initialization failed")]
    InitializeFailed,
    #[error("resize failed")]
    ResizeFailed,
    #[error("finalization failed")]
    FinalizeFailed,
    #[error("unable to get {0}")]
    GetFailed(&'static str),
    #[error("unable to set {0}")]
    SetFailed(&'static str),
    #[error("unable to append {0}")]
    AppendFailed(&'static str),
    #[error("unable to copy {0}")]
    CopyFailed(&'static str),
    #[error("unable to remove {0}")]
    RemoveFailed(&'static str),
    #[error("unable to print")]
    PrintFailed,
    #[error("{0} out of bounds")]
    ValueOutOfBounds(&'static str),
    #[error("{0} exceeds maximum")]
    ValueExceedsMaximum(&'static str),
    #[error("unsupported {0}")]
    UnsupportedValue(&'static str),
    #[error("abort requested")]
    AbortRequested,
}
