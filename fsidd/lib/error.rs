use std::{
    error::Error,
    fmt::{self, Display},
};

use thiserror::Error;

use crate::store::StoreError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of an fsidd-related operation.
pub type FsiddResult<T> = Result<T, FsiddError>;

/// An error that occurred while serving or resolving fsids.
///
/// The `Display` text of an error returned by a command handler is sent verbatim to the peer,
/// so the messages of the protocol-visible variants are part of the wire format.
#[derive(pretty_error_debug::Debug, Error)]
pub enum FsiddError {
    /// The command argument was missing or malformed.
    #[error("invalid argument")]
    InvalidArgument,

    /// The server has been shut down or closed.
    #[error("server closed")]
    ServerClosed,

    /// The request was cancelled because its connection was closed.
    #[error("operation cancelled")]
    Cancelled,

    /// Fewer bytes were written than requested.
    #[error("short write")]
    ShortWrite,

    /// The peer sent a response that is neither a success nor a failure.
    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(String),

    /// The daemon answered a request with an error.
    #[error("{0}")]
    Remote(String),

    /// An error reported by the fsid store.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A system call failed.
    #[error("system error: {0}")]
    Nix(#[from] nix::Error),

    /// The configuration file could not be parsed.
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// One or more configuration values are missing or invalid.
    #[error("invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    /// Several errors occurred while stopping the server.
    #[error("{}", format_errors(.0))]
    Multiple(Vec<FsiddError>),

    /// Custom error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FsiddError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> FsiddError {
        FsiddError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Folds a list of errors into a single result.
    ///
    /// No errors is `Ok`, one error is returned as is, more than one becomes
    /// [`FsiddError::Multiple`].
    pub fn merge(mut errors: Vec<FsiddError>) -> FsiddResult<()> {
        match errors.len() {
            0 => Result::Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(FsiddError::Multiple(errors)),
        }
    }

    /// Returns `true` if the error means the peer went away or the connection was torn down.
    pub fn is_closed(&self) -> bool {
        match self {
            FsiddError::ServerClosed | FsiddError::Cancelled => true,
            FsiddError::Io(e) => is_closed_io(e),
            _ => false,
        }
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `FsiddResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> FsiddResult<T> {
    Result::Ok(value)
}

/// Returns `true` if an I/O error means the connection is gone.
pub(crate) fn is_closed_io(error: &std::io::Error) -> bool {
    use std::io::ErrorKind;

    matches!(
        error.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
    )
}

fn format_errors(errors: &[FsiddError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PartialEq for AnyError {
    fn eq(&self, other: &Self) -> bool {
        self.error.to_string() == other.error.to_string()
    }
}

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
