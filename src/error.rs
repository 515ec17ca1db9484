// error.rs
//
use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors surfaced by an encode job
///
/// Every variant is delivered to the caller exactly once, either as the
/// synchronous return of [encode](struct.Flipbook.html#method.encode)
/// (`JobInProgress` only) or through the job's completion signal.
#[derive(Debug)]
pub enum Error {
    /// A source image could not be read or decoded.
    SourceRead(PathBuf),
    /// Zero source frames were supplied.
    EmptyInput,
    /// Canvas width or height is zero or exceeds 65535.
    UnsupportedDimensions(u32, u32),
    /// Frame color data could not be reduced to a palette.
    Quantization(&'static str),
    /// Destination could not be created, written or promoted.
    Write(io::Error),
    /// Another job is already encoding to the same destination.
    JobInProgress(PathBuf),
    /// The job was cancelled before completion.
    Cancelled,
}

/// Flipbook result type
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::SourceRead(path) => {
                write!(fmt, "unreadable source image: {}", path.display())
            }
            Error::EmptyInput => write!(fmt, "no source frames supplied"),
            Error::UnsupportedDimensions(width, height) => {
                write!(fmt, "unsupported canvas: {}x{}", width, height)
            }
            Error::Quantization(msg) => write!(fmt, "quantization: {}", msg),
            Error::Write(err) => write!(fmt, "destination write: {}", err),
            Error::JobInProgress(path) => {
                write!(fmt, "job already active for {}", path.display())
            }
            Error::Cancelled => write!(fmt, "job cancelled"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Write(ref err) => Some(err),
            _ => None,
        }
    }
}
