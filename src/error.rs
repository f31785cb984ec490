//! modbus-rtu crate error types.

/// Errors surfaced synchronously to the caller.
///
/// Framing and decode errors (§7 of the design: CRC mismatch, short frame,
/// unknown function code) never reach this type — they are logged and the
/// frame is silently dropped, because the wire is a shared bus where noise
/// is expected, not a programming mistake.
#[derive(Debug)]
pub enum Error {
    /// Bad role/protocol combination, unset device, or unsupported baud rate.
    Config(String),

    /// Serial open/read/write failure.
    Transport(std::io::Error),

    /// A caller submitted a primitive whose operation doesn't fit the
    /// connection's role (e.g. a slave submitting a REQUEST).
    Submit(&'static str),
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Config(message) => write!(f, "configuration error: {message}"),
            Error::Transport(error) => write!(f, "transport error: {error}"),
            Error::Submit(message) => write!(f, "invalid argument: {message}"),
        }
    }
}

impl core::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Transport(error)
    }
}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;
