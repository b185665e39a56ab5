use std::io;
use std::net;

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Mirrors the `Wait`/`Fatal` split used throughout the event loop: `Wait`
/// means "not enough data yet, or the socket would block" and never tears
/// anything down; `Fatal` always means the connection (or, for listener-level
/// errors, the server) must be destroyed.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    BadMagic,
    BadVersion,
    PayloadTooLarge,
    CrcMismatch,
    BufferFull,
    AddrParse,
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

impl From<net::AddrParseError> for NetworkError {
    #[inline]
    fn from(_: net::AddrParseError) -> Self {
        NetworkError::Fatal(ErrorType::AddrParse)
    }
}

/// Convenience predicate used at call sites that only care whether an
/// operation truly failed, as opposed to merely needing to wait.
pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for NetworkResult<T> {
    #[inline]
    fn has_failed(&self) -> bool {
        match self {
            Ok(_) => false,
            Err(NetworkError::Wait) => false,
            _ => true,
        }
    }
}
