//! Wire constants and the crate error type
//!
//! Session bootstrap, initiator to responder:
//! ```txt
//! +--------+---------------------------------+
//! |  SALT  |  FRAME | FRAME | FRAME | ...    |
//! +--------+---------------------------------+
//! |   32   |            Variable             |
//! +--------+---------------------------------+
//! ```
//!
//! Each frame:
//! ```txt
//! +-------+--------+--------------------------+
//! | NONCE | LENGTH | CIPHERTEXT (tag appended) |
//! +-------+--------+--------------------------+
//! |   N   |   2    |          LENGTH           |
//! +-------+--------+--------------------------+
//! ```
//!
//! The plaintext of the first client frame is the target address:
//! ```txt
//! +------+----------+----------+
//! | ATYP | DST.ADDR | DST.PORT |
//! +------+----------+----------+
//! |  1   | Variable |    2     |
//! +------+----------+----------+
//!
//! example: proxy google.com:0
//! bytes: `0x03 0x0A b`google.com` 0x00 0x00`
//!```
//!

use std::{fmt, io, string::FromUtf8Error, time::Duration};

use tracing::{debug, error, warn, Level};

pub const SOCKS5_ADDR_TYPE_IPV4: u8 = 0x01;
pub const SOCKS5_ADDR_TYPE_DOMAIN_NAME: u8 = 0x03;
pub const SOCKS5_ADDR_TYPE_IPV6: u8 = 0x04;

pub const MAX_DOMAIN_LEN: usize = 255;

pub const SALT_LEN: usize = 32;
pub const KEY_LEN: usize = 32;
pub const PBKDF2_ITERATIONS: u32 = 10_000;

/// Largest value the 2-byte length field can carry.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Read size for the plaintext side of a relay.
pub const RELAY_BUFFER_SIZE: usize = 8192;

/// Deadline for reading the salt, nonce and length of a handshake frame.
pub const HANDSHAKE_HEADER_TIMEOUT: Duration = Duration::from_secs(30);
/// Deadline for reading the ciphertext of a handshake frame.
pub const HANDSHAKE_BODY_TIMEOUT: Duration = Duration::from_secs(60);
pub const HANDSHAKE_MAX_ATTEMPTS: usize = 3;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECT_MAX_ATTEMPTS: usize = 3;
pub const TCP_KEEPALIVE: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    IoError(#[from] io::Error),
    #[error("malformed address: {0}")]
    MalformedAddress(&'static str),
    #[error("unknown address type {0:#x}")]
    UnsupportedAddressType(u8),
    #[error("invalid domain syntax")]
    InvalidDomainSyntax(#[from] FromUtf8Error),
    #[error("unsupported cipher method {0:?}")]
    UnsupportedCipherMethod(String),
    #[error("invalid frame length {0}")]
    InvalidFrameLength(usize),
    #[error("ciphertext too short: {len} bytes, need at least {min}")]
    CiphertextTooShort { len: usize, min: usize },
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("cipher: {0}")]
    CipherError(ring::error::Unspecified),
    #[error("unsupported socks version {0:#x}")]
    UnsupportedSocksVersion(u8),
    #[error("no acceptable socks auth method")]
    NoAcceptableAuthMethod,
    #[error("unsupported socks command {0:#x}")]
    UnsupportedCommand(u8),
    #[error("{phase} timed out after {after:?}")]
    Timeout { phase: &'static str, after: Duration },
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("relay {direction}: {source}")]
    RelayError {
        direction: &'static str,
        #[source]
        source: Box<Error>,
    },
    #[error("relay task fault: {0}")]
    TaskFault(String),
}

/// Coarse classification used for logging and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Protocol,
    Io,
    Timeout,
    Crypto,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::IoError(e) if e.kind() == io::ErrorKind::TimedOut => ErrorKind::Timeout,
            Error::IoError(_) => ErrorKind::Io,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::CiphertextTooShort { .. }
            | Error::AuthenticationFailed
            | Error::CipherError(_)
            | Error::TaskFault(_) => ErrorKind::Crypto,
            Error::RelayError { source, .. } => source.kind(),
            Error::MalformedAddress(_)
            | Error::UnsupportedAddressType(_)
            | Error::InvalidDomainSyntax(_)
            | Error::UnsupportedCipherMethod(_)
            | Error::InvalidFrameLength(_)
            | Error::UnsupportedSocksVersion(_)
            | Error::NoAcceptableAuthMethod
            | Error::UnsupportedCommand(_)
            | Error::InvalidConfig(_) => ErrorKind::Protocol,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Peer went away in the middle of a read.
    pub fn is_unexpected_eof(&self) -> bool {
        match self {
            Error::IoError(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            Error::RelayError { source, .. } => source.is_unexpected_eof(),
            _ => false,
        }
    }

    /// Log level for a connection ending with this error. Crypto failures rank
    /// above everything else; timeouts are routine.
    pub fn severity(&self) -> Level {
        match self.kind() {
            ErrorKind::Crypto => Level::ERROR,
            ErrorKind::Protocol | ErrorKind::Io => Level::WARN,
            ErrorKind::Timeout => Level::DEBUG,
        }
    }

    pub(crate) fn timeout(phase: &'static str, after: Duration) -> Self {
        Error::Timeout { phase, after }
    }
}

/// Logs a connection failure at [`Error::severity`].
pub(crate) fn log_failure(err: &Error, context: fmt::Arguments<'_>) {
    let level = err.severity();
    if level == Level::ERROR {
        error!("{}: {}", context, err);
    } else if level == Level::WARN {
        warn!("{}: {}", context, err);
    } else {
        debug!("{}: {}", context, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_errors() {
        assert_eq!(Error::InvalidFrameLength(0).kind(), ErrorKind::Protocol);
        assert_eq!(Error::UnsupportedCommand(2).kind(), ErrorKind::Protocol);
        assert_eq!(Error::AuthenticationFailed.kind(), ErrorKind::Crypto);
        assert_eq!(Error::TaskFault("boom".into()).kind(), ErrorKind::Crypto);
        assert_eq!(
            Error::from(io::Error::from(io::ErrorKind::BrokenPipe)).kind(),
            ErrorKind::Io
        );
        assert_eq!(
            Error::from(io::Error::from(io::ErrorKind::TimedOut)).kind(),
            ErrorKind::Timeout
        );
    }

    #[test]
    fn only_timeouts_are_retryable() {
        assert!(Error::timeout("read salt", HANDSHAKE_HEADER_TIMEOUT).is_retryable());
        assert!(!Error::AuthenticationFailed.is_retryable());
        assert!(!Error::from(io::Error::from(io::ErrorKind::UnexpectedEof)).is_retryable());
    }

    #[test]
    fn crypto_failures_log_above_io() {
        assert_eq!(Error::AuthenticationFailed.severity(), Level::ERROR);
        assert_eq!(Error::TaskFault("panic".into()).severity(), Level::ERROR);
        assert_eq!(
            Error::from(io::Error::from(io::ErrorKind::ConnectionReset)).severity(),
            Level::WARN
        );
        assert_eq!(Error::UnsupportedAddressType(9).severity(), Level::WARN);
        assert_eq!(
            Error::timeout("relay idle", Duration::from_secs(1)).severity(),
            Level::DEBUG
        );
        let relayed = Error::RelayError {
            direction: "b -> a",
            source: Box::new(Error::CiphertextTooShort { len: 4, min: 16 }),
        };
        assert_eq!(relayed.severity(), Level::ERROR);
        log_failure(&relayed, format_args!("relay {}", "test"));
    }

    #[test]
    fn relay_error_keeps_source_kind() {
        let err = Error::RelayError {
            direction: "a -> b",
            source: Box::new(Error::AuthenticationFailed),
        };
        assert_eq!(err.kind(), ErrorKind::Crypto);
        assert_eq!(err.to_string(), "relay a -> b: authentication failed");
    }
}
