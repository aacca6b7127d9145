use crate::nat::NatClass;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of one step of a link attempt.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input, rejected before any I/O.
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] io::Error),

    /// A bounded wait expired without a qualifying datagram or counterpart.
    #[error("timed out: {0}")]
    Timeout(&'static str),

    /// The same endpoint registered twice for one id.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unsupported nat pairing: local {local}, peer {peer}")]
    UnsupportedPairing { local: NatClass, peer: NatClass },

    /// Non-success status from the rendezvous service.
    #[error("rendezvous: ({status}) {reason}")]
    Rejected { status: u16, reason: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout(_))
    }
}

/// The phase of [`crate::Linker::link`] that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Config,
    Classification,
    Rendezvous,
    Punching,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Config => "config",
            Phase::Classification => "classification",
            Phase::Rendezvous => "rendezvous",
            Phase::Punching => "punching",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("{phase} failed: {source}")]
pub struct LinkError {
    pub phase: Phase,
    #[source]
    pub source: Error,
}

impl LinkError {
    pub(crate) fn new(phase: Phase, source: Error) -> Self {
        Self { phase, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_transport() {
        let e: Error = io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(matches!(e, Error::Transport(_)));
        assert!(!e.is_timeout());
    }

    #[test]
    fn test_link_error_names_phase() {
        let e = LinkError::new(
            Phase::Punching,
            Error::UnsupportedPairing {
                local: NatClass::EndpointDependent,
                peer: NatClass::EndpointDependent,
            },
        );
        assert_eq!(
            e.to_string(),
            "punching failed: unsupported nat pairing: local EDM, peer EDM"
        );
    }
}
