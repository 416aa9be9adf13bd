//! Unified error type.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// The error type returned by the server's fallible operations.
///
/// Application-level failures (404, 400, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: establishing or operating the listening socket.
#[derive(Debug, Error)]
pub enum Error {
    /// The listening socket could not be bound. Fatal at startup: without a
    /// listener there is nothing to serve.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Socket-level failure outside of bind.
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_the_address() {
        let addr: SocketAddr = ([127, 0, 0, 1], 4000).into();
        let err = Error::Bind {
            addr,
            source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        };
        assert!(err.to_string().contains("127.0.0.1:4000"));
        assert!(err.to_string().contains("address in use"));
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionReset, "reset").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
