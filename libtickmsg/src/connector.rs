use crate::error_state::{ErrorCode, ErrorState};
use crate::reactor::{ReactorHandle, ReadyEvent};
use log::*;
use mio::net::TcpStream;
use mio::Token;
use std::io;
use std::net::SocketAddr;

pub(crate) enum ConnectProgress {
    Pending,
    Connected,
    Failed(ErrorState),
}

/// An outbound connection attempt that has not completed yet.
pub(crate) struct PendingConnect {
    stream: TcpStream,
    token: Token,
    address: SocketAddr,
}

impl PendingConnect {
    /// Start a non-blocking connect to `address` and register it for readiness.
    pub fn initiate(reactor: &ReactorHandle, address: SocketAddr) -> io::Result<Self> {
        let mut stream = TcpStream::connect(address)?;
        let token = reactor.register(&mut stream)?;
        trace!("Connecting to {address}");
        Ok(Self { stream, token, address })
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Check whether the connection has been established after a readiness event.
    pub fn poll(&self, event: &ReadyEvent) -> ConnectProgress {
        match self.stream.take_error() {
            Ok(Some(e)) | Err(e) => return ConnectProgress::Failed(classify(&e)),
            Ok(None) => {}
        }
        match self.stream.peer_addr() {
            Ok(_) => ConnectProgress::Connected,
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {
                if event.error || event.write_closed {
                    let mut state = ErrorState::new();
                    state.set_error(ErrorCode::ConnectSystem);
                    ConnectProgress::Failed(state)
                } else {
                    ConnectProgress::Pending
                }
            }
            Err(e) => ConnectProgress::Failed(classify(&e)),
        }
    }

    /// Give up on the attempt and release the socket.
    pub fn abandon(mut self, reactor: &ReactorHandle) {
        if let Err(e) = reactor.deregister(&mut self.stream) {
            debug!("Could not deregister pending connection to {}: {e}", self.address);
        }
    }

    pub fn into_parts(self) -> (TcpStream, Token, SocketAddr) {
        (self.stream, self.token, self.address)
    }
}

/// Map a failed connect to the error it should be reported as.
pub(crate) fn classify(err: &io::Error) -> ErrorState {
    let code = match err.kind() {
        io::ErrorKind::ConnectionRefused => ErrorCode::ConnectRefused,
        _ => ErrorCode::ConnectSystem,
    };
    let mut state = ErrorState::new();
    state.set_io_error(code, err);
    state
}
