use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::io;

/// Terminal conditions reported by sessions and endpoints.
///
/// The numeric values are stable and appear in rendered error strings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ErrorCode {
    #[default]
    Ok = 0,
    /// The reactor reported a failure on a listener or connector socket.
    Select = 1,
    RemoteClosed = 2,
    ForceClose = 3,
    KeepAliveTimeout = 4,
    UnpackInvalidMessageSize = 5,
    UnpackDecodeMessage = 6,
    RecvMessageFormat = 7,
    HandleMessage = 8,
    /// A connect attempt failed with an OS error. The errno is carried alongside.
    ConnectSystem = 9,
    ConnectTimeout = 10,
    /// The freshly connected session was rejected by `check_open`.
    ConnectOpen = 11,
    ConnectRefused = 12,
}

impl ErrorCode {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorCode::Ok => "ERROR_OK",
            ErrorCode::Select => "ERROR_SELECT",
            ErrorCode::RemoteClosed => "ERROR_REMOTE_CLOSED",
            ErrorCode::ForceClose => "ERROR_FORCE_CLOSE",
            ErrorCode::KeepAliveTimeout => "ERROR_KEEP_ALIVE_TIMEOUT",
            ErrorCode::UnpackInvalidMessageSize => "ERROR_UNPACK_INVALID_MESSAGE_SIZE",
            ErrorCode::UnpackDecodeMessage => "ERROR_UNPACK_DECODE_MESSAGE",
            ErrorCode::RecvMessageFormat => "ERROR_RECV_MESSAGE_FORMAT",
            ErrorCode::HandleMessage => "ERROR_HANDLE_MESSAGE",
            ErrorCode::ConnectSystem => "ERROR_CONNECT_SYSTEM",
            ErrorCode::ConnectTimeout => "ERROR_CONNECT_TIMEOUT",
            ErrorCode::ConnectOpen => "ERROR_CONNECT_OPEN",
            ErrorCode::ConnectRefused => "ERROR_CONNECT_REFUSED",
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.as_u8(), self.name())
    }
}

/// A sticky error holder. The first error set wins; later calls are ignored until [`ErrorState::clear`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ErrorState {
    code: ErrorCode,
    system_error: i32,
}

impl ErrorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `code` unless an error is already pending.
    pub fn set_error(&mut self, code: ErrorCode) {
        self.set_system_error(code, 0);
    }

    /// Record `code` together with the OS errno that caused it, unless an error is already pending.
    pub fn set_system_error(&mut self, code: ErrorCode, system_error: i32) {
        if self.has_error() {
            return;
        }
        self.code = code;
        self.system_error = system_error;
    }

    /// Record `code` with the errno carried by `err`, if any.
    pub fn set_io_error(&mut self, code: ErrorCode, err: &io::Error) {
        self.set_system_error(code, err.raw_os_error().unwrap_or(0));
    }

    pub fn copy_from(&mut self, other: &ErrorState) {
        *self = *other;
    }

    pub fn clear(&mut self) {
        *self = ErrorState::default();
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn system_error(&self) -> i32 {
        self.system_error
    }

    pub fn has_error(&self) -> bool {
        self.code != ErrorCode::Ok
    }

    pub fn has_system_error(&self) -> bool {
        self.system_error != 0
    }
}

impl Display for ErrorState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code)?;
        if self.has_system_error() {
            let kind = io::Error::from_raw_os_error(self.system_error).kind();
            write!(f, ":{}:{kind:?}", self.system_error)?;
        }
        Ok(())
    }
}
