use std::error;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Clone, Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn msg(&self) -> &str {
        &self.msg
    }

    pub(crate) fn service_err<S: Into<String>>(msg: S) -> Self {
        Self {
            kind: ErrorKind::ServiceError,
            msg: msg.into(),
        }
    }

    /// A capture-driver failure. Public so that driver implementations
    /// outside this crate can report through the same type.
    pub fn driver_err<S: Into<String>>(msg: S) -> Self {
        Self {
            kind: ErrorKind::DriverError,
            msg: msg.into(),
        }
    }

    pub(crate) fn not_implemented<S: Into<String>>(msg: S) -> Self {
        Self {
            kind: ErrorKind::NotImplemented,
            msg: msg.into(),
        }
    }

    pub(crate) fn to_err<T>(self) -> Result<T> {
        Err(self)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::ServiceError => write!(f, "Service error: {}.", self.msg),
            ErrorKind::DriverError => write!(f, "Capture driver error: {}.", self.msg),
            ErrorKind::NotImplemented => write!(f, "Not implemented: {}.", self.msg),
        }
    }
}

impl error::Error for Error {}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ErrorKind {
    ServiceError,
    DriverError,
    NotImplemented,
}
