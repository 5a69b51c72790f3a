use std::fmt;

/// POSIX-style errno-equivalent attached to a [`VnaError`], mirroring the last-error value a
/// caller would otherwise have to fetch out-of-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    NoError,
    Inval,
    Noent,
    Dom,
    Badmsg,
    Nosys,
    Nomem,
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Errno::NoError => write!(f, "no error"),
            Errno::Inval => write!(f, "EINVAL"),
            Errno::Noent => write!(f, "ENOENT"),
            Errno::Dom => write!(f, "EDOM"),
            Errno::Badmsg => write!(f, "EBADMSG"),
            Errno::Nosys => write!(f, "ENOSYS"),
            Errno::Nomem => write!(f, "ENOMEM"),
        }
    }
}

/// The error-reporting category taxonomy of the calibration engine. Every fallible public
/// operation returns a `Result<_, VnaError>`, and the category determines the propagation
/// policy expected of the caller (see the crate-level docs).
#[derive(Debug, Clone, PartialEq)]
pub enum VnaError {
    /// Invalid argument, dimension mismatch, bad port map, standard out of frequency range.
    /// The operation failed and left state unchanged.
    Usage { message: String, errno: Errno },
    /// Allocation failure or I/O error.
    System { message: String, errno: Errno },
    /// Unsupported file format version during load.
    Version { message: String },
    /// Malformed file during load.
    Syntax { message: String },
    /// Singular linear system, solver failed to converge, or a p-value below the configured
    /// limit.
    Math { message: String },
    /// Non-fatal; the operation that produced it continues.
    Warning { message: String },
    /// An internal invariant was violated. Treated as an assertion failure by callers.
    Internal { message: String },
}

impl VnaError {
    pub fn usage<S: Into<String>>(message: S) -> Self {
        VnaError::Usage {
            message: message.into(),
            errno: Errno::Inval,
        }
    }

    pub fn usage_errno<S: Into<String>>(message: S, errno: Errno) -> Self {
        VnaError::Usage {
            message: message.into(),
            errno,
        }
    }

    pub fn system<S: Into<String>>(message: S) -> Self {
        VnaError::System {
            message: message.into(),
            errno: Errno::Nomem,
        }
    }

    pub fn version<S: Into<String>>(message: S) -> Self {
        VnaError::Version {
            message: message.into(),
        }
    }

    pub fn syntax<S: Into<String>>(message: S) -> Self {
        VnaError::Syntax {
            message: message.into(),
        }
    }

    pub fn math<S: Into<String>>(message: S) -> Self {
        VnaError::Math {
            message: message.into(),
        }
    }

    pub fn warning<S: Into<String>>(message: S) -> Self {
        VnaError::Warning {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        VnaError::Internal {
            message: message.into(),
        }
    }

    /// The error category name, as reported through the callback of §6.
    pub fn category(&self) -> &'static str {
        match *self {
            VnaError::Usage { .. } => "Usage",
            VnaError::System { .. } => "System",
            VnaError::Version { .. } => "Version",
            VnaError::Syntax { .. } => "Syntax",
            VnaError::Math { .. } => "Math",
            VnaError::Warning { .. } => "Warning",
            VnaError::Internal { .. } => "Internal",
        }
    }

    pub fn message(&self) -> &str {
        match *self {
            VnaError::Usage { ref message, .. } => message,
            VnaError::System { ref message, .. } => message,
            VnaError::Version { ref message } => message,
            VnaError::Syntax { ref message } => message,
            VnaError::Math { ref message } => message,
            VnaError::Warning { ref message } => message,
            VnaError::Internal { ref message } => message,
        }
    }
}

impl fmt::Display for VnaError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.category(), self.message())
    }
}

impl std::error::Error for VnaError {}

pub type VnaResult<T> = Result<T, VnaError>;

/// A caller-registered error callback, mirroring the `(message, user_arg, category)` hook of
/// §6. Held per-container (never process-global).
pub type ErrorFn = Box<dyn Fn(&VnaError) + Send + Sync>;

/// Invokes `on_error`, if present, then returns the same error so call sites can continue using
/// `?`.
pub fn report(on_error: &Option<ErrorFn>, err: VnaError) -> VnaError {
    if let Some(cb) = on_error {
        cb(&err);
    }
    err
}
