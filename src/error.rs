use std::io;
use std::path::Path;

/// Every failure a note operation can surface to the session.
///
/// Variants carry rendered messages rather than source errors so the session
/// can keep them in its state, compare them in transitions and render them
/// as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    #[error("incorrect password")]
    IncorrectPassword,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("corrupt or unreadable data: {0}")]
    Format(String),
    #[error("i/o error: {0}")]
    Io(String),
    #[error("editor failed: {0}")]
    EditorLaunch(String),
    #[error("a note named \"{0}\" already exists")]
    NameConflict(String),
    #[error("invalid note name: {0}")]
    InvalidName(String),
    #[error("passwords do not match")]
    PasswordMismatch,
}

impl ErrorKind {
    /// Maps an I/O failure on `path`, keeping "missing file" apart from
    /// everything else.
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            ErrorKind::NotFound(path.display().to_string())
        } else {
            ErrorKind::Io(format!("{}: {}", path.display(), err))
        }
    }

    /// Errors the user can retry in place without ending the session.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorKind::IncorrectPassword
                | ErrorKind::NotFound(_)
                | ErrorKind::NameConflict(_)
                | ErrorKind::InvalidName(_)
                | ErrorKind::PasswordMismatch
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::IncorrectPassword => "IncorrectPassword",
            ErrorKind::NotFound(_) => "NotFound",
            ErrorKind::Format(_) => "FormatError",
            ErrorKind::Io(_) => "IOError",
            ErrorKind::EditorLaunch(_) => "EditorLaunchError",
            ErrorKind::NameConflict(_) => "NameConflict",
            ErrorKind::InvalidName(_) => "InvalidName",
            ErrorKind::PasswordMismatch => "PasswordMismatch",
        }
    }
}
