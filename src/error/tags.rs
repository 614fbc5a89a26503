//! Error tags attached to [`ExecError`](super::ExecError).
//!
//! Tags are checked by membership rather than by matching on message text.

use std::fmt;

use super::ExecError;

/// A single tag that can be carried by an [`ExecError`](super::ExecError).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorTag {
    /// A non-zero exit code is stored on the error.
    ErrCode,
    /// Transport level failure (negative exit code).
    SshErrorInternal,
    /// The remote command hit its timeout (exit code 124).
    SshErrorLinuxTimeout,
    /// The remote command was not found (exit code 127).
    SshErrorCliNotFound,
    /// Any non-zero exit code.
    GeneralError,
    /// The connection could not be created (exit code -1).
    FailToCreateSsh,
    /// The command finished without an exit status (exit code -2).
    NoExitStatus,
    /// Other transport failure (exit code -3).
    OtherInternal,
    /// Stop retrying immediately.
    LoopBreak,
    /// The run was cancelled.
    Cancelled,
    /// The overall run deadline expired.
    DeadlineExceeded,
}

impl ErrorTag {
    /// Every known tag, in bit order.
    pub const ALL: [ErrorTag; 11] = [
        ErrorTag::ErrCode,
        ErrorTag::SshErrorInternal,
        ErrorTag::SshErrorLinuxTimeout,
        ErrorTag::SshErrorCliNotFound,
        ErrorTag::GeneralError,
        ErrorTag::FailToCreateSsh,
        ErrorTag::NoExitStatus,
        ErrorTag::OtherInternal,
        ErrorTag::LoopBreak,
        ErrorTag::Cancelled,
        ErrorTag::DeadlineExceeded,
    ];

    fn bit(self) -> u16 {
        1 << (self as u16)
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorTag::ErrCode => "ErrCode",
            ErrorTag::SshErrorInternal => "SSHErrorInternal",
            ErrorTag::SshErrorLinuxTimeout => "SSHErrorLinuxTimeout",
            ErrorTag::SshErrorCliNotFound => "SSHErrorCLINotFound",
            ErrorTag::GeneralError => "GeneralError",
            ErrorTag::FailToCreateSsh => "FailToCreateSSH",
            ErrorTag::NoExitStatus => "NoExitStatus",
            ErrorTag::OtherInternal => "OtherInternal",
            ErrorTag::LoopBreak => "LoopBreak",
            ErrorTag::Cancelled => "Cancelled",
            ErrorTag::DeadlineExceeded => "DeadlineExceeded",
        }
    }

    /// Check whether the error carries this tag.
    pub fn is_in(self, err: &ExecError) -> bool {
        err.tags().contains(self)
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compact set of [`ErrorTag`]s.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TagSet(u16);

impl TagSet {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, tag: ErrorTag) {
        self.0 |= tag.bit();
    }

    pub fn contains(&self, tag: ErrorTag) -> bool {
        self.0 & tag.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: TagSet) -> TagSet {
        TagSet(self.0 | other.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = ErrorTag> + '_ {
        ErrorTag::ALL.into_iter().filter(|t| self.contains(*t))
    }
}

impl FromIterator<ErrorTag> for TagSet {
    fn from_iter<I: IntoIterator<Item = ErrorTag>>(iter: I) -> Self {
        let mut set = TagSet::new();
        for tag in iter {
            set.insert(tag);
        }
        set
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(ErrorTag::name).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
