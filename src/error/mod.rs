use thiserror::Error;

pub mod codes;
pub mod tags;

pub use codes::{describe_error_code, ErrorCode};
pub use tags::{ErrorTag, TagSet};

/// Error returned by exec leaves, runners and retries.
///
/// Carries a freeform message plus a set of [`ErrorTag`]s. When the error
/// originates from a remote command the exit code and any captured stdout
/// are kept so callers can inspect them.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ExecError {
    message: String,
    tags: TagSet,
    exit_code: Option<i32>,
    output: Option<String>,
}

impl ExecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            tags: TagSet::new(),
            exit_code: None,
            output: None,
        }
    }

    pub fn with_tag(mut self, tag: ErrorTag) -> Self {
        self.tags.insert(tag);
        self
    }

    pub fn with_tags(mut self, tags: TagSet) -> Self {
        self.tags = self.tags.union(tags);
        self
    }

    /// Store an exit code and classify it into tags; zero adds no tag.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.tags = self.tags.union(classify_exit_code(code));
        self.exit_code = Some(code);
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Prefix the message with context, keeping tags and exit code.
    pub fn annotate(mut self, context: impl AsRef<str>) -> Self {
        self.message = format!("{}: {}", context.as_ref(), self.message);
        self
    }

    /// Error that stops a retry loop immediately.
    pub fn loop_break(message: impl Into<String>) -> Self {
        Self::new(message).with_tag(ErrorTag::LoopBreak)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(message).with_tag(ErrorTag::Cancelled)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(message).with_tag(ErrorTag::DeadlineExceeded)
    }

    /// Build the error for a remote command that finished with `code`.
    pub fn from_exit_code(code: i32, message: impl Into<String>) -> Self {
        Self::new(message).with_exit_code(code)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn tags(&self) -> TagSet {
        self.tags
    }

    pub fn has_tag(&self, tag: ErrorTag) -> bool {
        self.tags.contains(tag)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    /// Fatal errors end the run and are never recovered or skipped.
    pub fn is_fatal(&self) -> bool {
        self.has_tag(ErrorTag::Cancelled) || self.has_tag(ErrorTag::DeadlineExceeded)
    }
}

impl From<anyhow::Error> for ExecError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<ExecError>() {
            Ok(exec) => exec,
            Err(other) => ExecError::new(format!("{other:#}")),
        }
    }
}

/// Map a remote exit code to its tags.
pub fn classify_exit_code(code: i32) -> TagSet {
    let mut tags = TagSet::new();
    if code == 0 {
        return tags;
    }
    tags.insert(ErrorTag::ErrCode);
    tags.insert(ErrorTag::GeneralError);
    if code < 0 {
        tags.insert(ErrorTag::SshErrorInternal);
        match code {
            -1 => tags.insert(ErrorTag::FailToCreateSsh),
            -2 => tags.insert(ErrorTag::NoExitStatus),
            -3 => tags.insert(ErrorTag::OtherInternal),
            _ => {}
        }
    }
    match code {
        124 => tags.insert(ErrorTag::SshErrorLinuxTimeout),
        127 => tags.insert(ErrorTag::SshErrorCliNotFound),
        _ => {}
    }
    tags
}

/// Errors produced while reading or validating a plan configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("load configuration: input is empty")]
    Empty,

    #[error("load configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("validate configuration: no plans defined")]
    NoPlans,

    #[error("validate configuration: plan {plan:?}: action {action:?}: exec {exec:?} is not registered")]
    UnknownExec {
        plan: String,
        action: String,
        exec: String,
    },

    #[error("validate configuration: found cycle in plan {plan:?}: {}", .path.join(" -> "))]
    Cycle { plan: String, path: Vec<String> },

    #[error("validate configuration: plan {0:?} is listed in plan_names but not defined")]
    PlanNotFound(String),
}

impl ConfigError {
    pub fn code(&self) -> u16 {
        match self {
            ConfigError::Empty => ErrorCode::CONFIG_EMPTY,
            ConfigError::Io(_) => ErrorCode::CONFIG_IO_ERROR,
            ConfigError::Parse(_) => ErrorCode::CONFIG_INVALID_JSON,
            ConfigError::NoPlans => ErrorCode::CONFIG_NO_PLANS,
            ConfigError::UnknownExec { .. } => ErrorCode::CONFIG_UNKNOWN_EXEC,
            ConfigError::Cycle { .. } => ErrorCode::CONFIG_CYCLE,
            ConfigError::PlanNotFound(_) => ErrorCode::CONFIG_PLAN_NOT_FOUND,
        }
    }
}

/// Error returned by a recovery run.
#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("[E{code:04}] Configuration error: {source}")]
    Config {
        code: u16,
        #[source]
        source: ConfigError,
    },

    #[error("[E{code:04}] Invalid run arguments: {message}")]
    InvalidArgs { code: u16, message: String },

    #[error("[E{code:04}] Inventory error: {message}")]
    Inventory {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Plan {plan:?} failed for {resource:?}: {source}")]
    Plan {
        code: u16,
        plan: String,
        resource: String,
        #[source]
        source: ExecError,
    },

    #[error("[E{code:04}] Run cancelled: {message}")]
    Cancelled { code: u16, message: String },

    #[error("[E{code:04}] Run failed: {}", .failures.join("; "))]
    Run { code: u16, failures: Vec<String> },
}

impl RecoveryError {
    pub fn invalid_args(code: u16, message: impl Into<String>) -> Self {
        Self::InvalidArgs {
            code,
            message: message.into(),
        }
    }

    pub fn inventory(code: u16, message: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Inventory {
            code,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn plan(plan: impl Into<String>, resource: impl Into<String>, source: ExecError) -> Self {
        let code = if source.has_tag(ErrorTag::Cancelled) {
            ErrorCode::EXEC_CANCELLED
        } else if source.has_tag(ErrorTag::DeadlineExceeded) {
            ErrorCode::EXEC_DEADLINE_EXCEEDED
        } else {
            ErrorCode::PLAN_FAILED
        };
        Self::Plan {
            code,
            plan: plan.into(),
            resource: resource.into(),
            source,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            RecoveryError::Config { code, .. }
            | RecoveryError::InvalidArgs { code, .. }
            | RecoveryError::Inventory { code, .. }
            | RecoveryError::Plan { code, .. }
            | RecoveryError::Cancelled { code, .. }
            | RecoveryError::Run { code, .. } => *code,
        }
    }

    /// Process exit code for a hosting binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            RecoveryError::InvalidArgs { .. } => 2,
            RecoveryError::Config { .. } => 3,
            RecoveryError::Cancelled { .. } => 130,
            _ => 1,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            RecoveryError::Cancelled { .. } => true,
            RecoveryError::Plan { source, .. } => source.has_tag(ErrorTag::Cancelled),
            _ => false,
        }
    }
}

impl From<ConfigError> for RecoveryError {
    fn from(source: ConfigError) -> Self {
        RecoveryError::Config {
            code: source.code(),
            source,
        }
    }
}

pub type Result<T, E = RecoveryError> = std::result::Result<T, E>;
