use thiserror::Error;
use weave_cache::ProviderError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no cache provider configured")]
    NoProviderConfigured,
    #[error("cache provider failed: {0}")]
    Provider(ProviderError),
    #[error("evaluation stack underflow in `{0}`")]
    StackUnderflow(String),
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("null reference: {0}")]
    NullReference(String),
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("unknown method `{0}`")]
    UnknownMethod(String),
    #[error("unknown field `{0}`")]
    UnknownField(String),
    #[error("`{method}` expects {expected} argument(s), got {found}")]
    ArityMismatch {
        method: String,
        expected: usize,
        found: usize,
    },
    #[error("invalid argument slot {slot} in `{method}`")]
    InvalidArgument { method: String, slot: u16 },
    #[error("invalid local {local} in `{method}`")]
    InvalidLocal { method: String, local: u16 },
    #[error("`{0}` has no body")]
    NoBody(String),
    #[error("control fell off the end of `{0}`")]
    FellOffEnd(String),
    #[error("`{method}` branches to unknown block {block}")]
    InvalidBranch { method: String, block: u32 },
    #[error("exception thrown: {0}")]
    Thrown(String),
    #[error("value of type {0} cannot be cached")]
    Uncacheable(String),
    #[error("attempted to divide by zero")]
    DivisionByZero,
    #[error("index {index} is out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },
    #[error("array of {len} elements exceeds the limit of {max}")]
    ArrayTooLarge { len: usize, max: usize },
    #[error("invalid format string `{0}`")]
    Format(String),
    #[error("call depth exceeded {0}")]
    StackOverflow(usize),
    #[error("step limit of {0} instructions exceeded")]
    StepLimitExceeded(u64),
    #[error("cannot parse `{text}` as {ty}")]
    InvalidLiteral { text: String, ty: String },
}

impl From<ProviderError> for RuntimeError {
    fn from(error: ProviderError) -> Self {
        match error {
            ProviderError::NotConfigured => RuntimeError::NoProviderConfigured,
            other => RuntimeError::Provider(other),
        }
    }
}

impl RuntimeError {
    pub fn mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        RuntimeError::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
