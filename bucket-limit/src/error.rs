/// Errors produced when configuring or calling a limiter.
///
/// Denying a request is not an error. These only cover inputs the limiter
/// cannot act on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// The refill interval or token limit cannot produce a working limiter.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A caller supplied an argument the limiter cannot act on, such as an
    /// empty client identifier.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
