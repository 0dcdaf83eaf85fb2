use thiserror::Error;

/// Errors returned by histogram construction, recording and merging.
///
/// Count saturation is not an error: it is reported through
/// `has_overflowed()` and recording carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A negative value, or a configuration outside the supported bounds
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The source histogram's recorded values do not fit the target layout
    #[error("incompatible histogram: {0}")]
    IncompatibleHistogram(String),
}

pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn non_negative(value: i64) -> Result<u64> {
    if value < 0 {
        return Err(Error::InvalidArgument(format!(
            "value must be non-negative, got {}",
            value
        )));
    }
    Ok(value as u64)
}
