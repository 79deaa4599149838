use app::anyhow;
use thiserror::Error;

/// Failure classes of the ray tracing subsystem.
///
/// Everything in here is fatal for the operation it interrupted, but the
/// class tells the caller what actually went wrong: an allocation or
/// object creation, a readback/property query, or the recording and
/// submission of trace work itself.
#[derive(Debug, Error)]
pub enum TraceError {
    #[error("{0} creation failed: {1}")]
    ResourceCreation(&'static str, anyhow::Error),

    #[error("{0} query failed: {1}")]
    Query(&'static str, anyhow::Error),

    #[error("{0} dispatch failed: {1}")]
    Dispatch(&'static str, anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_phase() {
        let err = TraceError::ResourceCreation(
            "ray origin buffer",
            anyhow::anyhow!("out of device memory"),
        );
        assert_eq!(
            err.to_string(),
            "ray origin buffer creation failed: out of device memory"
        );

        let err = TraceError::Query("hit table", anyhow::anyhow!("not host visible"));
        assert!(err.to_string().starts_with("hit table query failed"));

        let err = TraceError::Dispatch("sweep trace", anyhow::anyhow!("device lost"));
        assert!(err.to_string().starts_with("sweep trace dispatch failed"));
    }
}
