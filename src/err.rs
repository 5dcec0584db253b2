//! Error taxonomy for the typed service operations.

/// Errors produced by the DRS, htsget, and Beacon operations.
///
/// Each variant maps onto one HTTP status; no other error type crosses the
/// HTTP boundary.
#[derive(thiserror::Error, Debug)]
pub enum OpError {
    /// Unknown object, cohort, or missing linked file.
    #[error("{0}")]
    NotFound(String),
    /// No credentials presented.
    #[error("no credentials presented")]
    Unauthorized,
    /// Credentials present but cohort or admin check failed.
    #[error("{0}")]
    Forbidden(String),
    /// Malformed range, access-id, or format.
    #[error("{0}")]
    BadRequest(String),
    /// Policy point or S3 adapter returned non-200.
    #[error("{message}")]
    Upstream { status: u16, message: String },
    /// A linked file does not exist at the resolved path or is unreadable.
    #[error("{0}")]
    Integrity(String),
    /// Store retry budget exhausted or other internal failure.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl OpError {
    /// The HTTP status code this error maps onto.
    pub fn status_code(&self) -> u16 {
        match self {
            OpError::NotFound(_) => 404,
            OpError::Unauthorized => 401,
            OpError::Forbidden(_) => 403,
            OpError::BadRequest(_) => 400,
            OpError::Upstream { status, .. } => *status,
            OpError::Integrity(_) => 500,
            OpError::Internal(_) => 500,
        }
    }

    /// Shorthand for the not-found case on a DRS object id.
    pub fn no_such_object(id: &str) -> Self {
        OpError::NotFound(format!("No matching object found for id {}", id))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::OpError;

    #[rstest::rstest]
    #[case(OpError::NotFound("x".into()), 404)]
    #[case(OpError::Unauthorized, 401)]
    #[case(OpError::Forbidden("x".into()), 403)]
    #[case(OpError::BadRequest("x".into()), 400)]
    #[case(OpError::Upstream { status: 502, message: "x".into() }, 502)]
    #[case(OpError::Integrity("x".into()), 500)]
    fn status_codes(#[case] err: OpError, #[case] expected: u16) {
        assert_eq!(err.status_code(), expected);
    }
}
