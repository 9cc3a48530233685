use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown protocol operation: {0}")]
    UnknownOp(String),

    #[error("Malformed {op} operation: {reason}")]
    MalformedOp { op: &'static str, reason: String },

    #[error("Invalid subject: {0:?}")]
    InvalidSubject(String),

    #[error("Maximum payload exceeded: {size} > {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Control line exceeds {max} bytes")]
    ControlLineTooLong { max: usize },

    #[error("Payload is not followed by CRLF")]
    MissingPayloadTerminator,

    #[error("Control line is not valid UTF-8")]
    InvalidUtf8,

    #[error("JSON body error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IoError :{0} ")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    pub(crate) fn malformed(op: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedOp {
            op,
            reason: reason.into(),
        }
    }
}
