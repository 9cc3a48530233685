use bytes::Bytes;

/// A message delivered to a subscription.
///
/// `sid` identifies the subscription on the receiving connection, so the
/// same publish produces one `Message` per matching subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub sid: u64,
    pub reply_to: Option<String>,
    pub payload: Bytes,
}
