use crate::services::transport::TransportError;

/// Retry delay assumed for a 429 without a server-supplied Retry-After.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Typed outcome of a transport failure: what to tell the user, and whether
/// (and when) the operation is worth retrying.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub message: String,
    pub status: Option<u16>,
    pub retryable: bool,
    pub retry_after_seconds: Option<u64>,
}

/// Map a transport failure to a typed outcome.
pub fn classify(error: &TransportError) -> Classification {
    match error {
        TransportError::Network(_) => Classification {
            message: "Unable to reach the analysis service. Check your connection and try again."
                .to_string(),
            status: None,
            retryable: true,
            retry_after_seconds: None,
        },
        TransportError::Auth => Classification {
            message: "Your session has expired. Please sign in again.".to_string(),
            status: Some(401),
            retryable: false,
            retry_after_seconds: None,
        },
        TransportError::Http {
            status,
            message,
            retry_after,
        } => classify_status(*status, message, *retry_after),
        TransportError::Decode(e) => Classification {
            message: format!("The analysis service returned an unreadable response: {e}"),
            status: None,
            retryable: false,
            retry_after_seconds: None,
        },
        TransportError::Config(e) => Classification {
            message: format!("Client configuration error: {e}"),
            status: None,
            retryable: false,
            retry_after_seconds: None,
        },
    }
}

fn classify_status(status: u16, raw_message: &str, retry_after: Option<u64>) -> Classification {
    let (message, retryable, retry_after_seconds) = match status {
        400 => (
            format!("The request was invalid: {raw_message}"),
            false,
            None,
        ),
        401 => (
            "Authentication required. Please sign in again.".to_string(),
            false,
            None,
        ),
        403 => (
            "You do not have permission to access this resource.".to_string(),
            false,
            None,
        ),
        404 => (
            "The requested resource was not found.".to_string(),
            false,
            None,
        ),
        429 => (
            "Too many requests. The analysis service asked us to slow down.".to_string(),
            true,
            Some(retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS)),
        ),
        500 | 503 => (
            "The analysis service encountered an error. Please try again later.".to_string(),
            true,
            None,
        ),
        _ => (raw_message.to_string(), false, None),
    };

    Classification {
        message,
        status: Some(status),
        retryable,
        retry_after_seconds,
    }
}
