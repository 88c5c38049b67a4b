//! Classification of AWS CLI failures into [`ApiError`] variants.

use crate::api::ApiError;
use crate::command::CommandOutput;

const NOT_FOUND_MARKERS: &[&str] = &[
    "ResourceNotFoundException",
    "NotFoundException",
    "NoSuchBucket",
    "NoSuchKey",
];

const TRANSIENT_MARKERS: &[&str] = &[
    "ThrottlingException",
    "TooManyRequestsException",
    "RequestLimitExceeded",
    "ServiceUnavailable",
    "InternalFailure",
    "InternalServerException",
    "RequestTimeout",
];

/// Maps a failed CLI invocation to the matching error class using the error
/// code the CLI prints on stderr.
pub(super) fn classify_failure(operation: &str, output: &CommandOutput) -> ApiError {
    let stderr = output.stderr.trim();
    let message = if stderr.is_empty() {
        format!("exit status {}", output.status_text())
    } else {
        stderr.to_owned()
    };
    let operation = operation.to_owned();

    if NOT_FOUND_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        return ApiError::NotFound { operation, message };
    }
    if TRANSIENT_MARKERS.iter().any(|marker| stderr.contains(marker)) {
        return ApiError::Transient { operation, message };
    }
    ApiError::Rejected { operation, message }
}
