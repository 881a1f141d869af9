//! Status-code policy of the dispatcher.

use reqwest::StatusCode;

use crate::error::{ErrorKind, FailedResponse};

/// Maps a response status to the failure it represents.
///
/// Only 200 and 202 count as success; every other status, including the
/// rest of the 2xx range, is a failure.
pub fn classify(status: StatusCode) -> Option<ErrorKind> {
    match status {
        StatusCode::OK | StatusCode::ACCEPTED => None,
        StatusCode::BAD_REQUEST => Some(ErrorKind::MalformedRequest),
        StatusCode::UNAUTHORIZED => Some(ErrorKind::Authentication),
        StatusCode::FORBIDDEN => Some(ErrorKind::NotApplicable),
        StatusCode::NOT_FOUND => Some(ErrorKind::NotFound),
        _ => Some(ErrorKind::CallFailed),
    }
}

pub(crate) fn failure_message(kind: ErrorKind, failed: &FailedResponse) -> String {
    let code = failed.status.as_u16();
    match kind {
        ErrorKind::MalformedRequest => format!(
            "Invalid API request. Some of the supplied data is incorrect or malformed.\nStatus {}.\nServer: {}",
            code, failed.body
        ),
        ErrorKind::Authentication => {
            "Authentication for this call failed, please check your credentials".to_string()
        }
        ErrorKind::NotApplicable => format!("API call non-applicable.\nServer: {}", failed.body),
        ErrorKind::NotFound => format!(
            "Invalid endpoint or api call. Failed with status {}.\nUrl: {}",
            code, failed.url
        ),
        _ => format!("Call failed with status: {}", code),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderMap;

    fn failed(code: u16) -> FailedResponse {
        FailedResponse {
            status: StatusCode::from_u16(code).unwrap(),
            url: "https://batch.example.com/api/jobs".to_string(),
            headers: HeaderMap::new(),
            body: "server says no".to_string(),
        }
    }

    #[test]
    fn test_classify_success_codes() {
        assert_eq!(classify(StatusCode::OK), None);
        assert_eq!(classify(StatusCode::ACCEPTED), None);
    }

    #[test]
    fn test_classify_mapped_codes() {
        assert_eq!(classify(StatusCode::BAD_REQUEST), Some(ErrorKind::MalformedRequest));
        assert_eq!(classify(StatusCode::UNAUTHORIZED), Some(ErrorKind::Authentication));
        assert_eq!(classify(StatusCode::FORBIDDEN), Some(ErrorKind::NotApplicable));
        assert_eq!(classify(StatusCode::NOT_FOUND), Some(ErrorKind::NotFound));
    }

    #[test]
    fn test_classify_everything_else_fails() {
        for code in [201, 204, 301, 409, 429, 500, 503] {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(classify(status), Some(ErrorKind::CallFailed), "status {}", code);
        }
    }

    #[test]
    fn test_only_forbidden_is_silent() {
        for code in [400, 401, 403, 404, 409, 500] {
            let kind = classify(StatusCode::from_u16(code).unwrap()).unwrap();
            assert_eq!(kind.is_silent(), code == 403, "status {}", code);
        }
    }

    #[test]
    fn test_failure_messages() {
        let msg = failure_message(ErrorKind::MalformedRequest, &failed(400));
        assert!(msg.starts_with("Invalid API request."));
        assert!(msg.contains("Status 400."));
        assert!(msg.contains("server says no"));

        let msg = failure_message(ErrorKind::NotFound, &failed(404));
        assert!(msg.contains("Url: https://batch.example.com/api/jobs"));

        let msg = failure_message(ErrorKind::NotApplicable, &failed(403));
        assert!(msg.starts_with("API call non-applicable."));

        let msg = failure_message(ErrorKind::CallFailed, &failed(503));
        assert_eq!(msg, "Call failed with status: 503");
    }
}
