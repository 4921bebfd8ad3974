//! API error type and its HTTP mapping

use approval_engine::WorkflowError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

pub type Result<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Workflow(e) => match e {
                WorkflowError::TemplateNotFound(_) | WorkflowError::RequestNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                WorkflowError::NotAuthorized { .. } => StatusCode::FORBIDDEN,
                WorkflowError::AlreadyActed { .. }
                | WorkflowError::OutOfSequence { .. }
                | WorkflowError::RequestClosed(_)
                | WorkflowError::ConcurrentModification(_) => StatusCode::CONFLICT,
                WorkflowError::InvalidTemplate(_)
                | WorkflowError::InvalidRouting(_)
                | WorkflowError::InvalidDelegate(_)
                | WorkflowError::CommentRequired(_) => StatusCode::UNPROCESSABLE_ENTITY,
                WorkflowError::Repository(_) | WorkflowError::Serialization(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Workflow(e) => match e {
                WorkflowError::TemplateNotFound(_) => "template_not_found",
                WorkflowError::RequestNotFound(_) => "request_not_found",
                WorkflowError::NotAuthorized { .. } => "not_authorized",
                WorkflowError::AlreadyActed { .. } => "already_acted",
                WorkflowError::OutOfSequence { .. } => "out_of_sequence",
                WorkflowError::RequestClosed(_) => "request_closed",
                WorkflowError::InvalidDelegate(_) => "invalid_delegate",
                WorkflowError::ConcurrentModification(_) => "concurrent_modification",
                WorkflowError::InvalidTemplate(_) => "invalid_template",
                WorkflowError::InvalidRouting(_) => "invalid_routing",
                WorkflowError::CommentRequired(_) => "comment_required",
                WorkflowError::Repository(_) => "repository_error",
                WorkflowError::Serialization(_) => "serialization_error",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, code = self.code(), "Request failed");
        } else {
            debug!(error = %self, code = self.code(), "Request refused");
        }

        let body = Json(json!({
            "error": self.code(),
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (WorkflowError::RequestNotFound("apr_1".into()), StatusCode::NOT_FOUND),
            (
                WorkflowError::NotAuthorized {
                    request_id: "apr_1".into(),
                    user_id: "eve".into(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                WorkflowError::AlreadyActed {
                    request_id: "apr_1".into(),
                    user_id: "alice".into(),
                },
                StatusCode::CONFLICT,
            ),
            (WorkflowError::RequestClosed("apr_1".into()), StatusCode::CONFLICT),
            (WorkflowError::InvalidTemplate("no stages".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (WorkflowError::Repository("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status_code(), status);
        }
    }

    #[test]
    fn test_error_codes() {
        let error = ApiError::from(WorkflowError::OutOfSequence {
            user_id: "bob".into(),
            expected: "alice".into(),
        });
        assert_eq!(error.code(), "out_of_sequence");
        assert_eq!(ApiError::BadRequest("x".into()).code(), "bad_request");
    }
}
