use serde::{Deserialize, Serialize};

use crate::ocr::TextArea;

#[derive(Debug, Serialize)]
pub(crate) struct ProcessImageResponse {
    /// Base64 PNG of the cleared (inpainted) image.
    pub(crate) image: String,
    pub(crate) text_areas: Vec<TextArea>,
    /// Base64 of the resized original's raw RGBA bytes.
    pub(crate) original_image: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UpdateImageForm {
    /// Data URL of the cleared image from the process step. Every field is
    /// optional at extraction so a missing one reports as a 400, not a
    /// rejection from the form parser.
    pub(crate) image: Option<String>,
    /// JSON array of TextArea, as returned by /process_image.
    pub(crate) text_areas: Option<String>,
    /// JSON array of replacement strings.
    pub(crate) new_texts: Option<String>,
    /// JSON array of [r, g, b] triples.
    pub(crate) colors: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateImageResponse {
    pub(crate) updated_image: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FetchInfoForm {
    pub(crate) url: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct FetchInfoResponse {
    pub(crate) html_content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FetchForm {
    pub(crate) url: String,
    /// Optional override of the resize target width.
    pub(crate) size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

#[derive(Debug)]
pub(crate) struct ServerError {
    pub(crate) status: axum::http::StatusCode,
    pub(crate) message: String,
}

impl ServerError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self {
            status: axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::internal(err.to_string())
    }
}
