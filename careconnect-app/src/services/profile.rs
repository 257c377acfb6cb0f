use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::api::{ApiClient, ApiError};
use crate::models::{ProfileEnvelope, UserProfile};

const PICTURE_FIELD: &str = "profilePicture";

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("cannot read {path}: {source}")]
    File {
        path: String,
        source: std::io::Error,
    },
    #[error("unsupported picture: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Response to a picture upload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PictureUpload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserProfile>,
}

#[derive(Clone)]
pub struct ProfileService {
    client: ApiClient,
}

impl ProfileService {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub async fn get_profile(&self) -> Result<UserProfile, ApiError> {
        let envelope: ProfileEnvelope = self.client.get("/user/profile").await?;
        Ok(envelope.into_profile())
    }

    pub async fn upload_picture(&self, path: &Path) -> Result<PictureUpload, ProfileError> {
        let mime = picture_mime(path)
            .ok_or_else(|| ProfileError::Unsupported(path.display().to_string()))?;
        let bytes = tokio::fs::read(path).await.map_err(|source| ProfileError::File {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "picture".to_string());

        tracing::debug!("Uploading {} ({} bytes)", file_name, bytes.len());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| ProfileError::Unsupported(e.to_string()))?;
        let form = Form::new().part(PICTURE_FIELD, part);

        let body = self.client.post_multipart("/user/profile/picture", form).await?;
        if body.is_null() {
            return Ok(PictureUpload::default());
        }
        serde_json::from_value(body)
            .map_err(ApiError::invalid_body)
            .map_err(ProfileError::from)
    }
}

fn picture_mime(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}
