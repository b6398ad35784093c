use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    Json,
};
use bytes::Bytes;
use image::{DynamicImage, ImageOutputFormat};

use crate::error::ApiError;
use crate::normalize::normalize_caption;
use crate::state::AppState;
use crate::types::{CaptionResponse, Language, UploadQuery};

/// Form fields accepted as the image part.
const FILE_FIELDS: [&str; 3] = ["files", "file", "image"];

const JPEG_QUALITY: u8 = 85;

struct Upload {
    image: Bytes,
    language: Option<String>,
}

/// POST /api/:model/upload
pub async fn upload(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
    Query(query): Query<UploadQuery>,
    multipart: Multipart,
) -> Result<Json<CaptionResponse>, ApiError> {
    let start = Instant::now();

    let model = state
        .config
        .model(&model_id)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown model: {model_id}")))?
        .clone();

    let upload = read_upload(multipart, state.config.max_upload_bytes).await?;
    let language = upload
        .language
        .or(query.language)
        .map(|code| Language::from_code(&code))
        .unwrap_or_default();
    tracing::info!(
        model = %model.id,
        language = language.code(),
        bytes = upload.image.len(),
        "Caption request"
    );

    let image = upload.image;
    let jpeg = tokio::task::spawn_blocking(move || to_jpeg(&image))
        .await
        .map_err(|e| ApiError::Internal(format!("Image processing task failed: {e}")))??;

    let url = state.config.repo_url(&model.repo);
    let body = state.gateway.caption(&url, model.encoding, jpeg).await?;

    let caption = match normalize_caption(&body) {
        Ok(caption) => caption,
        Err(err) => match &state.config.caption_fallback {
            Some(fallback) => {
                tracing::warn!(model = %model.id, body = %body, "No caption in upstream response, using fallback");
                fallback.clone()
            }
            None => return Err(err.into()),
        },
    };

    let caption = match language {
        Language::Zh => {
            state
                .translator
                .translate(&caption, Language::En, Language::Zh)
                .await
        }
        Language::En => caption,
    };

    tracing::info!(
        model = %model.id,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Caption generated"
    );
    Ok(Json(CaptionResponse { caption }))
}

async fn read_upload(mut multipart: Multipart, max_bytes: usize) -> Result<Upload, ApiError> {
    let mut image = None;
    let mut language = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid_upload)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "language" {
            language = Some(field.text().await.map_err(invalid_upload)?);
            continue;
        }

        let is_file = FILE_FIELDS.contains(&name.as_str()) || field.file_name().is_some();
        if !is_file || image.is_some() {
            continue;
        }
        if let Some(content_type) = field.content_type() {
            if !content_type.starts_with("image/") {
                return Err(ApiError::BadRequest(format!(
                    "Only image files are supported, got {content_type}"
                )));
            }
        }

        let data = field.bytes().await.map_err(invalid_upload)?;
        if data.len() > max_bytes {
            return Err(ApiError::BadRequest(format!(
                "File exceeds the {} byte upload limit",
                max_bytes
            )));
        }
        image = Some(data);
    }

    let image = image.ok_or_else(|| ApiError::BadRequest("No file uploaded".to_string()))?;
    if image.is_empty() {
        return Err(ApiError::BadRequest("Empty file".to_string()));
    }
    Ok(Upload { image, language })
}

fn invalid_upload(err: MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Invalid file upload: {}", err.body_text()))
}

/// Decode any supported format and re-encode as RGB JPEG for the model.
fn to_jpeg(data: &[u8]) -> Result<Bytes, ApiError> {
    let img = image::load_from_memory(data).map_err(|e| {
        tracing::debug!(error = %e, "Upload is not a decodable image");
        ApiError::BadRequest("Invalid image format".to_string())
    })?;

    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut jpeg_bytes = Vec::new();
    rgb.write_to(
        &mut Cursor::new(&mut jpeg_bytes),
        ImageOutputFormat::Jpeg(JPEG_QUALITY),
    )
    .map_err(|e| ApiError::Internal(format!("Failed to encode image: {e}")))?;

    Ok(Bytes::from(jpeg_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::sniff;
    use crate::test_support::png_bytes;

    #[test]
    fn converts_png_to_jpeg() {
        let jpeg = to_jpeg(&png_bytes(8, 6)).unwrap();
        let info = sniff(&jpeg).unwrap();
        assert_eq!(info.format, image::ImageFormat::Jpeg);
        assert_eq!((info.width, info.height), (8, 6));
    }

    #[test]
    fn rejects_undecodable_bytes() {
        let err = to_jpeg(b"GIF89a but not really").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(ref m) if m == "Invalid image format"));
    }
}
