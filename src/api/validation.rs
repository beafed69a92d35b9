use std::path::Path;

use crate::api::errors::ApiError;

pub(crate) fn validate_image_upload(
    filename: &str,
    content_type: &str,
    allowed_extensions: &[String],
) -> Result<String, ApiError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .ok_or_else(|| ApiError::BadRequest("File must have an extension".to_string()))?;

    if !allowed_extensions.iter().any(|allowed| allowed == &extension) {
        return Err(ApiError::BadRequest(format!("File extension '{extension}' is not allowed")));
    }

    let mime = content_type.trim().to_ascii_lowercase();
    if mime_allowed_for_extension(&mime, &extension) {
        Ok(extension)
    } else {
        Err(ApiError::BadRequest(format!(
            "MIME type '{mime}' does not match extension '.{extension}'"
        )))
    }
}

/// Image references in a grading request must stay inside the upload root.
pub(crate) fn validate_image_reference(reference: &str) -> Result<(), ApiError> {
    let trimmed = reference.trim();
    let escapes = trimmed.starts_with('/')
        || trimmed.starts_with('\\')
        || trimmed.split(['/', '\\']).any(|part| part == "..");
    if trimmed.is_empty() || escapes {
        return Err(ApiError::BadRequest(format!("Invalid image path '{reference}'")));
    }
    Ok(())
}

fn mime_allowed_for_extension(mime: &str, extension: &str) -> bool {
    match extension {
        "jpg" | "jpeg" => matches!(mime, "image/jpeg" | "image/jpg"),
        "png" => mime == "image/png",
        "webp" => mime == "image/webp",
        "bmp" => matches!(mime, "image/bmp" | "image/x-ms-bmp"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> Vec<String> {
        ["jpg", "jpeg", "png", "bmp", "webp"].iter().map(|ext| ext.to_string()).collect()
    }

    #[test]
    fn accepts_matching_extension_and_mime() {
        let extension =
            validate_image_upload("Paper.JPG", "image/jpeg", &allowed()).expect("valid upload");
        assert_eq!(extension, "jpg");
    }

    #[test]
    fn rejects_mismatched_mime() {
        assert!(validate_image_upload("paper.png", "image/jpeg", &allowed()).is_err());
    }

    #[test]
    fn rejects_disallowed_extension() {
        assert!(validate_image_upload("paper.gif", "image/gif", &allowed()).is_err());
        assert!(validate_image_upload("paper", "image/png", &allowed()).is_err());
    }

    #[test]
    fn image_reference_must_be_relative() {
        assert!(validate_image_reference("papers/a.png").is_ok());
        assert!(validate_image_reference("../secret.png").is_err());
        assert!(validate_image_reference("/etc/passwd").is_err());
        assert!(validate_image_reference(" ").is_err());
    }
}
