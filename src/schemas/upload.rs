use serde::Serialize;

#[derive(Debug, Serialize)]
pub(crate) struct UploadResponse {
    pub(crate) path: String,
    pub(crate) filename: String,
    pub(crate) size: usize,
}
