//! Attachment encoding: stored file → base64 `ImageData`.
//!
//! Multimodal APIs take attachments as base64 payloads with a MIME type.
//! Images and PDFs are forwarded as-is; no rasterisation happens here.
//! The MIME type comes from the extension, checked against the file's
//! magic bytes so a PNG saved as `scan.jpg` is still labelled `image/png`.

use crate::error::AdvocateError;
use crate::pipeline::workspace::{FileKind, StoredFile};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::ImageFormat;
use tracing::{debug, warn};

/// Read and encode one workspace file for the model request.
pub async fn encode_file(file: &StoredFile) -> Result<ImageData, AdvocateError> {
    let bytes = tokio::fs::read(&file.path)
        .await
        .map_err(|e| AdvocateError::io(&file.path, e))?;
    let mime = sniff_mime(&file.name, file.kind, &bytes);

    let b64 = STANDARD.encode(&bytes);
    debug!("Encoded {} ({}) → {} bytes base64", file.name, mime, b64.len());

    let data = ImageData::new(b64, mime);
    // Fine print on itemised bills needs the full tile budget.
    Ok(if mime.starts_with("image/") {
        data.with_detail("high")
    } else {
        data
    })
}

/// Pick the MIME type to send, trusting content over extension for images.
fn sniff_mime(name: &str, kind: FileKind, bytes: &[u8]) -> &'static str {
    if !kind.is_image() {
        if !bytes.starts_with(b"%PDF") {
            warn!("{name}: extension says PDF but the %PDF header is missing");
        }
        return kind.mime_type();
    }

    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => "image/png",
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(other) => {
            warn!("{name}: unexpected image format {other:?}, sending as {}", kind.mime_type());
            kind.mime_type()
        }
        Err(_) => {
            warn!("{name}: unrecognised image content, sending as {}", kind.mime_type());
            kind.mime_type()
        }
    }
}
