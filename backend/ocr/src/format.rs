use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};

/// Image format label used in the data URI, inferred from the file extension.
/// Unrecognized or missing extensions fall back to `jpeg`.
pub fn image_format(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "png",
        "jpg" => "jpg",
        "jpeg" => "jpeg",
        "webp" => "webp",
        _ => "jpeg",
    }
}

/// `data:image/<format>;base64,<payload>`
pub fn data_uri(format: &str, bytes: &[u8]) -> String {
    format!("data:image/{};base64,{}", format, STANDARD.encode(bytes))
}
