//! Content-type inference for response files and inline content.

use std::path::Path;

pub const APPLICATION_JSON: &str = "application/json";
pub const TEXT_PLAIN: &str = "text/plain";

/// Content type for a file, by extension.
pub fn from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let content_type = match ext.as_str() {
        "json" => APPLICATION_JSON,
        "xml" | "wsdl" | "xsd" => "application/xml",
        "html" | "htm" => "text/html",
        "txt" => TEXT_PLAIN,
        "csv" => "text/csv",
        "css" => "text/css",
        "js" => "application/javascript",
        "yaml" | "yml" => "application/x-yaml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(content_type)
}

/// Best guess for inline content: JSON unless the body is clearly
/// something else.
pub fn guess(body: &[u8]) -> &'static str {
    let trimmed = body.trim_ascii_start();
    match trimmed.first() {
        Some(b'<') if trimmed.len() >= 5 && trimmed[..5].eq_ignore_ascii_case(b"<html") => {
            "text/html"
        }
        Some(b'<') => "application/xml",
        Some(_) if serde_json::from_slice::<serde_json::Value>(body).is_err() => TEXT_PLAIN,
        _ => APPLICATION_JSON,
    }
}
