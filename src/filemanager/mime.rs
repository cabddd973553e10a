use std::path::Path;

/// Content type for archive downloads.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type of a downloaded file: sniffed from its first bytes, then
/// guessed from its name.
pub fn detect_content_type(head: &[u8], file_name: &str) -> String {
    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }
    let guessed = content_type_from_extension(file_name);
    if guessed == ARCHIVE_CONTENT_TYPE && !head.is_empty() && looks_like_text(head) {
        return "text/plain".to_string();
    }
    guessed.to_string()
}

pub fn content_type_from_extension(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    match ext.as_str() {
        "txt" | "log" | "ini" | "cfg" | "conf" => "text/plain",
        "csv" => "text/csv",
        "md" | "markdown" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "yaml" | "yml" => "text/x-yaml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "zip" => "application/zip",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => ARCHIVE_CONTENT_TYPE,
    }
}

/// UTF-8 with few control bytes.
fn looks_like_text(buffer: &[u8]) -> bool {
    if buffer.contains(&0) || std::str::from_utf8(buffer).is_err() {
        return false;
    }
    let control = buffer
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r'))
        .count();
    control * 10 <= buffer.len()
}
