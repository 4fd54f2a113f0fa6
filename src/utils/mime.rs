pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const VIDEO_EXTENSIONS: [&str; 6] = ["mp4", "mkv", "webm", "avi", "mov", "m4v"];

fn extension_of(path: &str) -> Option<String> {
    let leaf = path.rsplit('/').next()?;
    let (_, ext) = leaf.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext.to_ascii_lowercase())
    }
}

/// Infers a MIME type from a path's extension.
pub fn infer_content_type(path: &str) -> Option<&'static str> {
    let ext = extension_of(path)?;
    let mime = match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "vtt" => "text/vtt",
        "srt" => "text/plain",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        _ => return None,
    };
    Some(mime)
}

/// Resolution order: the upstream-reported type wins unless it is absent or
/// the generic octet-stream, then the extension table, then the default.
pub fn resolve_content_type(upstream: Option<&str>, key: &str) -> String {
    match upstream {
        Some(t) if !t.is_empty() && !t.starts_with(DEFAULT_CONTENT_TYPE) => t.to_string(),
        _ => infer_content_type(key)
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string(),
    }
}

/// Video detection used by the upload and listing filters: MIME prefix or
/// a known container extension.
pub fn is_video(name: &str, content_type: Option<&str>) -> bool {
    if content_type
        .map(|t| t.to_ascii_lowercase().starts_with("video/"))
        .unwrap_or(false)
    {
        return true;
    }
    extension_of(name)
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}
