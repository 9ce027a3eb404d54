//! Content-based document type detection

/// Bytes inspected when sniffing an upload.
pub const SNIFF_BYTES: usize = 1024;

fn has_extension(filename: &str, extensions: &[&str]) -> bool {
    let lower = filename.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

/// Detect the document type from leading bytes, using the filename only to
/// split zip-based office formats and to admit plain text.
pub fn detect_document_type(content: &[u8], filename: &str) -> Option<&'static str> {
    if content.starts_with(b"%PDF") {
        return Some("pdf");
    }

    if content.starts_with(b"PK\x03\x04") {
        return Some(if has_extension(filename, &[".xlsx", ".xls"]) {
            "spreadsheet"
        } else if has_extension(filename, &[".docx", ".doc"]) {
            "document"
        } else if has_extension(filename, &[".pptx", ".ppt"]) {
            "presentation"
        } else {
            "office_document"
        });
    }

    if content.starts_with(b"\xff\xd8\xff")
        || content.starts_with(b"\x89PNG")
        || content.starts_with(b"GIF8")
    {
        return Some("image");
    }

    if has_extension(filename, &[".txt", ".csv"]) {
        return Some("text");
    }

    None
}
