/// Media types the analysis path understands, identified from content bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffedType {
    Png,
    Jpeg,
    Gif,
    Webp,
    Pdf,
}

/// How far into a file the `%PDF-` marker may appear. Some producers
/// prepend junk bytes and readers tolerate it.
const PDF_MARKER_WINDOW: usize = 1024;

impl SniffedType {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Gif => "image/gif",
            Self::Webp => "image/webp",
            Self::Pdf => "application/pdf",
        }
    }
}

pub fn sniff(bytes: &[u8]) -> Option<SniffedType> {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some(SniffedType::Png);
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(SniffedType::Jpeg);
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some(SniffedType::Gif);
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some(SniffedType::Webp);
    }
    let window = &bytes[..bytes.len().min(PDF_MARKER_WINDOW)];
    if window.windows(5).any(|w| w == b"%PDF-") {
        return Some(SniffedType::Pdf);
    }
    None
}

/// Lower-case a declared content type and drop parameters
/// (`Image/PNG; charset=x` -> `image/png`).
pub fn normalize_declared(raw: &str) -> String {
    raw.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}
