use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::models::MediaKind;

static EXIF_DATETIME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}):(\d{2}):(\d{2}) (\d{2}):(\d{2}):(\d{2})").unwrap());

/// Container / image format recognised from magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
    Bmp,
    Mp4,
    Matroska,
    Avi,
}

impl MediaFormat {
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Jpeg | Self::Png | Self::Gif | Self::Webp | Self::Bmp => MediaKind::Image,
            Self::Mp4 | Self::Matroska | Self::Avi => MediaKind::Video,
        }
    }
}

/// Identify the format of a blob, `None` when unrecognised
pub fn sniff(bytes: &[u8]) -> Option<MediaFormat> {
    match bytes {
        [0xFF, 0xD8, 0xFF, ..] => Some(MediaFormat::Jpeg),
        [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, ..] => Some(MediaFormat::Png),
        [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(MediaFormat::Gif),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(MediaFormat::Webp),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'A', b'V', b'I', b' ', ..] => Some(MediaFormat::Avi),
        [b'B', b'M', ..] if bytes.len() > 26 => Some(MediaFormat::Bmp),
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => Some(MediaFormat::Mp4),
        [0x1A, 0x45, 0xDF, 0xA3, ..] => Some(MediaFormat::Matroska),
        _ => None,
    }
}

/// DateTimeOriginal from a JPEG Exif segment, if one is embedded.
///
/// Only the first timestamp in the APP1 segment is considered; cameras write
/// DateTimeOriginal ahead of DateTimeDigitized.
pub fn exif_capture_time(bytes: &[u8]) -> Option<DateTime<Utc>> {
    if sniff(bytes) != Some(MediaFormat::Jpeg) {
        return None;
    }

    let segment = app1_segment(bytes)?;
    if !segment.starts_with(b"Exif\0\0") {
        return None;
    }

    let caps = EXIF_DATETIME.captures(segment)?;
    let text = std::str::from_utf8(caps.get(0)?.as_bytes()).ok()?;
    NaiveDateTime::parse_from_str(text, "%Y:%m:%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

fn app1_segment(bytes: &[u8]) -> Option<&[u8]> {
    let mut pos = 2;
    while pos + 4 <= bytes.len() {
        if bytes[pos] != 0xFF {
            return None;
        }
        let marker = bytes[pos + 1];
        let len = u16::from_be_bytes([bytes[pos + 2], bytes[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > bytes.len() {
            return None;
        }
        if marker == 0xE1 {
            return Some(&bytes[pos + 4..pos + 2 + len]);
        }
        // Start of scan: no more metadata segments
        if marker == 0xDA {
            return None;
        }
        pos += 2 + len;
    }
    None
}
