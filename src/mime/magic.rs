use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::Result;

/// Number of leading bytes inspected when sniffing
const SNIFF_LEN: usize = 4096;

/// Byte signature anchored at an offset
struct Signature {
    offset: usize,
    bytes: &'static [u8],
    mime: &'static str,
}

const SIGNATURES: &[Signature] = &[
    Signature { offset: 0, bytes: b"%PDF-", mime: "application/pdf" },
    Signature { offset: 0, bytes: b"\x89PNG\r\n\x1a\n", mime: "image/png" },
    Signature { offset: 0, bytes: b"\xff\xd8\xff", mime: "image/jpeg" },
    Signature { offset: 0, bytes: b"GIF87a", mime: "image/gif" },
    Signature { offset: 0, bytes: b"GIF89a", mime: "image/gif" },
    Signature { offset: 0, bytes: b"II*\x00", mime: "image/tiff" },
    Signature { offset: 0, bytes: b"MM\x00*", mime: "image/tiff" },
    Signature { offset: 8, bytes: b"WEBP", mime: "image/webp" },
    Signature { offset: 0, bytes: b"{\\rtf", mime: "application/rtf" },
    Signature { offset: 0, bytes: b"\xd0\xcf\x11\xe0\xa1\xb1\x1a\xe1", mime: "application/x-ole-storage" },
    Signature { offset: 0, bytes: b"\x1f\x8b", mime: "application/gzip" },
    Signature { offset: 0, bytes: b"<?xml", mime: "application/xml" },
];

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Office Open XML part prefixes found in the zip directory of the first entries
const OOXML_PARTS: &[(&[u8], &str)] = &[
    (b"word/", "application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
    (b"xl/", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
    (b"ppt/", "application/vnd.openxmlformats-officedocument.presentationml.presentation"),
];

/// Detect a mime type from the leading bytes of a file.
///
/// Returns `Ok(None)` when no signature matches; plain text is never reported.
pub fn sniff<P: AsRef<Path>>(path: P) -> Result<Option<&'static str>> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?.take(SNIFF_LEN as u64).read_to_end(&mut head)?;
    Ok(sniff_bytes(&head))
}

pub fn sniff_bytes(head: &[u8]) -> Option<&'static str> {
    if head.starts_with(ZIP_MAGIC) {
        return Some(sniff_zip(head));
    }

    if let Some(sig) = SIGNATURES.iter().find(|sig| matches_at(head, sig.offset, sig.bytes)) {
        // WEBP also needs the RIFF container header
        if sig.mime == "image/webp" && !head.starts_with(b"RIFF") {
            return None;
        }
        return Some(sig.mime);
    }

    if looks_like_html(head) {
        return Some("text/html");
    }

    None
}

fn matches_at(head: &[u8], offset: usize, bytes: &[u8]) -> bool {
    head.len() >= offset + bytes.len() && &head[offset..offset + bytes.len()] == bytes
}

/// Zip containers: OpenDocument stores its mime type uncompressed as the first entry,
/// Office Open XML is recognized by its part names.
fn sniff_zip(head: &[u8]) -> &'static str {
    if matches_at(head, 30, b"mimetype") {
        let rest = &head[38.min(head.len())..];
        if let Some(mime) = ODF_MIMES.iter().find(|m| rest.starts_with(m.as_bytes())) {
            return *mime;
        }
    }

    for (part, mime) in OOXML_PARTS {
        if contains(head, part) {
            return *mime;
        }
    }

    "application/zip"
}

const ODF_MIMES: &[&str] = &[
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/vnd.oasis.opendocument.presentation",
    "application/vnd.oasis.opendocument.graphics",
];

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn looks_like_html(head: &[u8]) -> bool {
    let start = head
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(head.len());
    let lead: Vec<u8> = head[start..]
        .iter()
        .take(15)
        .map(|b| b.to_ascii_lowercase())
        .collect();
    lead.starts_with(b"<!doctype html") || lead.starts_with(b"<html")
}
