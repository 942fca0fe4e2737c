//! Target bodies: content to bytes and back.

use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::PathBuf;

use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, percent_encode};

use super::registry::{ClipboardType, LATIN1_TARGET, TargetOptions};
use crate::content::{ClipboardContent, ContentKind, PathsAction};

/// Bytes escaped in `file://` URLs: everything but letters, digits and `-_.~/`.
const PATH_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

const FILE_SCHEME: &str = "file://";

/// Body for `content` as `ty`, or `None` if the target cannot carry it.
pub fn encode(ty: &ClipboardType, content: &ClipboardContent) -> Option<Bytes> {
    if !ty.supports(content) {
        return None;
    }
    let text = match content.kind() {
        ContentKind::Empty => return None,
        ContentKind::Binary => return content.as_binary().ok().cloned(),
        ContentKind::Paths => {
            let (paths, action) = content.as_paths().ok()?;
            if ty.kind() == ContentKind::Paths {
                return Some(encode_paths(paths, action, ty.options()).into_bytes().into());
            }
            encode_paths(paths, action, TargetOptions::default())
        }
        ContentKind::Text => content.as_text().ok()?.to_owned(),
    };
    if ty.name() == LATIN1_TARGET {
        Some(encode_latin1(&text).into())
    } else {
        Some(text.into_bytes().into())
    }
}

/// Content carried by a body received as `ty`.
pub fn decode(ty: &ClipboardType, body: &[u8]) -> ClipboardContent {
    match ty.kind() {
        ContentKind::Paths => {
            let (paths, action) = decode_paths(&String::from_utf8_lossy(body), ty.options());
            if paths.is_empty() {
                ClipboardContent::Empty
            } else {
                ClipboardContent::paths(paths, action)
            }
        }
        ContentKind::Text => {
            let text = if ty.name() == LATIN1_TARGET {
                decode_latin1(body)
            } else {
                String::from_utf8_lossy(body).into_owned()
            };
            if ty.name().contains('/') && !ty.name().starts_with("text/plain") {
                ClipboardContent::Text {
                    text,
                    mime: ty.name().to_owned(),
                }
            } else {
                ClipboardContent::text(text)
            }
        }
        ContentKind::Binary => ClipboardContent::Binary {
            data: Bytes::copy_from_slice(body),
            mime: ty.name().to_owned(),
        },
        ContentKind::Empty => ClipboardContent::Empty,
    }
}

/// Newline-joined path list, without a trailing newline.
pub fn encode_paths(paths: &[PathBuf], action: PathsAction, options: TargetOptions) -> String {
    let mut lines = Vec::with_capacity(paths.len() + 1);
    if options.include_action {
        lines.push(action.as_str().to_owned());
    }
    for path in paths {
        if options.encode_paths {
            let encoded = percent_encode(path.as_os_str().as_bytes(), PATH_ESCAPES);
            lines.push(format!("{FILE_SCHEME}{encoded}"));
        } else {
            lines.push(path.to_string_lossy().into_owned());
        }
    }
    lines.join("\n")
}

/// Parse a path list. A leading `copy`/`cut` line sets the action;
/// `file://` entries are percent-decoded; carriage returns are dropped.
pub fn decode_paths(body: &str, options: TargetOptions) -> (Vec<PathBuf>, PathsAction) {
    let mut action = PathsAction::default();
    let mut paths = Vec::new();
    let mut first = true;
    for line in body.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if first {
            first = false;
            if let Some(found) = PathsAction::from_line(line) {
                action = found;
                continue;
            }
        }
        // text/uri-list comments
        if options.encode_paths && !options.include_action && line.starts_with('#') {
            continue;
        }
        paths.push(decode_path(line));
    }
    (paths, action)
}

fn decode_path(entry: &str) -> PathBuf {
    match entry.strip_prefix(FILE_SCHEME) {
        Some(encoded) => {
            let bytes: Vec<u8> = percent_decode_str(encoded).collect();
            PathBuf::from(OsString::from_vec(bytes))
        }
        None => PathBuf::from(entry),
    }
}

/// ISO Latin-1; characters outside it become `?`.
pub fn encode_latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

pub fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
