//! Clipboard content values.
//!
//! [`ClipboardContent`] is what gets published to, and fetched from, the
//! system clipboard. The selection engine only borrows it; storing it is
//! the caller's business.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;

/// MIME type given to text read from stdin or decoded from a text target.
pub const TEXT_MIME: &str = "text/plain";

/// What a path list is meant for when pasted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PathsAction {
    #[default]
    Copy,
    Cut,
}

impl PathsAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Cut => "cut",
        }
    }

    /// Recognize an action line (`copy` or `cut`).
    pub fn from_line(line: &str) -> Option<Self> {
        match line {
            "copy" => Some(Self::Copy),
            "cut" => Some(Self::Cut),
            _ => None,
        }
    }
}

impl fmt::Display for PathsAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The coarse kind of a content value or a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Empty,
    Text,
    Paths,
    Binary,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Empty => "empty",
            Self::Text => "text",
            Self::Paths => "paths",
            Self::Binary => "binary",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("expected {expected} content, found {actual}")]
    WrongVariant {
        expected: ContentKind,
        actual: ContentKind,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ClipboardContent {
    #[default]
    Empty,
    Text {
        text: String,
        mime: String,
    },
    Paths {
        paths: Vec<PathBuf>,
        action: PathsAction,
    },
    Binary {
        data: Bytes,
        mime: String,
    },
}

impl ClipboardContent {
    /// Plain text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            mime: TEXT_MIME.to_owned(),
        }
    }

    pub fn paths(paths: Vec<PathBuf>, action: PathsAction) -> Self {
        Self::Paths { paths, action }
    }

    /// Classify raw bytes: UTF-8 becomes text, anything else binary with
    /// a sniffed MIME type. No bytes at all is `Empty`.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        if data.is_empty() {
            return Self::Empty;
        }
        match String::from_utf8(data) {
            Ok(text) => Self::text(text),
            Err(e) => {
                let data = e.into_bytes();
                let mime = tree_magic_mini::from_u8(&data).to_owned();
                Self::Binary {
                    data: data.into(),
                    mime,
                }
            }
        }
    }

    pub fn kind(&self) -> ContentKind {
        match self {
            Self::Empty => ContentKind::Empty,
            Self::Text { .. } => ContentKind::Text,
            Self::Paths { .. } => ContentKind::Paths,
            Self::Binary { .. } => ContentKind::Binary,
        }
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// MIME type of text and binary content.
    pub fn mime(&self) -> Option<&str> {
        match self {
            Self::Text { mime, .. } | Self::Binary { mime, .. } => Some(mime),
            Self::Empty | Self::Paths { .. } => None,
        }
    }

    pub fn as_text(&self) -> Result<&str, ContentError> {
        match self {
            Self::Text { text, .. } => Ok(text),
            other => Err(other.wrong_variant(ContentKind::Text)),
        }
    }

    pub fn as_paths(&self) -> Result<(&[PathBuf], PathsAction), ContentError> {
        match self {
            Self::Paths { paths, action } => Ok((paths, *action)),
            other => Err(other.wrong_variant(ContentKind::Paths)),
        }
    }

    pub fn as_binary(&self) -> Result<&Bytes, ContentError> {
        match self {
            Self::Binary { data, .. } => Ok(data),
            other => Err(other.wrong_variant(ContentKind::Binary)),
        }
    }

    fn wrong_variant(&self, expected: ContentKind) -> ContentError {
        ContentError::WrongVariant {
            expected,
            actual: self.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf8_bytes_become_text() {
        let content = ClipboardContent::from_bytes(b"hello\n".to_vec());
        assert_eq!(content, ClipboardContent::text("hello\n"));
        assert_eq!(content.mime(), Some(TEXT_MIME));
    }

    #[test]
    fn non_utf8_bytes_become_binary_with_sniffed_mime() {
        let mut png = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
        png.extend_from_slice(&[0, 0, 0, 13, b'I', b'H', b'D', b'R']);
        png.extend_from_slice(&[0xff; 32]);

        let content = ClipboardContent::from_bytes(png);
        assert_eq!(content.kind(), ContentKind::Binary);
        // The result depends on the host's shared-mime-info database.
        assert!(content.mime().is_some_and(|m| m.contains('/')));
    }

    #[test]
    fn no_bytes_is_empty() {
        assert!(ClipboardContent::from_bytes(Vec::new()).is_empty());
    }

    #[test]
    fn accessor_for_inactive_variant_fails() {
        let content = ClipboardContent::paths(vec!["/tmp/a".into()], PathsAction::Cut);
        assert!(matches!(
            content.as_text(),
            Err(ContentError::WrongVariant {
                expected: ContentKind::Text,
                actual: ContentKind::Paths
            })
        ));
        let (paths, action) = content.as_paths().unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(action, PathsAction::Cut);
        assert!(ClipboardContent::Empty.as_binary().is_err());
    }

    #[test]
    fn action_lines() {
        assert_eq!(PathsAction::from_line("cut"), Some(PathsAction::Cut));
        assert_eq!(PathsAction::from_line("copy"), Some(PathsAction::Copy));
        assert_eq!(PathsAction::from_line("Cut"), None);
        assert_eq!(PathsAction::Cut.to_string(), "cut");
    }
}
