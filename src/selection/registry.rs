//! Target registry: which targets we understand and how to encode them.
//!
//! The table is ordered: earlier entries are preferred whenever several
//! targets could carry the same content. MIME names missing from the
//! table are accepted as dynamic types ranked after every table entry.

use std::sync::OnceLock;

use crate::content::{ClipboardContent, ContentKind};

/// Target carried as ISO Latin-1 instead of UTF-8.
pub const LATIN1_TARGET: &str = "STRING";

/// Encoding options attached to a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TargetOptions {
    /// Prefix the path list with a `copy`/`cut` line.
    pub include_action: bool,
    /// Write each path as a percent-encoded `file://` URL.
    pub encode_paths: bool,
    /// The target is an alias; serve the best concrete type instead.
    pub choose_best: bool,
}

const PLAIN: TargetOptions = TargetOptions {
    include_action: false,
    encode_paths: false,
    choose_best: false,
};

const FILE_MANAGER: TargetOptions = TargetOptions {
    include_action: true,
    encode_paths: true,
    choose_best: false,
};

const URI_LIST: TargetOptions = TargetOptions {
    include_action: false,
    encode_paths: true,
    choose_best: false,
};

const ALIAS: TargetOptions = TargetOptions {
    include_action: false,
    encode_paths: false,
    choose_best: true,
};

/// Built-in targets, most preferred first.
const TABLE: &[(&str, ContentKind, TargetOptions)] = &[
    ("x-special/gnome-copied-files", ContentKind::Paths, FILE_MANAGER),
    ("application/x-kde-cutselection", ContentKind::Paths, FILE_MANAGER),
    ("text/uri-list", ContentKind::Paths, URI_LIST),
    ("text/plain;charset=utf-8", ContentKind::Text, PLAIN),
    ("UTF8_STRING", ContentKind::Text, PLAIN),
    ("text/plain", ContentKind::Text, PLAIN),
    ("STRING", ContentKind::Text, PLAIN),
    ("TEXT", ContentKind::Text, ALIAS),
];

/// A target name with the content it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardType {
    priority: usize,
    name: String,
    kind: ContentKind,
    options: TargetOptions,
    dynamic: bool,
}

impl ClipboardType {
    /// Lower is preferred.
    #[cfg(test)]
    pub fn priority(&self) -> usize {
        self.priority
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn options(&self) -> TargetOptions {
        self.options
    }

    pub fn is_alias(&self) -> bool {
        self.options.choose_best
    }

    /// Whether content can be served through this target.
    ///
    /// Table text targets also carry path lists (rendered as text).
    /// MIME-named types outside the table only carry content of exactly
    /// that MIME type. `STRING` only carries text that fits Latin-1.
    pub fn supports(&self, content: &ClipboardContent) -> bool {
        if self.dynamic {
            return content.kind() == self.kind && content.mime() == Some(self.name.as_str());
        }
        let carried = match (self.kind, content.kind()) {
            (ContentKind::Text, ContentKind::Text | ContentKind::Paths) => true,
            (ContentKind::Paths, ContentKind::Paths) => true,
            _ => false,
        };
        carried && (self.name != LATIN1_TARGET || fits_latin1(content))
    }
}

/// Whether the text rendering of `content` has no character above U+00FF.
fn fits_latin1(content: &ClipboardContent) -> bool {
    let latin1 = |s: &str| s.chars().all(|c| u32::from(c) <= 0xFF);
    match content {
        ClipboardContent::Text { text, .. } => latin1(text),
        ClipboardContent::Paths { paths, .. } => {
            paths.iter().all(|p| latin1(&p.to_string_lossy()))
        }
        _ => true,
    }
}

/// The ordered target table.
#[derive(Debug)]
pub struct Registry {
    types: Vec<ClipboardType>,
}

impl Registry {
    /// The process-wide registry, built on first use.
    pub fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(Registry::builtin)
    }

    fn builtin() -> Self {
        let types = TABLE
            .iter()
            .enumerate()
            .map(|(priority, &(name, kind, options))| ClipboardType {
                priority,
                name: name.to_owned(),
                kind,
                options,
                dynamic: false,
            })
            .collect();
        Self { types }
    }

    /// Table entries in priority order.
    #[cfg(test)]
    pub fn types(&self) -> &[ClipboardType] {
        &self.types
    }

    /// Resolve a target name. MIME names outside the table become
    /// dynamic text (`text/*`) or binary types.
    pub fn lookup(&self, name: &str) -> Option<ClipboardType> {
        if let Some(found) = self.types.iter().find(|t| t.name == name) {
            return Some(found.clone());
        }
        if !name.contains('/') {
            return None;
        }
        let kind = if name.starts_with("text/") {
            ContentKind::Text
        } else {
            ContentKind::Binary
        };
        Some(ClipboardType {
            priority: self.types.len(),
            name: name.to_owned(),
            kind,
            options: PLAIN,
            dynamic: true,
        })
    }

    /// The most preferred concrete type among `candidates`.
    ///
    /// Ties go to the earlier registration, not the earlier candidate;
    /// dynamic types all share one rank, so the first of those offered wins.
    pub fn find_best<'a>(
        &self,
        candidates: impl IntoIterator<Item = &'a str>,
    ) -> Option<ClipboardType> {
        let mut best: Option<ClipboardType> = None;
        for candidate in candidates {
            let Some(found) = self.lookup(candidate) else {
                continue;
            };
            if found.is_alias() {
                continue;
            }
            if best.as_ref().is_none_or(|b| found.priority < b.priority) {
                best = Some(found);
            }
        }
        best
    }

    /// The concrete type an alias stands for, given the content on offer.
    pub fn resolve_alias(
        &self,
        alias: &ClipboardType,
        content: &ClipboardContent,
    ) -> Option<ClipboardType> {
        self.types
            .iter()
            .find(|t| !t.is_alias() && t.kind == alias.kind && t.supports(content))
            .cloned()
    }

    /// Target names able to carry `content`, most preferred first.
    pub fn supported_targets(&self, content: &ClipboardContent) -> Vec<String> {
        let mut names: Vec<String> = self
            .types
            .iter()
            .filter(|t| t.supports(content))
            .map(|t| t.name.clone())
            .collect();
        if let Some(mime) = content.mime()
            && !names.iter().any(|n| n == mime)
            && self.lookup(mime).is_some_and(|t| t.supports(content))
        {
            names.push(mime.to_owned());
        }
        names
    }
}
