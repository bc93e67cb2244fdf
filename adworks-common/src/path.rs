use std::fmt;

/// Logical, slash-delimited address of a blob (e.g. `acme/backgrounds/16x9/hero.jpg`).
///
/// The final segment is the file name; every preceding segment names a folder.
/// Independent of how the remote store represents folders internally; storage
/// adapters map it onto their own hierarchy (or flatten it into a key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualPath {
    segments: Vec<String>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("path contains an empty segment: {0:?}")]
    EmptySegment(String),
}

impl VirtualPath {
    /// Parse a `/`-joined path. Leading and trailing slashes are tolerated;
    /// interior empty segments (`a//b`) are rejected.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        let segments: Vec<String> = trimmed.split('/').map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PathError::EmptySegment(raw.to_string()));
        }
        Ok(Self { segments })
    }

    /// Folder segments, excluding the final file name. Empty for a file at
    /// the hierarchy root.
    pub fn folders(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    /// The final segment.
    pub fn file_name(&self) -> &str {
        // parse() guarantees at least one segment
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}
