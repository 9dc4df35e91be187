//! Scheme-addressed asset paths

use std::fmt;

use crate::assets::AssetError;

/// A normalized `scheme://path` asset address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetPath {
    scheme: String,
    path: String,
}

impl AssetPath {
    /// Parse and normalize an address like `res://textures/brick.png`.
    ///
    /// Normalization replaces backslashes, collapses redundant separators,
    /// drops `.` segments and rejects `..` (no path traversal).
    pub fn parse(raw: &str) -> Result<Self, AssetError> {
        let (scheme, rest) = raw
            .split_once("://")
            .ok_or_else(|| AssetError::InvalidPath(format!("missing scheme in '{raw}'")))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AssetError::InvalidPath(format!("bad scheme in '{raw}'")));
        }

        let replaced = rest.replace('\\', "/");
        let mut segments = Vec::new();
        for segment in replaced.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            if segment == ".." {
                return Err(AssetError::InvalidPath(format!(
                    "path traversal (..) not allowed in '{raw}'"
                )));
            }
            segments.push(segment);
        }
        if segments.is_empty() {
            return Err(AssetError::InvalidPath(format!("empty path in '{raw}'")));
        }

        Ok(Self {
            scheme: scheme.to_owned(),
            path: segments.join("/"),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The normalized path part, without the scheme.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// File extension, lowercased.
    pub fn extension(&self) -> Option<String> {
        self.path
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
    }
}

impl fmt::Display for AssetPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_path() {
        let path = AssetPath::parse("res://textures/brick.png").unwrap();
        assert_eq!(path.scheme(), "res");
        assert_eq!(path.path(), "textures/brick.png");
        assert_eq!(path.extension().as_deref(), Some("png"));
    }

    #[test]
    fn redundant_separators_collapse() {
        let path = AssetPath::parse("res://a///b/./c.obj").unwrap();
        assert_eq!(path.path(), "a/b/c.obj");
    }

    #[test]
    fn backslashes_normalize() {
        let path = AssetPath::parse("res://a\\b.obj").unwrap();
        assert_eq!(path.path(), "a/b.obj");
    }

    #[test]
    fn traversal_rejected() {
        assert!(AssetPath::parse("res://../secret").is_err());
    }

    #[test]
    fn missing_scheme_rejected() {
        assert!(AssetPath::parse("textures/brick.png").is_err());
    }

    #[test]
    fn empty_path_rejected() {
        assert!(AssetPath::parse("res://").is_err());
    }

    #[test]
    fn display_round_trips() {
        let path = AssetPath::parse("res://a/b.png").unwrap();
        assert_eq!(path.to_string(), "res://a/b.png");
    }
}
