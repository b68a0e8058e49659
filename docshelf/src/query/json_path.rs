use crate::error::{DocShelfError, Result};

/// A path into a `json` field, rendered in SQLite JSON path syntax.
///
/// Keys are always double-quoted labels; keys made only of digits address array
/// elements. The rendered path is bound as a parameter, never spliced into SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    segments: Vec<String>,
}

impl JsonPath {
    pub fn root() -> Self {
        JsonPath {
            segments: Vec::new(),
        }
    }

    /// Extend the path by one key.
    pub fn child(&self, key: &str) -> Result<Self> {
        if key.is_empty() {
            return Err(DocShelfError::InvalidQuery("empty path segment".into()));
        }
        if key.contains('"') {
            return Err(DocShelfError::InvalidQuery(format!(
                "path segment {key:?} may not contain a double quote"
            )));
        }
        let mut segments = self.segments.clone();
        segments.push(key.to_string());
        Ok(JsonPath { segments })
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Dotted form for error messages, e.g. `address.city`.
    pub fn dotted(&self, field: &str) -> String {
        std::iter::once(field)
            .chain(self.segments.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn render(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.segments {
            if segment.bytes().all(|b| b.is_ascii_digit()) {
                out.push('[');
                out.push_str(segment);
                out.push(']');
            } else {
                out.push_str(".\"");
                out.push_str(segment);
                out.push('"');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_paths() {
        assert_eq!(JsonPath::root().render(), "$");
        let path = JsonPath::root().child("address").unwrap().child("city").unwrap();
        assert_eq!(path.render(), "$.\"address\".\"city\"");
        assert_eq!(path.dotted("profile"), "profile.address.city");
    }

    #[test]
    fn test_array_index_segment() {
        let path = JsonPath::root().child("tags").unwrap().child("0").unwrap();
        assert_eq!(path.render(), "$.\"tags\"[0]");
    }

    #[test]
    fn test_keys_with_dots_stay_single_segment() {
        let path = JsonPath::root().child("a.b").unwrap();
        assert_eq!(path.render(), "$.\"a.b\"");
    }

    #[test]
    fn test_quote_rejected() {
        assert!(JsonPath::root().child("bad\"key").is_err());
        assert!(JsonPath::root().child("").is_err());
    }
}
