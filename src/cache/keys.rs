//! Content cache key layout.
//!
//! Content lives at `<namespace>:<kind>:<id>` and its version marker at the
//! sibling `<namespace>:version:<id>`, so both share the identity suffix.

use crate::config::ContentCacheConfig;

/// Namespace and kind of one family of cached content, e.g. `blog` / `post`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentKeyspace {
    pub namespace: String,
    pub kind: String,
}

impl ContentKeyspace {
    pub fn new(namespace: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            kind: kind.into(),
        }
    }

    pub fn content_key(&self, id: &str) -> String {
        format!("{}:{}:{}", self.namespace, self.kind, id)
    }

    pub fn version_key(&self, id: &str) -> String {
        format!("{}:version:{}", self.namespace, id)
    }

    /// Scan pattern covering every content entry of this kind
    pub fn content_pattern(&self) -> String {
        format!("{}:{}:*", self.namespace, self.kind)
    }

    /// Scan pattern covering every version marker in the namespace
    pub fn version_pattern(&self) -> String {
        format!("{}:version:*", self.namespace)
    }
}

impl From<&ContentCacheConfig> for ContentKeyspace {
    fn from(config: &ContentCacheConfig) -> Self {
        Self::new(config.namespace.clone(), config.kind.clone())
    }
}

impl Default for ContentKeyspace {
    fn default() -> Self {
        Self::new("blog", "post")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blog_post_layout() {
        let keys = ContentKeyspace::default();
        assert_eq!(keys.content_key("hello-world"), "blog:post:hello-world");
        assert_eq!(keys.version_key("hello-world"), "blog:version:hello-world");
        assert_eq!(keys.content_pattern(), "blog:post:*");
        assert_eq!(keys.version_pattern(), "blog:version:*");
    }
}
