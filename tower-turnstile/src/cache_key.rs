//! Store keys for cached responses.
//!
//! Keys are namespaced by resource and category so that a mutation can drop
//! every list page of a resource without touching its item entries:
//!
//! ```text
//! cache:{resource}:item:{digest("GET|" + path)}
//! cache:{resource}:list:{digest("GET|/" + resource + "|" + query)}
//! cache:generic:{digest(method + "|" + template + "|" + query)}
//! ```

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::Method;
use sha2::Digest;
use sha2::Sha256;

use crate::context::RequestContext;

/// Invalidation class of a cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Category {
    /// A collection endpoint, `/{resource}`.
    List,
    /// A single-item endpoint, `/{resource}/:id`.
    Item,
    /// Every other cacheable route.
    Generic,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Item => "item",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A derived cache key together with its category.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    category: Category,
    key: String,
}

impl CacheKey {
    /// Derives the key for a request, or `None` if the request is not cacheable.
    ///
    /// Only `GET` requests with a known route template are cacheable.
    pub fn derive(ctx: &RequestContext<'_>) -> Option<Self> {
        if *ctx.method != Method::GET {
            return None;
        }
        let template = ctx.route?;
        let query = ctx.query.unwrap_or("");

        let segments: Vec<&str> = template.split('/').filter(|s| !s.is_empty()).collect();
        let key = match segments.as_slice() {
            [resource] if !is_param(resource) => Self::list(resource, query),
            [resource, id] if !is_param(resource) && is_param(id) => Self::item(resource, ctx.path),
            _ => Self::generic(ctx.method, template, query),
        };
        tracing::debug!(template, category = %key.category, "derived cache key");
        Some(key)
    }

    /// The item entry for the resolved path `path` (`/events/42`).
    pub fn item(resource: &str, path: &str) -> Self {
        Self {
            category: Category::Item,
            key: format!("{}{}", prefix(resource, Category::Item), digest(&format!("GET|{path}"))),
        }
    }

    /// The list entry for `/{resource}` with the raw `query` string.
    pub fn list(resource: &str, query: &str) -> Self {
        Self {
            category: Category::List,
            key: format!(
                "{}{}",
                prefix(resource, Category::List),
                digest(&format!("GET|/{resource}|{query}"))
            ),
        }
    }

    pub fn generic(method: &Method, template: &str, query: &str) -> Self {
        Self {
            category: Category::Generic,
            key: format!("cache:generic:{}", digest(&format!("{method}|{template}|{query}"))),
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Common prefix of every key of `category` under `resource`.
pub fn prefix(resource: &str, category: Category) -> String {
    match category {
        Category::Generic => "cache:generic:".to_string(),
        _ => format!("cache:{resource}:{category}:"),
    }
}

fn is_param(segment: &str) -> bool {
    segment.starts_with(':') || (segment.starts_with('{') && segment.ends_with('}'))
}

fn digest(input: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(input.as_bytes()))
}
