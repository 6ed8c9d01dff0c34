//! Ordered path-handler table.
//!
//! Entries are tried in registration order and the first match wins, so a
//! general prefix registered early shadows more specific entries after it.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::request::HttpRequest;

/// Handles one request. The second argument is the URI with the matched
/// prefix removed.
pub type RequestHandler = Arc<dyn Fn(HttpRequest, &str) + Send + Sync>;

#[derive(Clone)]
pub struct PathHandler {
    pub prefix: String,
    pub exact_match: bool,
    pub handler: RequestHandler,
}

impl PathHandler {
    /// Sub-path for `uri` if this entry matches it.
    pub fn matches<'a>(&self, uri: &'a str) -> Option<&'a str> {
        if self.exact_match {
            (uri == self.prefix).then_some("")
        } else {
            uri.strip_prefix(self.prefix.as_str())
        }
    }
}

impl fmt::Debug for PathHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathHandler")
            .field("prefix", &self.prefix)
            .field("exact_match", &self.exact_match)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    entries: RwLock<Vec<PathHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, prefix: impl Into<String>, exact_match: bool, handler: F)
    where
        F: Fn(HttpRequest, &str) + Send + Sync + 'static,
    {
        let prefix = prefix.into();
        debug!(prefix = %prefix, exact_match, "Registering HTTP handler");
        self.entries.write().push(PathHandler {
            prefix,
            exact_match,
            handler: Arc::new(handler),
        });
    }

    /// Remove the first entry with this exact prefix and match mode.
    pub fn unregister(&self, prefix: &str, exact_match: bool) -> bool {
        let mut entries = self.entries.write();
        let position = entries
            .iter()
            .position(|entry| entry.prefix == prefix && entry.exact_match == exact_match);
        match position {
            Some(index) => {
                debug!(prefix, exact_match, "Unregistering HTTP handler");
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// First matching handler and the sub-path to pass it.
    pub fn resolve(&self, uri: &str) -> Option<(RequestHandler, String)> {
        self.entries.read().iter().find_map(|entry| {
            entry
                .matches(uri)
                .map(|sub_path| (Arc::clone(&entry.handler), sub_path.to_string()))
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
