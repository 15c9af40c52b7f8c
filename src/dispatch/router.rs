//! Selector lookup.
//!
//! # Responsibilities
//! - Store registered routes
//! - Find the longest registered prefix for a selector
//! - Return the matched handler and the selector remainder, or explicit no-match
//!
//! # Design Decisions
//! - Immutable after construction (shared without locks)
//! - O(n) prefix scan over routes sorted longest first; route tables are small
//! - The root route only matches an empty selector or `/`

use std::sync::Arc;

use super::FeatureHandler;

struct Route {
    prefix: String,
    handler: Arc<dyn FeatureHandler>,
}

/// Result of a route lookup.
pub enum RouteMatch<'a> {
    Found {
        handler: &'a Arc<dyn FeatureHandler>,
        remainder: &'a str,
    },
    NoMatch,
}

/// Prefix router for Gopher and Gemini selectors.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `prefix`. `""` and `"/"` both mean the root.
    pub fn route(mut self, prefix: &str, handler: Arc<dyn FeatureHandler>) -> Self {
        let prefix = normalize(prefix).to_string();
        self.routes.retain(|r| r.prefix != prefix);
        self.routes.push(Route { prefix, handler });
        self.routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        self
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Registered prefixes, longest first.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.prefix.as_str())
    }

    pub fn lookup<'a>(&'a self, selector: &'a str) -> RouteMatch<'a> {
        let selector = normalize(selector);
        for route in &self.routes {
            if let Some(remainder) = match_prefix(&route.prefix, selector) {
                return RouteMatch::Found {
                    handler: &route.handler,
                    remainder,
                };
            }
        }
        RouteMatch::NoMatch
    }
}

/// Strip trailing slashes and make the selector absolute (`""` → `"/"`).
fn normalize(selector: &str) -> &str {
    let trimmed = selector.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

fn match_prefix<'a>(prefix: &str, selector: &'a str) -> Option<&'a str> {
    if prefix == "/" {
        return (selector == "/").then_some("");
    }
    let rest = selector.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some("");
    }
    rest.strip_prefix('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{HandlerError, HandlerRequest};
    use crate::protocol::ClientWriter;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl FeatureHandler for Named {
        async fn handle(
            &self,
            _request: HandlerRequest<'_>,
            _writer: &mut ClientWriter,
        ) -> Result<(), HandlerError> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.0
        }
    }

    fn router() -> Router {
        Router::new()
            .route("/", Arc::new(Named("menu")))
            .route("/ask", Arc::new(Named("ask")))
            .route("/ask/debug", Arc::new(Named("debug")))
            .route("/about", Arc::new(Named("about")))
    }

    fn resolve<'a>(router: &'a Router, selector: &'a str) -> Option<(&'static str, &'a str)> {
        match router.lookup(selector) {
            RouteMatch::Found { handler, remainder } => Some((handler.name(), remainder)),
            RouteMatch::NoMatch => None,
        }
    }

    #[test]
    fn root_matches_empty_and_slash() {
        let r = router();
        assert_eq!(resolve(&r, ""), Some(("menu", "")));
        assert_eq!(resolve(&r, "/"), Some(("menu", "")));
    }

    #[test]
    fn matches_whole_segments_only() {
        let r = router();
        assert_eq!(resolve(&r, "/ask"), Some(("ask", "")));
        assert_eq!(resolve(&r, "/ask/"), Some(("ask", "")));
        assert_eq!(resolve(&r, "/ask/pirate"), Some(("ask", "pirate")));
        assert_eq!(resolve(&r, "/asking"), None);
        assert_eq!(resolve(&r, "/nowhere"), None);
    }

    #[test]
    fn longest_prefix_wins() {
        let r = router();
        assert_eq!(resolve(&r, "/ask/debug/x"), Some(("debug", "x")));
        assert_eq!(r.prefixes().next(), Some("/ask/debug"));
    }

    #[test]
    fn re_registering_replaces() {
        let r = router().route("/about/", Arc::new(Named("about2")));
        assert_eq!(r.len(), 4);
        assert_eq!(resolve(&r, "/about"), Some(("about2", "")));
    }
}
