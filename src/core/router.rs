use std::collections::HashSet;

use http::{HeaderMap, Method};
use thiserror::Error;

use crate::config::{RouteRuleConfig, RoutingConfig};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RouterError {
    #[error("route rule #{index} has invalid HTTP method '{method}'")]
    InvalidMethod { index: usize, method: String },
}

/// A single path segment in a compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    /// A lone `*` occupying one full path segment.
    Star,
}

/// A compiled `path` match pattern: a fixed sequence of segments, optionally
/// followed by a trailing `/*` that matches any (including zero) further
/// segments.
#[derive(Debug, Clone)]
struct PathPattern {
    segments: Vec<Segment>,
    trailing_wildcard: bool,
}

impl PathPattern {
    fn compile(pattern: &str) -> Self {
        let mut raw: Vec<&str> = pattern.split('/').collect();
        if raw.first() == Some(&"") {
            raw.remove(0);
        }

        let trailing_wildcard = raw.last() == Some(&"*");
        if trailing_wildcard {
            raw.pop();
        }

        let segments = raw
            .into_iter()
            .map(|seg| {
                if seg == "*" {
                    Segment::Star
                } else {
                    Segment::Literal(seg.to_string())
                }
            })
            .collect();

        Self {
            segments,
            trailing_wildcard,
        }
    }

    fn matches(&self, path: &str) -> bool {
        let mut path_segs: Vec<&str> = path.split('/').collect();
        if path_segs.first() == Some(&"") {
            path_segs.remove(0);
        }
        // A trailing slash produces one spurious empty segment; drop it so
        // "/foo/" matches the same patterns as "/foo".
        if path_segs.last() == Some(&"") && path_segs.len() > self.segments.len() {
            path_segs.pop();
        }

        if !self.trailing_wildcard && path_segs.len() != self.segments.len() {
            return false;
        }
        if self.trailing_wildcard && path_segs.len() < self.segments.len() {
            return false;
        }

        self.segments
            .iter()
            .zip(path_segs.iter())
            .all(|(pattern_seg, actual)| match pattern_seg {
                Segment::Star => true,
                Segment::Literal(expected) => expected == actual,
            })
    }
}

struct CompiledRule {
    priority: i32,
    path: Option<PathPattern>,
    path_prefix: Option<String>,
    host: Option<String>,
    methods: Option<HashSet<Method>>,
    headers: Option<Vec<(String, String)>>,
    backend: String,
    strip_prefix: bool,
    /// The literal prefix to trim when `strip_prefix` is set: `path_prefix`
    /// if declared, else the literal portion of a `path` pattern that ends
    /// in a trailing `/*` (everything before that wildcard).
    strip_source: Option<String>,
}

impl CompiledRule {
    fn compile(index: usize, rule: &RouteRuleConfig) -> Result<Self, RouterError> {
        let methods = match &rule.methods {
            None => None,
            Some(raw) => {
                let mut set = HashSet::with_capacity(raw.len());
                for m in raw {
                    let method = Method::from_bytes(m.to_uppercase().as_bytes()).map_err(|_| {
                        RouterError::InvalidMethod {
                            index,
                            method: m.clone(),
                        }
                    })?;
                    set.insert(method);
                }
                Some(set)
            }
        };

        let strip_source = rule.path_prefix.clone().or_else(|| {
            rule.path
                .as_deref()
                .and_then(|pattern| pattern.strip_suffix("/*").map(String::from))
        });

        Ok(Self {
            priority: rule.priority,
            path: rule.path.as_deref().map(PathPattern::compile),
            path_prefix: rule.path_prefix.clone(),
            host: rule.host.clone(),
            methods,
            headers: rule
                .headers
                .as_ref()
                .map(|h| h.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
            backend: rule.backend.clone(),
            strip_prefix: rule.strip_prefix,
            strip_source,
        })
    }

    fn matches(&self, method: &Method, path: &str, host: Option<&str>, headers: &HeaderMap) -> bool {
        if let Some(pattern) = &self.path {
            if !pattern.matches(path) {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(expected_host) = &self.host {
            match host {
                Some(actual) if actual.eq_ignore_ascii_case(expected_host) => {}
                _ => return false,
            }
        }
        if let Some(methods) = &self.methods {
            if !methods.contains(method) {
                return false;
            }
        }
        if let Some(expected_headers) = &self.headers {
            for (name, expected_value) in expected_headers {
                match headers.get(name.as_str()).and_then(|v| v.to_str().ok()) {
                    Some(actual) if actual == expected_value => {}
                    _ => return false,
                }
            }
        }
        true
    }

    /// Computes the path to forward upstream, applying `strip_prefix` when
    /// this rule matched via `path_prefix`. An empty result is rewritten to
    /// `/` so the upstream never sees a bare empty path.
    fn rewrite_path<'a>(&self, path: &'a str) -> &'a str {
        if !self.strip_prefix {
            return path;
        }
        let Some(prefix) = &self.strip_source else {
            return path;
        };
        let stripped = path.strip_prefix(prefix.as_str()).unwrap_or(path);
        if stripped.is_empty() {
            "/"
        } else {
            stripped
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    pub backend: String,
    pub rewritten_path: String,
}

/// Priority-ordered, AND-combined request router.
///
/// Rules are evaluated from highest `priority` to lowest; ties keep
/// declaration order. The first rule whose predicates all match wins. If no
/// rule matches, `default_backend` (if configured) is used with the
/// original, unrewritten path.
pub struct Router {
    rules: Vec<CompiledRule>,
    default_backend: Option<String>,
}

impl Router {
    pub fn new(routing: &RoutingConfig) -> Result<Self, RouterError> {
        let mut rules = routing
            .rules
            .iter()
            .enumerate()
            .map(|(index, rule)| CompiledRule::compile(index, rule))
            .collect::<Result<Vec<_>, _>>()?;

        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(Self {
            rules,
            default_backend: routing.default_backend.clone(),
        })
    }

    pub fn route(
        &self,
        method: &Method,
        path: &str,
        host: Option<&str>,
        headers: &HeaderMap,
    ) -> Option<Matched> {
        for rule in &self.rules {
            if rule.matches(method, path, host, headers) {
                return Some(Matched {
                    backend: rule.backend.clone(),
                    rewritten_path: rule.rewrite_path(path).to_string(),
                });
            }
        }

        self.default_backend.clone().map(|backend| Matched {
            backend,
            rewritten_path: path.to_string(),
        })
    }
}
