//! # Path Pattern Compiler
//!
//! Turns a path template such as `/api/v1/books/:bookId/chapters/:chapterId` into an anchored
//! regular expression plus the ordered list of parameter names it captures.
//!
//! Two flavours are compiled from the same template syntax:
//!
//! - [`PatternKind::Route`] patterns are anchored at both ends and match a whole path.
//! - [`PatternKind::Prefix`] patterns are anchored at the start only and end with a capture of
//!   the remaining path, bound under [`WILDCARD_PARAM`]. Middleware uses them.
//!
//! The prefix capture is a plain string tail: `/api/v1/books` also matches
//! `/api/v1/books/1` and `/api/v1/booksellers`. The remainder always starts with `/` when
//! it is not empty, including for templates ending in `/` such as the root `/`.
//!
//! A bare `*` segment captures the rest of the path, slashes included, under the names
//! `wildcard0`, `wildcard1`, ... in the order the wildcards appear: `/static/*` matches
//! `/static/css/app.css` with `wildcard0 = "css/app.css"`.
//!
//! Templates are validated when compiled, so a malformed template fails at registration time.

use regex::Regex;
use std::fmt;

use crate::core::error::{RouterError, RouterResult};

/// Parameter name that holds the remainder captured by a prefix pattern
pub const WILDCARD_PARAM: &str = "*";

/// Marker that introduces a named segment
const PARAM_MARKER: char = ':';

/// A segment consisting of this text alone matches any remainder
const WILDCARD_SEGMENT: &str = "*";

/// How a pattern is anchored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Whole-path match
    Route,
    /// Start-anchored match with a trailing remainder capture
    Prefix,
}

/// A compiled path template
///
/// Immutable once built. Two patterns compiled from the same template are still distinct
/// values; the router keeps both.
#[derive(Clone)]
pub struct PathPattern {
    template: String,
    kind: PatternKind,
    param_names: Vec<String>,
    matcher: Regex,
}

impl PathPattern {
    /// Compile a fully anchored route pattern
    pub fn route(template: &str) -> RouterResult<Self> {
        Self::compile(template, PatternKind::Route)
    }

    /// Compile a prefix pattern for middleware
    pub fn prefix(template: &str) -> RouterResult<Self> {
        Self::compile(template, PatternKind::Prefix)
    }

    /// Compile `template` with the given anchoring
    pub fn compile(template: &str, kind: PatternKind) -> RouterResult<Self> {
        if !template.starts_with('/') {
            return Err(RouterError::invalid_pattern(
                template,
                "template must start with '/'",
            ));
        }

        let mut expression = String::with_capacity(template.len() + 16);
        expression.push('^');

        let mut param_names: Vec<String> = Vec::new();
        let mut wildcards = 0usize;

        // The leading '/' yields an empty first segment, which keeps the separators in place.
        for (index, segment) in template.split('/').enumerate() {
            if index > 0 {
                expression.push('/');
            }

            if segment == WILDCARD_SEGMENT {
                let name = format!("wildcard{}", wildcards);
                validate_param_name(template, &name, &param_names)?;
                wildcards += 1;
                param_names.push(name);
                expression.push_str("(.*)");
                continue;
            }

            match segment.strip_prefix(PARAM_MARKER) {
                Some(name) => {
                    validate_param_name(template, name, &param_names)?;
                    param_names.push(name.to_string());
                    expression.push_str("([^/]+)");
                }
                None => expression.push_str(&regex::escape(segment)),
            }
        }

        match kind {
            PatternKind::Route => expression.push('$'),
            PatternKind::Prefix => {
                // Keep a trailing separator inside the remainder.
                if expression.ends_with('/') {
                    expression.pop();
                    expression.push_str("(/.*)$");
                } else {
                    expression.push_str("(.*)$");
                }
            }
        }

        let matcher = Regex::new(&expression)
            .map_err(|e| RouterError::invalid_pattern(template, e.to_string()))?;

        Ok(Self {
            template: template.to_string(),
            kind,
            param_names,
            matcher,
        })
    }

    /// Original template text
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Anchoring of this pattern
    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// Names of the captured segments, in declaration order
    ///
    /// Does not include [`WILDCARD_PARAM`] for prefix patterns.
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Whether `path` matches this pattern
    pub fn is_match(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }

    /// Match `path` and return the captured bindings
    ///
    /// For a template with N named segments the result holds exactly N pairs, in the order
    /// the names appear in the template, followed by the [`WILDCARD_PARAM`] binding for
    /// prefix patterns. Values are percent-decoded; a segment that does not decode to UTF-8
    /// is returned as written.
    pub fn captures(&self, path: &str) -> Option<Vec<(String, String)>> {
        let captures = self.matcher.captures(path)?;

        let mut bindings = Vec::with_capacity(self.param_names.len() + 1);
        for (index, name) in self.param_names.iter().enumerate() {
            let raw = captures.get(index + 1).map_or("", |m| m.as_str());
            bindings.push((name.clone(), decode_segment(raw)));
        }

        if self.kind == PatternKind::Prefix {
            let rest = captures
                .get(self.param_names.len() + 1)
                .map_or("", |m| m.as_str());
            bindings.push((WILDCARD_PARAM.to_string(), rest.to_string()));
        }

        Some(bindings)
    }
}

impl fmt::Debug for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PathPattern")
            .field("template", &self.template)
            .field("kind", &self.kind)
            .field("param_names", &self.param_names)
            .finish()
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

fn validate_param_name(template: &str, name: &str, seen: &[String]) -> RouterResult<()> {
    if name.is_empty() {
        return Err(RouterError::invalid_pattern(
            template,
            "':' must be followed by a parameter name",
        ));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_'))
    {
        return Err(RouterError::invalid_pattern(
            template,
            format!("invalid character '{}' in parameter name '{}'", bad, name),
        ));
    }

    if seen.iter().any(|existing| existing == name) {
        return Err(RouterError::invalid_pattern(
            template,
            format!("parameter '{}' is declared more than once", name),
        ));
    }

    Ok(())
}

fn decode_segment(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_string(),
    }
}
