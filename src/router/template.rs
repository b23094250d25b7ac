// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Path templates.
//!
//! A template is a literal path with placeholders:
//!
//! | placeholder     | matches                         |
//! |-----------------|---------------------------------|
//! | `{name}`        | one path segment (`[^/]+`)      |
//! | `{name:regex}`  | whatever `regex` matches        |
//!
//! Every template compiles to two anchored regexes: the bare form and the
//! version-prefixed form `/v{version:[0-9.]+}<template>`.

use regex::Regex;
use std::collections::HashMap;

use crate::core::ProxyError;

/// Name of the capture holding the API version of a prefixed match.
pub const VERSION_PARAM: &str = "version";

/// Parameters captured from a matched path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

impl PathParams {
    /// Value of a named placeholder.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// API version from a `/v{version}` prefix, if the request carried one.
    pub fn version(&self) -> Option<&str> {
        self.get(VERSION_PARAM)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A compiled path template.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    template: String,
    bare: Regex,
    versioned: Regex,
}

impl PathTemplate {
    /// Compile `template`.  Unbalanced braces, empty placeholder names and
    /// invalid inner regexes are rejected.
    pub fn new(template: &str) -> Result<Self, ProxyError> {
        let body = Self::template_to_regex(template)?;
        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|e| {
                ProxyError::ConfigError(format!("invalid route template '{template}': {e}"))
            })
        };

        Ok(Self {
            template: template.to_string(),
            bare: compile(format!("^{body}$"))?,
            versioned: compile(format!("^/v(?P<{VERSION_PARAM}>[0-9.]+){body}$"))?,
        })
    }

    /// The template as written.
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Match `path` in either form.
    pub fn matches(&self, path: &str) -> Option<PathParams> {
        let (regex, captures) = match self.bare.captures(path) {
            Some(captures) => (&self.bare, captures),
            None => (&self.versioned, self.versioned.captures(path)?),
        };

        let params = regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();

        Some(PathParams(params))
    }

    /// Translate the template body into regex syntax (unanchored).
    fn template_to_regex(template: &str) -> Result<String, ProxyError> {
        let invalid = |why: &str| {
            ProxyError::ConfigError(format!("invalid route template '{template}': {why}"))
        };

        let mut pattern = String::new();
        let mut rest = template;

        while let Some(open) = rest.find('{') {
            pattern.push_str(&regex::escape(&rest[..open]));
            let after = &rest[open + 1..];
            let close = Self::closing_brace(after).ok_or_else(|| invalid("unclosed '{'"))?;
            let placeholder = &after[..close];

            let (name, inner) = match placeholder.split_once(':') {
                Some((name, inner)) => (name, inner),
                None => (placeholder, "[^/]+"),
            };
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(invalid("placeholder names must be alphanumeric"));
            }
            if name == VERSION_PARAM {
                return Err(invalid("'version' is reserved for the prefix"));
            }

            pattern.push_str(&format!("(?P<{name}>{inner})"));
            rest = &after[close + 1..];
        }

        if rest.contains('}') {
            return Err(invalid("unmatched '}'"));
        }
        pattern.push_str(&regex::escape(rest));
        Ok(pattern)
    }

    /// Index of the `}` closing a placeholder, honouring nested braces in
    /// inner regexes such as `{id:[0-9]{4}}`.
    fn closing_brace(s: &str) -> Option<usize> {
        let mut depth = 0usize;
        for (i, c) in s.char_indices() {
            match c {
                '{' => depth += 1,
                '}' if depth == 0 => return Some(i),
                '}' => depth -= 1,
                _ => {}
            }
        }
        None
    }
}
