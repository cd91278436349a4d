//! Path matching: literal paths and `{name}` / trailing `*` templates.

use crate::error::ConfigError;
use regex::Regex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub enum PathMatcher {
    Exact(String),
    Template {
        regex: Regex,
        param_names: Vec<String>,
    },
}

impl PathMatcher {
    pub fn compile(path: &str) -> Result<Self, ConfigError> {
        if !path.contains('{') && !path.ends_with('*') {
            return Ok(PathMatcher::Exact(path.to_string()));
        }

        let invalid = |message: &str| ConfigError::InvalidPathTemplate {
            path: path.to_string(),
            message: message.to_string(),
        };

        let (body, wildcard) = match path.strip_suffix('*') {
            Some(prefix) => (prefix, true),
            None => (path, false),
        };

        let mut pattern = String::from("^");
        let mut param_names = Vec::new();
        let mut rest = body;
        while let Some(open) = rest.find('{') {
            if rest[..open].contains('}') {
                return Err(invalid("unmatched '}'"));
            }
            pattern.push_str(&regex::escape(&rest[..open]));
            let close = rest[open..]
                .find('}')
                .map(|i| open + i)
                .ok_or_else(|| invalid("unclosed '{'"))?;
            let name = &rest[open + 1..close];
            if name.is_empty() || name.contains('/') {
                return Err(invalid("empty or invalid parameter name"));
            }
            param_names.push(name.to_string());
            pattern.push_str("([^/]+)");
            rest = &rest[close + 1..];
        }
        if rest.contains('}') {
            return Err(invalid("unmatched '}'"));
        }
        pattern.push_str(&regex::escape(rest));
        if wildcard {
            pattern.push_str(".*");
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|source| ConfigError::InvalidPattern {
            pattern: pattern.clone(),
            source,
        })?;
        Ok(PathMatcher::Template { regex, param_names })
    }

    /// Match a request path, returning any extracted path parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        match self {
            PathMatcher::Exact(exact) => (exact == path).then(HashMap::new),
            PathMatcher::Template { regex, param_names } => {
                let captures = regex.captures(path)?;
                Some(
                    param_names
                        .iter()
                        .enumerate()
                        .filter_map(|(i, name)| {
                            captures.get(i + 1).map(|m| {
                                let value = urlencoding::decode(m.as_str())
                                    .map(|v| v.into_owned())
                                    .unwrap_or_else(|_| m.as_str().to_string());
                                (name.clone(), value)
                            })
                        })
                        .collect(),
                )
            }
        }
    }
}
