//! Upstream (passthrough target) configuration.

use serde::Deserialize;

/// A named backend that resources may pass requests through to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,
}

impl UpstreamConfig {
    /// Split the URL into scheme and authority/base path.
    ///
    /// Returns an error if the URL has no scheme, or a scheme other than http.
    pub fn parts(&self) -> Result<(&str, &str), String> {
        let (scheme, rest) = self
            .url
            .split_once("://")
            .ok_or_else(|| format!("missing scheme: {}", self.url))?;
        if !scheme.eq_ignore_ascii_case("http") {
            return Err(format!("unsupported scheme '{scheme}'"));
        }
        if rest.is_empty() {
            return Err(format!("missing host: {}", self.url));
        }
        Ok((scheme, rest.trim_end_matches('/')))
    }

    pub fn validate(&self) -> Result<(), String> {
        self.parts().map(|_| ())
    }
}
