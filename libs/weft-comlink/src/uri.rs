//! URI Composition
//!
//! Shared URI building for the HTTPS and WebSocket clients: base address
//! plus path, per-call path variables as extra segments, and query
//! parameters from flat alternating key/value tokens.

use url::Url;

use crate::error::{ComlinkError, Result};

/// Group flat alternating key/value tokens into key -> values pairs,
/// preserving the order of first occurrence. An odd token count is a
/// developer error (a key without a value).
pub(crate) fn group_query_tokens(tokens: &[String]) -> Result<Vec<(String, Vec<String>)>> {
    if tokens.len() % 2 != 0 {
        return Err(ComlinkError::developer(
            "query parameter tokens contain a key without a value",
        ));
    }

    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for pair in tokens.chunks(2) {
        let (key, value) = (&pair[0], &pair[1]);
        match grouped.iter_mut().find(|(k, _)| k == key) {
            Some((_, values)) => values.push(value.clone()),
            None => grouped.push((key.clone(), vec![value.clone()])),
        }
    }
    Ok(grouped)
}

/// Compose `scheme://host:port/path/{var...}?k=v...`.
pub(crate) fn compose(
    scheme: &str,
    host: &str,
    port: u16,
    path: Option<&str>,
    path_variables: &[String],
    query_tokens: &[String],
) -> Result<Url> {
    let mut url = Url::parse(&format!("{}://{}:{}", scheme, host.trim(), port))
        .map_err(|e| ComlinkError::developer(format!("invalid endpoint address: {}", e)))?;

    if let Some(path) = path.filter(|p| !p.trim().is_empty()) {
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| ComlinkError::developer("endpoint address cannot carry a path"))?;
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                segments.push(segment);
            }
            for variable in path_variables {
                segments.push(variable);
            }
        }
    }

    let grouped = group_query_tokens(query_tokens)?;
    if !grouped.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, values) in &grouped {
            for value in values {
                query.append_pair(key, value);
            }
        }
    }

    Ok(url)
}
