//! Request/response contract between the loader and the serving boundary.
//!
//! - `GET /dyn/manifest` returns the JSON manifest.
//! - `GET /dyn/load?modules=<percent-encoded JSON array of names>` returns a
//!   JSON object mapping each name to its source text, or `400` when any
//!   name is unknown.

use anyhow::{Context, Result};
use url::form_urlencoded;

pub const MANIFEST_PATH: &str = "/dyn/manifest";
pub const LOAD_PATH: &str = "/dyn/load";
pub const MODULES_PARAM: &str = "modules";

/// Path and query of a load request for `names`.
pub fn load_request_path<S: AsRef<str>>(names: &[S]) -> String {
    let names: Vec<&str> = names.iter().map(AsRef::as_ref).collect();
    let json = serde_json::Value::from(names).to_string();
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair(MODULES_PARAM, &json)
        .finish();
    format!("{LOAD_PATH}?{query}")
}

/// Extract the requested module names from a load request's query string.
pub fn parse_load_query(query: &str) -> Result<Vec<String>> {
    let value = form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == MODULES_PARAM)
        .map(|(_, value)| value)
        .with_context(|| format!("Missing '{MODULES_PARAM}' parameter"))?;
    serde_json::from_str(&value).context("'modules' must be a JSON array of strings")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_query_survives_encoding() {
        let path = load_request_path(&["a", "@scope/pkg", "with space", "x&modules=y"]);
        let (prefix, query) = path.split_once('?').unwrap();
        assert_eq!(prefix, LOAD_PATH);
        assert!(!query.contains('"'));
        assert_eq!(
            parse_load_query(query).unwrap(),
            vec!["a", "@scope/pkg", "with space", "x&modules=y"]
        );
    }

    #[test]
    fn malformed_queries_are_rejected() {
        assert!(parse_load_query("other=1").is_err());
        assert!(parse_load_query("modules=%ZZ").is_err());
        assert!(parse_load_query("").is_err());
        assert!(parse_load_query("modules=%5B1%5D").is_err());
        assert!(parse_load_query("modules=%5B%22a").is_err());
    }
}
