//! Helper functions for mock Kubernetes testing.

/// A single requirement of an equality-based label selector.
#[derive(Debug, PartialEq, Eq)]
enum Requirement<'a> {
	Equals(&'a str, &'a str),
	NotEquals(&'a str, &'a str),
	Exists(&'a str),
}

fn parse_requirement(term: &str) -> Option<Requirement<'_>> {
	let term = term.trim();
	if term.is_empty() {
		return None;
	}
	if let Some((key, value)) = term.split_once("!=") {
		return Some(Requirement::NotEquals(key.trim(), value.trim()));
	}
	if let Some((key, value)) = term.split_once("==") {
		return Some(Requirement::Equals(key.trim(), value.trim()));
	}
	if let Some((key, value)) = term.split_once('=') {
		return Some(Requirement::Equals(key.trim(), value.trim()));
	}
	Some(Requirement::Exists(term))
}

/// Check whether an object's `metadata.labels` satisfy a label selector.
///
/// Supports the equality-based subset (`k=v`, `k==v`, `k!=v`, `k`) that
/// the API server accepts in `labelSelector`.
pub fn matches_label_selector(object: &serde_json::Value, selector: &str) -> bool {
	let labels = object.pointer("/metadata/labels");
	let label = |key: &str| labels.and_then(|l| l.get(key)).and_then(|v| v.as_str());

	selector
		.split(',')
		.filter_map(parse_requirement)
		.all(|req| match req {
			Requirement::Equals(key, value) => label(key) == Some(value),
			Requirement::NotEquals(key, value) => label(key) != Some(value),
			Requirement::Exists(key) => label(key).is_some(),
		})
}

/// Build a Kubernetes `Status` failure body.
pub fn status_body(code: u16, reason: &str, message: &str) -> serde_json::Value {
	serde_json::json!({
		"kind": "Status",
		"apiVersion": "v1",
		"metadata": {},
		"status": "Failure",
		"message": message,
		"reason": reason,
		"code": code
	})
}
