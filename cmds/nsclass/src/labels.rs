//! Reserved label keys shared between the controller and cluster operators.
//!
//! The owner label is the only link between a live object and the
//! NamespaceClass that produced it; ownership is never inferred from names or
//! kinds.

use std::collections::BTreeMap;

/// Carried on a Namespace, selects the bound NamespaceClass by name.
pub const CLASS_LABEL: &str = "namespaceclass.snowflying.io/name";

/// Carried on every object created by the controller, value `"true"`.
pub const MANAGED_LABEL: &str = "namespaceclass.snowflying.io/managed";

/// Carried on every object created by the controller, names the owning class.
pub const OWNER_LABEL: &str = "namespaceclass.snowflying.io/owner";

/// Selector matching objects created by the controller.
///
/// With an owner, only objects produced by that class match.
pub fn managed_selector(owner: Option<&str>) -> String {
	match owner {
		Some(owner) => format!("{MANAGED_LABEL}=true,{OWNER_LABEL}={owner}"),
		None => format!("{MANAGED_LABEL}=true"),
	}
}

/// Selector matching namespaces bound to `class_name`.
pub fn bound_namespaces_selector(class_name: &str) -> String {
	format!("{CLASS_LABEL}={class_name}")
}

/// Class bound by a namespace's labels, if any.
///
/// An empty label value binds nothing.
pub fn bound_class(labels: Option<&BTreeMap<String, String>>) -> Option<&str> {
	labels
		.and_then(|l| l.get(CLASS_LABEL))
		.map(String::as_str)
		.filter(|name| !name.is_empty())
}

/// Merge the ownership labels into a `metadata.labels` JSON object.
///
/// Labels already present on the template are kept, except the reserved
/// ownership keys which always reflect `owner`.
pub fn merge_ownership(labels: &mut serde_json::Map<String, serde_json::Value>, owner: &str) {
	labels.insert(MANAGED_LABEL.to_string(), "true".into());
	labels.insert(OWNER_LABEL.to_string(), owner.into());
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case(None, "namespaceclass.snowflying.io/managed=true")]
	#[case(
		Some("secure-network"),
		"namespaceclass.snowflying.io/managed=true,namespaceclass.snowflying.io/owner=secure-network"
	)]
	fn test_managed_selector(#[case] owner: Option<&str>, #[case] expected: &str) {
		assert_eq!(managed_selector(owner), expected);
	}

	#[test]
	fn test_bound_class() {
		let mut labels = BTreeMap::new();
		assert_eq!(bound_class(None), None);
		assert_eq!(bound_class(Some(&labels)), None);

		labels.insert(CLASS_LABEL.to_string(), String::new());
		assert_eq!(bound_class(Some(&labels)), None);

		labels.insert(CLASS_LABEL.to_string(), "public-network".to_string());
		assert_eq!(bound_class(Some(&labels)), Some("public-network"));
	}

	#[test]
	fn test_merge_keeps_user_labels() {
		let mut labels = serde_json::Map::new();
		labels.insert("app".to_string(), "web".into());
		labels.insert(OWNER_LABEL.to_string(), "someone-else".into());

		merge_ownership(&mut labels, "secure-network");

		assert_eq!(labels["app"], "web");
		assert_eq!(labels[MANAGED_LABEL], "true");
		assert_eq!(labels[OWNER_LABEL], "secure-network");
	}
}
