//! The NamespaceClass resource and its resource templates.
//!
//! A class is read as an untyped object: only `spec.resources` matters, and
//! each entry is an arbitrary namespace-agnostic manifest. Templates are kept
//! as a parsed header (kind identity and name) plus the raw manifest, which is
//! only touched when the namespace and ownership labels are stamped onto it.

use kube::{
	api::DynamicObject,
	core::GroupVersionKind,
	discovery::ApiResource,
	ResourceExt,
};
use thiserror::Error;

use crate::{k8s::registry::gvk_from_manifest, labels};

pub const CLASS_GROUP: &str = "snowflying.io";
pub const CLASS_VERSION: &str = "v1alpha1";
pub const CLASS_KIND: &str = "NamespaceClass";
pub const CLASS_PLURAL: &str = "namespaceclasses";

/// API identity of the cluster-scoped NamespaceClass resource.
pub fn class_api_resource() -> ApiResource {
	ApiResource::from_gvk_with_plural(
		&GroupVersionKind::gvk(CLASS_GROUP, CLASS_VERSION, CLASS_KIND),
		CLASS_PLURAL,
	)
}

/// Errors raised while reading a class definition.
#[derive(Debug, Error)]
pub enum ClassError {
	#[error("NamespaceClass '{class}' has no spec.resources list")]
	MissingResources { class: String },
}

/// Errors raised for a single resource template.
#[derive(Debug, Error)]
pub enum TemplateError {
	#[error("resource #{index} is not an object")]
	NotAnObject { index: usize },

	#[error("resource #{index} is missing apiVersion or kind")]
	MissingApiVersionOrKind { index: usize },

	#[error("resource #{index} ({kind}) is missing metadata.name")]
	MissingName { index: usize, kind: String },

	#[error("converting {kind}/{name} to a dynamic object: {source}")]
	Conversion {
		kind: String,
		name: String,
		#[source]
		source: serde_json::Error,
	},
}

impl TemplateError {
	pub fn kind(&self) -> Option<&str> {
		match self {
			TemplateError::MissingName { kind, .. } | TemplateError::Conversion { kind, .. } => {
				Some(kind)
			}
			TemplateError::NotAnObject { .. } | TemplateError::MissingApiVersionOrKind { .. } => None,
		}
	}

	pub fn name(&self) -> Option<&str> {
		match self {
			TemplateError::Conversion { name, .. } => Some(name),
			_ => None,
		}
	}
}

/// The parts of a NamespaceClass the controller consumes.
#[derive(Debug, Clone)]
pub struct ClassDefinition {
	pub name: String,
	templates: Vec<serde_json::Value>,
}

impl ClassDefinition {
	/// Read `spec.resources` from a NamespaceClass object.
	pub fn from_object(class: &DynamicObject) -> Result<Self, ClassError> {
		let name = class.name_any();
		let templates = class
			.data
			.pointer("/spec/resources")
			.and_then(|v| v.as_array())
			.ok_or_else(|| ClassError::MissingResources {
				class: name.clone(),
			})?
			.clone();

		Ok(Self { name, templates })
	}

	pub fn len(&self) -> usize {
		self.templates.len()
	}

	pub fn is_empty(&self) -> bool {
		self.templates.is_empty()
	}

	/// Parse every template in declaration order.
	///
	/// A malformed entry yields an error in its slot without affecting siblings.
	pub fn templates(&self) -> impl Iterator<Item = Result<ResourceTemplate, TemplateError>> + '_ {
		self.templates
			.iter()
			.enumerate()
			.map(|(index, raw)| ResourceTemplate::parse(index, raw))
	}
}

/// One manifest from a class, with its identity parsed out.
#[derive(Debug, Clone)]
pub struct ResourceTemplate {
	pub gvk: GroupVersionKind,
	pub name: String,
	payload: serde_json::Value,
}

impl ResourceTemplate {
	pub fn parse(index: usize, raw: &serde_json::Value) -> Result<Self, TemplateError> {
		if !raw.is_object() {
			return Err(TemplateError::NotAnObject { index });
		}
		let gvk =
			gvk_from_manifest(raw).ok_or(TemplateError::MissingApiVersionOrKind { index })?;
		let name = raw
			.pointer("/metadata/name")
			.and_then(|v| v.as_str())
			.filter(|n| !n.is_empty())
			.ok_or_else(|| TemplateError::MissingName {
				index,
				kind: gvk.kind.clone(),
			})?
			.to_string();

		Ok(Self {
			gvk,
			name,
			payload: raw.clone(),
		})
	}

	/// Produce the object to create in `namespace` on behalf of `owner`.
	pub fn render(&self, namespace: &str, owner: &str) -> Result<DynamicObject, TemplateError> {
		let mut manifest = self.payload.clone();
		if let Some(obj) = manifest.as_object_mut() {
			let metadata = obj
				.entry("metadata")
				.or_insert_with(|| serde_json::json!({}));
			if let Some(metadata) = metadata.as_object_mut() {
				metadata.insert("namespace".to_string(), namespace.into());
				let labels = metadata
					.entry("labels")
					.or_insert_with(|| serde_json::json!({}));
				if !labels.is_object() {
					*labels = serde_json::json!({});
				}
				if let Some(labels) = labels.as_object_mut() {
					labels::merge_ownership(labels, owner);
				}
			}
		}

		serde_json::from_value(manifest).map_err(|source| TemplateError::Conversion {
			kind: self.gvk.kind.clone(),
			name: self.name.clone(),
			source,
		})
	}
}

#[cfg(test)]
mod tests {
	use assert_matches::assert_matches;

	use super::*;
	use crate::labels::{MANAGED_LABEL, OWNER_LABEL};

	fn class(spec: serde_json::Value) -> DynamicObject {
		serde_json::from_value(serde_json::json!({
			"apiVersion": "snowflying.io/v1alpha1",
			"kind": "NamespaceClass",
			"metadata": {"name": "secure-network"},
			"spec": spec,
		}))
		.unwrap()
	}

	#[test]
	fn test_class_api_resource() {
		let ar = class_api_resource();
		assert_eq!(ar.api_version, "snowflying.io/v1alpha1");
		assert_eq!(ar.plural, "namespaceclasses");
		assert_eq!(ar.kind, "NamespaceClass");
	}

	#[test]
	fn test_definition_reads_resources_in_order() {
		let definition = ClassDefinition::from_object(&class(serde_json::json!({
			"resources": [
				{
					"apiVersion": "networking.k8s.io/v1",
					"kind": "NetworkPolicy",
					"metadata": {"name": "deny-all-ingress"}
				},
				{
					"apiVersion": "v1",
					"kind": "ServiceAccount",
					"metadata": {"name": "app-service-account"}
				}
			]
		})))
		.unwrap();

		assert_eq!(definition.name, "secure-network");
		let names: Vec<_> = definition
			.templates()
			.map(|t| t.unwrap().name)
			.collect();
		assert_eq!(names, ["deny-all-ingress", "app-service-account"]);
	}

	#[test]
	fn test_definition_without_resources() {
		let result = ClassDefinition::from_object(&class(serde_json::json!({})));
		assert_matches!(
			result,
			Err(ClassError::MissingResources { class }) if class == "secure-network"
		);
	}

	#[test]
	fn test_malformed_template_only_fails_its_slot() {
		let definition = ClassDefinition::from_object(&class(serde_json::json!({
			"resources": [
				"not-a-manifest",
				{"kind": "ConfigMap", "metadata": {"name": "x"}},
				{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}},
				{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "ok"}}
			]
		})))
		.unwrap();

		let results: Vec<_> = definition.templates().collect();
		assert_matches!(results[0], Err(TemplateError::NotAnObject { index: 0 }));
		assert_matches!(
			results[1],
			Err(TemplateError::MissingApiVersionOrKind { index: 1 })
		);
		assert_matches!(results[2], Err(TemplateError::MissingName { index: 2, .. }));
		assert_matches!(&results[3], Ok(t) if t.name == "ok");
	}

	#[test]
	fn test_render_sets_namespace_and_ownership() {
		let template = ResourceTemplate::parse(
			0,
			&serde_json::json!({
				"apiVersion": "v1",
				"kind": "ServiceAccount",
				"metadata": {
					"name": "app-service-account",
					"namespace": "elsewhere",
					"labels": {"team": "platform"}
				}
			}),
		)
		.unwrap();

		let object = template.render("my-app", "secure-network").unwrap();

		assert_eq!(object.metadata.namespace.as_deref(), Some("my-app"));
		assert_eq!(object.metadata.name.as_deref(), Some("app-service-account"));
		let labels = object.metadata.labels.unwrap();
		assert_eq!(labels["team"], "platform");
		assert_eq!(labels[MANAGED_LABEL], "true");
		assert_eq!(labels[OWNER_LABEL], "secure-network");
		assert_eq!(object.types.unwrap().kind, "ServiceAccount");
	}

	#[test]
	fn test_render_keeps_spec_payload() {
		let template = ResourceTemplate::parse(
			0,
			&serde_json::json!({
				"apiVersion": "networking.k8s.io/v1",
				"kind": "NetworkPolicy",
				"metadata": {"name": "deny-all-ingress"},
				"spec": {"podSelector": {}, "policyTypes": ["Ingress"]}
			}),
		)
		.unwrap();

		let object = template.render("my-app", "secure-network").unwrap();
		assert_eq!(
			object.data["spec"]["policyTypes"],
			serde_json::json!(["Ingress"])
		);
	}

	#[test]
	fn test_render_failure_names_resource_and_cause() {
		let template = ResourceTemplate::parse(
			0,
			&serde_json::json!({
				"apiVersion": "v1",
				"kind": "ConfigMap",
				"metadata": {"name": "settings", "annotations": "not-a-map"}
			}),
		)
		.unwrap();

		let error = template.render("my-app", "secure-network").unwrap_err();

		assert_matches!(&error, TemplateError::Conversion { .. });
		assert_eq!(error.kind(), Some("ConfigMap"));
		assert_eq!(error.name(), Some("settings"));
		let message = error.to_string();
		assert!(message.starts_with("converting ConfigMap/settings to a dynamic object: "));
		assert!(message.contains("invalid type"), "{message}");
	}
}
