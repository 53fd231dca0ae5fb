//! Integration tests for applying a NamespaceClass to a namespace.

mod common;

use assert_matches::assert_matches;
use common::{entry, managed, namespace, network_policy, owned, service_account};
use kube::api::DynamicObject;
use nsclass::{
	class::{ClassError, TemplateError},
	engine::{ApplyError, ReconcileError, ReconcileOutcome},
	labels::{MANAGED_LABEL, OWNER_LABEL},
};
use serde_json::json;

fn dynamic(manifest: serde_json::Value) -> DynamicObject {
	serde_json::from_value(manifest).expect("valid object")
}

#[tokio::test]
async fn test_secure_network_scenario() {
	let server = common::start(vec![
		namespace("my-app", Some("secure-network")),
		common::secure_network(),
	])
	.await;
	let reconciler = common::reconciler(&server).await;

	let outcome = reconciler.reconcile_target("my-app").await.unwrap();

	let report = assert_matches!(outcome, ReconcileOutcome::Applied(report) => report);
	assert_eq!(report.class, "secure-network");
	assert_eq!(report.total, 2);
	assert_eq!(report.created, 2);
	assert!(report.failures.is_empty());
	assert!(report.is_complete());

	assert_eq!(
		owned(&server, "my-app"),
		vec![
			entry("NetworkPolicy", "deny-all-ingress", "secure-network"),
			entry("ServiceAccount", "app-service-account", "secure-network"),
		]
	);

	let policy = server
		.get("networking.k8s.io/v1", "NetworkPolicy", Some("my-app"), "deny-all-ingress")
		.unwrap();
	assert_eq!(policy["metadata"]["namespace"], "my-app");
	assert_eq!(policy["metadata"]["labels"][MANAGED_LABEL], "true");
	assert_eq!(policy["metadata"]["labels"][OWNER_LABEL], "secure-network");
	assert_eq!(policy["spec"]["policyTypes"], json!(["Ingress"]));
}

#[tokio::test]
async fn test_template_labels_are_kept() {
	let mut account = service_account("app-service-account");
	account["metadata"]["labels"] = json!({"app": "web", OWNER_LABEL: "someone-else"});
	let class = common::class("labelled", vec![account]);
	let server = common::start(vec![class.clone()]).await;
	let reconciler = common::reconciler(&server).await;

	let report = reconciler
		.applier()
		.apply_class("my-app", "labelled", &dynamic(class))
		.await
		.unwrap();
	assert_eq!(report.created, 1);

	let created = server
		.get("v1", "ServiceAccount", Some("my-app"), "app-service-account")
		.unwrap();
	assert_eq!(
		created["metadata"]["labels"],
		json!({
			"app": "web",
			MANAGED_LABEL: "true",
			OWNER_LABEL: "labelled",
		})
	);
}

#[tokio::test]
async fn test_unknown_kind_fails_only_that_item() {
	let class = common::class(
		"with-widget",
		vec![
			network_policy("deny-all-ingress"),
			json!({
				"apiVersion": "example.com/v1",
				"kind": "Widget",
				"metadata": {"name": "gizmo"}
			}),
			service_account("app-service-account"),
		],
	);
	let server = common::start(vec![class.clone()]).await;
	let reconciler = common::reconciler(&server).await;

	let report = reconciler
		.applier()
		.apply_class("my-app", "with-widget", &dynamic(class))
		.await
		.unwrap();

	assert_eq!(report.total, 3);
	assert_eq!(report.created, 2);
	assert!(!report.is_complete());
	assert_eq!(report.failures.len(), 1);

	let failure = &report.failures[0];
	assert_eq!(failure.index, 1);
	assert_matches!(
		&failure.error,
		ApplyError::UnknownResourceType { kind, name, .. } if kind == "Widget" && name == "gizmo"
	);
	assert_eq!(
		failure.error.to_string(),
		"unknown resource type: example.com/v1 Kind=Widget (resource 'gizmo')"
	);
	assert_eq!(failure.error.kind(), Some("Widget"));
	assert_eq!(failure.error.name(), Some("gizmo"));

	assert_eq!(
		owned(&server, "my-app"),
		vec![
			entry("NetworkPolicy", "deny-all-ingress", "with-widget"),
			entry("ServiceAccount", "app-service-account", "with-widget"),
		]
	);
}

#[tokio::test]
async fn test_malformed_template_fails_only_that_item() {
	let class = common::class(
		"half-broken",
		vec![
			json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {}}),
			json!("not a manifest"),
			service_account("app-service-account"),
		],
	);
	let server = common::start(vec![class.clone()]).await;
	let reconciler = common::reconciler(&server).await;

	let report = reconciler
		.applier()
		.apply_class("my-app", "half-broken", &dynamic(class))
		.await
		.unwrap();

	assert_eq!(report.created, 1);
	assert_matches!(
		&report.failures[0].error,
		ApplyError::Template(TemplateError::MissingName { index: 0, kind }) if kind == "ConfigMap"
	);
	assert_matches!(
		&report.failures[1].error,
		ApplyError::Template(TemplateError::NotAnObject { index: 1 })
	);
}

#[tokio::test]
async fn test_apply_is_idempotent() {
	let server = common::start(vec![
		namespace("my-app", Some("secure-network")),
		common::secure_network(),
	])
	.await;
	let reconciler = common::reconciler(&server).await;

	reconciler.reconcile_target("my-app").await.unwrap();
	let first = owned(&server, "my-app");

	let outcome = reconciler.reconcile_target("my-app").await.unwrap();
	let report = assert_matches!(outcome, ReconcileOutcome::Applied(report) => report);
	assert_eq!(report.purged.deleted, 2);
	assert_eq!(report.created, 2);

	assert_eq!(owned(&server, "my-app"), first);
	assert_eq!(first.len(), 2);
}

#[tokio::test]
async fn test_existing_unmanaged_object_is_not_replaced() {
	let mut foreign = service_account("app-service-account");
	foreign["metadata"]["namespace"] = json!("my-app");
	let server = common::start(vec![
		namespace("my-app", Some("secure-network")),
		common::secure_network(),
		foreign,
	])
	.await;
	let reconciler = common::reconciler(&server).await;

	let outcome = reconciler.reconcile_target("my-app").await.unwrap();

	let report = assert_matches!(outcome, ReconcileOutcome::Applied(report) => report);
	assert_eq!(report.created, 1);
	assert_matches!(
		&report.failures[0].error,
		ApplyError::CreateFailed { kind, name, .. } if kind == "ServiceAccount" && name == "app-service-account"
	);
	assert_eq!(
		owned(&server, "my-app"),
		vec![
			entry("NetworkPolicy", "deny-all-ingress", "secure-network"),
			entry("ServiceAccount", "app-service-account", ""),
		]
	);
}

#[tokio::test]
async fn test_class_without_resources_aborts_after_purge() {
	let broken = json!({
		"apiVersion": "snowflying.io/v1alpha1",
		"kind": "NamespaceClass",
		"metadata": {"name": "broken"},
		"spec": {}
	});
	let server = common::start(vec![
		namespace("my-app", Some("broken")),
		broken,
		managed(service_account("leftover"), "my-app", "secure-network"),
	])
	.await;
	let reconciler = common::reconciler(&server).await;

	let result = reconciler.reconcile_target("my-app").await;

	assert_matches!(
		result,
		Err(ReconcileError::Class(ClassError::MissingResources { class })) if class == "broken"
	);
	assert!(owned(&server, "my-app").is_empty());
}
