//! Generated CustomResourceDefinition

use kube::CustomResourceExt;

use pravega_common::crd::PravegaCluster;
use pravega_common::CRD_NAME;

#[test]
fn crd_identity_matches_the_installed_name() {
    let crd = PravegaCluster::crd();

    assert_eq!(crd.metadata.name.as_deref(), Some(CRD_NAME));
    assert_eq!(crd.spec.group, "pravega.pravega.io");
    assert_eq!(crd.spec.names.kind, "PravegaCluster");
    assert_eq!(crd.spec.names.plural, "pravegaclusters");
    assert_eq!(crd.spec.scope, "Namespaced");
    assert_eq!(crd.spec.names.short_names, Some(vec!["pk".to_string()]));
}

#[test]
fn served_version_has_status_subresource_and_columns() {
    let crd = PravegaCluster::crd();
    let version = &crd.spec.versions[0];

    assert_eq!(version.name, "v1beta1");
    assert!(version.served);
    assert!(version.storage);
    assert!(version
        .subresources
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .is_some());

    let columns: Vec<&str> = version
        .additional_printer_columns
        .as_ref()
        .map(|c| c.iter().map(|c| c.name.as_str()).collect())
        .unwrap_or_default();
    assert_eq!(
        columns,
        ["Version", "Desired Version", "Desired Members", "Ready Members", "Age"]
    );
}

#[test]
fn manifest_renders_as_yaml() {
    let yaml = serde_yaml::to_string(&PravegaCluster::crd()).unwrap();
    assert!(yaml.contains("kind: CustomResourceDefinition"));
    assert!(yaml.contains("name: pravegaclusters.pravega.pravega.io"));
}
