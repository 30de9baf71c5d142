use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::ResourceExt;
use rand::Rng;

use super::environment::WEB_NAME;
use super::meta;
use crate::controller::ReconcileErr;
use crate::controller::owner::owner_reference;
use crate::crd::{Site, Tenant};

pub const PASSWORD_KEY: &str = "password";
/// Keeps the password Secret alive until the Site's own cleanup is done.
pub const PASSWORD_FINALIZER: &str = "sites.webhost.io/password";
pub const INGRESS_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";
pub const CLUSTER_ISSUER_ANNOTATION: &str = "cert-manager.io/cluster-issuer";

const PASSWORD_LEN: usize = 12;
const PASSWORD_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789~!@#$%^&*()_+-=[]{}:,./?";

/// Random database password drawn from the thread-local CSPRNG.
pub fn generate_password() -> String {
    let mut rng = rand::rng();
    (0..PASSWORD_LEN)
        .map(|_| PASSWORD_CHARSET[rng.random_range(0..PASSWORD_CHARSET.len())] as char)
        .collect()
}

/// Password stored in a Site's password Secret, if it has one.
pub fn stored_password(secret: &Secret) -> Option<String> {
    if let Some(v) = secret.data.as_ref().and_then(|d| d.get(PASSWORD_KEY)) {
        return Some(String::from_utf8_lossy(&v.0).into_owned());
    }
    secret.string_data.as_ref()?.get(PASSWORD_KEY).cloned()
}

/// Desired children of one Site.
pub struct SiteManifests<'a> {
    site: &'a Site,
    ns: String,
    labels: BTreeMap<String, String>,
    owner: OwnerReference,
}

impl<'a> SiteManifests<'a> {
    pub fn new(site: &'a Site) -> Result<Self, ReconcileErr> {
        let ns = site
            .namespace()
            .ok_or_else(|| ReconcileErr::Internal("site has no namespace".into()))?;
        Ok(Self {
            site,
            ns,
            labels: site.child_labels(),
            owner: owner_reference(site)?,
        })
    }

    pub fn site(&self) -> &Site {
        self.site
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    pub fn owned(&self, name: &str, labels: BTreeMap<String, String>) -> ObjectMeta {
        meta(name, Some(&self.ns), labels, Some(&self.owner))
    }

    pub fn password_secret(&self, password: String) -> Secret {
        let mut metadata = self.owned(&self.site.password_secret_name(), self.labels.clone());
        metadata.finalizers = Some(vec![PASSWORD_FINALIZER.to_string()]);
        Secret {
            metadata,
            string_data: Some(BTreeMap::from([(PASSWORD_KEY.to_string(), password)])),
            type_: Some("Opaque".into()),
            ..Default::default()
        }
    }

    pub fn ingress(&self) -> Ingress {
        let domains = &self.site.spec.domains;
        let backend = IngressBackend {
            service: Some(IngressServiceBackend {
                name: WEB_NAME.into(),
                port: Some(ServiceBackendPort {
                    number: Some(80),
                    ..Default::default()
                }),
            }),
            ..Default::default()
        };
        let rules: Vec<IngressRule> = domains
            .iter()
            .map(|host| IngressRule {
                host: Some(host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".into()),
                        path_type: "Prefix".into(),
                        backend: backend.clone(),
                    }],
                }),
            })
            .collect();
        let tls = self.site.spec.tls.then(|| {
            vec![IngressTLS {
                hosts: Some(domains.clone()),
                secret_name: Some(self.site.tls_secret_name()),
            }]
        });

        let mut metadata = self.owned(&self.site.name_any(), self.labels.clone());
        metadata.annotations = Some(BTreeMap::from([
            (
                INGRESS_CLASS_ANNOTATION.to_string(),
                self.site.ingress_class().to_string(),
            ),
            (
                CLUSTER_ISSUER_ANNOTATION.to_string(),
                self.site.cert_issuer().to_string(),
            ),
        ]));
        Ingress {
            metadata,
            spec: Some(IngressSpec {
                rules: (!rules.is_empty()).then_some(rules),
                tls,
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}
