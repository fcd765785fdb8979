//! Upload targets attached to a compose.

use crate::composes::ComposeState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub uuid: Uuid,
    pub image_name: String,
    pub options: TargetOptions,
    pub status: ComposeState,
    pub created: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Provider-specific upload settings, tagged by provider name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", content = "settings", rename_all = "lowercase")]
pub enum TargetOptions {
    Local,
    Aws(AwsOptions),
    #[serde(rename = "aws.s3")]
    AwsS3(AwsS3Options),
    Azure(AzureOptions),
    Gcp(GcpOptions),
    Vmware(VmwareOptions),
    Oci(OciOptions),
    Container(ContainerOptions),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsOptions {
    pub region: String,
    #[serde(rename = "accessKeyID", skip_serializing_if = "String::is_empty")]
    pub access_key_id: String,
    #[serde(rename = "secretAccessKey", skip_serializing_if = "String::is_empty")]
    pub secret_access_key: String,
    #[serde(rename = "sessionToken", skip_serializing_if = "String::is_empty")]
    pub session_token: String,
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsS3Options {
    pub region: String,
    #[serde(rename = "accessKeyID", skip_serializing_if = "String::is_empty")]
    pub access_key_id: String,
    #[serde(rename = "secretAccessKey", skip_serializing_if = "String::is_empty")]
    pub secret_access_key: String,
    #[serde(rename = "sessionToken", skip_serializing_if = "String::is_empty")]
    pub session_token: String,
    pub bucket: String,
    pub key: String,
    pub endpoint: String,
    pub ca_bundle: String,
    pub skip_ssl_verification: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureOptions {
    #[serde(rename = "storageAccount", skip_serializing_if = "String::is_empty")]
    pub storage_account: String,
    #[serde(rename = "storageAccessKey", skip_serializing_if = "String::is_empty")]
    pub storage_access_key: String,
    pub container: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpOptions {
    pub region: String,
    pub bucket: String,
    pub object: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub credentials: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmwareOptions {
    pub host: String,
    pub username: String,
    pub password: String,
    pub datacenter: String,
    pub cluster: String,
    pub datastore: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OciOptions {
    pub tenancy: String,
    pub region: String,
    pub user: String,
    pub bucket: String,
    pub namespace: String,
    pub private_key: String,
    pub fingerprint: String,
    pub compartment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerOptions {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_verify: Option<bool>,
}

impl TargetOptions {
    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Aws(_) => "aws",
            Self::AwsS3(_) => "aws.s3",
            Self::Azure(_) => "azure",
            Self::Gcp(_) => "gcp",
            Self::Vmware(_) => "vmware",
            Self::Oci(_) => "oci",
            Self::Container(_) => "container",
        }
    }

    /// Settings as reported back to clients, without credentials.
    pub fn public_settings(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::Local => json!({}),
            Self::Aws(o) => json!({"region": o.region, "bucket": o.bucket, "key": o.key}),
            Self::AwsS3(o) => json!({
                "region": o.region,
                "bucket": o.bucket,
                "key": o.key,
                "endpoint": o.endpoint,
                "ca_bundle": o.ca_bundle,
                "skip_ssl_verification": o.skip_ssl_verification,
            }),
            Self::Azure(o) => json!({"container": o.container}),
            Self::Gcp(o) => json!({"region": o.region, "bucket": o.bucket, "object": o.object}),
            Self::Vmware(o) => json!({
                "host": o.host,
                "cluster": o.cluster,
                "datacenter": o.datacenter,
                "datastore": o.datastore,
            }),
            Self::Oci(o) => json!({
                "region": o.region,
                "bucket": o.bucket,
                "namespace": o.namespace,
                "compartment": o.compartment,
            }),
            Self::Container(o) => match o.tls_verify {
                Some(v) => json!({"tls_verify": v}),
                None => json!({}),
            },
        }
    }
}

impl Target {
    pub fn new(image_name: impl Into<String>, options: TargetOptions) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            image_name: image_name.into(),
            options,
            status: ComposeState::Waiting,
            created: Utc::now(),
            extra: BTreeMap::new(),
        }
    }
}
