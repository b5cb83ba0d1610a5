//! Instance identity and autoscaling group membership.
//!
//! Both lookups go through the instance metadata service (IMDSv2). Group
//! membership comes from the `aws:autoscaling:groupName` tag that the
//! autoscaling service puts on every instance it launches. Instance tags are
//! only visible in metadata when the launch template enables them; when the
//! tag listing is unavailable the group query fails rather than guessing
//! that the host is ungrouped.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::MetadataConfig;

/// Errors from the metadata provider or the group query.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata request to {path} failed: {message}")]
    Network { path: String, message: String },

    #[error("metadata service returned {status} for {path}")]
    Status { path: String, status: u16 },

    #[error("invalid metadata value for {field}: '{value}'")]
    Invalid { field: &'static str, value: String },

    #[error("instance tags are not exposed in metadata; enable instance metadata tags or supply the group explicitly")]
    TagsUnavailable,

    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Where the current host runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceIdentity {
    pub instance_id: String,
    pub availability_zone: String,
}

impl InstanceIdentity {
    pub fn new(instance_id: impl Into<String>, availability_zone: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            availability_zone: availability_zone.into(),
        }
    }

    /// Region code: the availability zone minus its trailing letter.
    pub fn region(&self) -> &str {
        let az = self.availability_zone.as_str();
        match az.char_indices().last() {
            Some((idx, _)) => &az[..idx],
            None => az,
        }
    }
}

/// Supplies the identity of the current host.
#[async_trait]
pub trait InstanceMetadata: Send + Sync {
    async fn identity(&self) -> Result<InstanceIdentity, MetadataError>;
}

/// Answers which autoscaling group, if any, an instance belongs to.
#[async_trait]
pub trait GroupResolver: Send + Sync {
    /// Returns the first group found, or `None` when the instance is ungrouped.
    async fn resolve_group_membership(
        &self,
        instance_id: &str,
        region: &str,
    ) -> Result<Option<String>, MetadataError>;
}

const TOKEN_PATH: &str = "/latest/api/token";
const INSTANCE_ID_PATH: &str = "/latest/meta-data/instance-id";
const AZ_PATH: &str = "/latest/meta-data/placement/availability-zone";
const TAGS_PATH: &str = "/latest/meta-data/tags/instance";
const GROUP_TAG: &str = "aws:autoscaling:groupName";

/// IMDSv2 client.
#[derive(Clone)]
pub struct ImdsClient {
    client: Client,
    config: MetadataConfig,
}

impl ImdsClient {
    pub fn new(config: MetadataConfig) -> Result<Self, MetadataError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| MetadataError::Configuration {
                message: format!("Failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    async fn token(&self) -> Result<String, MetadataError> {
        let url = format!("{}{}", self.config.endpoint(), TOKEN_PATH);
        let response = self
            .client
            .put(&url)
            .header(
                "X-aws-ec2-metadata-token-ttl-seconds",
                self.config.token_ttl().as_secs().to_string(),
            )
            .send()
            .await
            .map_err(|e| MetadataError::Network {
                path: TOKEN_PATH.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(MetadataError::Status {
                path: TOKEN_PATH.to_string(),
                status: response.status().as_u16(),
            });
        }

        response.text().await.map_err(|e| MetadataError::Network {
            path: TOKEN_PATH.to_string(),
            message: e.to_string(),
        })
    }

    /// GET a metadata path. A 404 maps to `Ok(None)`.
    async fn get_optional(&self, token: &str, path: &str) -> Result<Option<String>, MetadataError> {
        let url = format!("{}{}", self.config.endpoint(), path);
        let response = self
            .client
            .get(&url)
            .header("X-aws-ec2-metadata-token", token)
            .send()
            .await
            .map_err(|e| MetadataError::Network {
                path: path.to_string(),
                message: e.to_string(),
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response.text().await.map_err(|e| MetadataError::Network {
                    path: path.to_string(),
                    message: e.to_string(),
                })?;
                Ok(Some(body.trim().to_string()))
            }
            status => Err(MetadataError::Status {
                path: path.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    async fn get_required(
        &self,
        token: &str,
        path: &str,
        field: &'static str,
    ) -> Result<String, MetadataError> {
        match self.get_optional(token, path).await? {
            Some(value) if !value.is_empty() => Ok(value),
            Some(value) => Err(MetadataError::Invalid { field, value }),
            None => Err(MetadataError::Status {
                path: path.to_string(),
                status: StatusCode::NOT_FOUND.as_u16(),
            }),
        }
    }
}

#[async_trait]
impl InstanceMetadata for ImdsClient {
    #[instrument(skip(self), fields(endpoint = %self.config.endpoint()))]
    async fn identity(&self) -> Result<InstanceIdentity, MetadataError> {
        let token = self.token().await?;
        let instance_id = self
            .get_required(&token, INSTANCE_ID_PATH, "instance-id")
            .await?;
        let availability_zone = self
            .get_required(&token, AZ_PATH, "availability-zone")
            .await?;

        if availability_zone.len() < 2 {
            return Err(MetadataError::Invalid {
                field: "availability-zone",
                value: availability_zone,
            });
        }

        debug!(%instance_id, %availability_zone, "Resolved instance identity");
        Ok(InstanceIdentity {
            instance_id,
            availability_zone,
        })
    }
}

#[async_trait]
impl GroupResolver for ImdsClient {
    /// IMDS only ever describes the local instance, so `instance_id` and
    /// `region` are informational here.
    #[instrument(skip(self))]
    async fn resolve_group_membership(
        &self,
        instance_id: &str,
        region: &str,
    ) -> Result<Option<String>, MetadataError> {
        let token = self.token().await?;
        let tags = self
            .get_optional(&token, TAGS_PATH)
            .await?
            .ok_or(MetadataError::TagsUnavailable)?;

        let group = if tags.lines().any(|key| key.trim() == GROUP_TAG) {
            let path = format!("{TAGS_PATH}/{GROUP_TAG}");
            self.get_optional(&token, &path)
                .await?
                .filter(|g| !g.is_empty())
        } else {
            None
        };
        debug!(group = ?group, "Resolved autoscaling group membership");
        Ok(group)
    }
}

/// Fixed identity and group, for hosts outside the cloud and for tests.
#[derive(Debug, Clone)]
pub struct StaticMetadata {
    identity: InstanceIdentity,
    group: Option<String>,
}

impl StaticMetadata {
    pub fn new(identity: InstanceIdentity, group: Option<String>) -> Self {
        Self { identity, group }
    }
}

#[async_trait]
impl InstanceMetadata for StaticMetadata {
    async fn identity(&self) -> Result<InstanceIdentity, MetadataError> {
        Ok(self.identity.clone())
    }
}

#[async_trait]
impl GroupResolver for StaticMetadata {
    async fn resolve_group_membership(
        &self,
        _instance_id: &str,
        _region: &str,
    ) -> Result<Option<String>, MetadataError> {
        Ok(self.group.clone())
    }
}
