//! DigitalOcean provider.
//!
//! Instances are droplets managed through the v2 REST API. DigitalOcean has
//! no path for attaching unikernel data volumes, so the volume capability is
//! a set of acknowledged no-ops returning zero values.
//!
//! Droplet names are hostnames, so instance names are mapped onto
//! `[A-Za-z0-9.-]` (`node_api` becomes `node-api`) before they are sent.

use super::{
    Context, Instance, InstanceService, InstanceSpec, InstanceStatus, Provider,
    ProviderCapabilities, Volume, VolumeService, VolumeSpec, VolumeSupport,
};
use crate::error::{OpsboxError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tracing::{debug, info, instrument};

const API_BASE: &str = "https://api.digitalocean.com/v2";
const PROVIDER: &str = "digitalocean";
const PAGE_SIZE: u32 = 200;

/// DigitalOcean droplet backend.
pub struct DigitalOceanProvider {
    client: reqwest::Client,
    token: String,
    base_url: String,
    region: String,
    size: String,
}

impl DigitalOceanProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
            base_url: API_BASE.to_string(),
            region: "nyc1".to_string(),
            size: "s-1vcpu-1gb".to_string(),
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_error(reason: impl ToString) -> OpsboxError {
        OpsboxError::ProviderRequest { provider: PROVIDER.to_string(), reason: reason.to_string() }
    }

    /// Every droplet on the account, following pagination to the last page.
    async fn droplets(&self) -> Result<Vec<Droplet>> {
        let mut droplets = Vec::new();
        let mut page = 1u32;

        loop {
            let response = self
                .client
                .get(format!("{}/droplets?page={}&per_page={}", self.base_url, page, PAGE_SIZE))
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(Self::request_error)?;

            if !response.status().is_success() {
                return Err(Self::request_error(format!(
                    "list droplets page {}: HTTP {}",
                    page,
                    response.status()
                )));
            }

            let body: DropletList = response.json().await.map_err(Self::request_error)?;
            let last = body.links.pages.next.is_none() || body.droplets.is_empty();
            droplets.extend(body.droplets);
            if last {
                break;
            }
            page += 1;
        }

        debug!(pages = page, count = droplets.len(), "Fetched droplets");
        Ok(droplets)
    }
}

#[derive(Debug, Deserialize)]
struct DropletList {
    droplets: Vec<Droplet>,
    #[serde(default)]
    links: Links,
}

#[derive(Debug, Default, Deserialize)]
struct Links {
    #[serde(default)]
    pages: Pages,
}

#[derive(Debug, Default, Deserialize)]
struct Pages {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DropletEnvelope {
    droplet: Droplet,
}

#[derive(Debug, Deserialize)]
struct Droplet {
    id: u64,
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    image: Option<DropletImage>,
    #[serde(default)]
    networks: Option<DropletNetworks>,
}

#[derive(Debug, Deserialize)]
struct DropletImage {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct DropletNetworks {
    #[serde(default)]
    v4: Vec<DropletAddress>,
}

#[derive(Debug, Deserialize)]
struct DropletAddress {
    ip_address: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize)]
struct CreateDroplet<'a> {
    name: &'a str,
    region: &'a str,
    size: &'a str,
    image: &'a str,
    tags: Vec<String>,
}

impl Droplet {
    fn into_instance(self) -> Instance {
        let status = match self.status.as_str() {
            "active" => InstanceStatus::Running,
            "off" | "archive" => InstanceStatus::Stopped,
            "new" => InstanceStatus::Pending,
            _ => InstanceStatus::Unknown,
        };
        let ip = self.networks.and_then(|n| {
            n.v4.into_iter().find(|a| a.kind == "public").map(|a| a.ip_address)
        });

        Instance {
            name: self.name,
            id: self.id.to_string(),
            image: self.image.map(|i| i.name).unwrap_or_default(),
            status,
            ip,
            labels: self.tags.iter().map(|t| tag_to_label(t)).collect(),
            created_at: self.created_at.as_deref().and_then(parse_timestamp),
        }
    }
}

/// Droplet tags only allow `[A-Za-z0-9_:-]`; labels are stored as `key:value`
/// with dots in the key mapped to underscores.
fn label_to_tag(key: &str, value: &str) -> String {
    format!("{}:{}", key.replace('.', "_"), value)
}

fn droplet_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-') { c } else { '-' })
        .collect()
}

fn tag_to_label(tag: &str) -> (String, String) {
    match tag.split_once(':') {
        Some((key, value)) => (key.replace('_', "."), value.to_string()),
        None => (tag.to_string(), String::new()),
    }
}

fn parse_timestamp(s: &str) -> Option<SystemTime> {
    chrono::DateTime::parse_from_rfc3339(s).ok().map(SystemTime::from)
}

#[async_trait]
impl InstanceService for DigitalOceanProvider {
    #[instrument(skip(self, _ctx, spec), fields(instance = %spec.name))]
    async fn create_instance(&self, _ctx: &Context, spec: &InstanceSpec) -> Result<Instance> {
        let name = droplet_name(&spec.name);
        let body = CreateDroplet {
            name: &name,
            region: &self.region,
            size: &self.size,
            image: &spec.image,
            tags: spec.labels.iter().map(|(k, v)| label_to_tag(k, v)).collect(),
        };

        let response = self
            .client
            .post(format!("{}/droplets", self.base_url))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(Self::request_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(OpsboxError::InstanceCreateFailed {
                name: spec.name.clone(),
                reason: format!("HTTP {}: {}", status, text),
            });
        }

        let created: DropletEnvelope = response.json().await.map_err(Self::request_error)?;
        info!(droplet_id = created.droplet.id, "Droplet created");
        Ok(created.droplet.into_instance())
    }

    #[instrument(skip(self, _ctx))]
    async fn list_instances(&self, _ctx: &Context) -> Result<Vec<Instance>> {
        let droplets = self.droplets().await?;
        debug!(count = droplets.len(), "Listed droplets");
        Ok(droplets.into_iter().map(Droplet::into_instance).collect())
    }

    #[instrument(skip(self, _ctx))]
    async fn delete_instance(&self, _ctx: &Context, name: &str) -> Result<()> {
        let wanted = droplet_name(name);
        let droplet = self
            .droplets()
            .await?
            .into_iter()
            .find(|d| d.name == wanted)
            .ok_or_else(|| OpsboxError::InstanceNotFound { name: name.to_string() })?;

        let response = self
            .client
            .delete(format!("{}/droplets/{}", self.base_url, droplet.id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(Self::request_error)?;

        match response.status() {
            s if s.is_success() => {
                info!(droplet_id = droplet.id, "Droplet deleted");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(OpsboxError::InstanceNotFound { name: name.to_string() }),
            s => Err(Self::request_error(format!("delete droplet {}: HTTP {}", droplet.id, s))),
        }
    }
}

#[async_trait]
impl VolumeService for DigitalOceanProvider {
    async fn create_volume(
        &self,
        _ctx: &Context,
        _spec: &VolumeSpec,
        _data: &str,
        _provider: &str,
    ) -> Result<Volume> {
        Ok(Volume::default())
    }

    async fn list_volumes(&self, _ctx: &Context) -> Result<Vec<Volume>> {
        Ok(Vec::new())
    }

    async fn delete_volume(&self, _ctx: &Context, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn attach_volume(
        &self,
        _ctx: &Context,
        _instance: &str,
        _volume: &str,
        _slot: u32,
    ) -> Result<()> {
        Ok(())
    }

    async fn detach_volume(&self, _ctx: &Context, _instance: &str, _volume: &str) -> Result<()> {
        Ok(())
    }
}

impl Provider for DigitalOceanProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities { volumes: VolumeSupport::Unsupported }
    }
}
