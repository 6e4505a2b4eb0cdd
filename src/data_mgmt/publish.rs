//! Batch publishing of channel snapshots to an InfluxDB v2 write endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use itertools::Itertools;
use thiserror::Error;
use url::Url;

use crate::config::{PublisherConfig, TimestampUnit};
use crate::constants::defaults;
use crate::data_mgmt::line_protocol;
use crate::data_mgmt::models::{Channel, ChannelRegistry};
use crate::helpers::Clock;

/// Tag key reserved for the node's hardware identity when `send_device_id`
/// is enabled.
pub const DEVICE_TAG: &str = "device";

const DEFAULT_FIELD_NAME: &str = "value";

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to set up TLS connector: {0}")]
    Tls(#[from] native_tls::Error),
    #[error("invalid write endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
    #[error("write request rejected with HTTP status {0}")]
    Status(u16),
    #[error("write request failed: {0}")]
    Transport(String),
}

#[derive(Clone, Debug, Default)]
struct ProducerOverrides {
    measurement: Option<String>,
    field: Option<String>,
}

/// One channel bound for publishing, with its measurement identity and tag
/// set fully resolved.
struct BoundChannel {
    channel: Arc<Channel>,
    measurement: String,
    field: String,
    tags: BTreeMap<String, String>,
}

/// Accumulates the publish set and tag tables before the scheduler starts;
/// `build` resolves everything into an immutable [`InfluxPublisher`].
pub struct PublisherBuilder {
    host: String,
    port: u16,
    use_ssl: bool,
    token: String,
    org: String,
    bucket: String,
    unit: TimestampUnit,
    producers: BTreeMap<String, ProducerOverrides>,
    global_tags: BTreeMap<String, String>,
    static_tags: BTreeMap<String, BTreeMap<String, String>>,
    device_id: Option<String>,
}

impl PublisherBuilder {
    pub fn from_config(config: &PublisherConfig) -> Self {
        let mut builder = Self {
            host: config.host.clone(),
            port: config.port,
            use_ssl: config.use_ssl,
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            unit: config.timestamp_unit,
            producers: BTreeMap::new(),
            global_tags: BTreeMap::new(),
            static_tags: BTreeMap::new(),
            device_id: None,
        };

        let named: std::collections::BTreeSet<&String> = config
            .measurement_names
            .keys()
            .chain(config.field_names.keys())
            .collect();
        for name in named {
            builder.register_producer(
                name,
                config.measurement_names.get(name).cloned(),
                config.field_names.get(name).cloned(),
            );
        }
        for (key, value) in &config.global_tags {
            builder.set_global_tag(key, value);
        }
        for (channel, tags) in &config.channel_tags {
            for (key, value) in tags {
                builder.set_static_tag(channel, key, value);
            }
        }

        builder
    }

    /// Add a producer to the publish set. Idempotent per name;
    /// re-registering replaces the overrides.
    pub fn register_producer(
        &mut self,
        name: &str,
        measurement: Option<String>,
        field: Option<String>,
    ) -> &mut Self {
        self.producers
            .insert(name.to_string(), ProducerOverrides { measurement, field });
        self
    }

    /// Tag applied to every line. Last write per key wins.
    pub fn set_global_tag(&mut self, key: &str, value: &str) -> &mut Self {
        self.global_tags.insert(key.to_string(), value.to_string());
        self
    }

    /// Tag applied only to one producer's lines. Last write per key wins.
    pub fn set_static_tag(&mut self, producer: &str, key: &str, value: &str) -> &mut Self {
        self.static_tags
            .entry(producer.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Enable the reserved identity tag on every line.
    pub fn set_device_id(&mut self, id: String) -> &mut Self {
        self.device_id = Some(id);
        self
    }

    pub fn build(
        self,
        registry: &ChannelRegistry,
        clock: Box<dyn Clock>,
    ) -> Result<InfluxPublisher, PublishError> {
        let url = self.write_url()?;
        let agent = ureq::AgentBuilder::new()
            .tls_connector(Arc::new(native_tls::TlsConnector::new()?))
            .timeout(defaults::HTTP_TIMEOUT)
            .build();

        for name in self.producers.keys() {
            if registry.get(name).is_none() {
                log::warn!("publisher config references unknown channel '{name}'");
            }
        }

        let channels = registry
            .iter()
            .map(|channel| {
                let overrides = self
                    .producers
                    .get(channel.name())
                    .cloned()
                    .unwrap_or_default();
                BoundChannel {
                    channel: channel.clone(),
                    measurement: overrides
                        .measurement
                        .unwrap_or_else(|| channel.name().to_string()),
                    field: overrides
                        .field
                        .unwrap_or_else(|| DEFAULT_FIELD_NAME.to_string()),
                    tags: self.merged_tags(channel.name()),
                }
            })
            .collect();

        Ok(InfluxPublisher {
            agent,
            url: url.to_string(),
            auth: format!("Token {}", self.token),
            unit: self.unit,
            clock,
            channels,
        })
    }

    fn write_url(&self) -> Result<Url, PublishError> {
        let scheme = if self.use_ssl { "https" } else { "http" };
        let mut url = Url::parse(&format!(
            "{scheme}://{}:{}/api/v2/write",
            self.host, self.port
        ))?;
        url.query_pairs_mut()
            .append_pair("org", &self.org)
            .append_pair("bucket", &self.bucket)
            .append_pair("precision", self.unit.precision());
        Ok(url)
    }

    /// Tag table for one channel: identity < global < per-channel, with the
    /// identity key itself reserved while the identity tag is enabled.
    fn merged_tags(&self, name: &str) -> BTreeMap<String, String> {
        let mut tags = BTreeMap::new();
        if let Some(id) = &self.device_id {
            tags.insert(DEVICE_TAG.to_string(), id.clone());
        }

        let per_channel = self.static_tags.get(name).into_iter().flatten();
        for (key, value) in self.global_tags.iter().chain(per_channel) {
            if self.device_id.is_some() && key == DEVICE_TAG {
                log::warn!(
                    "tag key '{DEVICE_TAG}' is reserved for the device identity; \
                     ignoring override on channel '{name}'"
                );
                continue;
            }
            tags.insert(key.clone(), value.clone());
        }
        tags
    }
}

/// Ships one batch of measurement lines per cycle. All identity, tag and
/// endpoint resolution happened in the builder; a cycle only snapshots
/// channels, formats lines and performs the write request.
pub struct InfluxPublisher {
    agent: ureq::Agent,
    url: String,
    auth: String,
    unit: TimestampUnit,
    clock: Box<dyn Clock>,
    channels: Vec<BoundChannel>,
}

impl InfluxPublisher {
    /// Take one snapshot of every bound channel and ship it as a single
    /// write request. Returns the number of lines published; `Ok(0)` means
    /// no channel had a value yet and no request was made.
    ///
    /// A failed request is not retried; the batch is dropped and the next
    /// cycle starts from a fresh snapshot.
    pub fn publish_cycle(&self) -> Result<usize, PublishError> {
        let timestamp = self.unit.scale(self.clock.epoch_seconds());

        let lines: Vec<String> = self
            .channels
            .iter()
            .filter_map(|bound| {
                let Some(sample) = bound.channel.latest() else {
                    log::debug!(
                        "channel '{}' has no reading yet; skipping",
                        bound.channel.name()
                    );
                    return None;
                };
                log::trace!(
                    "channel '{}': {} (read at {})",
                    bound.channel.name(),
                    sample.value,
                    sample.timestamp
                );
                Some(line_protocol::build_line(
                    &bound.measurement,
                    &bound.tags,
                    &bound.field,
                    sample.value,
                    timestamp,
                ))
            })
            .collect();

        if lines.is_empty() {
            log::debug!("no channel has a reading yet; skipping publish cycle");
            return Ok(0);
        }

        let body = lines.iter().join("\n");
        log::trace!("write request body:\n{body}");

        match self
            .agent
            .post(&self.url)
            .set("Content-Type", "text/plain; charset=utf-8")
            .set("Authorization", &self.auth)
            .send_string(&body)
        {
            Ok(response) => {
                log::debug!("published {} line(s), status {}", lines.len(), response.status());
                Ok(lines.len())
            }
            Err(ureq::Error::Status(code, _)) => Err(PublishError::Status(code)),
            Err(err) => Err(PublishError::Transport(err.to_string())),
        }
    }
}
