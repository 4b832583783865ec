//! Service definition contract: the parts of a serverless service file that
//! the emulator reads (`custom.offlineKinesisStreams` and `functions`).

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};

use crate::error::ConfigurationError;
use crate::subscription::StartingPosition;

pub const DEFAULT_BROKER_PORT: u16 = 4567;
pub const DEFAULT_REGION: &str = "local";
pub const DEFAULT_SHARD_COUNT: u32 = 1;

/// Functions keyed by name, in declaration order.
pub type Functions = IndexMap<String, FunctionDefinition>;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ServiceDefinition {
    #[serde(default)]
    pub custom: CustomSection,
    #[serde(default)]
    pub functions: Functions,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CustomSection {
    #[serde(rename = "offlineKinesisStreams")]
    pub offline_kinesis_streams: Option<RawPluginConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RawPluginConfig {
    pub port: Option<u16>,
    pub region: Option<String>,
    pub streams: Option<Vec<RawStreamConfig>>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawStreamConfig {
    pub stream_name: Option<String>,
    pub shards: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: Option<String>,
    pub handler: Option<String>,
    #[serde(default)]
    pub events: Vec<EventDeclaration>,
}

/// One entry of a function's `events` list. Only `stream` triggers are
/// consumed; other trigger kinds are accepted and ignored.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct EventDeclaration {
    #[serde(default, deserialize_with = "stream_trigger")]
    pub stream: Option<StreamEventDeclaration>,
    pub http: Option<serde_yaml::Value>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StreamEventDeclaration {
    pub arn: Option<String>,
    pub enabled: Option<bool>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub batch_size: Option<u32>,
    /// Seconds between polls.
    pub batch_window: Option<u64>,
    pub starting_position: Option<StartingPosition>,
    /// Epoch seconds, used with `AT_TIMESTAMP`.
    pub starting_position_timestamp: Option<i64>,
    /// Used with `AT_SEQUENCE_NUMBER`.
    pub starting_sequence_number: Option<String>,
}

/// `stream:` is either a mapping or the bare-arn shorthand. The shorthand
/// carries no type tag, so it is read as no stream trigger at all.
fn stream_trigger<'de, D>(deserializer: D) -> Result<Option<StreamEventDeclaration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StreamTrigger {
        Declared(StreamEventDeclaration),
        Shorthand(String),
    }

    Ok(match Option::<StreamTrigger>::deserialize(deserializer)? {
        Some(StreamTrigger::Declared(declaration)) => Some(declaration),
        Some(StreamTrigger::Shorthand(_)) | None => None,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub stream_name: String,
    pub shard_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginConfig {
    pub port: u16,
    pub region: String,
    pub streams: Vec<StreamConfig>,
}

impl ServiceDefinition {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigurationError> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigurationError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Extracts the plugin section and applies defaults. The result is not
    /// yet validated; see [`PluginConfig::validate`].
    pub fn plugin_config(&self) -> Result<PluginConfig, ConfigurationError> {
        let raw = self
            .custom
            .offline_kinesis_streams
            .as_ref()
            .ok_or(ConfigurationError::MissingStreams)?;
        let streams = raw
            .streams
            .as_ref()
            .ok_or(ConfigurationError::MissingStreams)?;

        Ok(PluginConfig {
            port: raw.port.unwrap_or(DEFAULT_BROKER_PORT),
            region: raw
                .region
                .clone()
                .filter(|region| !region.is_empty())
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            streams: streams
                .iter()
                .map(|stream| StreamConfig {
                    stream_name: stream.stream_name.clone().unwrap_or_default(),
                    shard_count: stream
                        .shards
                        .filter(|shards| *shards > 0)
                        .unwrap_or(DEFAULT_SHARD_COUNT),
                })
                .collect(),
        })
    }
}

impl PluginConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.streams.is_empty() {
            return Err(ConfigurationError::NoStreams);
        }

        if let Some(index) = self
            .streams
            .iter()
            .position(|stream| stream.stream_name.trim().is_empty())
        {
            return Err(ConfigurationError::MissingStreamName { index });
        }

        Ok(())
    }

    pub fn endpoint(&self) -> String {
        format!("http://localhost:{}", self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE: &str = r#"
service: orders
custom:
  serverless-offline:
    httpPort: 3000
  offlineKinesisStreams:
    port: 4600
    streams:
      - streamName: orders
        shards: 2
      - streamName: audit
functions:
  consumer:
    handler: src/consumer.handler
    events:
      - stream:
          arn: arn:aws:kinesis:local:000000000000:stream/orders
          type: kinesis
          enabled: true
          batchSize: 25
          batchWindow: 3
          startingPosition: TRIM_HORIZON
  api:
    handler: src/api.handler
    events:
      - http: GET /orders
"#;

    #[test]
    fn parses_plugin_section_with_defaults() {
        let service = ServiceDefinition::from_yaml_str(SERVICE).expect("service should parse");
        let config = service.plugin_config().expect("plugin config should resolve");

        assert_eq!(config.port, 4600);
        assert_eq!(config.region, "local");
        assert_eq!(
            config.streams,
            vec![
                StreamConfig {
                    stream_name: "orders".to_string(),
                    shard_count: 2,
                },
                StreamConfig {
                    stream_name: "audit".to_string(),
                    shard_count: 1,
                },
            ]
        );
        assert_eq!(config.endpoint(), "http://localhost:4600");
        config.validate().expect("config should be valid");
    }

    #[test]
    fn parses_stream_event_fields() {
        let service = ServiceDefinition::from_yaml_str(SERVICE).expect("service should parse");
        let consumer = &service.functions["consumer"];
        let stream = consumer.events[0]
            .stream
            .as_ref()
            .expect("stream event should parse");

        assert_eq!(stream.kind.as_deref(), Some("kinesis"));
        assert_eq!(stream.batch_size, Some(25));
        assert_eq!(stream.batch_window, Some(3));
        assert_eq!(stream.starting_position, Some(StartingPosition::TrimHorizon));
        assert!(service.functions["api"].events[0].http.is_some());
    }

    #[test]
    fn keeps_function_declaration_order() {
        let service = ServiceDefinition::from_yaml_str(
            "functions:\n  zeta:\n    handler: z.handler\n  alpha:\n    handler: a.handler\n  mid:\n    handler: m.handler\n",
        )
        .expect("service should parse");

        let names: Vec<&str> = service.functions.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn stream_arn_shorthand_is_not_a_stream_trigger() {
        let service = ServiceDefinition::from_yaml_str(
            "functions:\n  ddb:\n    handler: src/ddb.handler\n    events:\n      - stream: arn:aws:dynamodb:us-east-1:000000000000:table/orders/stream/2024\n      - stream:\n          type: kinesis\n          arn: kinesis/orders\n",
        )
        .expect("shorthand stream should parse");

        let events = &service.functions["ddb"].events;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].stream, None);
        assert_eq!(
            events[1].stream.as_ref().and_then(|stream| stream.arn.as_deref()),
            Some("kinesis/orders")
        );
    }

    #[test]
    fn missing_plugin_section_is_rejected() {
        let service =
            ServiceDefinition::from_yaml_str("service: bare\n").expect("service should parse");

        let error = service.plugin_config().expect_err("missing section should fail");
        assert!(matches!(error, ConfigurationError::MissingStreams));
    }

    #[test]
    fn empty_stream_list_is_rejected() {
        let service = ServiceDefinition::from_yaml_str(
            "custom:\n  offlineKinesisStreams:\n    streams: []\n",
        )
        .expect("service should parse");
        let config = service.plugin_config().expect("plugin config should resolve");

        assert!(matches!(config.validate(), Err(ConfigurationError::NoStreams)));
    }

    #[test]
    fn stream_without_name_is_rejected() {
        let service = ServiceDefinition::from_yaml_str(
            "custom:\n  offlineKinesisStreams:\n    streams:\n      - streamName: ok\n      - shards: 3\n",
        )
        .expect("service should parse");
        let config = service.plugin_config().expect("plugin config should resolve");

        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingStreamName { index: 1 })
        ));
    }

    #[test]
    fn zero_shards_fall_back_to_one() {
        let service = ServiceDefinition::from_yaml_str(
            "custom:\n  offlineKinesisStreams:\n    streams:\n      - streamName: s\n        shards: 0\n",
        )
        .expect("service should parse");
        let config = service.plugin_config().expect("plugin config should resolve");

        assert_eq!(config.streams[0].shard_count, 1);
    }

    #[test]
    fn reads_service_file_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("serverless.yml");
        std::fs::write(&path, SERVICE).expect("service file should be written");

        let service = ServiceDefinition::from_path(&path).expect("service should load");
        assert_eq!(service.functions.len(), 2);

        let missing = ServiceDefinition::from_path(&dir.path().join("nope.yml"))
            .expect_err("missing file should fail");
        assert!(matches!(missing, ConfigurationError::Read { .. }));
    }
}
