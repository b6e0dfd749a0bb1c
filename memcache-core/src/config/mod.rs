use config::builder::DefaultState;
use config::{File, FileFormat, Source};
use serde::{Deserialize, Serialize};

use crate::config::settings::{HealthCheckConfig, PoolConfig, ProtocolKind, SocketConfig, SocketSettings};
use crate::endpoint::Endpoint;
use crate::hash::HashAlgorithm;
use crate::locator::Distribution;
use crate::CLIENT_CONFIG;

pub mod settings;

pub trait ConfigBuilder: Sized {
    type C;

    fn add_source<T>(self, source: T) -> anyhow::Result<Self>
    where
        T: Source + Send + Sync + 'static;

    fn build(self) -> anyhow::Result<Self::C>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    pub servers: Vec<Endpoint>,
    pub protocol: ProtocolKind,
    pub hash: HashAlgorithm,
    pub distribution: Distribution,
    pub prefix: String,
    pub pool: PoolConfig,
    pub socket: SocketConfig,
    pub health_check: HealthCheckConfig,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn socket_settings(&self) -> SocketSettings {
        SocketSettings::new(&self.pool, &self.socket)
    }
}

/// Layers user sources over the embedded reference configuration.
#[derive(Debug)]
pub struct ClientConfigBuilder {
    builder: config::ConfigBuilder<DefaultState>,
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        let builder = config::Config::builder().add_source(File::from_str(CLIENT_CONFIG, FileFormat::Toml));
        Self { builder }
    }
}

impl ConfigBuilder for ClientConfigBuilder {
    type C = ClientConfig;

    fn add_source<T>(self, source: T) -> anyhow::Result<Self>
    where
        T: Source + Send + Sync + 'static,
    {
        Ok(Self {
            builder: self.builder.add_source(source),
        })
    }

    fn build(self) -> anyhow::Result<Self::C> {
        let client_config = self.builder.build()?.try_deserialize::<Self::C>()?;
        Ok(client_config)
    }
}
