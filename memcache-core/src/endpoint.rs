use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_PORT: u16 = 11211;

/// Address of one cache server as configured. `weight` is the node's relative share of the
/// consistent hash ring, 0 means "default".
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub weight: u32,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            weight: 0,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    /// Identity string used for ring points and per node result maps.
    pub fn identity(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Accepts `host`, `host:port` and `host:port:weight`.
impl FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.trim().split(':');
        let host = parts.next().filter(|h| !h.is_empty()).ok_or(anyhow!("missing host in `{}`", s))?;
        let port = match parts.next() {
            None => DEFAULT_PORT,
            Some(port) => port.parse().with_context(|| anyhow!("invalid port in `{}`", s))?,
        };
        let weight = match parts.next() {
            None => 0,
            Some(weight) => weight.parse().with_context(|| anyhow!("invalid weight in `{}`", s))?,
        };
        if parts.next().is_some() {
            return Err(anyhow!("invalid server address `{}`", s));
        }
        Ok(Self {
            host: host.to_string(),
            port,
            weight,
        })
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Addr(String),
            Table {
                host: String,
                #[serde(default = "default_port")]
                port: u16,
                #[serde(default)]
                weight: u32,
            },
        }

        fn default_port() -> u16 {
            DEFAULT_PORT
        }

        match Repr::deserialize(deserializer)? {
            Repr::Addr(addr) => addr.parse().map_err(serde::de::Error::custom),
            Repr::Table { host, port, weight } => Ok(Endpoint { host, port, weight }),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::endpoint::{Endpoint, DEFAULT_PORT};

    #[test]
    fn test_parse() -> anyhow::Result<()> {
        assert_eq!("cache1".parse::<Endpoint>()?, Endpoint::new("cache1", DEFAULT_PORT));
        assert_eq!("10.0.0.1:11300".parse::<Endpoint>()?, Endpoint::new("10.0.0.1", 11300));
        assert_eq!("cache2:11211:3".parse::<Endpoint>()?, Endpoint::new("cache2", 11211).with_weight(3));
        assert!(":11211".parse::<Endpoint>().is_err());
        assert!("cache:port".parse::<Endpoint>().is_err());
        assert!("a:1:2:3".parse::<Endpoint>().is_err());
        Ok(())
    }
}
