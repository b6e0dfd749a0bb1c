use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::endpoint::Endpoint;
use crate::hash::HashAlgorithm;
use crate::locator::ketama::KetamaLocator;
use crate::locator::modulo::ModuloLocator;

pub mod ketama;
pub mod modulo;

/// How keys are spread over the working nodes.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Distribution {
    #[default]
    Modulo,
    Consistent,
}

impl Display for Distribution {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Distribution::Modulo => f.write_str("modulo"),
            Distribution::Consistent => f.write_str("consistent"),
        }
    }
}

impl FromStr for Distribution {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "modulo" | "modula" => Ok(Distribution::Modulo),
            "consistent" | "ketama" => Ok(Distribution::Consistent),
            _ => Err(anyhow!("unknown distribution {}", s)),
        }
    }
}

/// Anything a locator can place keys on.
pub trait LocatorNode: Clone + Send + Sync + 'static {
    fn identity(&self) -> String;

    fn weight(&self) -> u32;
}

impl LocatorNode for Endpoint {
    fn identity(&self) -> String {
        Endpoint::identity(self)
    }

    fn weight(&self) -> u32 {
        self.weight
    }
}

/// Identity and weight of a node the pool shares behind an `Arc`.
pub trait NodeIdentity: Send + Sync + 'static {
    fn identity(&self) -> String;

    fn weight(&self) -> u32;
}

impl<T> LocatorNode for Arc<T>
where
    T: NodeIdentity,
{
    fn identity(&self) -> String {
        T::identity(self)
    }

    fn weight(&self) -> u32 {
        T::weight(self)
    }
}

pub trait NodeLocator<N: LocatorNode>: Debug + Send + Sync {
    /// Pure function of the snapshot and the key.
    fn locate(&self, key: &[u8]) -> Option<&N>;

    fn nodes(&self) -> &[N];
}

/// An immutable locator snapshot. A membership or settings change builds a new one.
#[derive(Debug)]
pub enum Locator<N: LocatorNode> {
    Modulo(ModuloLocator<N>),
    Consistent(KetamaLocator<N>),
}

impl<N> Locator<N>
where
    N: LocatorNode,
{
    pub fn build(distribution: Distribution, hash: HashAlgorithm, nodes: Vec<N>) -> Self {
        match distribution {
            Distribution::Modulo => Locator::Modulo(ModuloLocator::new(nodes, hash)),
            Distribution::Consistent => Locator::Consistent(KetamaLocator::new(nodes, hash)),
        }
    }

    pub fn distribution(&self) -> Distribution {
        match self {
            Locator::Modulo(_) => Distribution::Modulo,
            Locator::Consistent(_) => Distribution::Consistent,
        }
    }
}

impl<N> NodeLocator<N> for Locator<N>
where
    N: LocatorNode + Debug,
{
    fn locate(&self, key: &[u8]) -> Option<&N> {
        match self {
            Locator::Modulo(l) => l.locate(key),
            Locator::Consistent(l) => l.locate(key),
        }
    }

    fn nodes(&self) -> &[N] {
        match self {
            Locator::Modulo(l) => l.nodes(),
            Locator::Consistent(l) => l.nodes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::endpoint::Endpoint;
    use crate::hash::HashAlgorithm;
    use crate::locator::{Distribution, Locator, LocatorNode, NodeIdentity, NodeLocator};

    #[derive(Debug)]
    struct Server {
        endpoint: Endpoint,
    }

    impl NodeIdentity for Server {
        fn identity(&self) -> String {
            self.endpoint.identity()
        }

        fn weight(&self) -> u32 {
            self.endpoint.weight
        }
    }

    #[test]
    fn test_shared_nodes_place_like_endpoints() {
        let endpoints: Vec<Endpoint> = (0..4).map(|i| Endpoint::new(format!("10.0.1.{}", i + 1), 11211)).collect();
        let shared: Vec<Arc<Server>> = endpoints.iter().cloned().map(|endpoint| Arc::new(Server { endpoint })).collect();
        assert_eq!(LocatorNode::identity(&shared[0]), "10.0.1.1:11211");
        assert_eq!(LocatorNode::weight(&shared[0]), endpoints[0].weight);
        for distribution in [Distribution::Modulo, Distribution::Consistent] {
            let by_endpoint = Locator::build(distribution, HashAlgorithm::Md5, endpoints.clone());
            let by_server = Locator::build(distribution, HashAlgorithm::Md5, shared.clone());
            for i in 0..500 {
                let key = format!("session:{}", i);
                let expected = by_endpoint.locate(key.as_bytes()).map(|e| e.identity());
                let actual = by_server.locate(key.as_bytes()).map(|s| LocatorNode::identity(s));
                assert_eq!(expected, actual);
            }
        }
    }
}
