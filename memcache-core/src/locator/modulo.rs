use std::fmt::Debug;

use crate::hash::HashAlgorithm;
use crate::locator::{LocatorNode, NodeLocator};

/// `hash(key) mod N` over the node list in its current order.
#[derive(Debug)]
pub struct ModuloLocator<N> {
    nodes: Vec<N>,
    hash: HashAlgorithm,
}

impl<N> ModuloLocator<N>
where
    N: LocatorNode,
{
    pub fn new(nodes: Vec<N>, hash: HashAlgorithm) -> Self {
        Self { nodes, hash }
    }
}

impl<N> NodeLocator<N> for ModuloLocator<N>
where
    N: LocatorNode + Debug,
{
    fn locate(&self, key: &[u8]) -> Option<&N> {
        if self.nodes.is_empty() {
            return None;
        }
        let index = self.hash.hash(key) as usize % self.nodes.len();
        self.nodes.get(index)
    }

    fn nodes(&self) -> &[N] {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use crate::endpoint::Endpoint;
    use crate::hash::HashAlgorithm;
    use crate::locator::modulo::ModuloLocator;
    use crate::locator::NodeLocator;

    fn endpoints(n: u16) -> Vec<Endpoint> {
        (0..n).map(|i| Endpoint::new("10.0.0.1", 11211 + i)).collect()
    }

    #[test]
    fn test_empty() {
        let locator = ModuloLocator::<Endpoint>::new(vec![], HashAlgorithm::default());
        assert!(locator.locate(b"key").is_none());
    }

    #[test]
    fn test_membership_change_reshuffles() {
        let keys: Vec<String> = (0..10_000).map(|i| format!("user:{}", i)).collect();
        let before = ModuloLocator::new(endpoints(10), HashAlgorithm::Fnv1aHash32);
        let after = ModuloLocator::new(endpoints(9), HashAlgorithm::Fnv1aHash32);
        let moved = keys
            .iter()
            .filter(|k| before.locate(k.as_bytes()) != after.locate(k.as_bytes()))
            .count();
        assert!(moved > keys.len() / 2, "only {} keys moved", moved);
    }
}
