use std::fmt::Debug;

use tracing::trace;

use crate::hash::HashAlgorithm;
use crate::locator::{LocatorNode, NodeLocator};

/// Ring points per node at average weight.
pub const POINTS_PER_SERVER: u64 = 160;

/// Consistent hash ring. Each node owns a number of points proportional to its weight and a key
/// belongs to the node owning the first point at or after the key's hash, wrapping around.
#[derive(Debug)]
pub struct KetamaLocator<N> {
    nodes: Vec<N>,
    ring: Vec<(u32, usize)>,
    hash: HashAlgorithm,
}

impl<N> KetamaLocator<N>
where
    N: LocatorNode,
{
    pub fn new(nodes: Vec<N>, hash: HashAlgorithm) -> Self {
        let identities: Vec<String> = nodes.iter().map(|n| n.identity()).collect();
        let weights: Vec<u64> = nodes.iter().map(|n| n.weight().max(1) as u64).collect();
        let total_weight: u64 = weights.iter().sum();
        let mut ring = Vec::new();
        for (index, identity) in identities.iter().enumerate() {
            let share = POINTS_PER_SERVER * nodes.len() as u64 * weights[index] / total_weight;
            let points = (share / 4 * 4).max(4);
            if hash == HashAlgorithm::Md5 {
                // libketama layout, four points out of every digest
                for i in 0..points / 4 {
                    let digest = md5::compute(format!("{}-{}", identity, i));
                    for chunk in digest.chunks_exact(4) {
                        let point = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                        ring.push((point, index));
                    }
                }
            } else {
                for i in 0..points {
                    ring.push((hash.hash(format!("{}-{}", identity, i).as_bytes()), index));
                }
            }
        }
        ring.sort_by(|(p1, i1), (p2, i2)| p1.cmp(p2).then_with(|| identities[*i1].cmp(&identities[*i2])));
        trace!("built ring with {} points over {} nodes", ring.len(), nodes.len());
        Self { nodes, ring, hash }
    }

    pub fn points(&self) -> usize {
        self.ring.len()
    }
}

impl<N> NodeLocator<N> for KetamaLocator<N>
where
    N: LocatorNode + Debug,
{
    fn locate(&self, key: &[u8]) -> Option<&N> {
        if self.ring.is_empty() {
            return None;
        }
        let hash = self.hash.hash(key);
        let mut index = self.ring.partition_point(|(point, _)| *point < hash);
        if index == self.ring.len() {
            index = 0;
        }
        let (_, node) = self.ring[index];
        self.nodes.get(node)
    }

    fn nodes(&self) -> &[N] {
        &self.nodes
    }
}
