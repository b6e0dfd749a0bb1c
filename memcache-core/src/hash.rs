use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

const FNV_64_INIT: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_64_PRIME: u64 = 0x0000_0100_0000_01b3;
const FNV_32_INIT: u32 = 0x811c_9dc5;
const FNV_32_PRIME: u32 = 0x0100_0193;
const MURMUR_M: u32 = 0x5bd1_e995;
const MURMUR_R: u32 = 24;

/// Key hashing functions understood by the node locators.
///
/// All functions are seedless and produce the same value in every process, so two clients
/// configured alike always agree on key placement. The byte layouts follow libmemcached.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    #[serde(rename = "one-at-a-time")]
    OneAtATime,
    #[serde(rename = "md5")]
    Md5,
    #[serde(rename = "crc")]
    Crc,
    #[serde(rename = "fnv1-64")]
    Fnv1Hash64,
    #[serde(rename = "fnv1a-64")]
    Fnv1aHash64,
    #[serde(rename = "fnv1-32")]
    Fnv1Hash32,
    #[serde(rename = "fnv1a-32")]
    Fnv1aHash32,
    #[serde(rename = "hsieh")]
    Hsieh,
    #[serde(rename = "murmur")]
    Murmur,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 9] = [
        HashAlgorithm::OneAtATime,
        HashAlgorithm::Md5,
        HashAlgorithm::Crc,
        HashAlgorithm::Fnv1Hash64,
        HashAlgorithm::Fnv1aHash64,
        HashAlgorithm::Fnv1Hash32,
        HashAlgorithm::Fnv1aHash32,
        HashAlgorithm::Hsieh,
        HashAlgorithm::Murmur,
    ];

    pub fn hash(&self, key: &[u8]) -> u32 {
        match self {
            HashAlgorithm::OneAtATime => one_at_a_time(key),
            HashAlgorithm::Md5 => md5_hash(key),
            HashAlgorithm::Crc => crc_hash(key),
            HashAlgorithm::Fnv1Hash64 => fnv1_64(key),
            HashAlgorithm::Fnv1aHash64 => fnv1a_64(key),
            HashAlgorithm::Fnv1Hash32 => fnv1_32(key),
            HashAlgorithm::Fnv1aHash32 => fnv1a_32(key),
            HashAlgorithm::Hsieh => hsieh(key),
            HashAlgorithm::Murmur => murmur(key),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::OneAtATime => "one-at-a-time",
            HashAlgorithm::Md5 => "md5",
            HashAlgorithm::Crc => "crc",
            HashAlgorithm::Fnv1Hash64 => "fnv1-64",
            HashAlgorithm::Fnv1aHash64 => "fnv1a-64",
            HashAlgorithm::Fnv1Hash32 => "fnv1-32",
            HashAlgorithm::Fnv1aHash32 => "fnv1a-32",
            HashAlgorithm::Hsieh => "hsieh",
            HashAlgorithm::Murmur => "murmur",
        }
    }
}

impl Display for HashAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HashAlgorithm::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(s))
            .ok_or(anyhow!("unknown hash algorithm {}", s))
    }
}

/// Bob Jenkins' one-at-a-time hash.
fn one_at_a_time(key: &[u8]) -> u32 {
    let mut value: u32 = 0;
    for &b in key {
        value = value.wrapping_add(b as u32);
        value = value.wrapping_add(value << 10);
        value ^= value >> 6;
    }
    value = value.wrapping_add(value << 3);
    value ^= value >> 11;
    value = value.wrapping_add(value << 15);
    value
}

/// First four digest bytes, little endian.
fn md5_hash(key: &[u8]) -> u32 {
    let digest = md5::compute(key);
    u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
}

fn crc_hash(key: &[u8]) -> u32 {
    (crc32fast::hash(key) >> 16) & 0x7fff
}

fn fnv1_64(key: &[u8]) -> u32 {
    let mut hash = FNV_64_INIT;
    for &b in key {
        hash = hash.wrapping_mul(FNV_64_PRIME);
        hash ^= b as u64;
    }
    hash as u32
}

fn fnv1a_64(key: &[u8]) -> u32 {
    let mut hash = FNV_64_INIT;
    for &b in key {
        hash ^= b as u64;
        hash = hash.wrapping_mul(FNV_64_PRIME);
    }
    hash as u32
}

fn fnv1_32(key: &[u8]) -> u32 {
    let mut hash = FNV_32_INIT;
    for &b in key {
        hash = hash.wrapping_mul(FNV_32_PRIME);
        hash ^= b as u32;
    }
    hash
}

fn fnv1a_32(key: &[u8]) -> u32 {
    let mut hash = FNV_32_INIT;
    for &b in key {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV_32_PRIME);
    }
    hash
}

fn get16bits(data: &[u8]) -> u32 {
    u16::from_le_bytes([data[0], data[1]]) as u32
}

/// Paul Hsieh's SuperFastHash.
fn hsieh(key: &[u8]) -> u32 {
    if key.is_empty() {
        return 0;
    }
    let mut hash: u32 = 0;
    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        hash = hash.wrapping_add(get16bits(&chunk[0..2]));
        let tmp = (get16bits(&chunk[2..4]) << 11) ^ hash;
        hash = (hash << 16) ^ tmp;
        hash = hash.wrapping_add(hash >> 11);
    }
    let rem = chunks.remainder();
    match rem.len() {
        3 => {
            hash = hash.wrapping_add(get16bits(&rem[0..2]));
            hash ^= hash << 16;
            hash ^= (rem[2] as u32) << 18;
            hash = hash.wrapping_add(hash >> 11);
        }
        2 => {
            hash = hash.wrapping_add(get16bits(&rem[0..2]));
            hash ^= hash << 11;
            hash = hash.wrapping_add(hash >> 17);
        }
        1 => {
            hash = hash.wrapping_add(rem[0] as u32);
            hash ^= hash << 10;
            hash = hash.wrapping_add(hash >> 1);
        }
        _ => {}
    }
    hash ^= hash << 3;
    hash = hash.wrapping_add(hash >> 5);
    hash ^= hash << 4;
    hash = hash.wrapping_add(hash >> 17);
    hash ^= hash << 25;
    hash = hash.wrapping_add(hash >> 6);
    hash
}

/// MurmurHash2 with the length derived seed libmemcached uses.
fn murmur(key: &[u8]) -> u32 {
    let length = key.len() as u32;
    let seed = 0xdead_beef_u32.wrapping_mul(length);
    let mut h = seed ^ length;
    let mut chunks = key.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(MURMUR_M);
        k ^= k >> MURMUR_R;
        k = k.wrapping_mul(MURMUR_M);
        h = h.wrapping_mul(MURMUR_M);
        h ^= k;
    }
    let rem = chunks.remainder();
    if rem.len() >= 3 {
        h ^= (rem[2] as u32) << 16;
    }
    if rem.len() >= 2 {
        h ^= (rem[1] as u32) << 8;
    }
    if !rem.is_empty() {
        h ^= rem[0] as u32;
        h = h.wrapping_mul(MURMUR_M);
    }
    h ^= h >> 13;
    h = h.wrapping_mul(MURMUR_M);
    h ^= h >> 15;
    h
}
