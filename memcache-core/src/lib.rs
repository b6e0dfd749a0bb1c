pub const CLIENT_CONFIG: &'static str = include_str!("../reference.toml");

pub mod config;
pub mod endpoint;
pub mod ext;
pub mod hash;
pub mod item;
pub mod key;
pub mod locator;
pub mod result_code;
pub mod transcoder;
pub mod util;

pub use item::{CacheItem, OpResult};
pub use result_code::ResultCode;
