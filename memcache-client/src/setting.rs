use std::sync::Arc;

use typed_builder::TypedBuilder;

use memcache_cluster::auth::Authenticator;
use memcache_core::config::ClientConfig;
use memcache_core::transcoder::{RawTranscoder, Transcoder};

#[derive(Debug, TypedBuilder)]
pub struct ClientSetting<T: Transcoder> {
    pub config: ClientConfig,
    pub transcoder: T,
    #[builder(default, setter(strip_option))]
    pub authenticator: Option<Arc<dyn Authenticator>>,
}

impl ClientSetting<RawTranscoder> {
    pub fn raw(config: ClientConfig) -> Self {
        Self::builder().config(config).transcoder(RawTranscoder).build()
    }
}
