pub mod client;
pub mod protocol;
pub mod setting;

#[cfg(test)]
pub(crate) mod mock_server;

pub use client::MemcacheClient;
pub use setting::ClientSetting;

#[cfg(test)]
mod test {
    use tracing::Level;

    use memcache_core::ext::init_logger;

    #[ctor::ctor]
    fn init() {
        init_logger(Level::DEBUG)
    }
}
