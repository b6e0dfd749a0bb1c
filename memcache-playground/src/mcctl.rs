use std::path::PathBuf;

use bytes::Bytes;
use clap::{Parser, Subcommand};
use config::File;
use itertools::Itertools;
use tracing::info;

use memcache_client::{ClientSetting, MemcacheClient};
use memcache_core::config::settings::ProtocolKind;
use memcache_core::config::{ClientConfig, ConfigBuilder};
use memcache_core::endpoint::Endpoint;
use memcache_core::ext::init_logger_with_filter;
use memcache_core::hash::HashAlgorithm;
use memcache_core::locator::Distribution;

#[derive(Parser, Debug)]
struct Args {
    /// `host[:port[:weight]]`, may be repeated.
    #[arg(short, long)]
    server: Vec<Endpoint>,
    /// Toml file layered over the built in defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long)]
    text: bool,
    #[arg(long)]
    hash: Option<HashAlgorithm>,
    #[arg(long)]
    distribution: Option<Distribution>,
    #[arg(short, long)]
    prefix: Option<String>,
    #[arg(long, default_value = "memcache=info")]
    log: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Get {
        keys: Vec<String>,
    },
    Set {
        key: String,
        value: String,
        #[arg(short, long, default_value_t = 0)]
        expiration: u32,
    },
    Delete {
        key: String,
    },
    Incr {
        key: String,
        #[arg(default_value_t = 1)]
        delta: u64,
    },
    Decr {
        key: String,
        #[arg(default_value_t = 1)]
        delta: u64,
    },
    Flush {
        #[arg(short, long, default_value_t = 0)]
        delay: u32,
    },
    Stats {
        group: Option<String>,
    },
    Version,
    /// Prints the server a key is placed on.
    Locate {
        keys: Vec<String>,
    },
}

fn load_config(args: &Args) -> anyhow::Result<ClientConfig> {
    let mut builder = ClientConfig::builder();
    if let Some(path) = &args.config {
        builder = builder.add_source(File::from(path.as_path()))?;
    }
    let mut config = builder.build()?;
    if !args.server.is_empty() {
        config.servers = args.server.clone();
    }
    if args.text {
        config.protocol = ProtocolKind::Text;
    }
    if let Some(hash) = args.hash {
        config.hash = hash;
    }
    if let Some(distribution) = args.distribution {
        config.distribution = distribution;
    }
    if let Some(prefix) = &args.prefix {
        config.prefix = prefix.clone();
    }
    // one shot commands do not need the background probe
    config.health_check.interval = Default::default();
    Ok(config)
}

fn show(value: &Bytes) -> String {
    String::from_utf8_lossy(value).into_owned()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger_with_filter(args.log.as_str());
    let config = load_config(&args)?;
    info!("using servers {}", config.servers.iter().join(", "));
    let client = MemcacheClient::new(ClientSetting::raw(config)).await?;
    match args.command {
        Command::Get { keys } => {
            let keys = keys.iter().map(String::as_str).collect_vec();
            let result = client.get_multi_ordered(&keys).await;
            println!("{}", result.code);
            for (key, slot) in keys.iter().zip(result.value.unwrap_or_default()) {
                match slot {
                    Some((value, cas)) => println!("{} = {} (cas {})", key, show(&value), cas),
                    None => println!("{} missing", key),
                }
            }
        }
        Command::Set { key, value, expiration } => {
            println!("{}", client.set(&key, &Bytes::from(value), expiration).await.code);
        }
        Command::Delete { key } => {
            println!("{}", client.delete(&key).await.code);
        }
        Command::Incr { key, delta } => {
            let result = client.increment(&key, delta).await;
            println!("{} {}", result.code, result.value.map(|v| v.to_string()).unwrap_or_default());
        }
        Command::Decr { key, delta } => {
            let result = client.decrement(&key, delta).await;
            println!("{} {}", result.code, result.value.map(|v| v.to_string()).unwrap_or_default());
        }
        Command::Flush { delay } => {
            println!("{}", client.flush_all(delay).await.code);
        }
        Command::Stats { group } => {
            let result = match &group {
                Some(group) => client.stats_group(group).await,
                None => client.stats().await,
            };
            println!("{}", result.code);
            for (server, stats) in result.value.unwrap_or_default().into_iter().sorted_by(|a, b| a.0.cmp(&b.0)) {
                println!("[{}]", server);
                for (name, value) in stats.into_iter().sorted() {
                    println!("  {} {}", name, value);
                }
            }
        }
        Command::Version => {
            let result = client.version().await;
            println!("{}", result.code);
            for (server, version) in result.value.unwrap_or_default() {
                println!("{} {}", server, version);
            }
        }
        Command::Locate { keys } => {
            for key in keys {
                match client.server_by_key(&key) {
                    Some(server) => println!("{} -> {}", key, server),
                    None => println!("{} -> no server", key),
                }
            }
        }
    }
    client.shutdown().await;
    Ok(())
}
