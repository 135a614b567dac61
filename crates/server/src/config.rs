// crates/server/src/config.rs
//! Process configuration: command-line flags with environment fallbacks.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 3001;

/// Tweet Harvest API server.
#[derive(Debug, Clone, Parser)]
#[command(name = "tweet-harvest-server", version, about)]
pub struct Config {
    /// Address to bind.
    #[arg(long, env = "HARVEST_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory the crawler writes artifacts into.
    #[arg(long, env = "TWEETS_DATA_DIR", default_value = "tweets-data")]
    pub data_dir: PathBuf,

    /// Program that performs the crawl.
    #[arg(long, env = "HARVEST_CRAWL_PROGRAM", default_value = "npx")]
    pub crawl_program: String,

    /// Arguments for the crawl program, whitespace-separated.
    #[arg(
        long,
        env = "HARVEST_CRAWL_ARGS",
        default_value = "--yes tweet-harvest@latest",
        allow_hyphen_values = true
    )]
    pub crawl_args: String,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn crawl_args(&self) -> Vec<String> {
        self.crawl_args
            .split_whitespace()
            .map(str::to_string)
            .collect()
    }
}
