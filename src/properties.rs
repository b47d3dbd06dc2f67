use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context as _, Result};
use tokio::fs;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};

use crate::storage::{Config, SegmentConfig};

pub const DEFAULT_HTTP_LISTENER: &str = "127.0.0.1:8080";
pub const DEFAULT_RPC_LISTENER: &str = "127.0.0.1:9092";

#[derive(Debug)]
pub struct ServerProperties {
    /// The `log.dir` property
    pub log_dir: PathBuf,
    /// Segment limits from the `segment.*` properties
    pub segment: SegmentConfig,
    /// The `listeners.http` property
    pub http_listener: SocketAddr,
    /// The `listeners.rpc` property
    pub rpc_listener: SocketAddr,
}

impl ServerProperties {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::File::open(path).await?;
        Self::read_from(BufReader::new(file)).await
    }

    /// Parses `key=value` lines, skipping blank lines, `#` comments and unknown keys.
    pub async fn read_from<R>(mut reader: R) -> Result<Self>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = String::new();
        let mut props = ServerPropertiesBuilder::default();

        loop {
            line.clear();

            let n = reader
                .read_line(&mut line)
                .await
                .context("reading server.properties line")?;

            if n == 0 {
                break props.build();
            }

            let line = line.trim();

            // skip comments
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };

            let value = value.trim();

            match key.trim() {
                "log.dir" => props.log_dir = Some(PathBuf::from(value)),
                "segment.max.store.bytes" => props.max_store_bytes = Some(parse(key, value)?),
                "segment.max.index.bytes" => props.max_index_bytes = Some(parse(key, value)?),
                "segment.initial.offset" => props.initial_offset = Some(parse(key, value)?),
                "listeners.http" => props.http_listener = Some(parse(key, value)?),
                "listeners.rpc" => props.rpc_listener = Some(parse(key, value)?),
                _ => continue,
            }
        }
    }

    /// Storage configuration of the commit log
    pub fn config(&self) -> Config {
        Config {
            segment: self.segment,
        }
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .with_context(|| format!("invalid {} value {value:?}", key.trim()))
}

#[derive(Default)]
struct ServerPropertiesBuilder {
    log_dir: Option<PathBuf>,
    max_store_bytes: Option<u64>,
    max_index_bytes: Option<u64>,
    initial_offset: Option<u64>,
    http_listener: Option<SocketAddr>,
    rpc_listener: Option<SocketAddr>,
}

impl ServerPropertiesBuilder {
    fn build(self) -> Result<ServerProperties> {
        let defaults = SegmentConfig::default();

        let segment = SegmentConfig {
            max_store_bytes: self.max_store_bytes.unwrap_or(defaults.max_store_bytes),
            max_index_bytes: self.max_index_bytes.unwrap_or(defaults.max_index_bytes),
            initial_offset: self.initial_offset.unwrap_or(defaults.initial_offset),
        };

        Config { segment }
            .validate()
            .context("segment properties")?;

        let http_listener = match self.http_listener {
            Some(addr) => addr,
            None => DEFAULT_HTTP_LISTENER.parse()?,
        };

        let rpc_listener = match self.rpc_listener {
            Some(addr) => addr,
            None => DEFAULT_RPC_LISTENER.parse()?,
        };

        Ok(ServerProperties {
            log_dir: self.log_dir.context("missing log.dir")?,
            segment,
            http_listener,
            rpc_listener,
        })
    }
}
