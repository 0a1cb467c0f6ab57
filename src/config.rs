//! CLI configuration (§6 External Interfaces).

use clap::Parser;

use crate::errors::CommandError;

#[derive(Parser, Debug, Clone)]
#[command(name = "respd", about = "A single-node RESP key-value server with replication")]
pub struct Cli {
    /// Directory containing the RDB snapshot to preload.
    #[arg(long, default_value = "")]
    pub dir: String,

    /// RDB filename within --dir.
    #[arg(long, default_value = "")]
    pub dbfilename: String,

    /// TCP listen port.
    #[arg(long, default_value_t = 6379)]
    pub port: u16,

    /// "<host> <port>" of a master to replicate from. Empty starts as master.
    #[arg(long, default_value = "")]
    pub replicaof: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dir: String,
    pub dbfilename: String,
    pub port: u16,
    pub replicaof: Option<(String, u16)>,
}

impl Config {
    pub fn from_cli(cli: Cli) -> Result<Self, CommandError> {
        let replicaof = if cli.replicaof.trim().is_empty() {
            None
        } else {
            Some(parse_replicaof(&cli.replicaof)?)
        };
        Ok(Self {
            dir: cli.dir,
            dbfilename: cli.dbfilename,
            port: cli.port,
            replicaof,
        })
    }
}

fn parse_replicaof(raw: &str) -> Result<(String, u16), CommandError> {
    let mut parts = raw.split_whitespace();
    let host = parts
        .next()
        .ok_or_else(|| CommandError::new("--replicaof must be \"<host> <port>\""))?;
    let port = parts
        .next()
        .ok_or_else(|| CommandError::new("--replicaof must be \"<host> <port>\""))?
        .parse::<u16>()
        .map_err(|_| CommandError::new("--replicaof port must be numeric"))?;
    if parts.next().is_some() {
        return Err(CommandError::new("--replicaof must be \"<host> <port>\""));
    }
    Ok((host.to_string(), port))
}
