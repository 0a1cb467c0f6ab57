//! Process startup: build the keyspace and context, bring replication up if configured,
//! and accept connections forever (§4.3, §6).

use std::net::TcpListener;
use std::sync::Arc;

use anyhow::Context;

use crate::config::Config;
use crate::connection;
use crate::keyspace::Keyspace;
use crate::rdb;
use crate::replication;
use crate::server::ServerContext;

pub fn run(config: Config) -> anyhow::Result<()> {
    let keyspace = Arc::new(Keyspace::new());
    rdb::load_into(&config.dir, &config.dbfilename, &keyspace);

    let port = config.port;
    let ctx = match config.replicaof.clone() {
        None => ServerContext::new_master(config, keyspace),
        Some((host, master_port)) => {
            let ctx = ServerContext::new_replica(config, keyspace, host, master_port);
            replication::replica::start(Arc::clone(&ctx), port)
                .context("replication handshake with configured master failed")?;
            ctx
        }
    };

    let listener = TcpListener::bind(("0.0.0.0", port))
        .with_context(|| format!("failed to bind TCP listener on port {port}"))?;
    tracing::info!(port, role = if ctx.is_master() { "master" } else { "replica" }, "respd listening");

    for incoming in listener.incoming() {
        match incoming {
            Ok(stream) => {
                let ctx = Arc::clone(&ctx);
                std::thread::spawn(move || connection::handle(ctx, stream));
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to accept a connection");
            }
        }
    }

    Ok(())
}
