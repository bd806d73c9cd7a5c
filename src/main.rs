//! Quokka server daemon

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use quokka::datastore::DbType;
use quokka::migration::LocalFilesetMigrator;
use quokka::provider::{DbConfig, Provider};
use quokka::server::Node;
use quokka::transport::TcpServer;

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Quokka multi-tenant key-value service daemon")]
struct Cli {
    /// Address to listen on, e.g. tcp://127.0.0.1:9090
    listen_addr: String,

    /// Databases to attach, as name[:type] with type map|null|bwt|bdb|ldb
    /// (default map); a name may carry a directory prefix, e.g.
    /// /data/stores/foo:ldb
    #[arg(required = true)]
    databases: Vec<String>,

    /// Write the resolved self address to this file
    #[arg(short = 'f', long = "host-file")]
    host_file: Option<PathBuf>,

    /// One provider for all databases, or one provider per database
    #[arg(short = 'm', long = "mode", value_enum, default_value_t = Mode::Databases)]
    mode: Mode,

    /// Logging level (trace, debug, info, warning, error, critical)
    #[arg(short = 'v', long = "verbosity", default_value = "info")]
    verbosity: String,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// One provider per database
    Providers,
    /// A single provider managing every database
    Databases,
}

struct DbSpec {
    name: String,
    path: String,
    db_type: DbType,
}

/// Parse `path/name[:type]` the way the daemon's positional arguments are
/// written.
fn parse_db_spec(spec: &str) -> Result<DbSpec, String> {
    let (full_name, db_type) = match spec.rsplit_once(':') {
        Some((name, type_str)) => {
            let db_type = match type_str {
                "map" => DbType::Map,
                "null" => DbType::Null,
                "bdb" => DbType::BTree,
                "ldb" => DbType::Lsm,
                "bwt" => {
                    return Err(format!(
                        "database type \"bwt\" is not available in this build ({})",
                        spec
                    ))
                }
                other => return Err(format!("unknown database type \"{}\"", other)),
            };
            (name, db_type)
        }
        None => (spec, DbType::Map),
    };
    let (path, name) = match full_name.rsplit_once('/') {
        Some((path, name)) => (path.to_string(), name.to_string()),
        None => (String::new(), full_name.to_string()),
    };
    if name.is_empty() {
        return Err(format!("empty database name in \"{}\"", spec));
    }
    Ok(DbSpec {
        name,
        path,
        db_type,
    })
}

fn log_filter(verbosity: &str) -> Result<EnvFilter, String> {
    let level = match verbosity {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warning" => "warn",
        "error" => "error",
        "critical" => "error",
        other => return Err(format!("unknown logging level \"{}\"", other)),
    };
    Ok(EnvFilter::new(level))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&cli.verbosity)?)
        .init();

    let specs = cli
        .databases
        .iter()
        .map(|s| parse_db_spec(s))
        .collect::<Result<Vec<_>, _>>()?;

    let server = TcpServer::bind(&cli.listen_addr).await?;
    let self_addr = server.local_addr()?;

    if let Some(host_file) = &cli.host_file {
        std::fs::write(host_file, &self_addr)?;
    }

    tracing::info!(addr = %self_addr, "starting quokka");

    let node = Node::new();
    let migrator = LocalFilesetMigrator::new();
    node.set_fileset_migrator(migrator.clone());

    match cli.mode {
        Mode::Providers => {
            for (i, spec) in specs.iter().enumerate() {
                let provider_id = (i + 1) as u16;
                let provider = Provider::new();
                let config = DbConfig::new(&spec.name, spec.db_type).path(&spec.path);
                provider.attach_database(&config)?;
                migrator.register_destination(&self_addr, provider_id, provider.clone());
                node.add_provider(provider_id, provider)?;
                tracing::info!(
                    provider_id,
                    name = %spec.name,
                    "provider managing database"
                );
            }
        }
        Mode::Databases => {
            let provider = Provider::new();
            for spec in &specs {
                let config = DbConfig::new(&spec.name, spec.db_type).path(&spec.path);
                provider.attach_database(&config)?;
                tracing::info!(name = %spec.name, "attached database");
            }
            migrator.register_destination(&self_addr, 1, provider.clone());
            node.add_provider(1, provider)?;
        }
    }

    server.serve(node).await?;

    Ok(())
}
