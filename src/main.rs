//! sandboxfm - sandboxed per-tenant file manager server

mod daemon;
mod filemanager;
mod protocol;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use filemanager::access::{self, AccessRuleSet};
use filemanager::config::FileManagerConfig;
use filemanager::path_utils::VirtualPath;

#[derive(Parser, Debug)]
#[command(name = "sandboxfm", version, about = "Sandboxed per-tenant file manager")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the WebSocket file manager server
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 9848)]
        port: u16,
        /// Directory holding one sandbox root per tenant
        #[arg(long)]
        storage_root: Option<PathBuf>,
        /// Access rules document, reloaded on every request
        #[arg(long)]
        rules: Option<PathBuf>,
        /// Shared token clients must present in their hello message
        #[arg(long, env = "SANDBOXFM_AUTH_TOKEN")]
        auth_token: Option<String>,
        /// Bytes per download chunk
        #[arg(long)]
        chunk_size: Option<u64>,
        /// Directory where download archives are staged
        #[arg(long)]
        archive_dir: Option<PathBuf>,
        /// Directory the upload collaborator stages received files in
        #[arg(long)]
        upload_dir: Option<PathBuf>,
        /// Maximum entries returned by one search
        #[arg(long)]
        max_search_results: Option<usize>,
        /// Refuse tenants whose root does not exist yet
        #[arg(long)]
        no_create_tenants: bool,
    },
    /// Print the effective permission of a path under a rules document
    Evaluate {
        /// Access rules document
        #[arg(long)]
        rules: PathBuf,
        /// Sandbox-relative path, e.g. /Docs/report.pdf
        path: String,
        /// Evaluate the path as a folder
        #[arg(long)]
        dir: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sandboxfm=info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Serve {
            bind,
            port,
            storage_root,
            rules,
            auth_token,
            chunk_size,
            archive_dir,
            upload_dir,
            max_search_results,
            no_create_tenants,
        } => {
            let defaults = FileManagerConfig::default();
            let config = FileManagerConfig {
                storage_root: storage_root.unwrap_or(defaults.storage_root),
                access_rules_file: rules.unwrap_or(defaults.access_rules_file),
                create_tenant_roots: !no_create_tenants,
                archive_dir: archive_dir.unwrap_or(defaults.archive_dir),
                upload_staging_dir: upload_dir.unwrap_or(defaults.upload_staging_dir),
                download_chunk_size: chunk_size.filter(|&n| n > 0).unwrap_or(defaults.download_chunk_size),
                max_search_results: max_search_results.unwrap_or(defaults.max_search_results),
                ..defaults
            };
            let options = daemon::ServerOptions {
                bind,
                port,
                auth_token,
            };
            daemon::run(config, options).await?;
        }
        Command::Evaluate { rules, path, dir } => {
            let rule_set = AccessRuleSet::load(&rules)?;
            let path = VirtualPath::parse(&path);
            let permission = access::evaluate(rule_set.as_ref(), &path, !dir);
            let role = rule_set.as_ref().and_then(|set| set.role()).unwrap_or("-");
            println!("path: {}", path.display());
            println!("role: {}", role);
            if permission.is_unrestricted() {
                println!("unrestricted");
            } else {
                println!("{}", serde_json::to_string_pretty(&permission)?);
            }
        }
    }
    Ok(())
}
