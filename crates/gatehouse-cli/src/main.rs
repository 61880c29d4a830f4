mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Group-based permission checks with a cached snapshot per identity")]
#[command(version)]
struct Cli {
    /// Path to the Gatehouse config directory (default: ~/.gatehouse)
    #[arg(long, global = true, env = "GATEHOUSE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config file, permission database and cache
    Init,

    /// Create the default groups and permissions
    Seed,

    /// Add an identity to a group
    AddMember {
        identity: String,
        group: String,
    },

    /// Remove an identity from a group
    RemoveMember {
        identity: String,
        group: String,
    },

    /// Mark an identity as administrator
    SetAdmin {
        identity: String,
        /// Remove the administrator flag instead
        #[arg(long)]
        revoke: bool,
    },

    /// Grant a (resource, action) permission to a group
    Grant {
        group: String,
        /// Resource name, or `*` for every resource
        resource: String,
        /// Action name, or `*` for every action
        action: String,
        /// Display name for a newly created permission
        #[arg(long)]
        name: Option<String>,
    },

    /// Check whether an identity may perform an action on a resource
    Check {
        identity: String,
        resource: String,
        action: String,
        /// Bypass the cache and fetch from the backend
        #[arg(long)]
        refresh: bool,
    },

    /// Show the permission snapshot for an identity
    Show {
        identity: String,
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop cached permissions for one identity, or for everyone
    SignOut {
        identity: Option<String>,
    },

    /// Show current configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gatehouse=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let base_dir = match cli.config_dir {
        Some(ref dir) => dir.clone(),
        None => gatehouse_core::config::GatehouseConfig::default_base_dir()?,
    };

    let rt = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Init => commands::init::run(&base_dir),
        Commands::Seed => commands::seed::run(&base_dir),
        Commands::AddMember {
            ref identity,
            ref group,
        } => commands::members::add(&base_dir, identity, group),
        Commands::RemoveMember {
            ref identity,
            ref group,
        } => commands::members::remove(&base_dir, identity, group),
        Commands::SetAdmin {
            ref identity,
            revoke,
        } => commands::members::set_admin(&base_dir, identity, !revoke),
        Commands::Grant {
            ref group,
            ref resource,
            ref action,
            ref name,
        } => commands::grant::run(&base_dir, group, resource, action, name.as_deref()),
        Commands::Check {
            ref identity,
            ref resource,
            ref action,
            refresh,
        } => rt.block_on(commands::check::run(
            &base_dir, identity, resource, action, refresh,
        )),
        Commands::Show { ref identity, json } => {
            rt.block_on(commands::show::run(&base_dir, identity, json))
        }
        Commands::SignOut { ref identity } => {
            commands::sign_out::run(&base_dir, identity.as_deref())
        }
        Commands::Config => commands::config::run(&base_dir),
    }
}
