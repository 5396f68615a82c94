mod cli;
mod commands;
mod format;
mod server;
mod state;

use std::sync::Arc;

use casmig_core::verify::RelationshipFilter;
use casmig_core::MigrationService;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};
use server::AppState;
use state::StateDir;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "casmig=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let state = StateDir::new(cli.state_dir.unwrap_or_else(StateDir::default_root));
    let migrations = MigrationService::new();

    match cli.command {
        Commands::Migrate {
            source,
            target,
            options,
        } => commands::migrate(&state, &source, &target, &options).await?,

        Commands::Status { migration_id } => {
            commands::status(&migrations, &state, &migration_id).await?
        }

        Commands::Verify { store, details } => commands::verify(&store, details).await?,

        Commands::Orphans { store, limit } => commands::orphans(&store, limit).await?,

        Commands::Cleanup {
            store,
            execute,
            yes,
            details,
        } => commands::cleanup(&store, execute, yes, details).await?,

        Commands::Relationships {
            store,
            hash,
            limit,
            only_orphaned,
            only_used,
        } => {
            let filter = RelationshipFilter::from_flags(only_orphaned, only_used);
            commands::relationships(&store, hash.as_deref(), limit, filter).await?
        }

        Commands::Ls {
            store,
            prefix,
            limit,
            size,
        } => commands::ls(&store, &prefix, limit, size).await?,

        Commands::Serve { listen, store } => {
            let verification = commands::verification_service(&store).await?;
            if verification.is_none() {
                tracing::warn!("no target or reference database configured; verification endpoints are disabled");
            }
            let app_state = Arc::new(AppState::new(migrations, verification));
            server::serve(listen, app_state).await?
        }
    }

    Ok(())
}
