use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use client_core::{
    ControllerEvent, DescriptorLocation, DraftStore, EthRpcClient, EthRpcProvider, FormField,
    OperationKind, PolicyController, SessionContext, SessionEnd,
};
use offline_cache::{AssetRequest, CacheManifest, HttpAssetFetcher, OfflineCache};
use shared::{
    protocol::PolicyDraft,
    units::{format_ether, parse_ether},
};
use storage::Storage;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, normalize_database_url, Settings};

#[derive(Parser, Debug)]
#[command(name = "policy_cli", about = "Buy, claim and inspect insurance policies")]
struct Cli {
    /// Configuration file; defaults to ./policy_cli.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    rpc_url: Option<String>,
    #[arg(long, global = true)]
    descriptor: Option<String>,
    #[arg(long, global = true)]
    database_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and print the session and contract state.
    Status,
    Buy {
        /// Payout in ETH; falls back to the saved draft.
        #[arg(long)]
        payout: Option<String>,
        /// Premium in ETH; falls back to the saved draft.
        #[arg(long)]
        premium: Option<String>,
    },
    Claim {
        #[arg(long)]
        policy_id: String,
    },
    View {
        #[arg(long)]
        policy_id: String,
    },
    Fund {
        /// Amount in ETH.
        #[arg(long)]
        amount: String,
    },
    /// Follow account and network changes until interrupted.
    Watch,
    #[command(subcommand)]
    Draft(DraftCommand),
    #[command(subcommand)]
    Cache(CacheCommand),
}

#[derive(Subcommand, Debug)]
enum DraftCommand {
    Save {
        #[arg(long, default_value = "")]
        payout: String,
        #[arg(long, default_value = "")]
        premium: String,
    },
    Show,
    Clear,
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    Install,
    Activate,
    Fetch(FetchArgs),
}

#[derive(Args, Debug)]
struct FetchArgs {
    /// Path relative to the asset base URL, e.g. /app.js.
    url: String,
    /// Treat the request as a page load (enables the offline page fallback).
    #[arg(long)]
    document: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();

    let mut settings = load_settings(cli.config.as_deref())?;
    apply_overrides(&mut settings, &cli);
    info!(rpc_url = %settings.rpc_url, descriptor = %settings.descriptor, "policy_cli starting");

    match cli.command {
        Command::Draft(command) => run_draft(&settings, command).await,
        Command::Cache(command) => run_cache(&settings, command).await,
        command => run_policy(&settings, command).await,
    }
}

fn apply_overrides(settings: &mut Settings, cli: &Cli) {
    if let Some(rpc_url) = &cli.rpc_url {
        settings.rpc_url = rpc_url.clone();
    }
    if let Some(descriptor) = &cli.descriptor {
        settings.descriptor = descriptor.clone();
    }
    if let Some(database_url) = &cli.database_url {
        settings.database_url = database_url.clone();
    }
}

async fn open_storage(settings: &Settings) -> Result<Storage> {
    let database_url = normalize_database_url(&settings.database_url);
    Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open database '{database_url}'"))
}

fn connect_provider(settings: &Settings) -> Result<Arc<EthRpcProvider>> {
    let client = EthRpcClient::from_endpoint(&settings.rpc_url, settings.call_timeout())
        .with_context(|| format!("invalid rpc_url '{}'", settings.rpc_url))?;
    Ok(EthRpcProvider::new(client, settings.poll_interval()))
}

async fn build_controller(
    settings: &Settings,
    provider: Arc<EthRpcProvider>,
) -> Result<Arc<PolicyController>> {
    let storage = open_storage(settings).await?;
    Ok(PolicyController::new_with_dependencies(
        provider,
        Arc::new(DescriptorLocation::parse(&settings.descriptor)),
        Arc::new(storage),
        settings.controller_config(),
    ))
}

async fn run_policy(settings: &Settings, command: Command) -> Result<()> {
    let provider = connect_provider(settings)?;
    let controller = build_controller(settings, Arc::clone(&provider)).await?;

    if let Command::Watch = command {
        return watch(&controller, &provider, settings).await;
    }

    let session = controller.bootstrap().await?;
    print_session(&session);

    match command {
        Command::Status => {
            let overview = controller.contract_overview(&session).await?;
            println!("Contract balance: {} ETH", format_ether(overview.balance));
            if let Some(insurer) = overview.insurer {
                println!("Insurer: {insurer}");
            }
        }
        Command::Buy { payout, premium } => {
            controller.restore_draft().await?;
            if let Some(payout) = payout {
                controller.set_field(FormField::Payout, payout).await;
            }
            if let Some(premium) = premium {
                controller.set_field(FormField::Premium, premium).await;
            }
            let outcome = controller.buy_policy(&session).await?;
            println!("{}", status_message(&controller, OperationKind::Buy));
            println!("Transaction: {}", outcome.transaction_hash);
            if let Some(count) = outcome.policy_count {
                println!("Policy count: {count}");
            }
        }
        Command::Claim { policy_id } => {
            controller
                .set_field(FormField::ClaimPolicyId, policy_id)
                .await;
            controller.claim_policy(&session).await?;
            println!("{}", status_message(&controller, OperationKind::Claim));
        }
        Command::View { policy_id } => {
            controller.set_field(FormField::ViewPolicyId, policy_id).await;
            controller.view_policy(&session).await?;
            println!("{}", status_message(&controller, OperationKind::View));
        }
        Command::Fund { amount } => {
            controller.set_field(FormField::FundAmount, amount).await;
            controller.fund_contract(&session).await?;
            println!("{}", status_message(&controller, OperationKind::Fund));
        }
        Command::Watch | Command::Draft(_) | Command::Cache(_) => {}
    }
    Ok(())
}

fn status_message(controller: &PolicyController, kind: OperationKind) -> String {
    controller
        .operation(kind)
        .status
        .message()
        .unwrap_or_default()
        .to_string()
}

fn print_session(session: &SessionContext) {
    let view = session.view();
    match &view.account {
        Some(account) => println!("Account: {account}"),
        None => println!("Account: not connected"),
    }
    println!("Network: {}", view.network_id);
    println!("Contract: {}", view.contract);
    match view.policy_count {
        Some(count) => println!("Policy count: {count}"),
        None => println!("Policy count: unknown"),
    }
}

async fn watch(
    controller: &Arc<PolicyController>,
    provider: &Arc<EthRpcProvider>,
    settings: &Settings,
) -> Result<()> {
    let watcher = provider.spawn_change_watcher(settings.poll_interval());
    let mut events = controller.subscribe_events();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ControllerEvent::SessionChanged(view) => match view.account {
                    Some(account) => println!("Active account: {account}"),
                    None => println!("Wallet disconnected"),
                },
                ControllerEvent::OperationChanged { kind, snapshot } => {
                    println!("[{kind}] {}", snapshot.status);
                }
            }
        }
    });

    let result = tokio::select! {
        result = follow(controller) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("watch: interrupted");
            Ok(())
        }
    };
    watcher.abort();
    printer.abort();
    result
}

async fn follow(controller: &Arc<PolicyController>) -> Result<()> {
    loop {
        let session = controller.bootstrap().await?;
        print_session(&session);
        match controller.follow_session(&session).await {
            SessionEnd::ReloadRequired(network_id) => {
                warn!(network_id = network_id.0, "watch: network changed, reconnecting");
            }
            SessionEnd::ProviderClosed => return Ok(()),
        }
    }
}

async fn run_draft(settings: &Settings, command: DraftCommand) -> Result<()> {
    let storage = open_storage(settings).await?;
    match command {
        DraftCommand::Save { payout, premium } => {
            for (label, raw) in [("payout", &payout), ("premium", &premium)] {
                if !raw.trim().is_empty() {
                    parse_ether(raw).with_context(|| format!("invalid {label} amount"))?;
                }
            }
            storage
                .save_draft(&PolicyDraft {
                    payout,
                    premium,
                    timestamp: Utc::now(),
                })
                .await?;
            println!("Draft saved.");
        }
        DraftCommand::Show => match storage.load_draft().await? {
            Some(draft) => println!("{}", serde_json::to_string_pretty(&draft)?),
            None => println!("No saved draft."),
        },
        DraftCommand::Clear => {
            storage.clear_draft().await?;
            println!("Draft cleared.");
        }
    }
    Ok(())
}

async fn run_cache(settings: &Settings, command: CacheCommand) -> Result<()> {
    let storage = open_storage(settings).await?;
    let fetcher = HttpAssetFetcher::new(&settings.asset_base_url, settings.call_timeout())?;
    let cache = OfflineCache::new(
        storage,
        Arc::new(fetcher),
        CacheManifest::new(settings.cache_name.clone()),
    );
    match command {
        CacheCommand::Install => {
            let count = cache.install().await?;
            println!("Cached {count} assets in '{}'.", cache.manifest().name);
        }
        CacheCommand::Activate => {
            for name in cache.activate().await? {
                println!("Deleted old cache: {name}");
            }
        }
        CacheCommand::Fetch(args) => {
            let request = if args.document {
                AssetRequest::document(args.url)
            } else {
                AssetRequest::new(args.url)
            };
            let response = cache.fetch(&request).await?;
            println!(
                "{} {} ({} bytes, {})",
                response.status,
                response.content_type.as_deref().unwrap_or("unknown type"),
                response.body.len(),
                if response.from_cache { "cache" } else { "network" }
            );
        }
    }
    Ok(())
}
