use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use burnmap_rs::client::AuthSession;
use burnmap_rs::export::export_rows;
use burnmap_rs::geo::Coordinate;
use burnmap_rs::models::{Record, RecordStatus};
use burnmap_rs::{
    BackendConfig, OwnerId, RecordService, RecordStore, RemoteGateway, SupabaseGateway,
    SyncConfig, SyncEngine,
};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_LOCAL_DB: &str = "burnmap.db";

#[derive(Parser)]
#[command(author, version, about = "Burn-plot records: local store and sync", long_about = None)]
struct Args {
    /// Local database path (falls back to BURNMAP_LOCAL_DB)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Account email (falls back to BURNMAP_EMAIL)
    #[arg(long)]
    email: Option<String>,

    /// Account password (falls back to BURNMAP_PASSWORD)
    #[arg(long)]
    password: Option<String>,

    /// Existing access token instead of email/password (falls back to BURNMAP_ACCESS_TOKEN)
    #[arg(long)]
    access_token: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List records (merged with the backend when signed in)
    List {
        /// Only show the local store
        #[arg(long)]
        local: bool,
    },
    /// Area and count totals for the local store
    Stats,
    /// Save a record from a JSON file
    Save { file: PathBuf },
    /// Mark a draft as saved
    Finalize { id: String },
    /// Delete a record locally, and remotely if it was synced
    Delete { id: String },
    /// Run one sync pass now
    Sync,
    /// Keep syncing on reconnect and on the interval until Ctrl-C
    Watch {
        /// Seconds between connectivity probes
        #[arg(long, default_value = "15")]
        probe_secs: u64,
    },
    /// Records within a radius of a point
    Near {
        #[arg(long)]
        lat: f64,
        #[arg(long)]
        lng: f64,
        #[arg(long, default_value = "10")]
        radius_km: f64,
    },
    /// Export records as JSON rows
    Export {
        /// Record ids to export; all when omitted
        ids: Vec<String>,
        /// Pick records in a terminal selector
        #[arg(short, long)]
        interactive: bool,
        /// Output file; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn env_or(value: Option<String>, name: &str) -> Option<String> {
    value.or_else(|| std::env::var(name).ok().filter(|v| !v.is_empty()))
}

/// Signs in when credentials are available. Without them the CLI works on the guest store.
async fn sign_in(args: &Args, gateway: &SupabaseGateway) -> Result<OwnerId> {
    if let Some(token) = env_or(args.access_token.clone(), "BURNMAP_ACCESS_TOKEN") {
        gateway
            .set_session(AuthSession {
                access_token: token,
                refresh_token: None,
            })
            .await;
    } else if let (Some(email), Some(password)) = (
        env_or(args.email.clone(), "BURNMAP_EMAIL"),
        env_or(args.password.clone(), "BURNMAP_PASSWORD"),
    ) {
        gateway
            .sign_in_with_password(&email, &password)
            .await
            .context("sign-in failed")?;
    } else {
        info!("No credentials given, using the guest store");
        return Ok(OwnerId::Guest);
    }

    match gateway.current_identity().await {
        Ok(identity) => Ok(OwnerId::user(identity.user_id)),
        Err(e) => {
            warn!("Session not usable ({}), using the guest store", e);
            Ok(OwnerId::Guest)
        }
    }
}

fn print_records(records: &[Record]) {
    for record in records {
        let sync = match (record.is_draft(), record.is_synced()) {
            (true, _) => "draft",
            (false, true) => "synced",
            (false, false) => "pending",
        };
        println!(
            "{}  {} {}  {:<9}  {:>8.2} rai  {} polygons  [{}]",
            record.id,
            record.date,
            record.time,
            record.crop_type().as_str(),
            burnmap_rs::geo::sq_meters_to_rai(record.total_area_sq_meters()),
            record.polygons.len(),
            sync
        );
    }
}

/// Flips the connectivity flag from periodic reachability checks of the backend.
async fn probe_connectivity(url: String, every: Duration, online: watch::Sender<bool>) {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        let reachable = client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok();
        online.send_if_modified(|current| {
            let changed = *current != reachable;
            *current = reachable;
            changed
        });
        if online.is_closed() {
            break;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "burnmap_rs={},burnmap_cli={}",
            args.log_level, args.log_level
        ))
        .init();

    let backend_config = BackendConfig::from_env().context("backend configuration")?;
    let sync_config = SyncConfig::from_env().context("sync configuration")?;
    let db_path = args
        .db
        .clone()
        .or_else(|| std::env::var("BURNMAP_LOCAL_DB").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_DB));

    let store = Arc::new(
        RecordStore::open(&db_path)
            .with_context(|| format!("opening local database {}", db_path.display()))?,
    );
    let gateway = Arc::new(SupabaseGateway::new(backend_config.clone())?);
    let owner = sign_in(&args, &gateway).await?;

    let (online_tx, online_rx) = watch::channel(true);
    let engine = Arc::new(SyncEngine::new(
        gateway.clone(),
        store.clone(),
        sync_config,
        online_rx,
    ));
    let service = RecordService::new(store, gateway, engine.clone());

    match args.command {
        Command::List { local } => {
            let records = if local {
                service.store().get_all(&owner)
            } else {
                service.get_all_records(&owner).await
            };
            print_records(&records);
        }
        Command::Stats => {
            let stats = service.stats(&owner);
            let status = service.sync_status(&owner);
            println!("{}", serde_json::to_string_pretty(&stats)?);
            println!(
                "{} records, {} synced, {} waiting",
                status.total, status.synced, status.unsynced
            );
        }
        Command::Save { file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let record: Record = serde_json::from_str(&json).context("parsing record")?;
            let outcome = service.save_record(&owner, record).await;
            if !outcome.stored {
                return Err(anyhow!("record {} was not stored", outcome.record.id));
            }
            match outcome.remote_id {
                Some(remote_id) => info!("Saved {} and synced as {}", outcome.record.id, remote_id),
                None => info!("Saved {} locally", outcome.record.id),
            }
        }
        Command::Finalize { id } => {
            if !service.set_status(&owner, &id, RecordStatus::Saved) {
                return Err(anyhow!("no draft {} to finalize", id));
            }
            info!("Record {} is saved and queued for sync", id);
        }
        Command::Delete { id } => {
            if !service.delete_record(&owner, &id).await {
                return Err(anyhow!("no record {}", id));
            }
            info!("Deleted {}", id);
        }
        Command::Sync => {
            let outcome = service.sync_now().await?;
            println!(
                "{:?}: {} synced ({} partial), {} failed, {} skipped",
                outcome.status,
                outcome.success_count,
                outcome.partial_count,
                outcome.failed_count,
                outcome.skipped_count
            );
        }
        Command::Watch { probe_secs } => {
            let probe = tokio::spawn(probe_connectivity(
                format!("{}/health", backend_config.auth_url()),
                Duration::from_secs(probe_secs.max(1)),
                online_tx,
            ));
            let sync_loop = tokio::spawn(engine.clone().run());
            info!("Watching for changes; Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            info!("Stopping");
            probe.abort();
            if let Err(e) = sync_loop.await {
                error!("Sync loop ended abnormally: {}", e);
            }
        }
        Command::Near {
            lat,
            lng,
            radius_km,
        } => {
            let records = service
                .fetch_near(Coordinate::new(lat, lng), radius_km)
                .await?;
            print_records(&records);
        }
        Command::Export {
            ids,
            interactive,
            output,
        } => {
            let records = service.get_all_records(&owner).await;
            let rows = if interactive {
                let chosen = burnmap_rs::ui::run_record_selector(records)?;
                let selected: HashSet<String> = chosen.iter().map(|r| r.id.clone()).collect();
                export_rows(&chosen, &selected)
            } else {
                let selected: HashSet<String> = if ids.is_empty() {
                    records.iter().map(|r| r.id.clone()).collect()
                } else {
                    ids.into_iter().collect()
                };
                export_rows(&records, &selected)
            };

            let json = serde_json::to_string_pretty(&rows)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    info!("Exported {} records to {}", rows.len(), path.display());
                }
                None => println!("{}", json),
            }
        }
    }

    Ok(())
}
