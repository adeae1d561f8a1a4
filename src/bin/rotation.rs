//! rotation CLI: operator interface to the solicitor rotation engine.

use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use solicitor_rotation::config::secrets::ExposeSecret;
use solicitor_rotation::clock::SystemClock;
use solicitor_rotation::config::Config;
use solicitor_rotation::db::Db;
use solicitor_rotation::engine::{ActivationOutcome, ControlPlane, Engine, PushOutcome};
use solicitor_rotation::model::{JurisdictionId, NewWorkItem, SolicitorId, Status, WorkItemId};
use solicitor_rotation::notify::TracingGateway;
use solicitor_rotation::telemetry::{TelemetryConfig, init_telemetry};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "rotation", about = "Solicitor assignment and SLA rotation engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the control plane with its periodic ticker
    Serve,
    /// Work item operations
    Item {
        #[command(subcommand)]
        action: ItemAction,
    },
    /// Run every scan once, now
    Scan,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Business,
    Registered,
}

#[derive(Subcommand)]
enum ItemAction {
    /// Record a work item and put it into rotation
    Create {
        #[arg(long, value_enum, default_value = "business")]
        kind: Kind,
        /// Business location (jurisdiction id)
        #[arg(long)]
        business: i64,
        /// Registration location, for registered requests
        #[arg(long)]
        registration: Option<i64>,
        /// Staff user raising the request
        #[arg(long)]
        originator: String,
        /// Oversight zone for SLA escalation
        #[arg(long, default_value = "")]
        zone: String,
    },
    /// Show a work item and its rotation chain
    Show {
        /// Work item ID (full UUID or prefix)
        id: String,
    },
    /// List work items
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Maximum items to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Accept on behalf of the active solicitor
    Accept { id: String, solicitor: i64 },
    /// Reject on behalf of the active solicitor
    Reject { id: String, solicitor: i64 },
    /// Mark accepted work as completed
    Complete { id: String, solicitor: i64 },
    /// Hand accepted work back to the originator
    Return { id: String },
    /// Send returned work back to the same solicitor
    Resubmit { id: String },
    /// Withdraw a work item
    Cancel { id: String },
    /// Put an unassigned item back into rotation
    Restart { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "solicitor-rotation".to_string(),
        default_level: config.log_level.clone(),
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.migrate().await?;
    let engine = Arc::new(Engine::new(
        db.clone(),
        Arc::new(SystemClock),
        Arc::new(TracingGateway),
        config.engine()?,
    ));

    match cli.command {
        Command::Serve => cmd_serve(engine).await,
        Command::Scan => cmd_scan(&engine).await,
        Command::Item { action } => cmd_item(&engine, action).await,
    }
}

async fn cmd_serve(engine: Arc<Engine>) -> anyhow::Result<()> {
    let control = ControlPlane::new(engine);
    let shutdown = control.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        shutdown.cancel();
    });
    control.run().await?;
    Ok(())
}

async fn cmd_scan(engine: &Engine) -> anyhow::Result<()> {
    let report = engine
        .tick(engine.clock().now(), &CancellationToken::new())
        .await;
    println!(
        "{:<20}  {:>7}  {:>5}  {:>7}  {:>6}  {:>7}",
        "SCAN", "VISITED", "ACTED", "SKIPPED", "FAILED", "CLEARED"
    );
    println!("{}", "-".repeat(62));
    for scan in &report.scans {
        println!(
            "{:<20}  {:>7}  {:>5}  {:>7}  {:>6}  {:>7}",
            scan.kind.as_str(),
            scan.visited,
            scan.acted,
            scan.skipped,
            scan.failed,
            scan.flags_cleared
        );
    }
    Ok(())
}

async fn cmd_item(engine: &Engine, action: ItemAction) -> anyhow::Result<()> {
    match action {
        ItemAction::Create {
            kind,
            business,
            registration,
            originator,
            zone,
        } => {
            let new = match (kind, registration) {
                (Kind::Business, _) => NewWorkItem::business(JurisdictionId(business), originator),
                (Kind::Registered, Some(registration)) => NewWorkItem::registered(
                    JurisdictionId(business),
                    JurisdictionId(registration),
                    originator,
                ),
                (Kind::Registered, None) => {
                    anyhow::bail!("registered requests need --registration")
                }
            };
            let (item, outcome) = engine.create(new.zone(zone)).await?;
            match outcome {
                ActivationOutcome::Assigned {
                    solicitor,
                    rotation_order,
                } => println!(
                    "Created: {} (assigned to {solicitor}, order {rotation_order})",
                    item.id
                ),
                ActivationOutcome::NoCandidates => {
                    println!("Created: {} (no solicitor covers {})", item.id, item.jurisdiction())
                }
            }
        }
        ItemAction::Show { id } => {
            let id = resolve_id(engine, &id).await?;
            cmd_item_show(engine, id).await?;
        }
        ItemAction::List { status, limit } => {
            let status: Option<Status> = match status {
                Some(s) => Some(
                    s.parse()
                        .map_err(|_| anyhow::anyhow!("invalid status: {s}"))?,
                ),
                None => None,
            };
            cmd_item_list(engine, status, limit).await?;
        }
        ItemAction::Accept { id, solicitor } => {
            let id = resolve_id(engine, &id).await?;
            let item = engine.accept(id, SolicitorId(solicitor)).await?;
            match item.due_at {
                Some(due_at) => println!("Accepted: {id} (due {due_at})"),
                None => println!("Accepted: {id}"),
            }
        }
        ItemAction::Reject { id, solicitor } => {
            let id = resolve_id(engine, &id).await?;
            match engine.reject(id, SolicitorId(solicitor)).await? {
                PushOutcome::Activated { solicitor, .. }
                | PushOutcome::AlreadyActive { solicitor, .. } => {
                    println!("Rejected: {id} (now with {solicitor})")
                }
                PushOutcome::Exhausted => println!("Rejected: {id} (no candidates left)"),
                other => println!("Rejected: {id} ({other:?})"),
            }
        }
        ItemAction::Complete { id, solicitor } => {
            let id = resolve_id(engine, &id).await?;
            engine.complete(id, SolicitorId(solicitor)).await?;
            println!("Completed: {id}");
        }
        ItemAction::Return { id } => {
            let id = resolve_id(engine, &id).await?;
            engine.return_to_originator(id).await?;
            println!("Returned: {id}");
        }
        ItemAction::Resubmit { id } => {
            let id = resolve_id(engine, &id).await?;
            let item = engine.resubmit(id).await?;
            if let Some(solicitor) = item.assignee {
                println!("Resubmitted: {id} (back with {solicitor})");
            }
        }
        ItemAction::Cancel { id } => {
            let id = resolve_id(engine, &id).await?;
            engine.cancel(id).await?;
            println!("Cancelled: {id}");
        }
        ItemAction::Restart { id } => {
            let id = resolve_id(engine, &id).await?;
            match engine.activate(id).await? {
                ActivationOutcome::Assigned { solicitor, .. } => {
                    println!("Restarted: {id} (assigned to {solicitor})")
                }
                ActivationOutcome::NoCandidates => println!("Restarted: {id} (no candidates)"),
            }
        }
    }
    Ok(())
}

async fn cmd_item_list(engine: &Engine, status: Option<Status>, limit: i64) -> anyhow::Result<()> {
    let items = engine.store().list_work_items(status, limit).await?;
    if items.is_empty() {
        println!("No work items found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<22}  {:<9}  {:<20}  {:<16}  CREATED",
        "ID", "STATUS", "ASSIGNEE", "DUE", "ORIGINATOR"
    );
    println!("{}", "-".repeat(100));
    for item in &items {
        let short_id = &item.id.to_string()[..8];
        let assignee = item.assignee.map_or("-".to_string(), |s| s.to_string());
        let due = item
            .due_at
            .map_or("-".to_string(), |d| d.format("%Y-%m-%d %H:%M").to_string());
        println!(
            "{:<8}  {:<22}  {:<9}  {:<20}  {:<16}  {}",
            short_id,
            item.status,
            assignee,
            due,
            item.originator,
            item.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} item(s)", items.len());
    Ok(())
}

async fn cmd_item_show(engine: &Engine, id: WorkItemId) -> anyhow::Result<()> {
    let item = engine.store().get_work_item(id).await?;
    println!("ID:           {}", item.id);
    println!("Kind:         {}", item.kind);
    println!("Jurisdiction: {}", item.jurisdiction());
    println!("Status:       {}", item.status);
    println!(
        "Assignee:     {}",
        item.assignee.map_or("-".to_string(), |s| s.to_string())
    );
    println!(
        "Due:          {}",
        item.due_at.map_or("-".to_string(), |d| d.to_string())
    );
    println!("Originator:   {}", item.originator);
    println!("Zone:         {}", item.zone);
    println!("Created:      {}", item.created_at);
    println!("Updated:      {}", item.updated_at);

    let chain = engine.store().list_attempts(id).await?;
    if chain.is_empty() {
        return Ok(());
    }
    println!("---");
    println!(
        "{:<5}  {:<9}  {:<20}  {:<6}  {:<8}  {:<8}",
        "ORDER", "SOLICITOR", "SCHEDULED", "ACTIVE", "ACCEPTED", "REJECTED"
    );
    for a in &chain {
        println!(
            "{:<5}  {:<9}  {:<20}  {:<6}  {:<8}  {:<8}",
            a.rotation_order,
            a.solicitor_id,
            a.scheduled_at.format("%Y-%m-%d %H:%M"),
            if a.currently_active { "yes" } else { "-" },
            if a.accepted { "yes" } else { "-" },
            if a.rejected_at.is_some() { "yes" } else { "-" },
        );
    }
    Ok(())
}

/// Accept a full UUID or a unique prefix of one.
async fn resolve_id(engine: &Engine, id: &str) -> anyhow::Result<WorkItemId> {
    if id.len() >= 36 {
        return Ok(WorkItemId(uuid::Uuid::parse_str(id)?));
    }
    let items = engine.store().list_work_items(None, 500).await?;
    let matches: Vec<_> = items
        .iter()
        .filter(|item| item.id.to_string().starts_with(id))
        .collect();
    match matches.as_slice() {
        [] => anyhow::bail!("no work item matching prefix '{id}'"),
        [only] => Ok(only.id),
        many => anyhow::bail!(
            "{} work items match prefix '{id}', be more specific",
            many.len()
        ),
    }
}
