use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use token_router::config::{self, Config};
use token_router::jobs;
use token_router::models::credential::NewCredential;
use token_router::router::TokenRouter;
use token_router::store::memory::MemoryStore;
use token_router::store::postgres::PgStore;
use token_router::store::TokenStore;
use token_router::{api, AppState};

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // Parse first so --help/--version never depend on a valid environment.
    let args = cli::Cli::parse();

    // OTLP export only when a collector is configured; stdout logging always.
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "tapcanvas-router"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    // ROUTER_LOG_FORMAT=json switches stdout to structured JSON lines.
    let json_logs = std::env::var("ROUTER_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let (json_layer, text_layer) = if json_logs {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "token_router=debug,tapcanvas_router=debug,tower_http=debug".into()),
        ))
        .with(json_layer)
        .with(text_layer)
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port, args.memory).await
        }
        Some(cli::Commands::Credential { command }) => {
            let router = build_router(&cfg, args.memory).await?;
            handle_credential_command(command, &router).await
        }
        Some(cli::Commands::Resolve {
            user_id,
            vendor,
            token_id,
        }) => {
            let router = build_router(&cfg, args.memory).await?;
            let user_id = parse_id(&user_id, "user_id")?;
            let token_id = token_id.map(|t| parse_id(&t, "token_id")).transpose()?;
            match router.resolve(user_id, &vendor, token_id).await? {
                Some(cred) => println!("{}", serde_json::to_string_pretty(&cred.view())?),
                None => println!("No eligible credential for vendor '{}'", vendor),
            }
            Ok(())
        }
        Some(cli::Commands::Fail { token_id }) => {
            let router = build_router(&cfg, args.memory).await?;
            let token_id = parse_id(&token_id, "token_id")?;
            let outcome = router.register_failure(token_id).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        Some(cli::Commands::Task { command }) => {
            let router = build_router(&cfg, args.memory).await?;
            handle_task_command(command, &router).await
        }
        Some(cli::Commands::Sweep) => {
            let router = build_router(&cfg, args.memory).await?;
            let rows = router.sweep_expired().await?;
            println!("Removed {} expired task binding(s)", rows);
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port, args.memory).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn open_store(cfg: &Config, memory: bool) -> anyhow::Result<Arc<dyn TokenStore>> {
    if memory {
        tracing::warn!("Using in-memory store, nothing will be persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }

    tracing::info!("Connecting to database...");
    let db = PgStore::connect(&cfg.database_url)
        .await
        .context("failed to connect to DATABASE_URL")?;

    tracing::info!("Running migrations...");
    db.migrate().await?;
    Ok(Arc::new(db))
}

async fn build_router(cfg: &Config, memory: bool) -> anyhow::Result<TokenRouter> {
    let store = open_store(cfg, memory).await?;
    Ok(TokenRouter::new(store, cfg.routing_policy()?))
}

async fn run_server(cfg: Config, port: u16, memory: bool) -> anyhow::Result<()> {
    let router = build_router(&cfg, memory).await?;

    if cfg.janitor_interval_secs > 0 {
        jobs::janitor::spawn(
            router.clone(),
            std::time::Duration::from_secs(cfg.janitor_interval_secs),
        );
        tracing::info!(
            every_secs = cfg.janitor_interval_secs,
            "Background janitor started (expired task bindings)"
        );
    }

    let state = Arc::new(AppState {
        router,
        config: cfg,
    });
    let app = api::app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Token router listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn parse_id(raw: &str, field: &str) -> anyhow::Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("Invalid {}", field))
}

async fn handle_credential_command(
    cmd: cli::CredentialCommands,
    router: &TokenRouter,
) -> anyhow::Result<()> {
    match cmd {
        cli::CredentialCommands::Add {
            owner_id,
            vendor,
            secret,
            shared,
        } => {
            let new = NewCredential {
                owner_user_id: parse_id(&owner_id, "owner_id")?,
                vendor,
                secret,
                shared,
                enabled: true,
            };
            let cred = router
                .store()
                .insert_credential(&new, router.clock().now())
                .await?;
            println!("Credential created: {}", cred.id);
            println!("   Vendor: {}  Shared: {}", cred.vendor, cred.shared);
        }
        cli::CredentialCommands::List { owner_id } => {
            let owner = parse_id(&owner_id, "owner_id")?;
            let rows = router.store().list_credentials(owner).await?;
            if rows.is_empty() {
                println!("No credentials for {}", owner);
            }
            for cred in rows {
                let view = cred.view();
                println!(
                    "{}  {:<12} {:<10} shared={} enabled={} failures={} benched_until={}",
                    view.id,
                    view.vendor,
                    view.secret_preview,
                    view.shared,
                    view.enabled,
                    view.shared_failure_count,
                    view.shared_disabled_until
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".into()),
                );
            }
        }
        cli::CredentialCommands::Enable { id } => {
            let id = parse_id(&id, "id")?;
            if !router.store().set_credential_enabled(id, true).await? {
                anyhow::bail!("Credential {} not found", id);
            }
            println!("Credential {} enabled", id);
        }
        cli::CredentialCommands::Disable { id } => {
            let id = parse_id(&id, "id")?;
            if !router.store().set_credential_enabled(id, false).await? {
                anyhow::bail!("Credential {} not found", id);
            }
            println!("Credential {} disabled", id);
        }
    }
    Ok(())
}

async fn handle_task_command(cmd: cli::TaskCommands, router: &TokenRouter) -> anyhow::Result<()> {
    match cmd {
        cli::TaskCommands::Bind {
            user_id,
            token_id,
            task_id,
            vendor,
        } => {
            let user_id = parse_id(&user_id, "user_id")?;
            let token_id = parse_id(&token_id, "token_id")?;
            router.record_mapping(user_id, token_id, &task_id, &vendor).await;
            println!("Task {} ({}) bound to credential {}", task_id, vendor, token_id);
        }
        cli::TaskCommands::Lookup {
            user_id,
            task_id,
            vendor,
        } => {
            let user_id = parse_id(&user_id, "user_id")?;
            match router.resolve_mapping(user_id, &task_id, &vendor).await? {
                Some(binding) => {
                    println!("{}", serde_json::to_string_pretty(&binding.view())?)
                }
                None => println!("Task not found"),
            }
        }
    }
    Ok(())
}
