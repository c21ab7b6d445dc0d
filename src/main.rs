use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use generic_interface::config::{self, Config};
use generic_interface::field::{FieldConfig, WebserviceFieldService};
use generic_interface::models::{Payload, WebserviceConfig};
use generic_interface::store::{memory, MemoryStore, PgStore, WebserviceRepository};
use generic_interface::InvocationService;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "generic-interface"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
            .context("failed to install OpenTelemetry tracer")?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "generic_interface=info,gi=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(telemetry_layer)
        .init();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = run(cfg, args.command).await;

    opentelemetry::global::shutdown_tracer_provider();
    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

async fn open_repository(cfg: &Config) -> anyhow::Result<Arc<dyn WebserviceRepository>> {
    if let Some(url) = &cfg.database_url {
        tracing::info!("Connecting to database...");
        let db = PgStore::connect(url).await.context("failed to connect to database")?;
        tracing::info!("Running migrations...");
        db.migrate().await.context("failed to run migrations")?;
        return Ok(Arc::new(db));
    }

    match &cfg.config_file {
        Some(path) => {
            let store = MemoryStore::from_yaml_file(path, cfg.user_id)
                .await
                .with_context(|| format!("failed to load webservice definitions from {}", path))?;
            tracing::info!(file = %path, "loaded webservice definitions");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("neither DATABASE_URL nor GI_CONFIG_FILE set, starting with no webservices");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn run(cfg: Config, command: cli::Commands) -> anyhow::Result<()> {
    let repo = open_repository(&cfg).await?;
    let service = Arc::new(
        InvocationService::with_defaults(repo.clone(), cfg.http_settings(), cfg.cache_ttl)
            .context("failed to initialise transports")?,
    );

    match command {
        cli::Commands::Invoke {
            webservice,
            invoker,
            data,
            path,
            method,
            deadline,
        } => {
            let data = parse_payload(&data)?;
            let call = async {
                match (path, method) {
                    (None, None) => service.invoke(&webservice, &invoker, data).await,
                    (path, method) => {
                        service
                            .invoke_with_controller(
                                &webservice,
                                &invoker,
                                path.as_deref().unwrap_or_default(),
                                method.as_deref().unwrap_or_default(),
                                data,
                            )
                            .await
                    }
                }
            };
            let response = match deadline {
                Some(secs) => tokio::time::timeout(Duration::from_secs(secs), call)
                    .await
                    .map_err(|_| anyhow::anyhow!("invocation cancelled after {}s", secs))?,
                None => call.await,
            }?;

            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.success {
                anyhow::bail!(
                    "remote call failed: {}",
                    response.error.unwrap_or_else(|| format!("HTTP {}", response.status_code))
                );
            }
        }
        cli::Commands::List { valid } => {
            let all = if valid {
                service.list_valid_webservices().await?
            } else {
                service.list_webservices().await?
            };
            for ws in all {
                println!(
                    "{:>5}  {:<30} {:<12} {:<6} {}",
                    ws.id,
                    ws.name,
                    ws.transport_type(),
                    if ws.is_valid() { "valid" } else { "inval" },
                    ws.requester_host()
                );
            }
        }
        cli::Commands::Show { name } => {
            let ws = repo
                .get_by_name(&name)
                .await
                .with_context(|| format!("webservice {} not found", name))?;
            println!("# id {} (valid_id {})", ws.id, ws.valid_id);
            print!("{}", ws.config.to_yaml()?);
        }
        cli::Commands::Import { file } => {
            let raw = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file))?;
            let definitions = memory::parse_definitions(&raw).context("invalid definition file")?;
            for ws in definitions {
                import_one(&service, repo.as_ref(), ws, cfg.user_id).await?;
            }
        }
        cli::Commands::Delete { id } => {
            service.delete_webservice(id).await?;
            println!("Webservice {} deleted", id);
        }
        cli::Commands::History { id } => {
            for entry in service.history(id).await? {
                println!(
                    "{:>6}  {}  by {:<5} {}",
                    entry.id,
                    entry.create_time.format("%Y-%m-%d %H:%M:%S"),
                    entry.create_by,
                    &entry.config_digest[..12.min(entry.config_digest.len())]
                );
            }
        }
        cli::Commands::Restore { history_id } => {
            service.restore_from_history(history_id, cfg.user_id).await?;
            println!("Restored snapshot {}", history_id);
        }
        cli::Commands::TestConnection { name } => {
            service.test_connection(&name).await?;
            println!("{}: reachable", name);
        }
        cli::Commands::Envelope {
            webservice,
            invoker,
            data,
        } => {
            let data = parse_payload(&data)?;
            println!("{}", service.soap_envelope(&webservice, &invoker, data).await?);
        }
        cli::Commands::FieldSearch {
            webservice,
            invoker,
            term,
            stored_value,
            display,
            limit,
        } => {
            let mut field_map = Payload::new();
            field_map.insert("Webservice".into(), webservice.into());
            field_map.insert("InvokerSearch".into(), invoker.into());
            field_map.insert("StoredValue".into(), stored_value.into());
            field_map.insert("DisplayedValues".into(), display.into());
            if let Some(limit) = limit {
                field_map.insert("Limit".into(), limit.into());
            }
            let field_config = FieldConfig::from_map(&field_map);

            let fields = WebserviceFieldService::new(service.clone(), cfg.field_cache_ttl);
            let results = fields.search(&field_config, &term).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }

    Ok(())
}

async fn import_one(
    service: &InvocationService,
    repo: &dyn WebserviceRepository,
    mut ws: WebserviceConfig,
    user_id: i32,
) -> anyhow::Result<()> {
    if service.webservice_exists(&ws.name).await? {
        ws.id = repo.get_by_name(&ws.name).await?.id;
        service
            .update_webservice(&ws, user_id)
            .await
            .with_context(|| format!("failed to update {}", ws.name))?;
        println!("Updated {} (id {})", ws.name, ws.id);
    } else {
        let id = service
            .create_webservice(&ws, user_id)
            .await
            .with_context(|| format!("failed to create {}", ws.name))?;
        println!("Created {} (id {})", ws.name, id);
    }
    Ok(())
}

fn parse_payload(raw: &str) -> anyhow::Result<Payload> {
    serde_json::from_str(raw).context("--data must be a JSON object")
}
