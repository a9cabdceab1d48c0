use anyhow::Context;
use clap::{Parser, Subcommand};
use site_search::{
    api::{build_router_for_origins, AppState},
    config::{BackendKind, Config},
    indexing::{
        JobHost, JobStateStore, MemoryStateStore, ReindexJob, ReindexScheduler, SledStateStore,
        StaticRecordSource,
    },
    search::{
        DocumentBatcher, ElasticBackend, EmbeddedBackend, FilterConfigResolver, FilterFile,
        SearchBackend, SearchRequest, SearchService,
    },
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "site-search")]
#[command(about = "Faceted site search and bulk reindexing", long_about = None)]
struct Cli {
    /// Configuration file (defaults to $CONFIG_PATH or config/site-search.toml)
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config/site-search.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the search API and run scheduled reindexing
    Serve,

    /// Run one full reindex and exit
    Reindex,

    /// Print the backend request body for a query string
    Compile {
        /// Query string, e.g. "q=events&type=news&sort=asc"
        #[arg(value_name = "QUERY")]
        query: String,
    },
}

/// Everything the commands share
struct Components {
    config: Config,
    service: Arc<SearchService>,
    host: Arc<JobHost>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load_from(&cli.config)
        .context("Failed to load configuration")?
        .validated()
        .context("Invalid configuration")?;

    init_tracing(&config);
    tracing::info!("Starting site-search v{}", env!("CARGO_PKG_VERSION"));

    let components = build(config).await?;

    match cli.command {
        Commands::Serve => serve(components).await,
        Commands::Reindex => reindex(components).await,
        Commands::Compile { query } => compile(components, &query).await,
    }
}

fn init_tracing(config: &Config) {
    let json = config.observability.json_logs;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("site_search={},tower_http=info", config.observability.log_level).into()
            }),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn build(config: Config) -> anyhow::Result<Components> {
    let backend: Arc<dyn SearchBackend> = match config.backend.kind {
        BackendKind::Elastic => Arc::new(ElasticBackend::new(&config.backend.elastic)?),
        BackendKind::Embedded => Arc::new(EmbeddedBackend::new(&config.backend.embedded)?),
    };
    tracing::info!(
        backend = backend.name(),
        index = backend.index_name(),
        "Search backend initialized"
    );

    let source = match &config.indexing.records_path {
        Some(path) => StaticRecordSource::load(path).await?,
        None => {
            tracing::warn!("No records_path configured, reindexing an empty source");
            StaticRecordSource::default()
        }
    };

    let filters = FilterFile::load(config.search.filters_path.as_deref())?;
    let resolver = FilterConfigResolver::new(filters, Arc::new(source.clone()));

    let batcher = DocumentBatcher::new(config.indexing.batch_limit)
        .with_disabled_classes(config.indexing.disabled_classes.iter().cloned());

    let service = SearchService::new(backend.clone(), resolver, config.search.clone())
        .with_batcher(batcher.clone())
        .with_error_detail(config.deployment.environment.exposes_error_detail());

    let store: Arc<dyn JobStateStore> = match &config.indexing.state_path {
        Some(path) => Arc::new(SledStateStore::open(path)?),
        None => Arc::new(MemoryStateStore::new()),
    };

    let job = ReindexJob::new(Arc::new(source), backend, batcher);
    let host = JobHost::new(job, store)
        .with_locales(config.indexing.locales.clone())
        .with_requeue_delay(chrono::Duration::seconds(
            config.indexing.requeue_delay_secs as i64,
        ));

    Ok(Components {
        config,
        service: Arc::new(service),
        host: Arc::new(host),
    })
}

async fn serve(components: Components) -> anyhow::Result<()> {
    let Components {
        config,
        service,
        host,
    } = components;

    if config.observability.metrics_enabled {
        if let Err(e) = site_search::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    }

    let scheduler = if config.indexing.enabled {
        Some(ReindexScheduler::start(host.clone(), &config.indexing.schedule).await?)
    } else {
        tracing::info!("Scheduled reindexing disabled in configuration");
        None
    };

    let state = AppState::new(service)
        .with_reindex(host)
        .with_metrics(config.observability.metrics_enabled);
    let app = build_router_for_origins(state, &config.server.cors_origins);

    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("Failed to bind {}", http_addr))?;

    tracing::info!("HTTP API server listening on http://{}", http_addr);
    tracing::info!("   Search: http://{}/search?q=", http_addr);

    axum::serve(http_listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.shutdown().await?;
    }

    tracing::info!("Shutting down gracefully...");
    Ok(())
}

async fn reindex(components: Components) -> anyhow::Result<()> {
    let host = components.host;
    println!("{}", host.job().title());

    let mut printed = 0;
    let state = host
        .run_to_completion(|state| {
            for message in &state.messages[printed..] {
                println!("[{}/{}] {}", state.current_step, state.total_steps, message);
            }
            printed = state.messages.len();
        })
        .await?;

    println!(
        "Processed {} of {} records in {} groups",
        state.current_step,
        state.total_steps,
        state.record_groups.len()
    );
    Ok(())
}

async fn compile(components: Components, query: &str) -> anyhow::Result<()> {
    let url = reqwest::Url::parse(&format!("http://localhost/search?{}", query))
        .context("Invalid query string")?;
    let request = SearchRequest::from_query_pairs(url.query_pairs().into_owned());

    let compiled = components.service.compile(&request).await;
    println!("{}", serde_json::to_string_pretty(&compiled.to_request_body())?);
    Ok(())
}
