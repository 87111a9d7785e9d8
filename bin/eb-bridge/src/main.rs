//! Event Bridge
//!
//! Routes event bus events to backend HTTP calls and publishes getter
//! results to a notification sink.
//!
//! - `serve`: HTTP ingestion API plus, when `[sqs]` is configured, an SQS
//!   consumer feeding the same processor
//! - `rules`: print the registered rules and workflows, then exit

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use eb_common::NotificationSink;
use eb_config::{BridgeConfig, SinkKind};
use eb_queue::sqs::{SqsConsumerConfig, SqsEventConsumer, SqsNotificationPublisher};
use eb_queue::EventConsumer;
use eb_router::{EventRouter, HttpBackend, HttpBackendConfig, RuleRegistry};
use eb_workflow::{
    EventProcessor, HttpSink, LogSink, WorkflowBuilder, WorkflowExecutor, WorkflowSet,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Event Bridge
#[derive(Parser, Debug)]
#[command(name = "eb-bridge")]
#[command(about = "Routes event bus events to backend HTTP calls")]
struct Args {
    /// Path to the bridge configuration file
    #[arg(long, env = "EB_CONFIG", default_value = "config/bridge.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long, env = "EB_LOG_JSON", default_value = "false")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ingestion API and queue consumer
    Serve,
    /// Print registered rules and workflows
    Rules,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = BridgeConfig::load(&args.config)?;
    let registry = Arc::new(build_registry(&config)?);
    let workflows = Arc::new(WorkflowBuilder::default().build_all(&registry)?);

    match args.command {
        Command::Rules => {
            print_rules(&registry, &workflows);
            Ok(())
        }
        Command::Serve => serve(config, registry, workflows).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into());
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Register every configured rule; any rejection fails startup
fn build_registry(config: &BridgeConfig) -> Result<RuleRegistry> {
    let mut registry = RuleRegistry::new(config.registry_config());
    let errors = registry.register_all(config.dispatch_rules());
    if !errors.is_empty() {
        for e in &errors {
            error!(error = %e, "Rule rejected");
        }
        return Err(anyhow!("{} rule(s) failed to register", errors.len()));
    }
    Ok(registry)
}

fn print_rules(registry: &RuleRegistry, workflows: &WorkflowSet) {
    for rule in registry.list() {
        println!(
            "{:<20} {}/{} -> {} {}{}",
            rule.name,
            rule.event_source,
            rule.event_type,
            rule.method,
            rule.path_template,
            if rule.notify { " [notify]" } else { "" }
        );
    }
    for id in workflows.ids() {
        println!("workflow {}", id);
    }
}

async fn build_sink(config: &BridgeConfig) -> Result<Arc<dyn NotificationSink>> {
    let notification = &config.notification;
    let sink: Arc<dyn NotificationSink> = match notification.sink {
        SinkKind::Log => Arc::new(LogSink::default()),
        SinkKind::Http => {
            let url = notification
                .url
                .clone()
                .ok_or_else(|| anyhow!("notification.url is required for the http sink"))?;
            Arc::new(HttpSink::new(url, notification.timeout())?)
        }
        SinkKind::Sqs => {
            let queue_url = notification
                .queue_url
                .clone()
                .ok_or_else(|| anyhow!("notification.queue_url is required for the sqs sink"))?;
            Arc::new(SqsNotificationPublisher::new(
                eb_queue::sqs::default_client().await,
                queue_url,
            ))
        }
    };
    info!(sink = %sink.identifier(), "Notification sink ready");
    Ok(sink)
}

fn build_backend(config: &BridgeConfig) -> Result<HttpBackend> {
    let mut backend = HttpBackendConfig::new(&config.backend.base_url, config.backend.timeout());
    backend.connect_timeout = config.backend.connect_timeout();
    backend.api_key = config.backend.api_key();
    if config.backend.api_key_header.is_some() && backend.api_key.is_none() {
        return Err(anyhow!(
            "backend API key variable {} is not set",
            config.backend.api_key_env.as_deref().unwrap_or_default()
        ));
    }
    HttpBackend::new(backend)
}

async fn serve(
    config: BridgeConfig,
    registry: Arc<RuleRegistry>,
    workflows: Arc<WorkflowSet>,
) -> Result<()> {
    info!("Starting Event Bridge");

    let metrics = PrometheusBuilder::new().install_recorder()?;

    let backend = Arc::new(build_backend(&config)?);
    info!(base_url = %backend.base_url(), "Backend client ready");

    let sink = build_sink(&config).await?;
    let router = Arc::new(EventRouter::new(registry, backend, config.backend.timeout()));
    let executor = Arc::new(WorkflowExecutor::new(
        router.clone(),
        sink,
        config.notification.timeout(),
    ));
    let processor = Arc::new(EventProcessor::new(router, workflows, executor));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    // SQS consumer
    let consumer_handle = match &config.sqs {
        Some(sqs) => {
            let mut consumer_config = SqsConsumerConfig::new(&sqs.queue_url);
            consumer_config.wait_time_seconds = sqs.wait_time_seconds;
            consumer_config.max_messages = sqs.max_messages;
            consumer_config.visibility_timeout = sqs.visibility_timeout;

            let consumer =
                SqsEventConsumer::new(eb_queue::sqs::default_client().await, consumer_config);
            let processor = processor.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            Some(tokio::spawn(async move {
                if let Err(e) = consumer.run(processor, shutdown_rx).await {
                    error!(error = %e, "SQS consumer stopped with error");
                }
            }))
        }
        None => {
            info!("No [sqs] section, queue consumer disabled");
            None
        }
    };

    // HTTP API
    let app = eb_api::create_router(processor.clone(), Some(metrics));
    let addr = format!("{}:{}", config.api.host, config.api.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Starting HTTP API server");

    let server_handle = {
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        })
    };

    info!("Event Bridge started. Press Ctrl+C to shutdown.");

    shutdown_signal().await;
    info!("Shutdown signal received, initiating graceful shutdown...");

    processor.shutdown();
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(30), async {
        let _ = server_handle.await;
        if let Some(handle) = consumer_handle {
            let _ = handle.await;
        }
    })
    .await;

    info!("Event Bridge shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
