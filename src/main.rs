use std::path::PathBuf;
use std::time::Duration;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use clusterresourceoverride_operator::{self, operator, telemetry, State};

#[derive(Debug, clap::Parser)]
#[command(about = "Installs and manages the ClusterResourceOverride admission webhook")]
struct Arguments {
    /// Namespace the admission webhook server is installed into
    #[arg(long, env = "OPERATOR_NAMESPACE")]
    namespace: Option<String>,

    #[arg(long, env = "OPERAND_IMAGE")]
    operand_image: Option<String>,

    #[arg(long, env = "OPERAND_VERSION")]
    operand_version: Option<String>,

    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Interval at which the resource is reconciled without any change to it
    #[arg(long, default_value = "1h", value_parser = operator::parse_duration)]
    resync_period: Duration,

    #[arg(long, default_value = "5m", value_parser = operator::parse_duration)]
    cache_sync_timeout: Duration,

    #[arg(long, default_value = operator::DEFAULT_BIND_ADDRESS)]
    bind_address: String,

    /// Kubeconfig to use outside of a cluster
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok().body(buffer),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

/// Ready once the controller cache has synced and its workers run.
#[get("/healthz")]
async fn healthz(c: Data<State>, _req: HttpRequest) -> impl Responder {
    if c.is_ready() {
        HttpResponse::Ok().json("ok")
    } else {
        HttpResponse::ServiceUnavailable().json("controller not started")
    }
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = terminate.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
                return;
            }
            Err(err) => tracing::warn!("failed to listen for SIGTERM: {}", err),
        }
    }
    let _ = tokio::signal::ctrl_c().await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init()?;

    let args: Arguments = Arguments::parse();
    let mut config =
        operator::OperatorConfig::new(args.namespace, args.operand_image, args.operand_version)?;
    config.workers = args.workers;
    config.resync_period = args.resync_period;
    config.cache_sync_timeout = args.cache_sync_timeout;
    config.bind_address = args.bind_address;
    config.kubeconfig = args.kubeconfig;

    let state = State::default();
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    let bind_address = config.bind_address.clone();
    let controller = operator::run(config, state.clone(), shutdown.clone());
    tokio::pin!(controller);

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health").exclude("/healthz"))
            .service(index)
            .service(health)
            .service(healthz)
            .service(metrics)
    })
    .bind(bind_address)?
    .shutdown_timeout(5)
    .run();
    let handle = server.handle();

    tokio::pin!(server);

    // The server stops with the controller, whether it finished or failed
    let (controller, server) = tokio::join!(
        async {
            let result = (&mut controller).await;
            handle.stop(true).await;
            result
        },
        server
    );
    server?;
    controller?;
    Ok(())
}
