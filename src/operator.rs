use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::runtime::watcher;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cluster::{Cluster, KubeCluster};
use crate::controllers::clusterresourceoverride::{self, Options};
use crate::controllers::State;
use crate::resources::clusterresourceoverrides::{ClusterResourceOverride, SINGLETON_NAME};
use crate::runtime::{
    OperandContext, SystemClock, DEFAULT_CACHE_SYNC_TIMEOUT, DEFAULT_RESYNC_PERIOD,
    DEFAULT_WORKERS,
};
use crate::secondarywatch::SecondaryWatch;
use crate::{Error, Metrics, Result};

/// Name of the admission webhook server and of everything installed for it.
pub const OPERAND_NAME: &str = "clusterresourceoverride";

pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Validated settings of the operator process.
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    pub namespace: String,
    pub operand_image: String,
    pub operand_version: String,
    pub workers: usize,
    pub resync_period: Duration,
    pub cache_sync_timeout: Duration,
    pub bind_address: String,
    pub kubeconfig: Option<PathBuf>,
}

impl OperatorConfig {
    pub fn new(
        namespace: Option<String>,
        operand_image: Option<String>,
        operand_version: Option<String>,
    ) -> Result<Self> {
        fn required(value: Option<String>, message: &str) -> Result<String> {
            value
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| Error::InvalidConfig(message.to_string()))
        }

        Ok(Self {
            namespace: required(namespace, "operator namespace must be specified")?,
            operand_image: required(operand_image, "no operand image has been specified")?,
            operand_version: required(operand_version, "no operand version has been specified")?,
            workers: DEFAULT_WORKERS,
            resync_period: DEFAULT_RESYNC_PERIOD,
            cache_sync_timeout: DEFAULT_CACHE_SYNC_TIMEOUT,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            kubeconfig: None,
        })
    }

    pub fn operand(&self) -> OperandContext {
        OperandContext::new(
            OPERAND_NAME,
            &self.namespace,
            SINGLETON_NAME,
            &self.operand_image,
            &self.operand_version,
        )
    }

    async fn client(&self) -> Result<Client> {
        let Some(path) = &self.kubeconfig else {
            return Ok(Client::try_default().await?);
        };
        let invalid = |err: kube::config::KubeconfigError| {
            Error::InvalidConfig(format!("kubeconfig {} - {err}", path.display()))
        };
        let kubeconfig = Kubeconfig::read_from(path).map_err(invalid)?;
        let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(invalid)?;
        Ok(Client::try_from(config)?)
    }
}

/// Parse `90`, `90s`, `15m` or `1h` into a duration.
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (amount, unit) = value.split_at(split);
    let amount: u64 = amount
        .parse()
        .map_err(|_| format!("invalid duration \"{value}\""))?;
    let scale: u64 = match unit {
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => return Err(format!("invalid duration unit \"{unit}\" in \"{value}\"")),
    };
    let seconds = amount
        .checked_mul(scale)
        .ok_or_else(|| format!("invalid duration \"{value}\""))?;
    Ok(Duration::from_secs(seconds))
}

/// Run the controller and the operand watches until `shutdown` fires.
pub async fn run(config: OperatorConfig, state: State, shutdown: CancellationToken) -> Result<()> {
    let client = config.client().await?;

    let resources = Api::<ClusterResourceOverride>::all(client.clone());
    if let Err(err) = resources.list(&ListParams::default().limit(1)).await {
        error!("ClusterResourceOverride is not queryable; {err:?}. Is the CRD installed?");
        return Err(err.into());
    }

    let metrics = Metrics::default()
        .register(&state.registry)
        .map_err(|err| Error::InvalidConfig(format!("failed to register metrics - {err}")))?;
    let cluster: Arc<dyn Cluster> = Arc::new(KubeCluster::new(client.clone()));
    let options = Options::new(config.operand(), cluster, Arc::new(SystemClock));

    let (controller, enqueuer) = clusterresourceoverride::new_controller(options, metrics, &state);
    let controller = controller
        .workers(config.workers)
        .resync_period(Some(config.resync_period))
        .cache_sync_timeout(config.cache_sync_timeout)
        .on_started({
            let state = state.clone();
            move || state.mark_ready()
        });

    info!(
        namespace = %config.namespace,
        image = %config.operand_image,
        version = %config.operand_version,
        "Starting operator"
    );
    let watches = SecondaryWatch::new(client, config.namespace.clone(), enqueuer)
        .start(shutdown.clone());
    let result = controller
        .run(watcher(resources, watcher::Config::default()), shutdown.clone())
        .await;

    // Watches only stop on shutdown, which a failed controller never saw
    shutdown.cancel();
    futures::future::join_all(watches).await;
    result
}
