use envconfig::Envconfig;
use kube::Client;
use tenant_operator::{config::OperatorConfig, init_tracing, runtime};
use tracing::info;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");

    // kube and sqlx both link rustls; pick the provider explicitly.
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    ) {
        tracing::debug!(?e, "crypto provider already installed; proceeding");
    }

    let cfg = OperatorConfig::init_from_env()?;
    info!(
        http_port = cfg.http_port,
        dynamic_provisioning = cfg.dynamic_provisioning,
        "starting tenant operator"
    );

    let client = Client::try_default().await?;
    runtime::run_all(client, cfg).await
}
