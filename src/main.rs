//! Watch any Kubernetes resource type and log its add, update and delete events.
#![warn(missing_debug_implementations, rust_2018_idioms)]

use std::{path::PathBuf, time::Duration};

use clap::{
    builder::{OsStringValueParser, TypedValueParser},
    Parser,
};
use dynwatch::{lifecycle, Gvr, Lifecycle, LoggingHandler, Settings};
use env_logger::Env;
use log::error;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Opts {
    /// Absolute path to the kubeconfig file; in-cluster config when empty
    #[arg(long, value_parser = OsStringValueParser::new().map(PathBuf::from))]
    kubeconfig: Option<PathBuf>,
    /// The group/version/resource to be watched, e.g. apps/v1/deployments
    #[arg(long)]
    gvr: Gvr,
    /// Only watch this namespace
    #[arg(long)]
    namespace: Option<String>,
    /// Label selector for list and watch
    #[arg(long)]
    selector: Option<String>,
    /// Resync period in seconds, 0 disables resync
    #[arg(long, default_value_t = 0)]
    resync_secs: u64,
}

impl From<Opts> for Settings {
    fn from(opts: Opts) -> Self {
        let mut settings = Settings::new(opts.gvr);
        settings.kubeconfig = opts.kubeconfig.filter(|p| !p.as_os_str().is_empty());
        settings.namespace = opts.namespace;
        settings.label_selector = opts.selector;
        settings.resync = Some(Duration::from_secs(opts.resync_secs)).filter(|d| !d.is_zero());
        settings
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info,kube=warn")).init();

    let settings = Settings::from(Opts::parse());
    let lifecycle = Lifecycle::new();

    let informer = match dynwatch::prepare(&settings).await {
        Ok(informer) => informer,
        Err(e) => {
            error!("could not start watching {}: {}", settings.gvr, e);
            std::process::exit(1);
        }
    };

    lifecycle.launch(informer, LoggingHandler);
    lifecycle.stop_on(lifecycle::shutdown_signal()).await?;

    Ok(())
}
