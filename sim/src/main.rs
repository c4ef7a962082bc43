// Copyright (c) 2019-2023 Crater Dog Technologies

//! Command line utility running ArmorD notarization workflows against a
//! simulated peripheral

use std::path::PathBuf;

use clap::Parser;
use log::{debug, error, info, LevelFilter};
use serde::Serialize;

use armord::{
    connect_with_watchdog, BlockAck, Citation, Config, Document, FileKeyStore, HsmProxy,
    KeyStore, MemoryKeyStore, MemoryUploader, Pipeline, Status, Transaction, Workflow,
};
use armord_sim::{SimOptions, SimProvider, SimTransport};

/// ArmorD simulator utility
#[derive(Clone, PartialEq, Debug, Parser)]
struct Options {
    /// Configuration file (TOML)
    #[clap(long)]
    config: Option<PathBuf>,

    /// Key file, key material is held in memory when omitted
    #[clap(long)]
    keys: Option<PathBuf>,

    /// Account for notarized documents
    #[clap(long, default_value = "account")]
    account: String,

    /// Override the block acknowledgement mode
    #[clap(long, value_enum)]
    block_ack: Option<BlockAck>,

    /// Override the attempt ceiling for each step
    #[clap(long)]
    max_attempts: Option<usize>,

    #[clap(flatten)]
    sim: SimOptions,

    /// Subcommand to execute
    #[clap(subcommand)]
    cmd: Actions,

    /// Log level
    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, PartialEq, Debug, Parser)]
#[non_exhaustive]
enum Actions {
    /// Certify keys (generating on first use) and notarize a payment
    Pay {
        /// Merchant name
        #[clap(long)]
        merchant: String,

        /// Payment amount
        #[clap(long)]
        amount: String,
    },

    /// Rotate keys and publish a new certificate
    Rotate,

    /// Erase all key material
    Erase,

    /// Generate keys, pay, rotate, pay again then erase
    Demo,

    /// Show configuration and stored key material
    Info,
}

/// Workflow result printed to stdout
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report<'a> {
    workflow: &'a str,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    public_key: Option<String>,
    version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate: Option<&'a Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate_citation: Option<&'a Citation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction: Option<&'a Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    transaction_citation: Option<&'a Citation>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Options::parse();

    // Setup logging
    let mut c = simplelog::ConfigBuilder::new();
    c.add_filter_allow_str("armord");

    let _ = simplelog::SimpleLogger::init(args.log_level, c.build());

    // Load configuration, applying overrides
    let mut config = match &args.config {
        Some(p) => {
            debug!("Loading configuration from '{}'", p.display());
            let s = tokio::fs::read_to_string(p).await?;
            toml::from_str::<Config>(&s)?
        }
        None => Config::default(),
    };

    if let Some(b) = args.block_ack {
        config.proxy.block_ack = b;
    }
    if let Some(n) = args.max_attempts {
        config.pipeline.max_attempts = n;
    }

    let mut sim = args.sim.clone();
    sim.block_acks |= config.proxy.block_ack == BlockAck::Notify;

    // Setup key store
    let keys: Box<dyn KeyStore> = match &args.keys {
        Some(p) => Box::new(FileKeyStore::new(p)),
        None => Box::new(MemoryKeyStore::default()),
    };

    if args.cmd == Actions::Info {
        let k = keys.load()?;

        let info = serde_json::json!({
            "config": config,
            "device": sim,
            "publicKey": k.public_key.map(hex::encode),
            "version": k.version,
        });

        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    // Connect to the simulated device
    let provider = SimProvider::new(SimTransport::new(sim.clone()));
    let t = connect_with_watchdog(&provider, &sim.name, config.scan_timeout()).await?;

    let proxy = HsmProxy::new(t, config.proxy.clone());
    let mut p = Pipeline::new(proxy, args.account.clone(), keys, MemoryUploader::new())
        .with_config(config.pipeline.clone());

    let workflows = match args.cmd {
        Actions::Pay { merchant, amount } => {
            vec![Workflow::Pay(Transaction::new(merchant, amount))]
        }
        Actions::Rotate => vec![Workflow::Rotate],
        Actions::Erase => vec![Workflow::Erase],
        Actions::Demo => vec![
            Workflow::Pay(Transaction::new("Starbucks", "$4.95")),
            Workflow::Rotate,
            Workflow::Pay(Transaction::new("Safeway", "$23.10")),
            Workflow::Erase,
        ],
        Actions::Info => return Ok(()),
    };

    for w in workflows {
        let name = match &w {
            Workflow::Pay(_) => "pay",
            Workflow::Rotate => "rotate",
            Workflow::Erase => "erase",
        };

        let status = p.execute_workflow(w).await;

        let s = p.state();
        let report = Report {
            workflow: name,
            status: format!("{status:?}"),
            error: p.last_error(),
            public_key: s.keys.public_key.map(hex::encode),
            version: s.keys.version,
            certificate: s.certificate.as_ref(),
            certificate_citation: s.certificate_citation.as_ref(),
            transaction: s.transaction_document.as_ref(),
            transaction_citation: s.transaction_citation.as_ref(),
        };

        println!("{}", serde_json::to_string_pretty(&report)?);

        if let Status::Aborted { step, reason } = status {
            error!("Workflow '{}' aborted at {} ({})", name, step, reason);
            return Err(anyhow::anyhow!("workflow aborted"));
        }

        info!("Workflow '{}' complete", name);
    }

    Ok(())
}

