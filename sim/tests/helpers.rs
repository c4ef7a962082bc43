#![allow(unused)]

use std::str::FromStr;

use log::LevelFilter;
use simplelog::SimpleLogger;

use armord::{
    HsmProxy, MemoryKeyStore, MemoryUploader, Pipeline, PipelineConfig, ProxyConfig,
};
use armord_sim::{SimOptions, SimTransport};

pub const ACCOUNT: &str = "alice";

/// Setup logging from the `LOG_LEVEL` environment variable
pub fn setup_logging() {
    let log_level = match std::env::var("LOG_LEVEL").map(|v| LevelFilter::from_str(&v)) {
        Ok(Ok(l)) => l,
        _ => LevelFilter::Debug,
    };

    let _ = SimpleLogger::init(log_level, simplelog::Config::default());
}

/// Proxy configuration with a short response timeout
pub fn proxy_config() -> ProxyConfig {
    ProxyConfig {
        response_timeout_ms: 200,
        ..Default::default()
    }
}

/// Pipeline configuration with a short retry delay
pub fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        retry_delay_ms: 5,
        ..Default::default()
    }
}

/// Simulated device, key store, uploader and pipeline
pub struct Setup {
    pub device: SimTransport,
    pub keys: MemoryKeyStore,
    pub uploader: MemoryUploader,
    pub pipeline: Pipeline<SimTransport>,
}

pub fn setup(opts: SimOptions) -> Setup {
    setup_logging();

    let device = SimTransport::new(opts);
    let keys = MemoryKeyStore::default();
    let uploader = MemoryUploader::new();

    let proxy = HsmProxy::new(device.clone(), proxy_config());
    let pipeline = Pipeline::new(proxy, ACCOUNT, keys.clone(), uploader.clone())
        .with_config(pipeline_config());

    Setup {
        device,
        keys,
        uploader,
        pipeline,
    }
}
