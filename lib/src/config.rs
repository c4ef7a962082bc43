// Copyright (c) 2019-2023 Crater Dog Technologies

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use armord_proto::block::BLOCK_CAPACITY;

/// Inter-block acknowledgement mode
#[derive(
    Copy, Clone, PartialEq, Eq, Debug, Default, Display, EnumString, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BlockAck {
    /// Wait for the write acknowledgement only
    #[default]
    Write,
    /// Also wait for one device notification per intermediate block
    Notify,
}

/// [HsmProxy][crate::HsmProxy] configuration
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Payload bytes per block
    pub block_capacity: usize,
    /// Bound on each wait for a device notification
    pub response_timeout_ms: u64,
    /// Inter-block acknowledgement mode
    pub block_ack: BlockAck,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            block_capacity: BLOCK_CAPACITY,
            response_timeout_ms: 5_000,
            block_ack: BlockAck::Write,
        }
    }
}

impl ProxyConfig {
    /// Helper to fetch the response timeout
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }
}

/// [Pipeline][crate::Pipeline] configuration
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Attempts per step before the queue is aborted
    pub max_attempts: usize,
    /// Fixed delay between attempts
    pub retry_delay_ms: u64,
    /// Retry malformed or empty responses instead of aborting
    pub retry_malformed: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay_ms: 1_000,
            retry_malformed: false,
        }
    }
}

impl PipelineConfig {
    /// Helper to fetch the retry delay
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Top level configuration
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub proxy: ProxyConfig,
    pub pipeline: PipelineConfig,
    /// Discovery watchdog
    pub scan_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy: ProxyConfig::default(),
            pipeline: PipelineConfig::default(),
            scan_timeout_ms: 10_000,
        }
    }
}

impl Config {
    /// Helper to fetch the discovery watchdog timeout
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}
