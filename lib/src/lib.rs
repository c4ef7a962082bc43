// Copyright (c) 2019-2023 Crater Dog Technologies

//! ArmorD HSM proxy and notarization pipeline
//!
//! The [HsmProxy] drives single logical requests against an ArmorD hardware
//! security module over any [Transport], chunking requests to fit the transport
//! MTU and routing the single device response back to the caller.
//!
//! The [Pipeline] sequences proxy calls into notarization workflows (key
//! generation and rotation, certificate and transaction signing, citation and
//! upload) with bounded, fixed-delay retry and a single abort path.
//!
//! ```no_run
//! # async fn demo<T: armord::Transport>(t: T) -> Result<(), armord::Error> {
//! use armord::{HsmProxy, ProxyConfig};
//!
//! let proxy = HsmProxy::new(t, ProxyConfig::default());
//! let digest = proxy.digest_bytes(b"hello").await?;
//! # Ok(())
//! # }
//! ```

/// Re-export `armord-proto` for consumers
pub use armord_proto::{self as proto};

pub mod transport;
pub use transport::{connect_with_watchdog, Connect, Notification, Transport, TransportError};

mod error;
pub use error::{Error, ErrorKind};

mod config;
pub use config::{BlockAck, Config, PipelineConfig, ProxyConfig};

mod proxy;
pub use proxy::HsmProxy;

pub mod keys;
pub use keys::{FileKeyStore, KeyMaterial, KeyStore, MemoryKeyStore};

pub mod document;
pub use document::{Assembler, Citation, Content, Document, JsonAssembler, Transaction};

pub mod upload;
pub use upload::{MemoryUploader, Uploader};

pub mod pipeline;
pub use pipeline::{Pipeline, PipelineState, Status, Step, Workflow};

#[cfg(test)]
pub(crate) mod mock;
