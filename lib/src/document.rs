// Copyright (c) 2019-2023 Crater Dog Technologies

//! Notarized documents and citations
//!
//! Documents are encoded as JSON, binary fields as base64. The bytes signed by
//! the device are the encoding *without* the signature, the bytes digested for
//! a citation are the encoding of the signed document.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use armord_proto::{DIGEST, KEY_SIZE, PROTOCOL, SIGNATURE, SIG_SIZE};

use crate::Error;

/// Size of random document tags
pub const TAG_SIZE: usize = 20;

/// Payment transaction content
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub tag: String,
    pub timestamp: u64,
    pub merchant: String,
    pub amount: String,
}

impl Transaction {
    /// Create a new transaction with a fresh tag
    pub fn new(merchant: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            tag: random_tag(),
            timestamp: timestamp(),
            merchant: merchant.into(),
            amount: amount.into(),
        }
    }
}

/// Pointer to a notarized document version
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub tag: String,
    pub version: String,
    /// Base64 digest of the signed document
    pub digest: String,
}

/// Document content
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Content {
    /// Public key certificate
    #[serde(rename_all = "camelCase")]
    Certificate {
        public_key: String,
        algorithm: String,
        digest: String,
    },
    /// Proof of key possession used to authorise uploads
    Credentials { nonce: String },
    /// Payment transaction
    Transaction(Transaction),
}

/// Notarized document
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub protocol: String,
    pub tag: String,
    pub version: String,
    pub account: String,
    pub timestamp: u64,
    pub content: Content,
    /// Certificate vouching for the signing key, `None` when self-signed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Citation>,
    /// Base64 signature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl Document {
    /// Bytes to be signed (the encoding without any signature)
    pub fn signing_bytes(&self) -> Result<Vec<u8>, Error> {
        let mut d = self.clone();
        d.signature = None;
        Ok(serde_json::to_vec(&d)?)
    }

    /// Complete encoding, including the signature
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Check whether a signature is attached
    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Decode the attached signature
    pub fn signature_bytes(&self) -> Result<[u8; SIG_SIZE], Error> {
        let s = self
            .signature
            .as_ref()
            .ok_or(Error::MissingState("signature"))?;

        let b = BASE64.decode(s).map_err(|_| Error::InvalidSignature)?;
        b.as_slice().try_into().map_err(|_| Error::InvalidSignature)
    }

    /// Public key carried by a certificate
    pub fn public_key(&self) -> Option<Vec<u8>> {
        match &self.content {
            Content::Certificate { public_key, .. } => BASE64.decode(public_key).ok(),
            _ => None,
        }
    }
}

/// Document assembly collaborator, pure formatting
pub trait Assembler: Send + Sync {
    /// Draft a certificate for the provided public key
    fn certificate(&self, account: &str, public_key: &[u8; KEY_SIZE], version: u32) -> Document;

    /// Draft credentials citing the provided certificate
    fn credentials(&self, account: &str, certificate: &Citation) -> Document;

    /// Draft a transaction document
    fn transaction(
        &self,
        account: &str,
        transaction: &Transaction,
        certificate: Option<&Citation>,
    ) -> Document;

    /// Create a citation for a signed document
    fn citation(&self, tag: &str, version: &str, digest: &[u8]) -> Citation;

    /// Attach a signature to a document
    fn attach_signature(&self, document: Document, signature: &[u8]) -> Document;
}

/// Stock JSON [Assembler] using random tags and unix timestamps
#[derive(Clone, Debug, Default)]
pub struct JsonAssembler;

impl JsonAssembler {
    fn document(&self, account: &str, version: String, content: Content) -> Document {
        Document {
            protocol: PROTOCOL.to_string(),
            tag: random_tag(),
            version,
            account: account.to_string(),
            timestamp: timestamp(),
            content,
            certificate: None,
            signature: None,
        }
    }
}

impl Assembler for JsonAssembler {
    fn certificate(&self, account: &str, public_key: &[u8; KEY_SIZE], version: u32) -> Document {
        let content = Content::Certificate {
            public_key: BASE64.encode(public_key),
            algorithm: SIGNATURE.to_string(),
            digest: DIGEST.to_string(),
        };

        self.document(account, format!("v{version}"), content)
    }

    fn credentials(&self, account: &str, certificate: &Citation) -> Document {
        let content = Content::Credentials {
            nonce: random_tag(),
        };

        let mut d = self.document(account, "v1".to_string(), content);
        d.certificate = Some(certificate.clone());
        d
    }

    fn transaction(
        &self,
        account: &str,
        transaction: &Transaction,
        certificate: Option<&Citation>,
    ) -> Document {
        let content = Content::Transaction(transaction.clone());

        let mut d = self.document(account, "v1".to_string(), content);
        d.certificate = certificate.cloned();
        d
    }

    fn citation(&self, tag: &str, version: &str, digest: &[u8]) -> Citation {
        Citation {
            tag: tag.to_string(),
            version: version.to_string(),
            digest: BASE64.encode(digest),
        }
    }

    fn attach_signature(&self, mut document: Document, signature: &[u8]) -> Document {
        document.signature = Some(BASE64.encode(signature));
        document
    }
}

/// Random hex tag
pub fn random_tag() -> String {
    let mut b = [0u8; TAG_SIZE];
    rand::thread_rng().fill_bytes(&mut b);
    hex::encode(b)
}

fn timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
