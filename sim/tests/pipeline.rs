// Copyright (c) 2019-2023 Crater Dog Technologies

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use armord::{
    Content, ErrorKind, FileKeyStore, HsmProxy, KeyStore, MemoryUploader, Pipeline, Status, Step,
    Transaction, Workflow,
};
use armord_core::engine::State;
use armord_sim::{SimOptions, SimTransport};

mod helpers;
use helpers::{pipeline_config, proxy_config, setup, Setup, ACCOUNT};

#[tokio::test]
async fn pay() -> anyhow::Result<()> {
    let Setup {
        device,
        keys,
        uploader,
        mut pipeline,
    } = setup(SimOptions::default());

    let tx = Transaction::new("Starbucks", "$4.95");
    let status = pipeline.execute_workflow(Workflow::Pay(tx.clone())).await;
    assert_eq!(status, Status::Idle);

    // Keys generated on first use and persisted
    let k = keys.get();
    assert_eq!(k.public_key, device.public_key());
    assert_eq!(k.version, 1);

    let s = pipeline.state();
    assert!(s.queue.is_empty());

    // Certificate is self signed, the transaction cites it
    let cert = s.certificate.as_ref().unwrap();
    let cert_citation = s.certificate_citation.as_ref().unwrap();
    assert!(cert.certificate.is_none());
    assert_eq!(cert.public_key(), k.public_key.map(|k| k.to_vec()));
    assert_eq!(cert_citation.tag, cert.tag);

    let doc = s.transaction_document.as_ref().unwrap();
    assert_eq!(doc.account, ACCOUNT);
    assert_eq!(doc.certificate.as_ref(), Some(cert_citation));
    assert_eq!(doc.content, Content::Transaction(tx));

    // Citation digest covers the signed document
    let tx_citation = s.transaction_citation.as_ref().unwrap();
    assert_eq!(BASE64.decode(&tx_citation.digest)?.len(), 64);

    // Both documents and citations uploaded
    assert_eq!(uploader.document_count(), 2);
    assert_eq!(uploader.document(&cert.tag, &cert.version).as_ref(), Some(cert));
    assert_eq!(uploader.document(&doc.tag, &doc.version).as_ref(), Some(doc));
    assert_eq!(
        uploader.citation(&format!("/{ACCOUNT}/certificate"), &cert.version),
        Some(cert_citation.clone())
    );
    assert_eq!(
        uploader.citation(&format!("/{ACCOUNT}/transactions/{}", doc.tag), &doc.version),
        Some(tx_citation.clone())
    );

    Ok(())
}

#[tokio::test]
async fn pay_twice_reuses_keys() -> anyhow::Result<()> {
    let Setup {
        device,
        mut pipeline,
        ..
    } = setup(SimOptions::default());

    let s = pipeline
        .execute_workflow(Workflow::Pay(Transaction::new("Starbucks", "$4.95")))
        .await;
    assert_eq!(s, Status::Idle);

    let public_key = device.public_key();
    let requests = device.requests();

    let s = pipeline
        .execute_workflow(Workflow::Pay(Transaction::new("Safeway", "$23.10")))
        .await;
    assert_eq!(s, Status::Idle);

    // Generation skipped, one fewer device request
    assert_eq!(device.public_key(), public_key);
    assert_eq!(device.requests() - requests, requests - 1);

    Ok(())
}

#[tokio::test]
async fn rotate() -> anyhow::Result<()> {
    let Setup {
        device,
        keys,
        uploader,
        mut pipeline,
    } = setup(SimOptions::default());

    let s = pipeline
        .execute_workflow(Workflow::Pay(Transaction::new("Starbucks", "$4.95")))
        .await;
    assert_eq!(s, Status::Idle);

    let before = keys.get();

    let s = pipeline.execute_workflow(Workflow::Rotate).await;
    assert_eq!(s, Status::Idle);

    // New key pair and device key, previous key consumed
    let after = keys.get();
    assert_eq!(after.version, 2);
    assert_ne!(after.public_key, before.public_key);
    assert_ne!(after.device_key, before.device_key);
    assert!(after.previous_device_key.is_none());
    assert_eq!(device.state(), State::Active);

    // New certificate is signed by the previous key
    let cert = pipeline.state().certificate.clone().unwrap();
    assert_eq!(cert.version, "v2");

    let old_key = before.public_key.unwrap();
    let valid = pipeline
        .proxy()
        .valid_signature(&old_key, &cert.signature_bytes()?, &cert.signing_bytes()?)
        .await?;
    assert!(valid);

    assert!(uploader.document(&cert.tag, "v2").is_some());

    // Payments continue with the rotated keys
    let s = pipeline
        .execute_workflow(Workflow::Pay(Transaction::new("Safeway", "$23.10")))
        .await;
    assert_eq!(s, Status::Idle);

    Ok(())
}

#[tokio::test]
async fn erase() -> anyhow::Result<()> {
    let Setup {
        device,
        keys,
        mut pipeline,
        ..
    } = setup(SimOptions::default());

    let s = pipeline
        .execute_workflow(Workflow::Pay(Transaction::new("Starbucks", "$4.95")))
        .await;
    assert_eq!(s, Status::Idle);

    let s = pipeline.execute_workflow(Workflow::Erase).await;
    assert_eq!(s, Status::Idle);

    assert!(keys.get().is_empty());
    assert!(pipeline.state().keys.is_empty());
    assert!(pipeline.state().certificate.is_none());
    assert_eq!(device.state(), State::Empty);

    Ok(())
}

#[tokio::test]
async fn transient_faults_retried() -> anyhow::Result<()> {
    let Setup {
        device,
        mut pipeline,
        ..
    } = setup(SimOptions::default());

    device.fail_writes(1).reject_responses(1).drop_responses(1);

    let s = pipeline
        .execute_workflow(Workflow::Pay(Transaction::new("Starbucks", "$4.95")))
        .await;
    assert_eq!(s, Status::Idle);
    assert!(pipeline.state().transaction_citation.is_some());

    Ok(())
}

#[tokio::test]
async fn persistent_faults_abort() -> anyhow::Result<()> {
    let Setup {
        device,
        uploader,
        mut pipeline,
        ..
    } = setup(SimOptions::default());

    device.reject_responses(usize::MAX);

    let mut rx = pipeline.subscribe();

    let s = pipeline
        .execute_workflow(Workflow::Pay(Transaction::new("Starbucks", "$4.95")))
        .await;
    assert_eq!(
        s,
        Status::Aborted {
            step: Step::GenerateKeys,
            reason: ErrorKind::DeviceRejected
        }
    );
    assert_eq!(*rx.borrow_and_update(), s);

    // Exactly five attempts, queue cleared and attempts reset
    assert_eq!(device.requests(), 5);
    assert!(pipeline.state().queue.is_empty());
    assert_eq!(pipeline.state().attempts_remaining, 5);
    assert!(pipeline.state().transaction.is_none());
    assert_eq!(uploader.document_count(), 0);

    // A fresh action starts a clean queue
    device.reject_responses(0);

    let s = pipeline
        .execute_workflow(Workflow::Pay(Transaction::new("Starbucks", "$4.95")))
        .await;
    assert_eq!(s, Status::Idle);
    assert_eq!(uploader.document_count(), 2);

    Ok(())
}

#[tokio::test]
async fn upload_failures_retried() -> anyhow::Result<()> {
    let Setup {
        uploader,
        mut pipeline,
        ..
    } = setup(SimOptions::default());

    uploader.fail_next(2);

    let s = pipeline
        .execute_workflow(Workflow::Pay(Transaction::new("Starbucks", "$4.95")))
        .await;
    assert_eq!(s, Status::Idle);
    assert_eq!(uploader.document_count(), 2);

    Ok(())
}

#[tokio::test]
async fn file_key_store() -> anyhow::Result<()> {
    helpers::setup_logging();

    let d = tempfile::tempdir()?;
    let path = d.path().join("keys.json");
    let device = SimTransport::new(SimOptions::default());

    let pipeline = |store: FileKeyStore| {
        let proxy = HsmProxy::new(device.clone(), proxy_config());
        Pipeline::new(proxy, ACCOUNT, store, MemoryUploader::new()).with_config(pipeline_config())
    };

    let mut p = pipeline(FileKeyStore::new(&path));
    let s = p
        .execute_workflow(Workflow::Pay(Transaction::new("Starbucks", "$4.95")))
        .await;
    assert_eq!(s, Status::Idle);

    // A new session reuses the persisted keys against the same device
    let requests = device.requests();

    let mut p = pipeline(FileKeyStore::new(&path));
    let s = p
        .execute_workflow(Workflow::Pay(Transaction::new("Safeway", "$23.10")))
        .await;
    assert_eq!(s, Status::Idle);
    assert_eq!(device.requests() - requests, requests - 1);

    let k = FileKeyStore::new(&path).load()?;
    assert_eq!(k.public_key, device.public_key());

    Ok(())
}

