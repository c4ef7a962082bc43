// Copyright (c) 2019-2023 Crater Dog Technologies

//! Notarization pipeline
//!
//! The [Pipeline] owns a queue of [Step]s and executes the head step against
//! the [HsmProxy], retrying the same step with a fixed delay until it
//! succeeds or the attempt ceiling is reached. All step results flow through
//! [PipelineState::transition], so the queue is consistent after every call.

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::{
    config::PipelineConfig,
    document::{Assembler, Citation, Document, JsonAssembler},
    keys::{KeyMaterial, KeyStore},
    proxy::HsmProxy,
    transport::Transport,
    upload::Uploader,
    Error,
};

mod step;
pub use step::{Step, Workflow};

mod state;
pub use state::{PipelineState, Status, StepOutput};

/// Pipeline driving notarization workflows against an [HsmProxy]
pub struct Pipeline<T: Transport> {
    proxy: HsmProxy<T>,
    account: String,

    keys: Box<dyn KeyStore>,
    assembler: Box<dyn Assembler>,
    uploader: Box<dyn Uploader>,

    config: PipelineConfig,
    state: PipelineState,
    status: watch::Sender<Status>,
    last_error: Option<String>,
}

impl<T: Transport> Pipeline<T> {
    /// Create a new pipeline for the provided account, using the stock [JsonAssembler]
    pub fn new(
        proxy: HsmProxy<T>,
        account: impl Into<String>,
        keys: impl KeyStore + 'static,
        uploader: impl Uploader + 'static,
    ) -> Self {
        let config = PipelineConfig::default();
        let (status, _) = watch::channel(Status::Idle);

        Self {
            proxy,
            account: account.into(),
            keys: Box::new(keys),
            assembler: Box::new(JsonAssembler),
            uploader: Box::new(uploader),
            state: PipelineState::new(config.max_attempts),
            config,
            status,
            last_error: None,
        }
    }

    /// Replace the document assembler
    pub fn with_assembler(mut self, assembler: impl Assembler + 'static) -> Self {
        self.assembler = Box::new(assembler);
        self
    }

    /// Replace the pipeline configuration
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.state.attempts_remaining = config.max_attempts;
        self.config = config;
        self
    }

    /// Replace the step queue
    pub fn enqueue(&mut self, steps: impl IntoIterator<Item = Step>) {
        self.state.enqueue(steps, self.config.max_attempts);
        self.last_error = None;

        debug!("Enqueued steps: {:?}", self.state.queue);

        self.publish(match self.state.head() {
            Some(s) => Status::Running(s),
            None => Status::Idle,
        });
    }

    /// Replace the step queue with the steps of a [Workflow]
    pub fn submit(&mut self, workflow: Workflow) {
        let steps = workflow.steps();

        if let Workflow::Pay(tx) = workflow {
            self.state.transaction = Some(tx);
        }

        self.enqueue(steps.iter().copied());
    }

    /// Subscribe to status updates
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    /// Current status
    pub fn status(&self) -> Status {
        *self.status.borrow()
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn proxy(&self) -> &HsmProxy<T> {
        &self.proxy
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// Message of the most recent step failure
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Execute the head step once, returning the resulting status
    pub async fn run_next(&mut self) -> Status {
        let step = match self.state.head() {
            Some(s) => s,
            None => {
                self.publish(Status::Idle);
                return Status::Idle;
            }
        };

        debug!(
            "Running step {} ({} attempts remaining)",
            step, self.state.attempts_remaining
        );

        self.publish(Status::Running(step));
        self.state.in_flight = step.operation();

        let result = self.execute(step).await;
        self.state.in_flight = None;

        if let Err(e) = &result {
            self.last_error = Some(e.to_string());
        }

        let status = self.state.transition(result, &self.config);
        self.publish(status);

        status
    }

    /// Execute queued steps until the queue drains or is aborted
    pub async fn run(&mut self) -> Status {
        loop {
            match self.run_next().await {
                Status::Retrying { .. } => tokio::time::sleep(self.config.retry_delay()).await,
                Status::Running(_) => (),
                s @ (Status::Idle | Status::Aborted { .. }) => return s,
            }
        }
    }

    /// Submit a workflow and run it to completion
    pub async fn execute_workflow(&mut self, workflow: Workflow) -> Status {
        info!("Starting workflow: {:?}", workflow);

        self.submit(workflow);
        self.run().await
    }

    fn publish(&self, status: Status) {
        self.status.send_replace(status);
    }

    async fn execute(&self, step: Step) -> Result<StepOutput, Error> {
        match step {
            Step::LoadKeys => self.load_keys(),
            Step::GenerateKeys => self.generate_keys().await,
            Step::RotateKeys => self.rotate_keys().await,
            Step::EraseKeys => self.erase_keys().await,
            Step::SignCertificate => self.sign_certificate().await,
            Step::DigestCertificate => {
                let d = self.signed(&self.state.certificate, "certificate")?;
                let c = self.cite(d).await?;

                Ok(StepOutput {
                    certificate_citation: Some(c),
                    ..Default::default()
                })
            }
            Step::SignCredentials => self.sign_credentials().await,
            Step::UploadCertificate => {
                let d = self.signed(&self.state.certificate, "certificate")?;
                let c = self
                    .state
                    .certificate_citation
                    .as_ref()
                    .ok_or(Error::MissingState("certificate citation"))?;
                let name = format!("/{}/certificate", self.account);

                self.upload(d, &name, c).await?;

                Ok(StepOutput::default())
            }
            Step::SignTransaction => self.sign_transaction().await,
            Step::ValidateTransaction => self.validate_transaction().await,
            Step::DigestTransaction => {
                let d = self.signed(&self.state.transaction_document, "transaction document")?;
                let c = self.cite(d).await?;

                Ok(StepOutput {
                    transaction_citation: Some(c),
                    ..Default::default()
                })
            }
            Step::UploadTransaction => {
                let d = self.signed(&self.state.transaction_document, "transaction document")?;
                let c = self
                    .state
                    .transaction_citation
                    .as_ref()
                    .ok_or(Error::MissingState("transaction citation"))?;
                let name = format!("/{}/transactions/{}", self.account, d.tag);

                self.upload(d, &name, c).await?;

                Ok(StepOutput::default())
            }
        }
    }

    /// Load key material, a store failure starts from empty material
    fn load_keys(&self) -> Result<StepOutput, Error> {
        let mut keys = match self.keys.load() {
            Ok(k) => k,
            Err(e) => {
                warn!("Failed to load keys, starting empty: {}", e);
                KeyMaterial::default()
            }
        };

        // A fresh device key cannot drive an existing device key pair
        if keys.device_key.is_none() && keys.public_key.is_some() {
            warn!("Stored public key has no device key, erase keys to recover");
            return Err(Error::MissingState("device key"));
        }

        if keys.device_key.is_none() {
            debug!("Generating device key");
            keys.device_key = Some(KeyMaterial::random_device_key());
        }

        Ok(StepOutput {
            keys: Some(keys),
            ..Default::default()
        })
    }

    async fn generate_keys(&self) -> Result<StepOutput, Error> {
        let mut keys = self.state.keys.clone();

        let public_key = match keys.public_key {
            Some(k) => {
                debug!("Public key exists, skipping generation");
                k
            }
            None => {
                let device_key = keys.device_key.ok_or(Error::MissingState("device key"))?;
                let k = self.proxy.generate_keys(&device_key).await?;

                keys.public_key = Some(k);
                keys.version = keys.version.max(1);
                self.keys.save(&keys)?;

                info!("Generated public key: {}", hex::encode(k));
                k
            }
        };

        let certificate = self
            .assembler
            .certificate(&self.account, &public_key, keys.version.max(1));

        Ok(StepOutput {
            keys: Some(keys),
            certificate: Some(certificate),
            ..Default::default()
        })
    }

    async fn rotate_keys(&self) -> Result<StepOutput, Error> {
        let mut keys = self.state.keys.clone();
        let device_key = keys.device_key.ok_or(Error::MissingState("device key"))?;
        let new_device_key = KeyMaterial::random_device_key();

        let public_key = self.proxy.rotate_keys(&device_key, &new_device_key).await?;

        keys.public_key = Some(public_key);
        keys.device_key = Some(new_device_key);
        keys.previous_device_key = Some(device_key);
        keys.version += 1;
        self.keys.save(&keys)?;

        info!(
            "Rotated to public key: {} (version {})",
            hex::encode(public_key),
            keys.version
        );

        let certificate = self
            .assembler
            .certificate(&self.account, &public_key, keys.version);

        Ok(StepOutput {
            keys: Some(keys),
            certificate: Some(certificate),
            ..Default::default()
        })
    }

    async fn erase_keys(&self) -> Result<StepOutput, Error> {
        if !self.proxy.erase_keys().await? {
            return Err(Error::DeviceRejected(None));
        }

        self.keys.save(&KeyMaterial::default())?;

        info!("Erased keys");

        Ok(StepOutput {
            erase: true,
            ..Default::default()
        })
    }

    /// Sign the drafted certificate, using the previous device key once after rotation
    async fn sign_certificate(&self) -> Result<StepOutput, Error> {
        let certificate = self
            .state
            .certificate
            .as_ref()
            .ok_or(Error::MissingState("certificate"))?;

        let (device_key, previous) = match self.state.keys.previous_device_key {
            Some(k) => (k, true),
            None => (self.device_key()?, false),
        };

        let signature = self
            .proxy
            .sign_bytes(&device_key, &certificate.signing_bytes()?)
            .await?;
        let signed = self
            .assembler
            .attach_signature(certificate.clone(), &signature);

        let mut output = StepOutput {
            certificate: Some(signed),
            ..Default::default()
        };

        if previous {
            let mut keys = self.state.keys.clone();
            keys.previous_device_key = None;
            self.keys.save(&keys)?;

            output.keys = Some(keys);
        }

        Ok(output)
    }

    async fn sign_credentials(&self) -> Result<StepOutput, Error> {
        let citation = self
            .state
            .certificate_citation
            .as_ref()
            .ok_or(Error::MissingState("certificate citation"))?;

        let credentials = self.assembler.credentials(&self.account, citation);
        let signed = self.sign(credentials).await?;

        Ok(StepOutput {
            credentials: Some(signed),
            ..Default::default()
        })
    }

    async fn sign_transaction(&self) -> Result<StepOutput, Error> {
        let tx = self
            .state
            .transaction
            .as_ref()
            .ok_or(Error::MissingState("transaction"))?;

        let document = self.assembler.transaction(
            &self.account,
            tx,
            self.state.certificate_citation.as_ref(),
        );
        let signed = self.sign(document).await?;

        Ok(StepOutput {
            transaction_document: Some(signed),
            ..Default::default()
        })
    }

    async fn validate_transaction(&self) -> Result<StepOutput, Error> {
        let public_key = self
            .state
            .keys
            .public_key
            .ok_or(Error::MissingState("public key"))?;
        let document = self
            .state
            .transaction_document
            .as_ref()
            .ok_or(Error::MissingState("transaction document"))?;

        let signature = document.signature_bytes()?;

        let valid = self
            .proxy
            .valid_signature(&public_key, &signature, &document.signing_bytes()?)
            .await?;

        match valid {
            true => Ok(StepOutput::default()),
            false => Err(Error::InvalidSignature),
        }
    }

    fn device_key(&self) -> Result<[u8; 32], Error> {
        self.state
            .keys
            .device_key
            .ok_or(Error::MissingState("device key"))
    }

    /// Sign a document with the current device key
    async fn sign(&self, document: Document) -> Result<Document, Error> {
        let device_key = self.device_key()?;

        let signature = self
            .proxy
            .sign_bytes(&device_key, &document.signing_bytes()?)
            .await?;

        Ok(self.assembler.attach_signature(document, &signature))
    }

    /// Digest a signed document into a citation
    async fn cite(&self, document: &Document) -> Result<Citation, Error> {
        let digest = self.proxy.digest_bytes(&document.to_bytes()?).await?;

        Ok(self
            .assembler
            .citation(&document.tag, &document.version, &digest))
    }

    /// Upload a signed document and its citation using the signed credentials
    async fn upload(
        &self,
        document: &Document,
        name: &str,
        citation: &Citation,
    ) -> Result<(), Error> {
        let credentials = self.signed(&self.state.credentials, "credentials")?;

        self.uploader.put_document(credentials, document).await?;
        self.uploader
            .put_citation(credentials, name, &document.version, citation)
            .await
    }

    /// Fetch a document that must already be signed
    fn signed<'a>(
        &self,
        document: &'a Option<Document>,
        name: &'static str,
    ) -> Result<&'a Document, Error> {
        match document {
            Some(d) if d.is_signed() => Ok(d),
            _ => Err(Error::MissingState(name)),
        }
    }
}
