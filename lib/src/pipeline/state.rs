// Copyright (c) 2019-2023 Crater Dog Technologies

use std::collections::VecDeque;

use log::{error, warn};

use armord_proto::Operation;

use super::Step;
use crate::{
    config::PipelineConfig,
    document::{Citation, Document, Transaction},
    keys::KeyMaterial,
    Error, ErrorKind,
};

/// Pipeline status, published to observers
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Status {
    /// No queued steps
    Idle,
    /// Executing the provided step
    Running(Step),
    /// Step failed, waiting to re-run it
    Retrying {
        step: Step,
        attempts_remaining: usize,
        reason: ErrorKind,
    },
    /// Queue abandoned after a failed step
    Aborted { step: Step, reason: ErrorKind },
}

impl Status {
    /// Check whether the pipeline has stopped (idle or aborted)
    pub fn is_done(&self) -> bool {
        matches!(self, Status::Idle | Status::Aborted { .. })
    }
}

/// Updates produced by a successful step, committed by [PipelineState::apply]
#[derive(Clone, Default, Debug)]
pub struct StepOutput {
    pub keys: Option<KeyMaterial>,
    pub certificate: Option<Document>,
    pub certificate_citation: Option<Citation>,
    pub credentials: Option<Document>,
    pub transaction_document: Option<Document>,
    pub transaction_citation: Option<Citation>,
    /// Clear key material and every drafted document
    pub erase: bool,
}

/// State owned by the [Pipeline][super::Pipeline]
#[derive(Clone, Default, Debug)]
pub struct PipelineState {
    /// Pending steps, head first
    pub queue: VecDeque<Step>,
    /// Attempts left for the head step
    pub attempts_remaining: usize,
    /// Key material loaded or generated by this pipeline
    pub keys: KeyMaterial,
    /// Operation currently issued to the device
    pub in_flight: Option<Operation>,

    /// Transaction for the current payment
    pub transaction: Option<Transaction>,
    /// Drafted (then signed) certificate
    pub certificate: Option<Document>,
    pub certificate_citation: Option<Citation>,
    pub credentials: Option<Document>,
    pub transaction_document: Option<Document>,
    pub transaction_citation: Option<Citation>,
}

impl PipelineState {
    /// Create an idle state with the provided attempt ceiling
    pub fn new(max_attempts: usize) -> Self {
        Self {
            attempts_remaining: max_attempts,
            ..Default::default()
        }
    }

    /// Replace the queue, a new user action supersedes any leftover steps
    pub fn enqueue(&mut self, steps: impl IntoIterator<Item = Step>, max_attempts: usize) {
        self.queue = steps.into_iter().collect();
        self.attempts_remaining = max_attempts;
        self.in_flight = None;
    }

    /// Step at the head of the queue
    pub fn head(&self) -> Option<Step> {
        self.queue.front().copied()
    }

    /// Forget every drafted document, retaining key material
    pub fn clear_documents(&mut self) {
        self.certificate = None;
        self.certificate_citation = None;
        self.credentials = None;
        self.transaction_document = None;
        self.transaction_citation = None;
    }

    /// Commit the output of a successful step
    pub fn apply(&mut self, o: StepOutput) {
        if o.erase {
            self.keys = KeyMaterial::default();
            self.clear_documents();
        }

        if let Some(k) = o.keys {
            self.keys = k;
        }
        if let Some(d) = o.certificate {
            self.certificate = Some(d);
        }
        if let Some(c) = o.certificate_citation {
            self.certificate_citation = Some(c);
        }
        if let Some(d) = o.credentials {
            self.credentials = Some(d);
        }
        if let Some(d) = o.transaction_document {
            self.transaction_document = Some(d);
        }
        if let Some(c) = o.transaction_citation {
            self.transaction_citation = Some(c);
        }
    }

    /// Apply the result of executing the head step, returning the new status.
    ///
    /// The head step is only removed on success; failures leave it in place for
    /// a retry until the attempt ceiling is reached, at which point the whole
    /// queue is abandoned.
    pub fn transition(&mut self, result: Result<StepOutput, Error>, config: &PipelineConfig) -> Status {
        let step = match self.head() {
            Some(s) => s,
            None => return Status::Idle,
        };

        let e = match result {
            Ok(output) => {
                self.queue.pop_front();
                self.attempts_remaining = config.max_attempts;
                self.apply(output);

                return match self.head() {
                    Some(next) => Status::Running(next),
                    None => Status::Idle,
                };
            }
            Err(e) => e,
        };

        if !(e.is_retryable() || (config.retry_malformed && e.is_malformed())) {
            error!("Step {} failed: {}, aborting", step, e);
            return self.abort(step, e.kind(), config);
        }

        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
        if self.attempts_remaining == 0 {
            error!("Step {} failed: {}, attempts exhausted", step, e);
            return self.abort(step, e.kind(), config);
        }

        warn!(
            "Step {} failed: {} ({} attempts remaining)",
            step, e, self.attempts_remaining
        );

        Status::Retrying {
            step,
            attempts_remaining: self.attempts_remaining,
            reason: e.kind(),
        }
    }

    fn abort(&mut self, step: Step, reason: ErrorKind, config: &PipelineConfig) -> Status {
        self.queue.clear();
        self.attempts_remaining = config.max_attempts;
        self.in_flight = None;
        self.transaction = None;
        self.clear_documents();

        Status::Aborted { step, reason }
    }
}

#[cfg(test)]
mod test {
    use armord_proto::ResponseShape;

    use super::*;
    use crate::document::{Assembler, JsonAssembler};

    fn state(steps: &[Step]) -> (PipelineState, PipelineConfig) {
        let c = PipelineConfig::default();
        let mut s = PipelineState::new(c.max_attempts);
        s.enqueue(steps.iter().copied(), c.max_attempts);
        (s, c)
    }

    fn malformed() -> Error {
        Error::MalformedResponse {
            operation: Operation::GenerateKeys,
            expected: ResponseShape::Exact(32),
            actual: 3,
        }
    }

    #[test]
    fn retry_ceiling() {
        let (mut s, c) = state(&[Step::GenerateKeys, Step::SignCertificate]);

        for n in (1..5).rev() {
            let r = s.transition(Err(Error::TransportUnavailable), &c);
            assert_eq!(
                r,
                Status::Retrying {
                    step: Step::GenerateKeys,
                    attempts_remaining: n,
                    reason: ErrorKind::Transport
                }
            );
            assert_eq!(s.head(), Some(Step::GenerateKeys));
        }

        let r = s.transition(Err(Error::TransportUnavailable), &c);
        assert_eq!(
            r,
            Status::Aborted {
                step: Step::GenerateKeys,
                reason: ErrorKind::Transport
            }
        );
        assert!(s.queue.is_empty());
        assert_eq!(s.attempts_remaining, 5);
    }

    #[test]
    fn success_resets_attempts() {
        let (mut s, c) = state(&[Step::LoadKeys, Step::GenerateKeys]);

        s.transition(Err(Error::RequestTimeout), &c);
        assert_eq!(s.attempts_remaining, 4);

        let r = s.transition(Ok(StepOutput::default()), &c);
        assert_eq!(r, Status::Running(Step::GenerateKeys));
        assert_eq!(s.attempts_remaining, 5);

        let r = s.transition(Ok(StepOutput::default()), &c);
        assert_eq!(r, Status::Idle);
        assert!(s.queue.is_empty());
    }

    #[test]
    fn fatal_errors_abort_immediately() {
        let (mut s, c) = state(&[Step::SignCertificate]);

        let r = s.transition(Err(Error::MissingState("certificate")), &c);
        assert_eq!(
            r,
            Status::Aborted {
                step: Step::SignCertificate,
                reason: ErrorKind::MissingState
            }
        );

        let (mut s, c) = state(&[Step::GenerateKeys]);
        let r = s.transition(Err(malformed()), &c);
        assert!(matches!(r, Status::Aborted { .. }));
    }

    #[test]
    fn malformed_retried_when_configured() {
        let (mut s, mut c) = state(&[Step::GenerateKeys]);
        c.retry_malformed = true;

        let r = s.transition(Err(malformed()), &c);
        assert!(matches!(r, Status::Retrying { .. }));
    }

    #[test]
    fn abort_clears_documents_and_keeps_keys() {
        let (mut s, c) = state(&[Step::SignTransaction]);
        let a = JsonAssembler;

        s.keys.public_key = Some([0x01; 32]);
        s.certificate = Some(a.certificate("account", &[0x01; 32], 1));
        s.transaction = Some(Transaction::new("Starbucks", "$4.95"));

        s.transition(Err(Error::InvalidSignature), &c);

        assert!(s.certificate.is_none());
        assert!(s.transaction.is_none());
        assert_eq!(s.keys.public_key, Some([0x01; 32]));
    }

    #[test]
    fn erase_output_clears_state() {
        let (mut s, c) = state(&[Step::EraseKeys]);
        s.keys.public_key = Some([0x01; 32]);
        s.keys.device_key = Some([0x02; 32]);

        let o = StepOutput {
            erase: true,
            ..Default::default()
        };
        assert_eq!(s.transition(Ok(o), &c), Status::Idle);
        assert!(s.keys.is_empty());
    }
}
