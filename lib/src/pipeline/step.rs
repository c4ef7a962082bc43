// Copyright (c) 2019-2023 Crater Dog Technologies

use strum::{Display, EnumIter, EnumString, EnumVariantNames};

use armord_proto::Operation;

use crate::document::Transaction;

/// Named pipeline stage, each issuing at most one proxy call
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, Debug, Display, EnumString, EnumVariantNames, EnumIter,
)]
#[strum(serialize_all = "camelCase")]
pub enum Step {
    /// Load key material from the key store (local)
    LoadKeys,
    /// Generate a key pair, skipped when a public key exists
    GenerateKeys,
    /// Rotate the key pair and device key
    RotateKeys,
    /// Erase device and host key material
    EraseKeys,
    /// Sign the drafted certificate
    SignCertificate,
    /// Cite the signed certificate
    DigestCertificate,
    /// Sign credentials citing the certificate
    SignCredentials,
    /// Upload the certificate and its citation (local)
    UploadCertificate,
    /// Sign the transaction
    SignTransaction,
    /// Check the transaction signature on the device
    ValidateTransaction,
    /// Cite the signed transaction
    DigestTransaction,
    /// Upload the transaction and its citation (local)
    UploadTransaction,
}

impl Step {
    /// Device operation issued by this step, `None` for local steps
    pub const fn operation(&self) -> Option<Operation> {
        match self {
            Step::LoadKeys | Step::UploadCertificate | Step::UploadTransaction => None,
            Step::GenerateKeys => Some(Operation::GenerateKeys),
            Step::RotateKeys => Some(Operation::RotateKeys),
            Step::EraseKeys => Some(Operation::EraseKeys),
            Step::SignCertificate | Step::SignCredentials | Step::SignTransaction => {
                Some(Operation::SignBytes)
            }
            Step::DigestCertificate | Step::DigestTransaction => Some(Operation::DigestBytes),
            Step::ValidateTransaction => Some(Operation::ValidSignature),
        }
    }
}

/// User actions, expanding to step queues
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Workflow {
    /// Certify keys (generating on first use) then sign, validate, cite and
    /// upload a payment
    Pay(Transaction),
    /// Rotate keys and publish the new certificate
    Rotate,
    /// Erase all key material
    Erase,
}

impl Workflow {
    /// Steps for this workflow, in execution order
    pub fn steps(&self) -> &'static [Step] {
        match self {
            Workflow::Pay(_) => &[
                Step::LoadKeys,
                Step::GenerateKeys,
                Step::SignCertificate,
                Step::DigestCertificate,
                Step::SignCredentials,
                Step::UploadCertificate,
                Step::SignTransaction,
                Step::ValidateTransaction,
                Step::DigestTransaction,
                Step::UploadTransaction,
            ],
            Workflow::Rotate => &[
                Step::LoadKeys,
                Step::RotateKeys,
                Step::SignCertificate,
                Step::DigestCertificate,
                Step::SignCredentials,
                Step::UploadCertificate,
            ],
            Workflow::Erase => &[Step::EraseKeys],
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn local_steps() {
        assert_eq!(Step::LoadKeys.operation(), None);
        assert_eq!(Step::UploadTransaction.operation(), None);
        assert_eq!(Step::SignCredentials.operation(), Some(Operation::SignBytes));
        assert_eq!(Step::ValidateTransaction.to_string(), "validateTransaction");
    }

    #[test]
    fn workflows() {
        let pay = Workflow::Pay(Transaction::new("Starbucks", "$4.95"));
        assert_eq!(pay.steps().len(), 10);
        assert_eq!(pay.steps()[0], Step::LoadKeys);
        assert_eq!(pay.steps()[9], Step::UploadTransaction);

        assert_eq!(Workflow::Rotate.steps()[1], Step::RotateKeys);
        assert_eq!(Workflow::Erase.steps(), &[Step::EraseKeys]);
    }
}
