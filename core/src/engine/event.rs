// Copyright (c) 2019-2023 Crater Dog Technologies

use armord_proto::{Operation, RequestView, KEY_SIZE, SIG_SIZE};

use super::DeviceError;

/// [`Engine`][super::Engine] input events, decoded from reassembled requests
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Event<'a> {
    /// Generate a key pair bound to the device key
    GenerateKeys { device_key: &'a [u8; KEY_SIZE] },

    /// Replace the key pair, rebinding to a new device key
    RotateKeys {
        device_key: &'a [u8; KEY_SIZE],
        new_device_key: &'a [u8; KEY_SIZE],
    },

    /// Forget all key material
    EraseKeys,

    /// Digest arbitrary bytes
    DigestBytes(&'a [u8]),

    /// Sign arbitrary bytes
    SignBytes {
        device_key: &'a [u8; KEY_SIZE],
        bytes: &'a [u8],
    },

    /// Check a signature
    ValidSignature {
        public_key: &'a [u8; KEY_SIZE],
        signature: &'a [u8; SIG_SIZE],
        bytes: &'a [u8],
    },
}

impl<'a> Event<'a> {
    /// Parse an event from a complete encoded request
    pub fn parse(request: &'a [u8]) -> Result<Self, DeviceError> {
        let r = RequestView::parse(request)?;

        let evt = match (r.operation, r.arguments.as_slice()) {
            (Operation::GenerateKeys, [k]) => Event::GenerateKeys {
                device_key: sized(*k)?,
            },
            (Operation::RotateKeys, [k, n]) => Event::RotateKeys {
                device_key: sized(*k)?,
                new_device_key: sized(*n)?,
            },
            (Operation::EraseKeys, []) => Event::EraseKeys,
            (Operation::DigestBytes, [b]) => Event::DigestBytes(*b),
            (Operation::SignBytes, [k, b]) => Event::SignBytes {
                device_key: sized(*k)?,
                bytes: *b,
            },
            (Operation::ValidSignature, [p, s, b]) => Event::ValidSignature {
                public_key: sized(*p)?,
                signature: sized(*s)?,
                bytes: *b,
            },
            (Operation::LoadBlocks, _) => return Err(DeviceError::UnknownOperation),
            _ => return Err(DeviceError::InvalidArguments),
        };

        Ok(evt)
    }

    /// Operation for this event
    pub fn operation(&self) -> Operation {
        match self {
            Event::GenerateKeys { .. } => Operation::GenerateKeys,
            Event::RotateKeys { .. } => Operation::RotateKeys,
            Event::EraseKeys => Operation::EraseKeys,
            Event::DigestBytes(_) => Operation::DigestBytes,
            Event::SignBytes { .. } => Operation::SignBytes,
            Event::ValidSignature { .. } => Operation::ValidSignature,
        }
    }
}

fn sized<const N: usize>(a: &[u8]) -> Result<&[u8; N], DeviceError> {
    a.try_into().map_err(|_| DeviceError::InvalidArguments)
}

#[cfg(test)]
mod test {
    use armord_proto::request::encode;

    use super::*;

    #[test]
    fn parse_events() {
        let k = [0x11u8; 32];
        let n = [0x22u8; 32];

        let buff = encode(Operation::RotateKeys, [&k, &n]).unwrap();
        assert_eq!(
            Event::parse(&buff),
            Ok(Event::RotateKeys {
                device_key: &k,
                new_device_key: &n
            })
        );

        let buff = encode::<&[u8]>(Operation::EraseKeys, []).unwrap();
        assert_eq!(Event::parse(&buff), Ok(Event::EraseKeys));
    }

    #[test]
    fn parse_rejects_bad_arguments() {
        // Short device key
        let buff = encode(Operation::GenerateKeys, [[0u8; 31]]).unwrap();
        assert_eq!(Event::parse(&buff), Err(DeviceError::InvalidArguments));

        // Missing bytes argument
        let buff = encode(Operation::SignBytes, [[0u8; 32]]).unwrap();
        assert_eq!(Event::parse(&buff), Err(DeviceError::InvalidArguments));

        // Reserved operation
        let buff = encode(Operation::LoadBlocks, [[0u8; 4]]).unwrap();
        assert_eq!(Event::parse(&buff), Err(DeviceError::UnknownOperation));

        // Unknown operation
        assert_eq!(Event::parse(&[0x42, 0x00]), Err(DeviceError::UnknownOperation));

        // Truncated request
        assert_eq!(Event::parse(&[0x04, 0x01, 0x00]), Err(DeviceError::Malformed));
    }
}
