// Copyright (c) 2019-2023 Crater Dog Technologies

//! Request encoding
//!
//! ## Encoding
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    OPCODE     |   ARG_COUNT   |          ARG_LEN (BE)         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! /                       ARG_BYTES (ARG_LEN)                     /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          ARG_LEN (BE)         |                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               +
//! /                              ...                              /
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use alloc::vec::Vec;

use encdec::{Decode, DecodeOwned, Encode};

use crate::{Operation, ProtoError};

/// Length of the request header (opcode and argument count)
pub const HEADER_LEN: usize = 2;

/// Maximum number of arguments per request
pub const MAX_ARGUMENTS: usize = u8::MAX as usize;

/// Maximum length of a single argument
pub const MAX_ARGUMENT_LEN: usize = u16::MAX as usize;

/// A typed HSM request, validated on construction
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Request {
    operation: Operation,
    arguments: Vec<Vec<u8>>,
}

impl Request {
    /// Create a new request, checking argument count and lengths fit the encoding
    pub fn new<A: AsRef<[u8]>>(
        operation: Operation,
        arguments: impl IntoIterator<Item = A>,
    ) -> Result<Self, ProtoError> {
        let arguments: Vec<Vec<u8>> = arguments.into_iter().map(|a| a.as_ref().to_vec()).collect();

        if arguments.len() > MAX_ARGUMENTS {
            return Err(ProtoError::TooManyArguments(arguments.len()));
        }

        if let Some((index, a)) = arguments
            .iter()
            .enumerate()
            .find(|(_, a)| a.len() > MAX_ARGUMENT_LEN)
        {
            return Err(ProtoError::ArgumentTooLarge {
                index,
                len: a.len(),
            });
        }

        Ok(Self {
            operation,
            arguments,
        })
    }

    /// Operation requested
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// Request arguments in order
    pub fn arguments(&self) -> &[Vec<u8>] {
        &self.arguments
    }

    /// Encode the request into a new buffer
    pub fn to_vec(&self) -> Result<Vec<u8>, ProtoError> {
        let mut buff = alloc::vec![0u8; self.encode_len()?];
        let n = self.encode(&mut buff)?;
        buff.truncate(n);
        Ok(buff)
    }
}

impl Encode for Request {
    type Error = ProtoError;

    fn encode_len(&self) -> Result<usize, ProtoError> {
        let args: usize = self.arguments.iter().map(|a| 2 + a.len()).sum();
        Ok(HEADER_LEN + args)
    }

    fn encode(&self, buff: &mut [u8]) -> Result<usize, ProtoError> {
        if buff.len() < self.encode_len()? {
            return Err(ProtoError::InvalidLength);
        }

        buff[0] = self.operation.code();
        buff[1] = self.arguments.len() as u8;
        let mut index = HEADER_LEN;

        for a in &self.arguments {
            buff[index..][..2].copy_from_slice(&(a.len() as u16).to_be_bytes());
            index += 2;

            buff[index..][..a.len()].copy_from_slice(a);
            index += a.len();
        }

        Ok(index)
    }
}

/// Encode an operation and arguments to the wire request format
pub fn encode<A: AsRef<[u8]>>(
    operation: Operation,
    arguments: impl IntoIterator<Item = A>,
) -> Result<Vec<u8>, ProtoError> {
    Request::new(operation, arguments)?.to_vec()
}

/// Leading two bytes of an encoded request
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RequestHeader {
    pub operation: Operation,
    pub arg_count: u8,
}

impl DecodeOwned for RequestHeader {
    type Output = Self;

    type Error = ProtoError;

    fn decode_owned(buff: &[u8]) -> Result<(Self::Output, usize), ProtoError> {
        if buff.len() < HEADER_LEN {
            return Err(ProtoError::InvalidLength);
        }

        let operation =
            Operation::try_from(buff[0]).map_err(|_| ProtoError::UnknownOperation(buff[0]))?;

        Ok((
            Self {
                operation,
                arg_count: buff[1],
            },
            HEADER_LEN,
        ))
    }
}

/// Decode the header of an encoded request
pub fn decode_header(buff: &[u8]) -> Result<RequestHeader, ProtoError> {
    RequestHeader::decode_owned(buff).map(|(h, _)| h)
}

/// Borrowed view of an encoded request, as seen by the device
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RequestView<'a> {
    pub operation: Operation,
    pub arguments: Vec<&'a [u8]>,
}

impl<'a> RequestView<'a> {
    /// Parse a complete request, rejecting trailing bytes
    pub fn parse(buff: &'a [u8]) -> Result<Self, ProtoError> {
        let (v, n) = Self::decode(buff)?;

        if n != buff.len() {
            return Err(ProtoError::TrailingBytes(buff.len() - n));
        }

        Ok(v)
    }
}

impl<'a> Decode<'a> for RequestView<'a> {
    type Output = Self;

    type Error = ProtoError;

    fn decode(buff: &'a [u8]) -> Result<(Self::Output, usize), ProtoError> {
        let (header, mut index) = RequestHeader::decode_owned(buff)?;

        let mut arguments = Vec::with_capacity(header.arg_count as usize);

        for _ in 0..header.arg_count {
            if buff.len() < index + 2 {
                return Err(ProtoError::InvalidLength);
            }
            let len = u16::from_be_bytes([buff[index], buff[index + 1]]) as usize;
            index += 2;

            if buff.len() < index + len {
                return Err(ProtoError::InvalidLength);
            }
            arguments.push(&buff[index..][..len]);
            index += len;
        }

        Ok((
            Self {
                operation: header.operation,
                arguments,
            },
            index,
        ))
    }
}
