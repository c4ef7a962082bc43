// Copyright (c) 2019-2023 Crater Dog Technologies

use alloc::vec::Vec;

/// Acknowledgement payload for intermediate blocks
pub const BLOCK_ACK: u8 = 0x01;

/// [`Engine`][super::Engine] outputs (in response to written blocks)
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Output {
    /// Intermediate block buffered, no response due yet
    BlockLoaded { index: u8 },

    /// Complete response to a logical request
    Response(Vec<u8>),
}

impl Output {
    /// Bytes notified to the host for this output, where firmware answers
    /// intermediate blocks with an acknowledgement
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Output::BlockLoaded { index } => alloc::vec![BLOCK_ACK, *index],
            Output::Response(r) => r.clone(),
        }
    }

    /// Response to a complete logical request, if any
    pub fn response(&self) -> Option<&[u8]> {
        match self {
            Output::Response(r) => Some(r),
            _ => None,
        }
    }
}
