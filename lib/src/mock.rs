// Copyright (c) 2019-2023 Crater Dog Technologies

//! Scripted [Transport] for unit tests

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use armord_proto::block::BLOCK_MARKER;

use crate::transport::{Notification, Transport, TransportError};

/// Action taken by the mock when a final block is written
#[derive(Clone, Debug)]
pub enum Script {
    /// Notify the provided response
    Respond(Vec<u8>),
    /// Never respond
    Silent,
    /// Drop the connection
    Disconnect,
}

#[derive(Default)]
struct State {
    connected: bool,
    writes: Vec<Vec<u8>>,
    subscribers: Vec<UnboundedSender<Notification>>,
    script: VecDeque<Script>,
    repeat: Option<Script>,
    fail_writes: usize,
    block_acks: bool,
}

#[derive(Clone)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    pub fn new() -> Self {
        let state = State {
            connected: true,
            ..Default::default()
        };

        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Queue a response for the next final block
    pub fn respond(&self, r: impl Into<Vec<u8>>) -> &Self {
        self.push(Script::Respond(r.into()))
    }

    pub fn push(&self, s: Script) -> &Self {
        self.state.lock().unwrap().script.push_back(s);
        self
    }

    /// Action for every final block once the script is exhausted
    pub fn always(&self, s: Script) -> &Self {
        self.state.lock().unwrap().repeat = Some(s);
        self
    }

    pub fn fail_writes(&self, n: usize) -> &Self {
        self.state.lock().unwrap().fail_writes = n;
        self
    }

    pub fn block_acks(&self, enabled: bool) -> &Self {
        self.state.lock().unwrap().block_acks = enabled;
        self
    }

    pub fn set_connected(&self, connected: bool) {
        self.state.lock().unwrap().connected = connected;
    }

    /// Notify a value outside of any script
    pub fn notify(&self, v: impl Into<Vec<u8>>) {
        let s = self.state.lock().unwrap();
        let v = v.into();
        for tx in &s.subscribers {
            let _ = tx.send(Notification::Value(v.clone()));
        }
    }

    /// Blocks written so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().writes.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    async fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();

        if !s.connected {
            return Err(TransportError::NotConnected);
        }
        if s.fail_writes > 0 {
            s.fail_writes -= 1;
            return Err(TransportError::Rejected("scripted failure".to_string()));
        }

        s.writes.push(data.to_vec());

        let notification = if data[0] == BLOCK_MARKER {
            match s.block_acks {
                true => Some(Notification::Value(vec![0x01, data[1]])),
                false => None,
            }
        } else {
            let next = match s.script.pop_front() {
                Some(n) => Some(n),
                None => s.repeat.clone(),
            };

            match next {
                Some(Script::Respond(r)) => Some(Notification::Value(r)),
                Some(Script::Disconnect) => {
                    s.connected = false;
                    Some(Notification::Disconnected)
                }
                Some(Script::Silent) | None => None,
            }
        };

        if let Some(n) = notification {
            for tx in &s.subscribers {
                let _ = tx.send(n.clone());
            }
        }

        Ok(())
    }

    fn subscribe(&self) -> UnboundedReceiver<Notification> {
        let (tx, rx) = unbounded_channel();
        self.state.lock().unwrap().subscribers.push(tx);
        rx
    }
}
