// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Shared fixtures for the stack integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use sipcell_call::{
    Application, PluginChain, SendErrorKind, SipStack, StackConfig, Transport, TransportDest,
};
use sipcell_core::{Method, SipMsg, TransportKind};
use sipcell_parse::{parse_message, ParseOutcome};
use sipcell_registrar::MemoryRegStore;

/// Transport double that records everything the stack sends.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<(TransportDest, Bytes)>>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, dest: &TransportDest, payload: Bytes) -> Result<(), SendErrorKind> {
        self.sent.lock().push((dest.clone(), payload));
        Ok(())
    }
}

impl MockTransport {
    /// Everything sent so far, parsed.
    pub fn messages(&self) -> Vec<(TransportDest, SipMsg)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(dest, payload)| {
                match parse_message(payload, TransportKind::Udp) {
                    ParseOutcome::Complete(msg, _) => Some((dest.clone(), *msg)),
                    _ => None,
                }
            })
            .collect()
    }

    /// Messages sent to one destination.
    pub fn messages_to(&self, dest: &TransportDest) -> Vec<SipMsg> {
        self.messages()
            .into_iter()
            .filter(|(sent_to, _)| sent_to == dest)
            .map(|(_, msg)| msg)
            .collect()
    }

    /// Responses with the given code sent to `dest`, filtered by CSeq method.
    pub fn responses_to(&self, dest: &TransportDest, code: u16, method: &Method) -> Vec<SipMsg> {
        self.messages_to(dest)
            .into_iter()
            .filter(|msg| msg.code() == Some(code) && &msg.cseq.method == method)
            .collect()
    }

    /// Requests with the given method sent to `dest`.
    pub fn requests_to(&self, dest: &TransportDest, method: &Method) -> Vec<SipMsg> {
        self.messages_to(dest)
            .into_iter()
            .filter(|msg| msg.is_request() && msg.method() == method)
            .collect()
    }
}

/// Builds a stack around the mock transport and the given application.
pub fn stack_with(app: Arc<dyn Application>) -> (SipStack, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::default());
    let config = StackConfig {
        sip_local_host: "proxy.example.com".into(),
        ..StackConfig::default()
    };
    let stack = SipStack::new(
        config,
        transport.clone(),
        app,
        PluginChain::default(),
        Box::new(MemoryRegStore::new()),
        None,
    )
    .expect("stack");
    (stack, transport)
}

/// The upstream client every test sends from.
pub fn upstream_origin() -> TransportDest {
    TransportDest::new(TransportKind::Udp, "client.example.com", 5060)
}

/// Lets spawned cells and callbacks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(80)).await;
}
