// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Forked INVITE through the full stack: two registered contacts, one
//! answers, the 200 wins, and CANCEL only reaches legs that still ring.

mod common;

use std::sync::Arc;

use async_trait::async_trait;

use common::{settle, stack_with, upstream_origin, MockTransport};
use sipcell_call::{Application, RouteVerdict, SipStack, TransportDest};
use sipcell_core::{Method, SipMsg, SipUri, TransportKind};
use sipcell_proxy::ProxyOpts;
use sipcell_testkit::{as_bytes, build_invite, respond};

const C1: &str = "sip:c1@192.0.2.1:5070";
const C2: &str = "sip:c2@192.0.2.2:5070";

struct ForkingProxy;

#[async_trait]
impl Application for ForkingProxy {
    async fn route(
        &self,
        _scheme: &str,
        _user: Option<&str>,
        _domain: &str,
        _request: &SipMsg,
    ) -> RouteVerdict {
        RouteVerdict::ProxyTo {
            targets: vec![
                SipUri::parse(C1).unwrap(),
                SipUri::parse(C2).unwrap(),
            ],
            opts: ProxyOpts::default(),
        }
    }
}

fn dest_of(uri: &str) -> TransportDest {
    TransportDest::from_uri(&SipUri::parse(uri).unwrap())
}

/// Grabs the INVITE the proxy forwarded to one leg.
fn forwarded_invite(transport: &MockTransport, dest: &TransportDest) -> SipMsg {
    let invites = transport.requests_to(dest, &Method::Invite);
    assert_eq!(invites.len(), 1, "exactly one INVITE per leg");
    invites[0].clone()
}

async fn answer(stack: &SipStack, leg_invite: &SipMsg, code: u16, tag: &str, from: &TransportDest) {
    let response = respond(leg_invite, code, Some(tag));
    stack.on_recv(as_bytes(&response), from.clone()).await;
    settle().await;
}

#[tokio::test]
async fn completed_leg_is_not_cancelled_when_other_answers() {
    let (stack, transport) = stack_with(Arc::new(ForkingProxy));
    let origin = upstream_origin();
    let invite = build_invite("sip:aor@example.com", "z9hG4bKs3a", "call-s3a");
    stack.on_recv(as_bytes(&invite), origin.clone()).await;
    settle().await;

    let (c1, c2) = (dest_of(C1), dest_of(C2));
    let leg1 = forwarded_invite(&transport, &c1);
    let leg2 = forwarded_invite(&transport, &c2);
    assert_ne!(leg1.top_branch(), leg2.top_branch());
    assert_eq!(leg1.max_forwards, invite.max_forwards - 1);

    // C1 declines, C2 answers
    answer(&stack, &leg1, 486, "c1", &c1).await;
    answer(&stack, &leg2, 200, "c2", &c2).await;

    // upstream sees the 200 and never the 486
    assert_eq!(
        transport.responses_to(&origin, 200, &Method::Invite).len(),
        1
    );
    assert!(transport
        .responses_to(&origin, 486, &Method::Invite)
        .is_empty());

    // C1 finished before the 200: no CANCEL may reach it
    assert!(transport.requests_to(&c1, &Method::Cancel).is_empty());
    assert!(transport.requests_to(&c2, &Method::Cancel).is_empty());
}

#[tokio::test]
async fn ringing_leg_is_cancelled_when_other_answers() {
    let (stack, transport) = stack_with(Arc::new(ForkingProxy));
    let origin = upstream_origin();
    let invite = build_invite("sip:aor@example.com", "z9hG4bKs3b", "call-s3b");
    stack.on_recv(as_bytes(&invite), origin.clone()).await;
    settle().await;

    let (c1, c2) = (dest_of(C1), dest_of(C2));
    let leg1 = forwarded_invite(&transport, &c1);
    let leg2 = forwarded_invite(&transport, &c2);

    // C1 rings, C2 answers while C1 still rings
    answer(&stack, &leg1, 180, "c1", &c1).await;
    answer(&stack, &leg2, 200, "c2", &c2).await;

    assert_eq!(
        transport.responses_to(&origin, 200, &Method::Invite).len(),
        1
    );
    // the ringing leg got a CANCEL sharing the leg's branch
    let cancels = transport.requests_to(&c1, &Method::Cancel);
    assert_eq!(cancels.len(), 1);
    assert_eq!(cancels[0].top_branch(), leg1.top_branch());

    // the cancelled leg completes with 487, which stays here
    answer(&stack, &leg1, 487, "c1", &c1).await;
    assert!(transport
        .responses_to(&origin, 487, &Method::Invite)
        .is_empty());
}

#[tokio::test]
async fn all_legs_failing_aggregates_best_response() {
    let (stack, transport) = stack_with(Arc::new(ForkingProxy));
    let origin = upstream_origin();
    let invite = build_invite("sip:aor@example.com", "z9hG4bKs3c", "call-s3c");
    stack.on_recv(as_bytes(&invite), origin.clone()).await;
    settle().await;

    let (c1, c2) = (dest_of(C1), dest_of(C2));
    let leg1 = forwarded_invite(&transport, &c1);
    let leg2 = forwarded_invite(&transport, &c2);

    // 503 loses to 486 and maps away; 486 goes upstream
    answer(&stack, &leg1, 503, "c1", &c1).await;
    answer(&stack, &leg2, 486, "c2", &c2).await;

    assert_eq!(
        transport.responses_to(&origin, 486, &Method::Invite).len(),
        1
    );
    assert!(transport
        .responses_to(&origin, 503, &Method::Invite)
        .is_empty());
}

#[tokio::test]
async fn provisionals_are_relayed_upstream() {
    let (stack, transport) = stack_with(Arc::new(ForkingProxy));
    let origin = upstream_origin();
    let invite = build_invite("sip:aor@example.com", "z9hG4bKs3d", "call-s3d");
    stack.on_recv(as_bytes(&invite), origin.clone()).await;
    settle().await;

    let c1 = dest_of(C1);
    let leg1 = forwarded_invite(&transport, &c1);
    answer(&stack, &leg1, 180, "c1", &c1).await;

    assert_eq!(
        transport.responses_to(&origin, 180, &Method::Invite).len(),
        1
    );
}
