// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Demonstrates §16.7 response aggregation on a parallel fork.
//!
//! Run with: cargo run -p sipcell-proxy --example stateful_forking

use sipcell_core::SipUri;
use sipcell_proxy::{ForkAction, ForkMode, ForkState};
use sipcell_testkit::{build_invite, respond};

fn main() {
    let invite = build_invite("sip:support@example.com", "z9hG4bKdemo", "demo-call");
    let targets = vec![
        SipUri::parse("sip:agent1@192.0.2.1:5070").unwrap(),
        SipUri::parse("sip:agent2@192.0.2.2:5070").unwrap(),
        SipUri::parse("sip:agent3@192.0.2.3:5070").unwrap(),
    ];

    let mut fork = ForkState::new(invite.clone(), targets, ForkMode::Parallel, false);
    print_actions("start", &fork.start());

    // agent1 is busy, agent2 rings, agent3 picks up
    print_actions("agent1 busy", &fork.on_final(0, respond(&invite, 486, Some("a1"))));
    print_actions(
        "agent2 ringing",
        &fork.on_provisional(1, respond(&invite, 180, Some("a2"))),
    );
    print_actions("agent3 answers", &fork.on_final(2, respond(&invite, 200, Some("a3"))));

    // the cancelled leg completes with 487 and the fork winds down
    print_actions("agent2 gives up", &fork.on_final(1, respond(&invite, 487, Some("a2"))));
    println!("finished: {}", fork.is_finished());
}

fn print_actions(label: &str, actions: &[ForkAction]) {
    println!("== {label}");
    for action in actions {
        match action {
            ForkAction::Launch { index, target } => println!("  launch leg {index} -> {target}"),
            ForkAction::CancelBranch { index } => println!("  CANCEL leg {index}"),
            ForkAction::ForwardUpstream(response) => {
                println!("  forward upstream: {:?}", response.code())
            }
            ForkAction::Finished => println!("  fork finished"),
        }
    }
}
