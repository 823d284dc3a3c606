// sipcell - The Sipcell SIP Stack
// Copyright (C) 2025 James Ferris <ferrous.communications@gmail.com>
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-call dialog storage.

use std::collections::HashMap;

use smol_str::SmolStr;

use sipcell_core::{Method, SipMsg, SubscriptionState};

use crate::{
    log_created, log_terminated, uac_dialog_from, uas_dialog_from, Dialog, DialogEvent, DialogId,
    DialogState,
};

/// All dialogs sharing one Call-ID, keyed by the tag pair.
pub struct DialogSet {
    call_id: SmolStr,
    dialogs: HashMap<(SmolStr, SmolStr), Dialog>,
}

impl DialogSet {
    pub fn new(call_id: impl Into<SmolStr>) -> Self {
        Self {
            call_id: call_id.into(),
            dialogs: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.dialogs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dialogs.is_empty()
    }

    pub fn get(&self, local_tag: &str, remote_tag: &str) -> Option<&Dialog> {
        self.dialogs
            .get(&(SmolStr::new(local_tag), SmolStr::new(remote_tag)))
    }

    pub fn get_mut(&mut self, local_tag: &str, remote_tag: &str) -> Option<&mut Dialog> {
        self.dialogs
            .get_mut(&(SmolStr::new(local_tag), SmolStr::new(remote_tag)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dialog> {
        self.dialogs.values()
    }

    /// Processes a response received as UAC for a request this side sent.
    ///
    /// Creates or advances the dialog the response belongs to and handles
    /// BYE completion.
    pub fn on_uac_response(&mut self, request: &SipMsg, response: &SipMsg) -> Vec<DialogEvent> {
        let mut events = Vec::new();
        debug_assert_eq!(request.call_id, self.call_id);

        if request.cseq.method == Method::Bye && response.is_success() {
            if let (Some(local), Some(remote)) = (request.from_tag(), request.to_tag()) {
                events.extend(self.terminate(local.clone(), remote.clone(), "BYE completed"));
            }
            return events;
        }

        let (Some(local_tag), Some(remote_tag)) = (request.from_tag(), response.to_tag()) else {
            return events;
        };
        let dialog_key = (local_tag.clone(), remote_tag.clone());

        if let Some(existing) = self.dialogs.get_mut(&dialog_key) {
            if response.is_success() && existing.state == DialogState::Early {
                existing.state = DialogState::Confirmed;
                // target may be refined by the 2xx
                if let Some(contact) = response.contacts.iter().find_map(|c| c.sip_uri()) {
                    existing.remote_target = Some(contact.clone());
                }
                events.push(DialogEvent::Confirmed(existing.id.clone()));
            }
            return events;
        }

        if let Some(dialog) = uac_dialog_from(request, response) {
            log_created(&dialog);
            let id = dialog.id.clone();
            let confirmed = dialog.state == DialogState::Confirmed;
            self.dialogs.insert(dialog_key, dialog);
            events.push(DialogEvent::Created(id.clone()));
            if confirmed {
                events.push(DialogEvent::Confirmed(id));
            }
        }
        events
    }

    /// Mirrors dialog state when this side sends a response as UAS.
    pub fn on_uas_response(&mut self, request: &SipMsg, response: &SipMsg) -> Vec<DialogEvent> {
        let mut events = Vec::new();

        if request.cseq.method == Method::Bye && response.is_success() {
            if let (Some(remote), Some(local)) = (request.from_tag(), response.to_tag()) {
                events.extend(self.terminate(local.clone(), remote.clone(), "BYE completed"));
            }
            return events;
        }

        let (Some(local_tag), Some(remote_tag)) = (response.to_tag(), request.from_tag()) else {
            return events;
        };
        let dialog_key = (local_tag.clone(), remote_tag.clone());

        if let Some(existing) = self.dialogs.get_mut(&dialog_key) {
            if response.is_success() && existing.state == DialogState::Early {
                existing.state = DialogState::Confirmed;
                events.push(DialogEvent::Confirmed(existing.id.clone()));
            }
            return events;
        }

        if let Some(dialog) = uas_dialog_from(request, response) {
            log_created(&dialog);
            let id = dialog.id.clone();
            let confirmed = dialog.state == DialogState::Confirmed;
            self.dialogs.insert(dialog_key, dialog);
            events.push(DialogEvent::Created(id.clone()));
            if confirmed {
                events.push(DialogEvent::Confirmed(id));
            }
        }
        events
    }

    /// Processes an in-dialog request received as UAS.
    ///
    /// Returns the events produced, or None when no dialog matches (the
    /// caller answers 481).
    pub fn on_uas_request(&mut self, msg: &SipMsg) -> Option<Vec<DialogEvent>> {
        let local_tag = msg.to_tag()?.clone();
        let remote_tag = msg.from_tag()?.clone();
        let dialog = self
            .dialogs
            .get_mut(&(local_tag.clone(), remote_tag.clone()))?;

        let mut events = Vec::new();
        if !dialog.accept_remote_seq(msg.method(), msg.cseq.seq) {
            return Some(events);
        }

        match msg.method() {
            Method::Bye => {
                let id = dialog.id.clone();
                dialog.state = DialogState::Terminated;
                events.push(DialogEvent::Terminated(id.clone()));
                log_terminated(&id, "BYE received");
                self.dialogs.remove(&(local_tag, remote_tag));
            }
            Method::Notify => {
                if let Some(event_header) = &msg.event {
                    let state = msg
                        .headers
                        .get("Subscription-State")
                        .map(|value| {
                            let token = value.split(';').next().unwrap_or("").trim();
                            SubscriptionState::parse(token)
                        })
                        .unwrap_or(SubscriptionState::Active);
                    let usage = dialog.upsert_subscription(event_header, state, msg.expires);
                    events.push(DialogEvent::SubscriptionUpdated {
                        id: dialog.id.clone(),
                        usage,
                    });
                }
                if dialog.refresh_remote_target(msg) {
                    events.push(DialogEvent::TargetRefresh(dialog.id.clone()));
                }
            }
            _ => {
                // Target refresh on any other in-dialog request with a
                // differing Contact (re-INVITE, UPDATE, SUBSCRIBE refresh).
                if dialog.refresh_remote_target(msg) {
                    events.push(DialogEvent::TargetRefresh(dialog.id.clone()));
                }
            }
        }
        Some(events)
    }

    /// Looks up the dialog an in-dialog request addresses.
    pub fn match_request(&self, msg: &SipMsg) -> Option<&Dialog> {
        let local_tag = msg.to_tag()?;
        let remote_tag = msg.from_tag()?;
        self.get(local_tag, remote_tag)
    }

    fn terminate(
        &mut self,
        local_tag: SmolStr,
        remote_tag: SmolStr,
        reason: &str,
    ) -> Option<DialogEvent> {
        let dialog_key = (local_tag, remote_tag);
        let dialog = self.dialogs.remove(&dialog_key)?;
        log_terminated(&dialog.id, reason);
        Some(DialogEvent::Terminated(dialog.id))
    }

    /// Terminates everything, used at cell shutdown.
    pub fn clear(&mut self) -> Vec<DialogId> {
        let ids: Vec<DialogId> = self.dialogs.values().map(|d| d.id.clone()).collect();
        for id in &ids {
            log_terminated(id, "cell shutdown");
        }
        self.dialogs.clear();
        ids
    }
}
