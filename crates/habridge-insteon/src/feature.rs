//! Device features and handler dispatch

use crate::device::DeviceInfo;
use crate::handler::{ChangeType, HandlerContext, HandlerKind, HandlerOutcome, MessageHandler};
use crate::{HandlerFilter, InsteonAddress, Msg, PollHandler, State};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Reply classification used in dispatch keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
pub enum ReplyKind {
    /// Broadcasts, cleanups and direct messages
    #[default]
    #[serde(rename = "any")]
    Any,
    #[serde(rename = "ack")]
    AckOfDirect,
    #[serde(rename = "nak")]
    NakOfDirect,
}

impl ReplyKind {
    pub fn of(msg: &Msg) -> Self {
        if msg.is_ack_of_direct() {
            ReplyKind::AckOfDirect
        } else if msg.is_nak_of_direct() {
            ReplyKind::NakOfDirect
        } else {
            ReplyKind::Any
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchKey {
    pub cmd1: u8,
    pub reply: ReplyKind,
}

impl DispatchKey {
    pub fn new(cmd1: u8, reply: ReplyKind) -> Self {
        Self { cmd1, reply }
    }

    pub fn any(cmd1: u8) -> Self {
        Self::new(cmd1, ReplyKind::Any)
    }
}

/// Poll bookkeeping of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryStatus {
    #[default]
    NotPolled,
    QueryPending,
    QueryAnswered,
}

/// One observable facet of a device
#[derive(Debug, Clone)]
pub struct DeviceFeature {
    name: String,
    feature_type: String,
    handlers: HashMap<DispatchKey, MessageHandler>,
    default_handler: MessageHandler,
    poll_handler: PollHandler,
    query_status: QueryStatus,
    last_state: Option<State>,
}

impl DeviceFeature {
    pub fn new(name: impl Into<String>, feature_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            feature_type: feature_type.into(),
            handlers: HashMap::new(),
            default_handler: MessageHandler::new(HandlerKind::Default, HandlerFilter::default()),
            poll_handler: PollHandler::NoPoll,
            query_status: QueryStatus::NotPolled,
            last_state: None,
        }
    }

    pub fn with_handler(mut self, key: DispatchKey, handler: MessageHandler) -> Self {
        self.handlers.insert(key, handler);
        self
    }

    pub fn with_default_handler(mut self, handler: MessageHandler) -> Self {
        self.default_handler = handler;
        self
    }

    pub fn with_poll_handler(mut self, poll: PollHandler) -> Self {
        self.poll_handler = poll;
        self
    }

    /// Rename an instance created from a shared template
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn feature_type(&self) -> &str {
        &self.feature_type
    }

    pub fn query_status(&self) -> QueryStatus {
        self.query_status
    }

    pub fn set_query_status(&mut self, status: QueryStatus) {
        trace!("{} query status {:?} -> {:?}", self.name, self.query_status, status);
        self.query_status = status;
    }

    pub fn last_state(&self) -> Option<&State> {
        self.last_state.as_ref()
    }

    pub fn handler(&self, key: &DispatchKey) -> Option<&MessageHandler> {
        self.handlers.get(key)
    }

    pub fn default_handler(&self) -> &MessageHandler {
        &self.default_handler
    }

    pub fn poll_handler(&self) -> &PollHandler {
        &self.poll_handler
    }

    /// Poll message for this feature, None for X10 devices or unpolled features
    pub fn make_poll_msg(&self, address: Option<InsteonAddress>) -> Option<Msg> {
        self.poll_handler.make_msg(address?)
    }

    /// Pick the handler for a message.
    ///
    /// ACK of direct: `(cmd1, AckOfDirect)`, else the default handler while a
    /// query is pending. NAK of direct: `(cmd1, NakOfDirect)` only. Anything
    /// else: `(cmd1, Any)`, else the default handler. The bool is true when
    /// the default handler answered a pending query.
    fn select(&self, msg: &Msg, cmd1: u8) -> Option<(&MessageHandler, bool)> {
        match ReplyKind::of(msg) {
            ReplyKind::AckOfDirect => {
                if let Some(h) = self.handlers.get(&DispatchKey::new(cmd1, ReplyKind::AckOfDirect)) {
                    return Some((h, false));
                }
                if self.query_status == QueryStatus::QueryPending {
                    return Some((&self.default_handler, true));
                }
                None
            }
            ReplyKind::NakOfDirect => self
                .handlers
                .get(&DispatchKey::new(cmd1, ReplyKind::NakOfDirect))
                .map(|h| (h, false)),
            ReplyKind::Any => Some(
                self.handlers
                    .get(&DispatchKey::any(cmd1))
                    .map(|h| (h, false))
                    .unwrap_or((&self.default_handler, false)),
            ),
        }
    }

    /// Route a message through this feature.
    ///
    /// `duplicate` is the device-level group duplicate verdict. Returns the
    /// handler outcome with `Changed` updates already filtered against the
    /// last published state.
    pub fn dispatch(
        &mut self,
        device: &DeviceInfo,
        msg: &Msg,
        cmd1: u8,
        group: Option<u8>,
        duplicate: bool,
    ) -> HandlerOutcome {
        let Some((handler, answers_query)) = self.select(msg, cmd1) else {
            trace!("{}: no handler for cmd1 0x{:02x}", self.name, cmd1);
            return HandlerOutcome::none();
        };
        if !handler.filter.matches_group(group) || !handler.filter.matches(msg) {
            trace!("{}: {} filtered out {}", self.name, handler.name(), msg);
            return HandlerOutcome::none();
        }
        if duplicate && handler.kind.checks_duplicates() {
            debug!("{}: ignoring duplicate {}", self.name, msg);
            return HandlerOutcome::none();
        }
        let ctx = HandlerContext {
            device,
            feature: &self.name,
            group,
            cmd1,
            query_status: self.query_status,
        };
        let mut outcome = handler.handle(&ctx, msg);
        if answers_query {
            self.set_query_status(QueryStatus::QueryAnswered);
        }
        if let Some(update) = outcome.update.take() {
            let unchanged = update.change == ChangeType::Changed
                && self.last_state.as_ref() == Some(&update.state);
            if unchanged {
                trace!("{}: state unchanged, not publishing", self.name);
            } else {
                self.last_state = Some(update.state.clone());
                outcome.update = Some(update);
            }
        }
        outcome
    }
}
