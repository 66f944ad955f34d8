use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use strum::EnumDiscriminants;
use tokio::sync::watch;
use tracing::debug;

use crate::{
    ledger::{EventScope, LedgerClient, LedgerEvent, LedgerEventKind},
    serde_utils::{U128Hex, U64Hex},
    types::{Address, BlockNumber, ChannelId, PaymentIdentifier, TokenAddress, TokenAmount},
    Result,
};

/// Protocol events produced while applying state changes.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(InternalEventKind), derive(Hash, strum::Display))]
#[serde(tag = "event")]
pub enum InternalEvent {
    EventTransferSentSuccess {
        #[serde_as(as = "U64Hex")]
        identifier: PaymentIdentifier,
        #[serde_as(as = "U128Hex")]
        amount: TokenAmount,
        target: Address,
    },
    EventTransferSentFailed {
        #[serde_as(as = "U64Hex")]
        identifier: PaymentIdentifier,
        target: Address,
        reason: String,
    },
    EventTransferReceivedSuccess {
        #[serde_as(as = "U64Hex")]
        identifier: PaymentIdentifier,
        #[serde_as(as = "U128Hex")]
        amount: TokenAmount,
        initiator: Address,
    },
    SendDirectTransfer {
        #[serde_as(as = "U64Hex")]
        identifier: PaymentIdentifier,
        recipient: Address,
        #[serde_as(as = "U128Hex")]
        transferred_amount: TokenAmount,
        #[serde_as(as = "U64Hex")]
        nonce: u64,
    },
    ContractSendChannelClose {
        channel_id: ChannelId,
    },
    ContractSendChannelSettle {
        channel_id: ChannelId,
    },
}

/// The only internal event kinds ever handed to callers.
pub const EXTERNALLY_VISIBLE_EVENTS: [InternalEventKind; 3] = [
    InternalEventKind::EventTransferSentSuccess,
    InternalEventKind::EventTransferSentFailed,
    InternalEventKind::EventTransferReceivedSuccess,
];

impl InternalEvent {
    pub fn kind(&self) -> InternalEventKind {
        self.into()
    }

    pub fn is_externally_visible(&self) -> bool {
        EXTERNALLY_VISIBLE_EVENTS.contains(&self.kind())
    }
}

/// An internal event together with the block it was recorded at and the
/// token network and channel it concerns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub block_number: BlockNumber,
    pub token: Option<TokenAddress>,
    pub channel_id: Option<ChannelId>,
    pub event: InternalEvent,
}

impl RecordedEvent {
    pub fn in_scope(&self, scope: &EventScope) -> bool {
        match scope {
            EventScope::Registry => false,
            EventScope::TokenNetwork(token) => self.token.as_ref() == Some(token),
            EventScope::Channel(channel_id) => self.channel_id.as_ref() == Some(channel_id),
        }
    }

    /// Re-shapes a whitelisted event into an external record.
    pub fn to_external(&self) -> Option<EventRecord> {
        self.event.is_externally_visible().then(|| EventRecord {
            block_number: self.block_number,
            event: EventPayload::Internal(self.event.clone()),
        })
    }
}

/// Append-only log of the internal events of this node.
pub struct EventLog {
    events: RwLock<Vec<RecordedEvent>>,
    version: watch::Sender<usize>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self {
            events: RwLock::new(Vec::new()),
            version: watch::channel(0).0,
        }
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, events: Vec<RecordedEvent>) {
        if events.is_empty() {
            return;
        }
        let len = {
            let mut log = self.events.write().expect("event log poisoned");
            for event in &events {
                debug!(
                    block_number = event.block_number,
                    kind = %event.event.kind(),
                    "Recording event"
                );
            }
            log.extend(events);
            log.len()
        };
        self.version.send_replace(len);
    }

    pub fn get_events_by_block(
        &self,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Vec<RecordedEvent> {
        self.events
            .read()
            .expect("event log poisoned")
            .iter()
            .filter(|event| (from_block..=to_block).contains(&event.block_number))
            .cloned()
            .collect()
    }

    pub fn all(&self) -> Vec<RecordedEvent> {
        self.events.read().expect("event log poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().expect("event log poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves with the first event at position `from` or later that `find`
    /// maps to a value, waiting for new events as needed.
    pub async fn wait_for<T, F>(&self, from: usize, mut find: F) -> T
    where
        F: FnMut(&RecordedEvent) -> Option<T>,
    {
        let mut version = self.version.subscribe();
        loop {
            let found = {
                let log = self.events.read().expect("event log poisoned");
                log.iter().skip(from).find_map(&mut find)
            };
            if let Some(found) = found {
                return found;
            }
            // The sender is owned by self, so this only errs on shutdown.
            let _ = version.changed().await;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    Ledger(LedgerEventKind),
    Internal(InternalEvent),
}

impl EventPayload {
    pub fn name(&self) -> String {
        match self {
            EventPayload::Ledger(kind) => {
                let name: &'static str = kind.into();
                name.to_string()
            }
            EventPayload::Internal(event) => event.kind().to_string(),
        }
    }
}

/// One entry of the external event stream: the originating block plus the
/// event's own fields, with `event` naming its kind.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde_as(as = "U64Hex")]
    pub block_number: BlockNumber,
    #[serde(flatten)]
    pub event: EventPayload,
}

impl From<LedgerEvent> for EventRecord {
    fn from(event: LedgerEvent) -> Self {
        Self {
            block_number: event.block_number,
            event: EventPayload::Ledger(event.kind),
        }
    }
}

/// Merges ledger events with the whitelisted part of the event log.
#[derive(Clone)]
pub struct EventProjection {
    ledger: Arc<dyn LedgerClient>,
    log: Arc<EventLog>,
}

impl EventProjection {
    pub fn new(ledger: Arc<dyn LedgerClient>, log: Arc<EventLog>) -> Self {
        Self { ledger, log }
    }

    /// Events of `scope` in `from_block..=to_block`, sorted by block. Within
    /// a block ledger events come before internal ones.
    pub async fn events_for(
        &self,
        scope: &EventScope,
        from_block: BlockNumber,
        to_block: BlockNumber,
    ) -> Result<Vec<EventRecord>> {
        let mut records: Vec<EventRecord> = self
            .ledger
            .events(scope, from_block, to_block)
            .await?
            .into_iter()
            .map(EventRecord::from)
            .collect();
        records.extend(
            self.log
                .get_events_by_block(from_block, to_block)
                .iter()
                .filter(|event| event.in_scope(scope))
                .filter_map(RecordedEvent::to_external),
        );
        records.sort_by_key(|record| record.block_number);
        Ok(records)
    }
}
