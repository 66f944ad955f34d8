use std::sync::Arc;

use crate::{
    events::{EventLog, EventPayload, EventProjection, InternalEvent, RecordedEvent},
    ledger::{dev::DevChain, EventScope, LedgerClient, LedgerEventKind},
    tests::test_utils::gen_rand_address,
    types::{ChannelId, TokenAddress},
};

fn recorded(
    block_number: u64,
    token: TokenAddress,
    channel_id: ChannelId,
    event: InternalEvent,
) -> RecordedEvent {
    RecordedEvent {
        block_number,
        token: Some(token),
        channel_id: Some(channel_id),
        event,
    }
}

struct ProjectionFixture {
    projection: EventProjection,
    token: TokenAddress,
    channel_id: ChannelId,
}

/// A chain with a token registered at block 1, a channel opened at block 2
/// and a deposit mined at block 4, plus internal events at blocks 1 and 2.
async fn projection_fixture() -> ProjectionFixture {
    let chain = DevChain::new();
    let account = chain.account(gen_rand_address());
    let token = gen_rand_address();

    let registering = tokio::spawn({
        let account = account.clone();
        async move { account.register_token(token).await }
    });
    while chain.pending_transaction_count() == 0 {
        tokio::task::yield_now().await;
    }
    chain.mine_block();
    registering.await.expect("task").expect("registered");

    let partner = gen_rand_address();
    let opening = tokio::spawn({
        let account = account.clone();
        async move { account.open_channel(token, partner, 30).await }
    });
    while chain.pending_transaction_count() == 0 {
        tokio::task::yield_now().await;
    }
    chain.mine_block();
    let channel_id = opening.await.expect("task").expect("opened");

    chain.mint(token, account.address(), 10);
    let depositing = tokio::spawn({
        let account = account.clone();
        async move {
            account.approve(token, channel_id, 10).await?;
            account.deposit(channel_id, 10).await
        }
    });
    for _ in 0..2 {
        while chain.pending_transaction_count() == 0 {
            tokio::task::yield_now().await;
        }
        chain.mine_block();
    }
    depositing.await.expect("task").expect("deposited");

    let log = Arc::new(EventLog::new());
    let target = gen_rand_address();
    log.record(vec![
        recorded(
            2,
            token,
            channel_id,
            InternalEvent::SendDirectTransfer {
                identifier: 1,
                recipient: target,
                transferred_amount: 5,
                nonce: 1,
            },
        ),
        recorded(
            2,
            token,
            channel_id,
            InternalEvent::EventTransferSentSuccess {
                identifier: 1,
                amount: 5,
                target,
            },
        ),
        recorded(
            2,
            token,
            channel_id,
            InternalEvent::ContractSendChannelClose { channel_id },
        ),
        recorded(
            2,
            token,
            channel_id,
            InternalEvent::EventTransferSentFailed {
                identifier: 2,
                target,
                reason: "no route".to_string(),
            },
        ),
        recorded(
            1,
            token,
            gen_rand_address(),
            InternalEvent::EventTransferReceivedSuccess {
                identifier: 3,
                amount: 1,
                initiator: target,
            },
        ),
    ]);
    ProjectionFixture {
        projection: EventProjection::new(Arc::new(account), log),
        token,
        channel_id,
    }
}

#[tokio::test]
async fn test_channel_events_only_expose_whitelisted_internal_events() {
    let fixture = projection_fixture().await;
    let events = fixture
        .projection
        .events_for(&EventScope::Channel(fixture.channel_id), 0, 10)
        .await
        .expect("events");
    let names: Vec<_> = events.iter().map(|record| record.event.name()).collect();
    assert_eq!(
        names,
        vec![
            "EventTransferSentSuccess",
            "EventTransferSentFailed",
            "ChannelNewBalance"
        ]
    );
    assert!(events.iter().all(|record| match &record.event {
        EventPayload::Internal(event) => event.is_externally_visible(),
        EventPayload::Ledger(_) => true,
    }));
}

#[tokio::test]
async fn test_events_are_sorted_by_block() {
    let fixture = projection_fixture().await;
    let events = fixture
        .projection
        .events_for(&EventScope::TokenNetwork(fixture.token), 0, 10)
        .await
        .expect("events");
    let blocks: Vec<_> = events.iter().map(|record| record.block_number).collect();
    assert_eq!(blocks, vec![1, 2, 2, 2]);
    // Within a block, ledger events come first.
    assert!(matches!(
        events[1].event,
        EventPayload::Ledger(LedgerEventKind::ChannelNew { .. })
    ));
}

#[tokio::test]
async fn test_block_range_is_inclusive() {
    let fixture = projection_fixture().await;
    let events = fixture
        .projection
        .events_for(&EventScope::Channel(fixture.channel_id), 4, 4)
        .await
        .expect("events");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].block_number, 4);

    let registry = fixture
        .projection
        .events_for(&EventScope::Registry, 0, 10)
        .await
        .expect("events");
    assert_eq!(registry.len(), 1);
    assert_eq!(registry[0].event.name(), "TokenAdded");
}

#[tokio::test]
async fn test_event_records_flatten_their_fields() {
    let fixture = projection_fixture().await;
    let events = fixture
        .projection
        .events_for(&EventScope::Channel(fixture.channel_id), 2, 2)
        .await
        .expect("events");
    let json = serde_json::to_value(&events[0]).expect("serialize");
    assert_eq!(json["event"], "EventTransferSentSuccess");
    assert_eq!(json["block_number"], "0x2");
    assert_eq!(json["identifier"], "0x1");
    assert_eq!(json["amount"], "0x5");

    let decoded: crate::events::EventRecord = serde_json::from_value(json).expect("deserialize");
    assert_eq!(decoded, events[0]);
}

#[tokio::test]
async fn test_wait_for_skips_events_before_start() {
    let log = Arc::new(EventLog::new());
    let token = gen_rand_address();
    let channel_id = gen_rand_address();
    let sent = |identifier| {
        recorded(
            1,
            token,
            channel_id,
            InternalEvent::EventTransferSentSuccess {
                identifier,
                amount: 1,
                target: channel_id,
            },
        )
    };
    log.record(vec![sent(7)]);
    let start = log.len();
    let waiting = tokio::spawn({
        let log = log.clone();
        async move {
            log.wait_for(start, |event| match event.event {
                InternalEvent::EventTransferSentSuccess { identifier: 7, .. } => Some(event.block_number),
                _ => None,
            })
            .await
        }
    });
    tokio::task::yield_now().await;
    assert!(!waiting.is_finished());
    log.record(vec![RecordedEvent {
        block_number: 4,
        ..sent(7)
    }]);
    assert_eq!(waiting.await.expect("task"), 4);
}
