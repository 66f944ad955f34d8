use crate::{
    channel::{ChannelStatus, HashTimeLock, NetworkStatus},
    events::InternalEvent,
    store::{ChannelStateStore, StateChange, StateChangeSink},
    tests::test_utils::gen_rand_address,
    types::{gen_rand_hash256, Address, ChannelId, TokenAddress},
    Error,
};

pub(crate) struct StoreFixture {
    pub store: ChannelStateStore,
    pub our_address: Address,
    pub token: TokenAddress,
    pub partner: Address,
    pub channel_id: ChannelId,
}

impl StoreFixture {
    /// A store with one registered token network and an open channel.
    pub fn new() -> Self {
        let our_address = gen_rand_address();
        let store = ChannelStateStore::new(our_address, 5);
        let fixture = Self {
            store,
            our_address,
            token: gen_rand_address(),
            partner: gen_rand_address(),
            channel_id: gen_rand_address(),
        };
        fixture.store.submit(StateChange::ContractReceiveNewTokenNetwork {
            token: fixture.token,
            manager_address: gen_rand_address(),
        });
        fixture.store.submit(StateChange::ContractReceiveChannelNew {
            token: fixture.token,
            channel_id: fixture.channel_id,
            participant1: our_address,
            participant2: fixture.partner,
            settle_timeout: 30,
            block_number: 1,
        });
        fixture
    }

    pub fn deposit(&self, participant: Address, balance: u128) {
        self.store.submit(StateChange::ContractReceiveChannelNewBalance {
            token: self.token,
            channel_id: self.channel_id,
            participant,
            balance,
            block_number: self.store.block_number(),
        });
    }

    pub fn status(&self) -> ChannelStatus {
        self.store
            .channel_by_id(&self.channel_id)
            .expect("channel")
            .status
    }
}

#[test]
fn test_channel_queries() {
    let fixture = StoreFixture::new();
    let other_partner = gen_rand_address();
    let other_channel = gen_rand_address();
    fixture.store.submit(StateChange::ContractReceiveChannelNew {
        token: fixture.token,
        channel_id: other_channel,
        participant1: other_partner,
        participant2: fixture.our_address,
        settle_timeout: 30,
        block_number: 2,
    });

    assert_eq!(fixture.store.channels(None, None).len(), 2);
    assert_eq!(fixture.store.channels(Some(&fixture.token), None).len(), 2);
    assert!(fixture.store.channels(Some(&gen_rand_address()), None).is_empty());

    let by_pair = fixture
        .store
        .channels(Some(&fixture.token), Some(&other_partner));
    assert_eq!(by_pair.len(), 1);
    assert_eq!(by_pair[0].channel_id, other_channel);
    assert_eq!(by_pair[0].partner(), other_partner);

    let by_partner = fixture.store.channels(None, Some(&fixture.partner));
    assert_eq!(by_partner.len(), 1);
    assert_eq!(by_partner[0].channel_id, fixture.channel_id);

    let missing = gen_rand_address();
    assert!(matches!(
        fixture.store.channel_by_id(&missing),
        Err(Error::ChannelNotFound(id)) if id == missing
    ));
    assert_eq!(
        fixture.store.known_tokens().into_iter().collect::<Vec<_>>(),
        vec![fixture.token]
    );
}

#[test]
fn test_known_tokens_excludes_networks_without_channels() {
    let store = ChannelStateStore::new(gen_rand_address(), 5);
    let token = gen_rand_address();
    store.submit(StateChange::ContractReceiveNewTokenNetwork {
        token,
        manager_address: gen_rand_address(),
    });
    assert!(store.snapshot().is_token_registered(&token));
    assert!(store.known_tokens().is_empty());
}

#[test]
fn test_snapshot_is_not_affected_by_later_changes() {
    let fixture = StoreFixture::new();
    let before = fixture.store.snapshot();
    fixture.deposit(fixture.our_address, 100);
    let after = fixture.store.snapshot();

    let channel_before = before.channel_by_id(&fixture.channel_id).expect("channel");
    let channel_after = after.channel_by_id(&fixture.channel_id).expect("channel");
    assert_eq!(channel_before.our_state.contract_balance, 0);
    assert_eq!(channel_after.our_state.contract_balance, 100);
}

#[test]
fn test_channels_of_other_nodes_are_ignored() {
    let fixture = StoreFixture::new();
    fixture.store.submit(StateChange::ContractReceiveChannelNew {
        token: fixture.token,
        channel_id: gen_rand_address(),
        participant1: gen_rand_address(),
        participant2: gen_rand_address(),
        settle_timeout: 30,
        block_number: 2,
    });
    assert_eq!(fixture.store.channels(None, None).len(), 1);
}

#[test]
fn test_channel_lifecycle_only_moves_forward() {
    let fixture = StoreFixture::new();
    assert_eq!(fixture.status(), ChannelStatus::Open);

    fixture.store.submit(StateChange::ActionChannelClose {
        token: fixture.token,
        channel_id: fixture.channel_id,
    });
    assert_eq!(fixture.status(), ChannelStatus::Closing);

    fixture.store.submit(StateChange::ContractReceiveChannelClosed {
        token: fixture.token,
        channel_id: fixture.channel_id,
        closing_address: fixture.our_address,
        block_number: 7,
    });
    assert_eq!(fixture.status(), ChannelStatus::Closed);

    // A late open confirmation must not reopen the channel.
    fixture.store.submit(StateChange::ContractReceiveChannelNew {
        token: fixture.token,
        channel_id: fixture.channel_id,
        participant1: fixture.our_address,
        participant2: fixture.partner,
        settle_timeout: 30,
        block_number: 1,
    });
    assert_eq!(fixture.status(), ChannelStatus::Closed);

    let channel = fixture.store.channel_by_id(&fixture.channel_id).expect("channel");
    assert_eq!(channel.external_state.closed_block, Some(7));
    assert_eq!(channel.settle_window_end(), Some(37));
    assert!(!channel.is_settle_window_expired(36));
    assert!(channel.is_settle_window_expired(37));

    fixture.store.submit(StateChange::ContractReceiveChannelSettled {
        token: fixture.token,
        channel_id: fixture.channel_id,
        block_number: 37,
    });
    assert_eq!(fixture.status(), ChannelStatus::Settled);
}

#[test]
fn test_deposit_after_close_is_ignored() {
    let fixture = StoreFixture::new();
    fixture.deposit(fixture.our_address, 50);
    fixture.store.submit(StateChange::ContractReceiveChannelClosed {
        token: fixture.token,
        channel_id: fixture.channel_id,
        closing_address: fixture.partner,
        block_number: 3,
    });
    fixture.deposit(fixture.our_address, 80);
    let channel = fixture.store.channel_by_id(&fixture.channel_id).expect("channel");
    assert_eq!(channel.our_state.contract_balance, 50);
}

#[test]
fn test_balances_never_decrease() {
    let fixture = StoreFixture::new();
    fixture.deposit(fixture.partner, 70);
    fixture.deposit(fixture.partner, 40);
    let channel = fixture.store.channel_by_id(&fixture.channel_id).expect("channel");
    assert_eq!(channel.partner_state.contract_balance, 70);
    assert_eq!(channel.partner_balance(), 70);
}

#[test]
fn test_settle_request_is_recorded_once() {
    let fixture = StoreFixture::new();
    fixture.store.submit(StateChange::ContractReceiveChannelClosed {
        token: fixture.token,
        channel_id: fixture.channel_id,
        closing_address: fixture.partner,
        block_number: 3,
    });
    let request = StateChange::ActionChannelSettleRequested {
        token: fixture.token,
        channel_id: fixture.channel_id,
        block_number: 33,
    };
    fixture.store.submit(request.clone());
    fixture.store.submit(request);
    let settle_events = fixture
        .store
        .event_log()
        .all()
        .into_iter()
        .filter(|recorded| matches!(recorded.event, InternalEvent::ContractSendChannelSettle { .. }))
        .count();
    assert_eq!(settle_events, 1);
}

#[test]
fn test_opening_channel_is_confirmed_by_ledger_event() {
    let our_address = gen_rand_address();
    let store = ChannelStateStore::new(our_address, 5);
    let token = gen_rand_address();
    let partner = gen_rand_address();
    let channel_id = gen_rand_address();
    store.submit(StateChange::ContractReceiveNewTokenNetwork {
        token,
        manager_address: gen_rand_address(),
    });
    store.submit(StateChange::ActionChannelOpen {
        token,
        partner,
        channel_id,
        settle_timeout: 100,
        reveal_timeout: 12,
    });
    let channel = store.channel_by_id(&channel_id).expect("channel");
    assert_eq!(channel.status, ChannelStatus::Opening);

    store.submit(StateChange::ContractReceiveChannelNew {
        token,
        channel_id,
        participant1: our_address,
        participant2: partner,
        settle_timeout: 100,
        block_number: 4,
    });
    let channel = store.channel_by_id(&channel_id).expect("channel");
    assert_eq!(channel.status, ChannelStatus::Open);
    assert_eq!(channel.reveal_timeout, 12);
    assert_eq!(channel.external_state.opened_block, Some(4));
}

#[test]
fn test_open_recorded_after_ledger_event_keeps_status() {
    let fixture = StoreFixture::new();
    fixture.store.submit(StateChange::ActionChannelOpen {
        token: fixture.token,
        partner: fixture.partner,
        channel_id: fixture.channel_id,
        settle_timeout: 30,
        reveal_timeout: 9,
    });
    let channel = fixture.store.channel_by_id(&fixture.channel_id).expect("channel");
    assert_eq!(channel.status, ChannelStatus::Open);
    assert_eq!(channel.reveal_timeout, 9);
}

#[test]
fn test_new_channel_replaces_settled_one() {
    let fixture = StoreFixture::new();
    for state_change in [
        StateChange::ContractReceiveChannelClosed {
            token: fixture.token,
            channel_id: fixture.channel_id,
            closing_address: fixture.partner,
            block_number: 3,
        },
        StateChange::ContractReceiveChannelSettled {
            token: fixture.token,
            channel_id: fixture.channel_id,
            block_number: 40,
        },
    ] {
        fixture.store.submit(state_change);
    }
    let new_channel = gen_rand_address();
    fixture.store.submit(StateChange::ContractReceiveChannelNew {
        token: fixture.token,
        channel_id: new_channel,
        participant1: fixture.partner,
        participant2: fixture.our_address,
        settle_timeout: 30,
        block_number: 41,
    });
    let channels = fixture.store.channels(Some(&fixture.token), None);
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].channel_id, new_channel);
    assert_eq!(channels[0].status, ChannelStatus::Open);
}

#[test]
fn test_hash_locks_are_resolved_by_secret_reveal() {
    let fixture = StoreFixture::new();
    fixture.deposit(fixture.our_address, 100);
    let hashlock = gen_rand_hash256();
    fixture.store.submit(StateChange::ActionLockCreated {
        token: fixture.token,
        channel_id: fixture.channel_id,
        sender: fixture.our_address,
        lock: HashTimeLock {
            amount: 25,
            expiration: 50,
            hashlock,
        },
    });
    let channel = fixture.store.channel_by_id(&fixture.channel_id).expect("channel");
    assert_eq!(channel.outstanding_locks(), 1);
    assert_eq!(channel.our_balance(), 100);
    assert_eq!(channel.our_distributable(), 75);

    fixture.store.submit(StateChange::ContractReceiveSecretReveal {
        token: fixture.token,
        channel_id: fixture.channel_id,
        hashlock,
        block_number: 5,
    });
    let channel = fixture.store.channel_by_id(&fixture.channel_id).expect("channel");
    assert_eq!(channel.outstanding_locks(), 0);
    assert_eq!(channel.our_state.transferred_amount, 25);
    assert_eq!(channel.our_balance(), 75);
    assert_eq!(channel.partner_balance(), 25);
}

#[test]
fn test_network_status_defaults_to_unknown() {
    let store = ChannelStateStore::new(gen_rand_address(), 5);
    let node = gen_rand_address();
    assert_eq!(store.snapshot().network_status(&node), NetworkStatus::Unknown);
    store.submit(StateChange::ActionChangeNodeNetworkState {
        node,
        status: NetworkStatus::Reachable,
    });
    assert_eq!(store.snapshot().network_status(&node), NetworkStatus::Reachable);
}

#[test]
fn test_block_number_never_goes_back() {
    let store = ChannelStateStore::new(gen_rand_address(), 5);
    store.submit(StateChange::Block { block_number: 9 });
    store.submit(StateChange::Block { block_number: 4 });
    assert_eq!(store.block_number(), 9);
}
