use crate::{
    channel::ChannelStatus,
    connection::funds_per_channel,
    tests::test_utils::{gen_rand_address, start_test_chain, test_node_config, TestNode},
    Error,
};

#[test]
fn test_funds_per_channel() {
    assert_eq!(funds_per_channel(1000, 2, 0.4), 300);
    assert_eq!(funds_per_channel(1000, 3, 0.4), 200);
    assert_eq!(funds_per_channel(1000, 3, 0.0), 333);
    assert_eq!(funds_per_channel(1000, 3, 1.0), 0);
    assert_eq!(funds_per_channel(1000, 0, 0.4), 0);
}

#[tokio::test]
async fn test_connect_and_leave_token_network() {
    let (chain, supervisor) = start_test_chain();
    let node_a = TestNode::with_chain(&chain, &supervisor).await;
    let node_b = TestNode::with_chain(&chain, &supervisor).await;
    let node_c = TestNode::with_chain(&chain, &supervisor).await;

    let token = node_a.register_funded_token(1000).await;
    node_b.wait_for_token(token).await;
    node_c.wait_for_token(token).await;
    node_b
        .api
        .open(token, node_c.address, None, None)
        .await
        .expect("open channel between partners");
    node_a.wait_for_block(chain.block_number()).await;

    let channels = node_a
        .api
        .connect(token, 1000, Some(2), Some(0.4))
        .await
        .expect("connect");
    assert_eq!(channels.len(), 2);
    let mut partners: Vec<_> = channels.iter().map(|channel| channel.partner()).collect();
    partners.sort();
    let mut expected = vec![node_b.address, node_c.address];
    expected.sort();
    assert_eq!(partners, expected);
    assert!(channels.iter().all(|channel| {
        channel.status == ChannelStatus::Open && channel.our_state.contract_balance == 300
    }));
    assert_eq!(node_a.token_balance(&token), 400);

    // The target is already met.
    let again = node_a
        .api
        .connect(token, 1000, Some(2), Some(0.4))
        .await
        .expect("connect again");
    assert!(again.is_empty());

    let left = node_a.api.leave(token, false).await.expect("leave");
    assert_eq!(left.len(), 2);
    assert!(left
        .iter()
        .all(|channel| channel.status == ChannelStatus::Settled));
    assert_eq!(node_a.token_balance(&token), 1000);
    assert!(node_a.locks.held_count() == 0);

    // The channel between the partners is untouched.
    let remaining = node_b.api.channel_list(Some(&token), Some(&node_c.address));
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].status, ChannelStatus::Open);
}

#[tokio::test]
async fn test_leave_only_receiving_channels() {
    let node = TestNode::new().await;
    let token = node.register_funded_token(50).await;
    let partner = gen_rand_address();
    node.open_and_fund(token, partner, 50).await;

    // The partner never deposited, so nothing is receiving.
    let left = node.api.leave(token, true).await.expect("leave");
    assert!(left.is_empty());
    assert_eq!(
        node.api.channel_list(Some(&token), Some(&partner))[0].status,
        ChannelStatus::Open
    );

    let left = node.api.leave(token, false).await.expect("leave");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].status, ChannelStatus::Settled);
    assert_eq!(node.token_balance(&token), 50);
}

#[tokio::test]
async fn test_leave_outlasts_poll_timeout_until_settled() {
    let (chain, supervisor) = start_test_chain();
    let mut config = test_node_config();
    config.settle_timeout = Some(300);
    config.poll_timeout_seconds = Some(1);
    let node = TestNode::with_config(&chain, &supervisor, config).await;
    let token = node.register_funded_token(20).await;
    let partner = gen_rand_address();
    let channel = node.open_and_fund(token, partner, 20).await;
    assert_eq!(channel.settle_timeout, 300);

    // The settle window spans several poll timeouts.
    let left = node.api.leave(token, false).await.expect("leave");
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].status, ChannelStatus::Settled);
    assert!(left[0].external_state.settled_block >= left[0].settle_window_end());
    assert_eq!(node.token_balance(&token), 20);
}

#[tokio::test]
async fn test_connect_rejects_invalid_arguments() {
    let node = TestNode::new().await;
    let token = node.register_funded_token(100).await;

    let result = node.api.connect(token, 0, None, None).await;
    assert!(matches!(result, Err(Error::InvalidAmount(_))));
    let result = node.api.connect(token, 100, Some(0), None).await;
    assert!(matches!(result, Err(Error::InvalidParameter(_))));
    let result = node.api.connect(token, 100, None, Some(1.5)).await;
    assert!(matches!(result, Err(Error::InvalidParameter(_))));

    let unknown = gen_rand_address();
    let result = node.api.connect(unknown, 100, None, None).await;
    assert!(matches!(result, Err(Error::UnknownTokenAddress(token)) if token == unknown));
    let result = node.api.leave(unknown, false).await;
    assert!(matches!(result, Err(Error::UnknownTokenAddress(_))));
}

#[tokio::test]
async fn test_connect_without_candidates_opens_nothing() {
    let node = TestNode::new().await;
    let token = node.register_funded_token(100).await;
    let channels = node
        .api
        .connect(token, 100, Some(3), None)
        .await
        .expect("connect");
    assert!(channels.is_empty());
    assert_eq!(node.token_balance(&token), 100);
}
