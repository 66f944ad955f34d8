use crate::{lock_manager::ChannelLockManager, tests::test_utils::gen_rand_address, Error};

#[test]
fn test_try_acquire_fails_while_held() {
    let locks = ChannelLockManager::new();
    let channel_id = gen_rand_address();
    assert!(locks.try_acquire(&channel_id));
    assert!(!locks.try_acquire(&channel_id));
    locks.release(&channel_id);
    assert!(locks.try_acquire(&channel_id));
}

#[test]
#[should_panic(expected = "not held")]
fn test_release_of_free_lock_panics() {
    let locks = ChannelLockManager::new();
    locks.release(&gen_rand_address());
}

#[test]
fn test_guard_releases_on_drop() {
    let locks = ChannelLockManager::new();
    let channel_id = gen_rand_address();
    {
        let _guard = locks.try_lock(&channel_id).expect("lock");
        assert!(locks.is_locked(&channel_id));
        assert!(matches!(
            locks.try_lock(&channel_id),
            Err(Error::ChannelBusy(id)) if id == channel_id
        ));
    }
    assert!(!locks.is_locked(&channel_id));
    assert_eq!(locks.held_count(), 0);
}

#[test]
fn test_acquire_all_or_none_rolls_back_on_busy_channel() {
    let locks = ChannelLockManager::new();
    let channel_ids: Vec<_> = (0..4).map(|_| gen_rand_address()).collect();
    let busy = locks.try_lock(&channel_ids[2]).expect("lock");

    let result = locks.acquire_all_or_none(&channel_ids);
    assert!(matches!(result, Err(Error::ChannelBusy(id)) if id == channel_ids[2]));
    // Only the lock taken outside the batch is still held.
    assert_eq!(locks.held_count(), 1);
    assert!(!locks.is_locked(&channel_ids[0]));
    assert!(!locks.is_locked(&channel_ids[1]));

    drop(busy);
    let guard = locks.acquire_all_or_none(&channel_ids).expect("all locks");
    assert_eq!(guard.channel_ids(), channel_ids.as_slice());
    assert_eq!(locks.held_count(), 4);
    drop(guard);
    assert_eq!(locks.held_count(), 0);
}

#[test]
fn test_acquire_all_or_none_ignores_duplicates() {
    let locks = ChannelLockManager::new();
    let channel_id = gen_rand_address();
    let guard = locks
        .acquire_all_or_none(&[channel_id, channel_id])
        .expect("lock");
    assert_eq!(guard.channel_ids(), &[channel_id]);
    drop(guard);
    assert_eq!(locks.held_count(), 0);
}

#[test]
fn test_clones_share_the_table() {
    let locks = ChannelLockManager::new();
    let other = locks.clone();
    let channel_id = gen_rand_address();
    let _guard = locks.try_lock(&channel_id).expect("lock");
    assert!(other.is_locked(&channel_id));
    assert!(!other.try_acquire(&channel_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquire_is_exclusive() {
    let locks = ChannelLockManager::new();
    let channel_id = gen_rand_address();
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let locks = locks.clone();
            tokio::spawn(async move { locks.try_lock(&channel_id).ok() })
        })
        .collect();
    let mut guards = Vec::new();
    for handle in handles {
        guards.push(handle.await.expect("task"));
    }
    assert_eq!(locks.held_count(), 1);
    assert_eq!(guards.iter().filter(|guard| guard.is_some()).count(), 1);
}
