//! PostgreSQL store integration tests.
//!
//! Run with: cargo test -p tenant-credits-store --features postgres-tests
//!
//! Each test starts PostgreSQL in a container via testcontainers-rs and runs
//! the embedded migrations. Set `TEST_DATABASE_URL` to use an existing
//! database instead.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};

use tenant_credits_core::{
    PlanId, ReferralReward, SubscriptionMirror, SubscriptionStatus, TransactionType, UserId,
    DEFAULT_APP_ID,
};
use tenant_credits_store::{CreditGrant, PgStore, ReferralGrant, Store, StoreError, ToolDebit};

/// A migrated store, plus the container backing it (if one was started).
struct TestDb {
    store: PgStore,
    _container: Option<ContainerAsync<GenericImage>>,
}

async fn start_db() -> TestDb {
    if let Ok(url) = std::env::var("TEST_DATABASE_URL") {
        let store = PgStore::connect(&url, 10).await.expect("Failed to connect");
        store.migrate().await.expect("Failed to run migrations");
        return TestDb {
            store,
            _container: None,
        };
    }

    // PostgreSQL logs the readiness line once during init and once when
    // actually serving, so wait a moment after the first one.
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::message_on_stdout(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_USER", "credits")
        .with_env_var("POSTGRES_PASSWORD", "credits")
        .with_env_var("POSTGRES_DB", "credits")
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start postgres container");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let host = container.get_host().await.expect("Failed to get container host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get mapped port");
    let url = format!("postgres://credits:credits@{host}:{port}/credits");

    let store = PgStore::connect(&url, 10).await.expect("Failed to connect");
    store.migrate().await.expect("Failed to run migrations");

    TestDb {
        store,
        _container: Some(container),
    }
}

fn debit(user_id: UserId, cost: i64) -> ToolDebit {
    ToolDebit {
        user_id,
        tool_type: "checker".into(),
        tool_id: "nebenkosten".into(),
        cost,
    }
}

fn grant(user_id: UserId, amount: i64) -> CreditGrant {
    CreditGrant {
        user_id,
        amount,
        transaction_type: TransactionType::Purchase,
        description: "top-up".into(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_debits_never_overspend() {
    let db = start_db().await;
    let store = Arc::new(db.store.clone());
    let user_id = UserId::generate();

    store.get_or_create_account(&user_id).await.unwrap();
    store.add_credits(&grant(user_id, 7)).await.unwrap();

    let handles: Vec<_> = (0..25)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.debit_for_tool(&debit(user_id, 1)).await })
        })
        .collect();

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(StoreError::InsufficientCredits { required: 1, .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(succeeded, 10);

    let account = store.get_account(&user_id).await.unwrap().unwrap();
    assert_eq!(account.balance, 0);
    assert_eq!(account.total_spent, 10);
    assert!(account.is_consistent());

    let ledger = store.list_transactions(&user_id, 100, 0).await.unwrap();
    assert_eq!(ledger.len(), 11);
    assert_eq!(ledger[0].balance_after, 0);
    assert_eq!(store.list_tool_usage(&user_id, 100).await.unwrap().len(), 10);
}

#[tokio::test]
async fn insufficient_debit_leaves_no_rows() {
    let db = start_db().await;
    let user_id = UserId::generate();
    db.store.get_or_create_account(&user_id).await.unwrap();

    let result = db.store.debit_for_tool(&debit(user_id, 4)).await;
    assert!(matches!(
        result,
        Err(StoreError::InsufficientCredits {
            balance: 3,
            required: 4
        })
    ));

    let account = db.store.get_account(&user_id).await.unwrap().unwrap();
    assert_eq!(account.balance, 3);
    assert_eq!(account.total_spent, 0);
    assert!(db.store.list_transactions(&user_id, 10, 0).await.unwrap().is_empty());
    assert!(db.store.list_tool_usage(&user_id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn newest_ledger_entry_tracks_balance() {
    let db = start_db().await;
    let user_id = UserId::generate();
    db.store.get_or_create_account(&user_id).await.unwrap();
    db.store.add_credits(&grant(user_id, 30)).await.unwrap();

    for _ in 0..20 {
        db.store.debit_for_tool(&debit(user_id, 1)).await.unwrap();
        let balance = db.store.get_account(&user_id).await.unwrap().unwrap().balance;
        let newest = db.store.list_transactions(&user_id, 1, 0).await.unwrap();
        assert_eq!(newest[0].balance_after, balance);
    }

    let page = db.store.list_transactions(&user_id, 2, 19).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[1].transaction_type, TransactionType::Purchase);
}

#[tokio::test]
async fn overflowing_grant_is_rejected() {
    let db = start_db().await;
    let user_id = UserId::generate();
    db.store.get_or_create_account(&user_id).await.unwrap();

    let result = db.store.add_credits(&grant(user_id, i64::MAX)).await;
    assert!(matches!(result, Err(StoreError::InvalidAmount(_))));

    let account = db.store.get_account(&user_id).await.unwrap().unwrap();
    assert_eq!(account.balance, 3);
    assert!(db.store.list_transactions(&user_id, 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_referral_reward_is_rejected() {
    let db = start_db().await;
    let referrer = UserId::generate();
    let referred = UserId::generate();
    let now = Utc::now();

    let reward = ReferralGrant {
        reward: ReferralReward::granted(referrer, referred, "ABC123", now),
        trial: Some(SubscriptionMirror::trial(referred, DEFAULT_APP_ID, 7, now)),
    };
    let receipt = db.store.grant_referral_reward(&reward).await.unwrap();
    assert!(receipt.trial_granted);
    assert_eq!(receipt.transaction.balance_after, 2);

    let again = ReferralGrant {
        reward: ReferralReward::granted(referrer, referred, "ABC123", Utc::now()),
        trial: None,
    };
    assert!(matches!(
        db.store.grant_referral_reward(&again).await,
        Err(StoreError::DuplicateReward { .. })
    ));

    let account = db.store.get_account(&referrer).await.unwrap().unwrap();
    assert_eq!(account.balance, 2);
    assert_eq!(db.store.list_rewards_for_referrer(&referrer).await.unwrap().len(), 1);
    assert_eq!(db.store.list_transactions(&referrer, 10, 0).await.unwrap().len(), 1);

    let trial = db
        .store
        .get_subscription(&referred, DEFAULT_APP_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(trial.plan_id, PlanId::Pro);
    assert_eq!(trial.status, SubscriptionStatus::Trial);
}

#[tokio::test]
async fn subscription_upsert_is_idempotent() {
    let db = start_db().await;
    let user_id = UserId::generate();
    let mut mirror = SubscriptionMirror::free(user_id, DEFAULT_APP_ID, Some("cus_pg".into()));
    mirror.plan_id = PlanId::Basic;
    mirror.status = SubscriptionStatus::Active;

    assert!(db.store.upsert_subscription(&mirror).await.unwrap());

    let mut again = mirror.clone();
    again.updated_at = Utc::now();
    assert!(!db.store.upsert_subscription(&again).await.unwrap());

    let stored = db
        .store
        .get_subscription(&user_id, DEFAULT_APP_ID)
        .await
        .unwrap()
        .unwrap();
    assert!(stored.same_state(&mirror));

    let by_customer = db
        .store
        .find_subscription_by_customer("cus_pg", DEFAULT_APP_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_customer.user_id, user_id);
}
