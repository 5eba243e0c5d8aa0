//! Key encoding utilities for `RocksDB`.
//!
//! Per-user keys start with the 16 UUID bytes of the user so that a prefix
//! scan lists one user's rows. ULID suffixes keep those rows in time order.

use tenant_credits_core::{TransactionId, UsageId, UserId};

/// Key of a credit account.
#[must_use]
pub fn account_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Prefix shared by all of a user's rows in per-user column families.
#[must_use]
pub fn user_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Smallest key greater than every key starting with `prefix`.
///
/// `None` when the prefix is all `0xFF`, i.e. the range runs to the end.
#[must_use]
pub fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}

/// Key of a ledger entry: `user_id (16) || transaction_id (16)`.
#[must_use]
pub fn transaction_key(user_id: &UserId, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Key of a tool usage record: `user_id (16) || usage_id (16)`.
#[must_use]
pub fn usage_key(user_id: &UserId, usage_id: &UsageId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(&usage_id.to_bytes());
    key
}

/// Key of a mirror row: `user_id (16) || app_id`.
#[must_use]
pub fn subscription_key(user_id: &UserId, app_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + app_id.len());
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(app_id.as_bytes());
    key
}

/// Key of the customer index: `customer_id 0x00 app_id`.
#[must_use]
pub fn customer_key(customer_id: &str, app_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(customer_id.len() + 1 + app_id.len());
    key.extend_from_slice(customer_id.as_bytes());
    key.push(0);
    key.extend_from_slice(app_id.as_bytes());
    key
}

/// Key of a referral code row.
#[must_use]
pub fn code_key(code: &str) -> Vec<u8> {
    code.as_bytes().to_vec()
}

/// Key of the referrer index: `referrer (16) || referred (16)`.
#[must_use]
pub fn referrer_reward_key(referrer: &UserId, referred: &UserId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(referrer.as_bytes());
    key.extend_from_slice(referred.as_bytes());
    key
}

/// Decode a user id from 16 stored bytes.
#[must_use]
pub fn user_id_from_bytes(bytes: &[u8]) -> Option<UserId> {
    uuid::Uuid::from_slice(bytes).ok().map(UserId::from_uuid)
}

/// Extract the referred user from a referrer index key.
#[must_use]
pub fn referred_from_referrer_key(key: &[u8]) -> Option<UserId> {
    key.get(16..32).and_then(user_id_from_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_key_layout() {
        let user_id = UserId::generate();
        let tx_id = TransactionId::generate();
        let key = transaction_key(&user_id, &tx_id);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], user_id.as_bytes());
        assert_eq!(&key[16..], tx_id.to_bytes());
        assert!(key.starts_with(&user_prefix(&user_id)));
    }

    #[test]
    fn prefix_successor_bounds_the_range() {
        assert_eq!(prefix_successor(&[1, 2, 3]), Some(vec![1, 2, 4]));
        assert_eq!(prefix_successor(&[1, 0xFF, 0xFF]), Some(vec![2]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);

        let user_id = UserId::generate();
        let upper = prefix_successor(&user_prefix(&user_id)).unwrap();
        let key = transaction_key(&user_id, &TransactionId::generate());
        assert!(key.as_slice() < upper.as_slice());
    }

    #[test]
    fn subscription_key_separates_apps() {
        let user_id = UserId::generate();
        assert_ne!(
            subscription_key(&user_id, "mieter"),
            subscription_key(&user_id, "zaehler")
        );
    }

    #[test]
    fn referrer_key_roundtrip() {
        let referrer = UserId::generate();
        let referred = UserId::generate();
        let key = referrer_reward_key(&referrer, &referred);
        assert_eq!(referred_from_referrer_key(&key), Some(referred));
        assert_eq!(referred_from_referrer_key(&key[..20]), None);
    }

    #[test]
    fn customer_key_is_unambiguous() {
        assert_ne!(customer_key("cus_a", "bmieter"), customer_key("cus_ab", "mieter"));
    }
}
