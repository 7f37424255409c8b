//! Identifier and token generation.
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng, RngCore};

/// Length of the random suffix of an order number.
const ORDER_SUFFIX_LEN: usize = 10;
/// Subscription tokens carry 192 bits of randomness.
const SUBSCRIPTION_TOKEN_BYTES: usize = 24;

/// `bytes` random bytes from the OS, hex encoded.
pub fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Generates an order number of the form `ORD-<yyyymmddhhmmss>-<suffix>`, where the suffix is upper-case
/// alphanumeric. Uniqueness is enforced by the store; callers retry on collision.
pub fn new_order_number(now: DateTime<Utc>) -> String {
    let suffix: String =
        OsRng.sample_iter(&Alphanumeric).take(ORDER_SUFFIX_LEN).map(|c| char::from(c).to_ascii_uppercase()).collect();
    format!("ORD-{}-{suffix}", now.format("%Y%m%d%H%M%S"))
}

pub fn new_subscription_token() -> String {
    random_hex(SUBSCRIPTION_TOKEN_BYTES)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn order_numbers() {
        let now = DateTime::parse_from_rfc3339("2024-10-19T08:30:05Z").unwrap().with_timezone(&Utc);
        let number = new_order_number(now);
        assert!(number.starts_with("ORD-20241019083005-"));
        let suffix = number.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), ORDER_SUFFIX_LEN);
        assert!(suffix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        assert_ne!(new_order_number(now), number);
    }

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = new_subscription_token();
        assert_eq!(a.len(), 48);
        assert_ne!(a, new_subscription_token());
    }
}
