//! Routing-key grammar and bus topology names.
//!
//! Two grammars share the exchange:
//!
//! - `<type>.<action>` for activity, plan, subscription and inscription events
//!   (`activity.created`, `subscription.cancelled`)
//! - `payment.<action>.<entity_type>` for payment events, qualified by the
//!   entity they settle (`payment.completed.subscription`)
//!
//! Queues bind with AMQP topic patterns: `*` matches exactly one word and `#`
//! matches zero or more words. [`topic_matches`] implements the same rules so
//! in-process buses route identically to the broker.

/// Default topic exchange name.
pub const DEFAULT_EXCHANGE: &str = "gym_events";

/// Durable queue consumed by the search indexer.
pub const SEARCH_QUEUE: &str = "search_indexer_queue";

/// Durable queue consumed by the activities service.
pub const ACTIVITIES_QUEUE: &str = "activities_subscription_events";

/// Durable queue consumed by the subscriptions service for payment events.
pub const SUBSCRIPTIONS_PAYMENT_QUEUE: &str = "subscriptions_payment_events";

/// Bindings of the search indexer queue.
pub const SEARCH_BINDINGS: &[&str] = &["activity.*", "plan.*", "subscription.*", "inscription.*"];

/// Bindings of the activities queue.
pub const ACTIVITIES_BINDINGS: &[&str] = &["subscription.cancelled"];

/// Bindings of the subscriptions payment queue.
pub const SUBSCRIPTION_PAYMENT_BINDINGS: &[&str] = &[
    "payment.created.subscription",
    "payment.completed.subscription",
    "payment.failed.subscription",
    "payment.refunded.subscription",
];

/// Build a `<type>.<action>` routing key.
#[must_use]
pub fn routing_key(kind: &str, action: &str) -> String {
    format!("{kind}.{action}")
}

/// Build a `payment.<action>.<entity_type>` routing key.
///
/// `action` may be given bare (`completed`) or qualified (`payment.completed`).
#[must_use]
pub fn payment_routing_key(action: &str, entity_type: &str) -> String {
    let action = action.strip_prefix("payment.").unwrap_or(action);
    format!("payment.{action}.{entity_type}")
}

/// Check whether a routing key matches an AMQP topic binding pattern.
///
/// # Examples
///
/// ```
/// use gym_core::routing::topic_matches;
///
/// assert!(topic_matches("activity.*", "activity.created"));
/// assert!(!topic_matches("activity.*", "activity.created.v2"));
/// assert!(topic_matches("payment.#", "payment.completed.subscription"));
/// ```
#[must_use]
pub fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    match_words(&pattern, &key)
}

fn match_words(pattern: &[&str], key: &[&str]) -> bool {
    match (pattern.split_first(), key.split_first()) {
        (None, None) => true,
        (Some((&"#", rest)), _) => {
            // `#` swallows zero words, or one word and stays active
            match_words(rest, key) || (!key.is_empty() && match_words(pattern, &key[1..]))
        }
        (Some((&"*", rest)), Some((_, key_rest))) => match_words(rest, key_rest),
        (Some((word, rest)), Some((key_word, key_rest))) => {
            word == key_word && match_words(rest, key_rest)
        }
        _ => false,
    }
}

/// Check whether any of `patterns` matches `key`.
#[must_use]
pub fn any_matches(patterns: &[&str], key: &str) -> bool {
    patterns.iter().any(|pattern| topic_matches(pattern, key))
}
