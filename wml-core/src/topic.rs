//! Bus topic naming. Every reservoir publishes on `<reservoir_id>/WML`.

/// Fixed last topic level for reservoir storage feeds.
pub const FEED_SUFFIX: &str = "WML";

/// Subscription filter matching every reservoir feed.
pub const FEED_WILDCARD: &str = "+/WML";

/// Topic a reservoir's observations are published on.
pub fn feed_topic(reservoir_id: &str) -> String {
    format!("{}/{}", reservoir_id, FEED_SUFFIX)
}

/// Extract the reservoir id from a feed topic, or `None` if the topic is not
/// a reservoir feed.
pub fn reservoir_from_topic(topic: &str) -> Option<&str> {
    let (reservoir, suffix) = topic.split_once('/')?;
    if suffix != FEED_SUFFIX || reservoir.is_empty() {
        return None;
    }
    if reservoir.contains(['+', '#']) {
        return None;
    }
    Some(reservoir)
}
