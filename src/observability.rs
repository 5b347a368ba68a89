use biometrics::{Collector, Counter, Moments};

pub(crate) static SESSION_MESSAGES_SENT: Counter = Counter::new("chatstack.session.messages_sent");
pub(crate) static SESSION_SEND_ERRORS: Counter = Counter::new("chatstack.session.send_errors");
pub(crate) static SESSION_MESSAGES_RECEIVED: Counter =
    Counter::new("chatstack.session.messages_received");
pub(crate) static SESSION_MESSAGES_PRINTED: Counter =
    Counter::new("chatstack.session.messages_printed");
pub(crate) static SESSION_RECONNECT_ATTEMPTS: Counter =
    Counter::new("chatstack.session.reconnect_attempts");
pub(crate) static SESSION_RECONNECT_FAILURES: Counter =
    Counter::new("chatstack.session.reconnect_failures");

pub(crate) static NAMES_CACHE_HITS: Counter = Counter::new("chatstack.names.cache_hits");
pub(crate) static NAMES_LOOKUPS: Counter = Counter::new("chatstack.names.lookups");
pub(crate) static NAMES_LOOKUPS_COALESCED: Counter =
    Counter::new("chatstack.names.lookups_coalesced");
pub(crate) static NAMES_LOOKUP_ERRORS: Counter = Counter::new("chatstack.names.lookup_errors");
pub(crate) static NAMES_LOOKUP_DURATION: Moments =
    Moments::new("chatstack.names.lookup_duration_seconds");

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("chatstack.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("chatstack.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("chatstack.client.request_duration_seconds");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&SESSION_MESSAGES_SENT);
    collector.register_counter(&SESSION_SEND_ERRORS);
    collector.register_counter(&SESSION_MESSAGES_RECEIVED);
    collector.register_counter(&SESSION_MESSAGES_PRINTED);
    collector.register_counter(&SESSION_RECONNECT_ATTEMPTS);
    collector.register_counter(&SESSION_RECONNECT_FAILURES);

    collector.register_counter(&NAMES_CACHE_HITS);
    collector.register_counter(&NAMES_LOOKUPS);
    collector.register_counter(&NAMES_LOOKUPS_COALESCED);
    collector.register_counter(&NAMES_LOOKUP_ERRORS);
    collector.register_moments(&NAMES_LOOKUP_DURATION);

    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);
}
