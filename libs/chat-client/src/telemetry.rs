use tracing::info_span;

use crate::config::TransportKind;

pub fn span_for_exchange(endpoint: &str, sender_id: &str) -> tracing::Span {
    info_span!(
        "chat.exchange",
        transport = TransportKind::Rest.as_str(),
        endpoint,
        sender_id
    )
}

pub fn span_for_connection(url: &str, sender_id: &str, attempt: u64) -> tracing::Span {
    info_span!(
        "chat.connection",
        transport = TransportKind::Duplex.as_str(),
        url,
        sender_id,
        attempt
    )
}

/// Strips query strings so credentials passed as parameters never reach logs.
pub fn redact_url(url: &str) -> &str {
    url.split(['?', '#']).next().unwrap_or(url)
}
