// ============================================================================
// Channel Naming
// ============================================================================
//
// <prefix>.req.<operation>   requests            (answering side subscribes req.*)
// <prefix>.resp.<requestId>  responses           (client subscribes resp.*)
// <prefix>.evt.<eventType>   event notifications (client subscribes evt.*)
//
// Replies are matched to waiters by the envelope id in the payload, never by
// the channel suffix.
//
// ============================================================================

use island_error::{BusError, RpcResult};

const REQUEST_SEGMENT: &str = "req";
const RESPONSE_SEGMENT: &str = "resp";
const EVENT_SEGMENT: &str = "evt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelNamer {
    prefix: String,
}

impl ChannelNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn request(&self, operation: &str) -> String {
        format!("{}.{}.{}", self.prefix, REQUEST_SEGMENT, operation)
    }

    pub fn response(&self, request_id: &str) -> String {
        format!("{}.{}.{}", self.prefix, RESPONSE_SEGMENT, request_id)
    }

    pub fn event(&self, event_type: &str) -> String {
        format!("{}.{}.{}", self.prefix, EVENT_SEGMENT, event_type)
    }

    // ===== Subscribe patterns =====

    /// Answering side only
    pub fn request_pattern(&self) -> String {
        format!("{}.{}.*", self.prefix, REQUEST_SEGMENT)
    }

    pub fn response_pattern(&self) -> String {
        format!("{}.{}.*", self.prefix, RESPONSE_SEGMENT)
    }

    pub fn event_pattern(&self) -> String {
        format!("{}.{}.*", self.prefix, EVENT_SEGMENT)
    }

    /// Patterns a requesting process listens on
    pub fn client_patterns(&self) -> Vec<String> {
        vec![self.response_pattern(), self.event_pattern()]
    }

    // ===== Predicates =====

    pub fn is_request_channel(&self, channel: &str) -> bool {
        self.operation_of(channel).is_some()
    }

    pub fn is_response_channel(&self, channel: &str) -> bool {
        self.suffix(channel, RESPONSE_SEGMENT).is_some()
    }

    pub fn is_event_channel(&self, channel: &str) -> bool {
        self.event_type_of(channel).is_some()
    }

    /// Operation named by a request channel
    pub fn operation_of<'a>(&self, channel: &'a str) -> Option<&'a str> {
        self.suffix(channel, REQUEST_SEGMENT)
    }

    /// Event type named by an event channel (everything after `<prefix>.evt.`)
    pub fn event_type_of<'a>(&self, channel: &'a str) -> Option<&'a str> {
        self.suffix(channel, EVENT_SEGMENT)
    }

    fn suffix<'a>(&self, channel: &'a str, segment: &str) -> Option<&'a str> {
        let rest = channel.strip_prefix(self.prefix.as_str())?;
        let rest = rest.strip_prefix('.')?;
        let rest = rest.strip_prefix(segment)?;
        let rest = rest.strip_prefix('.')?;
        (!rest.is_empty()).then_some(rest)
    }
}

/// Check an operation or event type before it becomes a channel segment.
///
/// Names must be non-empty, free of glob and whitespace characters, and must
/// not begin with one of the reserved segments `req`, `resp` or `evt`.
pub fn validate_name(name: &str) -> RpcResult<()> {
    if name.is_empty() {
        return Err(BusError::internal("channel name segment is empty"));
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '*' | '?' | '[' | ']'))
    {
        return Err(BusError::internal(format!(
            "channel name segment contains reserved characters: {:?}",
            name
        )));
    }
    if name.split('.').any(str::is_empty) {
        return Err(BusError::internal(format!(
            "channel name segment has an empty part: {:?}",
            name
        )));
    }
    let head = name.split('.').next().unwrap_or(name);
    if matches!(head, REQUEST_SEGMENT | RESPONSE_SEGMENT | EVENT_SEGMENT) {
        return Err(BusError::internal(format!(
            "channel name segment starts with a reserved word: {:?}",
            name
        )));
    }
    Ok(())
}
