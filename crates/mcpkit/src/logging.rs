//! Bridges `tracing` events into protocol log notifications.
//!
//! [`McpLoggingLayer`] is a `tracing-subscriber` layer bound to one server
//! session. Every event below the session's minimum level is dropped;
//! everything else becomes a `notifications/message` whose `data` object
//! carries the event's fields, its `message`, and an RFC 3339 `time` stamp.

use std::sync::Arc;

use serde_json::Value;
use tracing::field::{Field, Visit};
use tracing_subscriber::layer::{Context, Layer};

use crate::model::{JsonObject, LoggingLevel, LoggingMessageNotificationParam};
use crate::server::ServerSession;
use crate::service::{Peer, RoleServer};

pub struct McpLoggingLayer {
    peer: Peer<RoleServer>,
    state: Arc<crate::server::SessionState>,
    logger: Option<String>,
}

impl McpLoggingLayer {
    pub fn new(session: &ServerSession) -> Self {
        McpLoggingLayer {
            peer: session.peer().clone(),
            state: session.state(),
            logger: None,
        }
    }

    /// Tag every forwarded record with a logger name.
    pub fn with_logger(mut self, logger: impl Into<String>) -> Self {
        self.logger = Some(logger.into());
        self
    }
}

impl<S: tracing::Subscriber> Layer<S> for McpLoggingLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let level = map_level(event.metadata().level());
        if !self.state.should_log(level) {
            return;
        }
        let mut data = JsonObject::new();
        let mut visitor = JsonVisitor(&mut data);
        event.record(&mut visitor);
        data.insert(
            "time".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        let params = LoggingMessageNotificationParam {
            level,
            logger: self.logger.clone(),
            data: Value::Object(data),
        };
        let peer = self.peer.clone();
        // Delivery is best-effort: events fired outside a runtime are
        // dropped rather than panicking the caller.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(error) = peer.notify_logging_message(params).await {
                    tracing::trace!(error = %error, "log forwarding failed");
                }
            });
        }
    }
}

fn map_level(level: &tracing::Level) -> LoggingLevel {
    if *level == tracing::Level::ERROR {
        LoggingLevel::Error
    } else if *level == tracing::Level::WARN {
        LoggingLevel::Warning
    } else if *level == tracing::Level::INFO {
        LoggingLevel::Info
    } else {
        LoggingLevel::Debug
    }
}

struct JsonVisitor<'a>(&'a mut JsonObject);

impl Visit for JsonVisitor<'_> {
    fn record_f64(&mut self, field: &Field, value: f64) {
        self.0.insert(field.name().to_string(), value.into());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), value.into());
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.into());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0
            .insert(field.name().to_string(), format!("{value:?}").into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_mapping_is_syslog_ordered() {
        assert_eq!(map_level(&tracing::Level::ERROR), LoggingLevel::Error);
        assert_eq!(map_level(&tracing::Level::WARN), LoggingLevel::Warning);
        assert_eq!(map_level(&tracing::Level::INFO), LoggingLevel::Info);
        assert_eq!(map_level(&tracing::Level::DEBUG), LoggingLevel::Debug);
        assert_eq!(map_level(&tracing::Level::TRACE), LoggingLevel::Debug);
    }
}
