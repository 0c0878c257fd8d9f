//! Custom tracing layer for emitting LogLine WebSocket events.

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::service::{PelEvent, PelService};

/// Mirrors every `tracing` event as a `PelEvent::LogLine` out to
/// WebSocket subscribers, so a `/events` client sees daemon log output
/// alongside PEL lifecycle notifications.
pub struct WebSocketLayer {
    service: PelService,
}

impl WebSocketLayer {
    pub fn new(service: PelService) -> Self {
        Self { service }
    }
}

impl<S> Layer<S> for WebSocketLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let level = match *event.metadata().level() {
            Level::ERROR => "error",
            Level::WARN => "warn",
            Level::INFO => "info",
            Level::DEBUG => "debug",
            Level::TRACE => "debug",
        };

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if let Some(msg) = visitor.message {
            self.service.broadcast_event(PelEvent::LogLine {
                level: level.to_string(),
                target: event.metadata().target().to_string(),
                msg,
                timestamp: chrono::Utc::now(),
            });
        }
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: Option<String>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{:?}", value));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        }
    }
}
