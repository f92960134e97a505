//! Mirrors emitted `tracing` events into a bounded broadcast channel so an
//! external subscriber could tail logs, the same shape as the teacher's
//! `tracing.rs` `PublicTracerLayer`/`LogChannel`. Every line is passed
//! through `redact::redact` before being broadcast, per spec.md design
//! note 9 ("redaction routine ... before being recorded").

use std::fmt;

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::field::{Field, Visit};
use tracing::Subscriber;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use crate::redact::redact;

#[derive(Debug)]
pub struct PublicLogLayer {
    channel: broadcast::Sender<String>,
}

#[derive(Debug, Clone)]
pub struct LogChannel(pub broadcast::Sender<String>);

impl LogChannel {
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.0.subscribe()
    }
}

/// Builds the layer plus the handle routes would hold to subscribe.
pub fn layer() -> (PublicLogLayer, LogChannel) {
    let (tx, _) = broadcast::channel(200);
    (PublicLogLayer { channel: tx.clone() }, LogChannel(tx))
}

/// Installs the global subscriber (env-filter-gated fmt output plus this
/// mirror layer) and returns the handle routes hold to subscribe, the same
/// shape as the teacher's `init_tracer`.
pub fn init_tracer() -> LogChannel {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let (log_layer, log_channel) = layer();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(log_layer)
        .init();
    log_channel
}

struct JsonVisitor {
    value: Map<String, Value>,
}

impl JsonVisitor {
    fn new() -> Self {
        Self { value: Map::new() }
    }
}

impl Visit for JsonVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.value.insert(field.name().to_string(), Value::String(redact(&format!("{value:?}"))));
    }
}

impl<S: Subscriber> Layer<S> for PublicLogLayer {
    fn enabled(&self, metadata: &tracing::Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        let target = metadata.target();
        let noisy = ["hyper", "mio", "tower", "h2"];
        !noisy.iter().any(|pattern| target.starts_with(pattern))
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = JsonVisitor::new();
        event.record(&mut visitor);
        visitor.value.insert("level".to_string(), Value::String(event.metadata().level().to_string()));
        visitor.value.insert("target".to_string(), Value::String(event.metadata().target().to_string()));
        if let Ok(line) = serde_json::to_string(&Value::Object(visitor.value)) {
            let _ = self.channel.send(line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    #[test]
    fn broadcasts_redacted_event_fields() {
        let (log_layer, channel) = layer();
        let mut rx = channel.subscribe();
        let subscriber = tracing_subscriber::registry().with(log_layer);
        let _guard = tracing::subscriber::set_default(subscriber);

        tracing::info!(message = "api_key=sk-abcdef1234567890 accepted");

        let line = rx.try_recv().expect("event should have been broadcast");
        assert!(!line.contains("sk-abcdef1234567890"));
        assert!(line.contains("[redacted]"));
    }
}
