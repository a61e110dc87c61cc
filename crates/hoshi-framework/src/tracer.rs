//! Logs every chain run of a service-registered matcher.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::chain::ChainOutcome;
use crate::context::HandlerContext;
use crate::dispatcher::DispatchHook;
use crate::matcher::MatcherTable;

/// A [`DispatchHook`] that reports which service handles an event.
///
/// Matchers without a descriptor (registered directly on the table) are
/// ignored.
#[derive(Debug, Clone)]
pub struct ServiceTracer {
    table: Arc<MatcherTable>,
}

impl ServiceTracer {
    pub fn new(table: Arc<MatcherTable>) -> Self {
        Self { table }
    }
}

#[async_trait]
impl DispatchHook for ServiceTracer {
    async fn before(&self, ctx: &HandlerContext) {
        if let Some(descriptor) = self.table.descriptor(ctx.matcher_id()) {
            info!(service = %descriptor.service, "Event will be handled by {descriptor}");
        }
    }

    async fn after(&self, ctx: &HandlerContext, outcome: &ChainOutcome) {
        let Some(descriptor) = self.table.descriptor(ctx.matcher_id()) else {
            return;
        };
        if let Some(e) = outcome.error() {
            error!(service = %descriptor.service, error = %e, "Event handling failed from {descriptor}");
        }
        info!(service = %descriptor.service, "Event handling completed from {descriptor}");
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use hoshi_core::{BotManager, BoxedBot, ChatEvent};
    use parking_lot::Mutex;
    use tower::BoxError;

    use super::*;
    use crate::dispatcher::{DispatchSettings, EventDispatcher};
    use crate::service::{ServiceOptions, ServiceRegistry};
    use crate::store::MemoryStore;
    use crate::testing::MockBot;
    use crate::wrapper::MatchOptions;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    #[tokio::test]
    async fn test_tracer_logs_failures_and_completion() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let registry = ServiceRegistry::new(Arc::new(MemoryStore::new()), Arc::new(BotManager::new()));
        let dispatcher = EventDispatcher::new(
            Arc::clone(registry.matcher_table()),
            DispatchSettings::default(),
        );
        dispatcher.add_hook(Arc::new(ServiceTracer::new(Arc::clone(registry.matcher_table()))));

        let sv = registry.register(ServiceOptions::new("flaky")).unwrap();
        sv.on_command("boom", (), MatchOptions::default())
            .handle(|| async { Err::<(), BoxError>("kaput".into()) });

        let direct = registry
            .matcher_table()
            .add(crate::matcher::Matcher::new(hoshi_core::EventType::Message));
        direct.handle(|| async {});

        let bot: BoxedBot = MockBot::new("bot");
        dispatcher
            .dispatch_event(ChatEvent::group_message(1, 2, "/boom").into(), bot)
            .await;

        let logs = captured.text();
        let descriptor = "<Matcher from Service flaky, priority=1, type=Message.command, command=boom, only_group=true>";
        assert!(logs.contains(&format!("Event will be handled by {descriptor}")));
        assert!(logs.contains(&format!("Event handling failed from {descriptor}")));
        assert!(logs.contains("kaput"));
        assert!(logs.contains(&format!("Event handling completed from {descriptor}")));
        assert_eq!(logs.matches("Event will be handled by").count(), 1);
    }
}
