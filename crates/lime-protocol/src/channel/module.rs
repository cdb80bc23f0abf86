use std::sync::{Arc, RwLock};

use lime_transport::SessionState;

/// Interceptor for one envelope kind on a channel.
///
/// Returning `None` from `on_receiving`/`on_sending` drops the envelope:
/// a suppressed inbound envelope never reaches the caller of `receive_*`
/// (the receive moves on to the next queued item) and a suppressed outbound
/// envelope is never handed to the transport.
#[async_trait::async_trait]
pub trait ChannelModule<T: Send + 'static>: Send + Sync {
    async fn on_state_changed(&self, _state: SessionState) {}

    async fn on_receiving(&self, envelope: T) -> Option<T> {
        Some(envelope)
    }

    async fn on_sending(&self, envelope: T) -> Option<T> {
        Some(envelope)
    }
}

/// Modules registered for one envelope kind, run in registration order.
pub(crate) struct ModuleList<T: Send + 'static> {
    modules: RwLock<Vec<Arc<dyn ChannelModule<T>>>>,
}

impl<T: Send + 'static> ModuleList<T> {
    pub(crate) fn new() -> Self {
        Self {
            modules: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, module: Arc<dyn ChannelModule<T>>) {
        if let Ok(mut modules) = self.modules.write() {
            modules.push(module);
        }
    }

    // Snapshot so no lock is held across module awaits.
    fn snapshot(&self) -> Vec<Arc<dyn ChannelModule<T>>> {
        self.modules.read().map(|m| m.clone()).unwrap_or_default()
    }

    pub(crate) async fn sending(&self, envelope: T) -> Option<T> {
        let mut envelope = envelope;
        for module in self.snapshot() {
            envelope = module.on_sending(envelope).await?;
        }
        Some(envelope)
    }

    pub(crate) async fn receiving(&self, envelope: T) -> Option<T> {
        let mut envelope = envelope;
        for module in self.snapshot() {
            envelope = module.on_receiving(envelope).await?;
        }
        Some(envelope)
    }

    pub(crate) async fn state_changed(&self, state: SessionState) {
        for module in self.snapshot() {
            module.on_state_changed(state).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lime_transport::{Document, Message};
    use std::sync::Mutex;

    struct Tagger(&'static str);

    #[async_trait::async_trait]
    impl ChannelModule<Message> for Tagger {
        async fn on_sending(&self, mut message: Message) -> Option<Message> {
            message
                .metadata
                .get_or_insert_with(Default::default)
                .insert("trace".into(), self.0.into());
            Some(message)
        }
    }

    struct DropAll;

    #[async_trait::async_trait]
    impl ChannelModule<Message> for DropAll {
        async fn on_sending(&self, _message: Message) -> Option<Message> {
            None
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<SessionState>>);

    #[async_trait::async_trait]
    impl ChannelModule<Message> for Recorder {
        async fn on_state_changed(&self, state: SessionState) {
            self.0.lock().unwrap().push(state);
        }
    }

    #[tokio::test]
    async fn modules_run_in_registration_order() {
        let list: ModuleList<Message> = ModuleList::new();
        list.add(Arc::new(Tagger("first")));
        list.add(Arc::new(Tagger("second")));

        let message = list
            .sending(Message::new(None, Document::text("hi")))
            .await
            .unwrap();
        assert_eq!(message.metadata.unwrap()["trace"], "second");
    }

    #[tokio::test]
    async fn suppression_short_circuits() {
        let list: ModuleList<Message> = ModuleList::new();
        let recorder = Arc::new(Recorder::default());
        list.add(Arc::new(DropAll));
        list.add(Arc::new(Tagger("never")));
        list.add(recorder.clone());

        assert!(list.sending(Message::new(None, Document::text("x"))).await.is_none());
        // Default receive hook passes through.
        assert!(list.receiving(Message::new(None, Document::text("x"))).await.is_some());

        list.state_changed(SessionState::Established).await;
        assert_eq!(*recorder.0.lock().unwrap(), vec![SessionState::Established]);
    }
}
