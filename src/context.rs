use crate::event::EventHub;
use crate::hub::ComponentHub;
use std::sync::Arc;

/// The component hub and event hub shared by one network instance.
#[derive(Clone)]
pub struct NetworkContext {
    pub hub: Arc<ComponentHub>,
    pub events: Arc<EventHub>,
}

impl NetworkContext {
    pub fn new() -> Self {
        Self {
            hub: ComponentHub::new(),
            events: Arc::new(EventHub::new()),
        }
    }
}

impl Default for NetworkContext {
    fn default() -> Self {
        Self::new()
    }
}
