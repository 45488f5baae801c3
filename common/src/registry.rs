use std::{cell::RefCell, collections::BTreeMap, rc::Rc};

use crate::{
    bus::EventBus,
    event::{Event, EventKind},
};

pub type HandlerFn<C> = dyn FnMut(&EventBus<C>, &Event) -> anyhow::Result<()>;

pub(crate) type SharedHandler<C> = Rc<RefCell<HandlerFn<C>>>;

/// Event handlers keyed by the exact event kind, kept in registration order.
pub struct HandlerRegistry<C: 'static> {
    handlers: BTreeMap<EventKind, Vec<SharedHandler<C>>>,
}

impl<C: 'static> HandlerRegistry<C> {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    pub fn register<F>(&mut self, kind: EventKind, handler: F)
    where
        F: FnMut(&EventBus<C>, &Event) -> anyhow::Result<()> + 'static,
    {
        let handler: SharedHandler<C> = Rc::new(RefCell::new(handler));
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// Snapshot so handlers may register more handlers while being dispatched.
    pub(crate) fn handlers_for(&self, kind: EventKind) -> Vec<SharedHandler<C>> {
        self.handlers.get(&kind).cloned().unwrap_or_default()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.values().all(Vec::is_empty)
    }
}

impl<C: 'static> Default for HandlerRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
