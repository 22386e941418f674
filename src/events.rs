//! Synchronous publish/subscribe channel used for every engine event.
//!
//! `emit` delivers to the subscribers registered when it starts, in
//! subscription order, before returning. Listeners may subscribe, unsubscribe
//! or emit again from inside a callback. A nested emit on the same channel is
//! queued and delivered to every subscriber once the outer event has reached
//! all of them.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::Rc,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<T> = Rc<RefCell<dyn FnMut(&T)>>;

pub struct EventChannel<T> {
    listeners: RefCell<Vec<(SubscriptionId, Listener<T>)>>,
    next_id: Cell<u64>,
    queued: RefCell<VecDeque<T>>,
    dispatching: Cell<bool>,
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            queued: RefCell::new(VecDeque::new()),
            dispatching: Cell::new(false),
        }
    }
}

impl<T> EventChannel<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: FnMut(&T) + 'static,
    {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let listener: Listener<T> = Rc::new(RefCell::new(listener));
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    fn deliver(&self, event: &T) {
        let snapshot: Vec<(SubscriptionId, Listener<T>)> = self.listeners.borrow().clone();
        for (id, listener) in snapshot {
            // Skip listeners removed by an earlier callback of this emit.
            if !self.listeners.borrow().iter().any(|(live, _)| *live == id) {
                continue;
            }
            if let Ok(mut callback) = listener.try_borrow_mut() {
                (*callback)(event);
            };
        }
    }
}

impl<T: Clone> EventChannel<T> {
    pub fn emit(&self, event: &T) {
        if self.dispatching.get() {
            self.queued.borrow_mut().push_back(event.clone());
            return;
        }

        self.dispatching.set(true);
        self.deliver(event);
        loop {
            let next = self.queued.borrow_mut().pop_front();
            match next {
                Some(queued) => self.deliver(&queued),
                None => break,
            }
        }
        self.dispatching.set(false);
    }
}
