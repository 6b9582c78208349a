//! Shared test helpers for integration tests

use std::cell::Cell;
use std::rc::Rc;
use window_async::{MockNetwork, Window};

/// A window on a manually delivered mock network
pub fn window() -> (Window, Rc<MockNetwork>) {
    let network = Rc::new(MockNetwork::new());
    (Window::with_network(network.clone()), network)
}

/// Shared completion counter
#[derive(Clone, Default)]
pub struct Counter(Rc<Cell<u32>>);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bump(&self) {
        self.0.set(self.0.get() + 1);
    }

    pub fn get(&self) -> u32 {
        self.0.get()
    }
}
