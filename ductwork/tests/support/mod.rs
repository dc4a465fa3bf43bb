//! Shared fixtures for the integration tests: canned sources and a
//! collecting sink.
#![allow(dead_code)]
use std::sync::{Arc, Mutex};

use futures::future::{self, Ready};

use ductwork::{Context, Error};

/// Source yielding a fixed list of items and then closing. Reusable across
/// runs: every invocation gets a fresh channel.
pub fn list_source<T>(
    items: Vec<T>,
) -> impl Fn(Context) -> Ready<Result<flume::Receiver<T>, Error>> + Send + Sync + 'static
where
    T: Clone + Send + Sync + 'static,
{
    move |_cx| {
        let (tx, rx) = flume::bounded(items.len().max(1));
        for item in items.iter().cloned() {
            let _ = tx.send(item);
        }
        future::ready(Ok(rx))
    }
}

/// Sink that appends every item to a shared list.
pub struct Collector<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Collector<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Collector<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, item: T) {
        self.items.lock().expect("collector poisoned").push(item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().expect("collector poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + 'static> Collector<T> {
    /// A sink closure that records each consumed item.
    pub fn sink(
        &self,
    ) -> impl Fn(Context, T) -> Ready<Result<(), Error>> + Send + Sync + 'static {
        let items = Arc::clone(&self.items);
        move |_cx, item| {
            items.lock().expect("collector poisoned").push(item);
            future::ready(Ok(()))
        }
    }
}

impl<T: Clone> Collector<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().expect("collector poisoned").clone()
    }
}
