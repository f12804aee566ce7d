//! Request coalescing: concurrent callers of the same key share one execution.

use std::collections::HashMap;
use std::future::Future;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

type Call<V> = Shared<BoxFuture<'static, V>>;

pub struct SingleFlight<V: Clone> {
    calls: Mutex<HashMap<String, Call<V>>>,
}

impl<V: Clone + Send + Sync + 'static> Default for SingleFlight<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone + Send + Sync + 'static> SingleFlight<V> {
    pub fn new() -> Self {
        Self { calls: Mutex::new(HashMap::new()) }
    }

    /// Runs `fut` unless a call for `key` is already in flight, in which case
    /// `fut` is dropped and the in-flight result is awaited instead.
    ///
    /// The in-flight entry does not depend on its originating caller: if that
    /// caller is cancelled, any remaining waiter keeps driving the shared future.
    pub async fn work<F>(&self, key: &str, fut: F) -> V
    where
        F: Future<Output = V> + Send + 'static,
    {
        let call = {
            let mut calls = self.calls.lock();
            match calls.get(key) {
                Some(call) => call.clone(),
                None => {
                    let call = fut.boxed().shared();
                    calls.insert(key.to_string(), call.clone());
                    call
                }
            }
        };

        let value = call.clone().await;

        let mut calls = self.calls.lock();
        if calls.get(key).is_some_and(|c| c.ptr_eq(&call)) {
            calls.remove(key);
        }
        value
    }

    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }
}
