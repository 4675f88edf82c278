use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub type Flight<T> = Shared<BoxFuture<'static, T>>;

type FlightMap<K, T> = Arc<Mutex<HashMap<K, (u64, Flight<T>)>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// At most one in-flight execution per key; later callers share its outcome.
///
/// A flight is driven on its own task, so it completes even when every caller
/// drops its handle. Its entry is removed when it completes.
pub struct SingleFlight<K, T: Clone> {
    flights: FlightMap<K, T>,
    next_id: AtomicU64,
}

impl<K, T> Default for SingleFlight<K, T>
where
    T: Clone,
{
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// The in-flight execution for `key`, if there is one.
    pub fn get(&self, key: &K) -> Option<Flight<T>> {
        lock(&self.flights).get(key).map(|(_, flight)| flight.clone())
    }

    /// Join the flight for `key`, or begin one with `start`.
    ///
    /// `start` runs at most once and only when no flight exists. The bool is
    /// true when this call began the flight.
    pub fn join_or_start<F>(&self, key: &K, start: F) -> (Flight<T>, bool)
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        let mut flights = lock(&self.flights);
        if let Some((_, flight)) = flights.get(key) {
            return (flight.clone(), false);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let work = start();
        let map = Arc::clone(&self.flights);
        let owned_key = key.clone();
        let flight = async move {
            let outcome = work.await;
            let mut flights = lock(&map);
            if flights.get(&owned_key).is_some_and(|(current, _)| *current == id) {
                flights.remove(&owned_key);
            }
            outcome
        }
        .boxed()
        .shared();

        flights.insert(key.clone(), (id, flight.clone()));
        drop(flights);

        tokio::spawn(flight.clone());
        (flight, true)
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.flights).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.flights).len()
    }
}
