//! Deduplication of concurrent producer streams.
//!
//! Both variants collapse N input streams into one output stream and close
//! the output only after every input has drained. Ordering across different
//! producers is not defined; within one producer it is preserved.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::updater::jobs::{recv_or_cancel, send_or_cancel};

/// Streaming dedup: the first value per key is forwarded immediately, every
/// repeat is dropped.
pub fn first_wins<T, K, F>(
    cancel: &CancellationToken,
    capacity: usize,
    key: F,
    inputs: Vec<mpsc::Receiver<T>>,
) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let seen: Arc<Mutex<HashSet<K>>> = Arc::new(Mutex::new(HashSet::new()));
    let key = Arc::new(key);

    for mut input in inputs {
        let cancel = cancel.clone();
        let tx = tx.clone();
        let seen = Arc::clone(&seen);
        let key = Arc::clone(&key);
        tokio::spawn(async move {
            while let Some(value) = recv_or_cancel(&cancel, &mut input).await {
                let fresh = seen
                    .lock()
                    .expect("dedup set lock poisoned")
                    .insert(key(&value));
                if fresh && !send_or_cancel(&cancel, &tx, value).await {
                    return;
                }
            }
        });
    }

    rx
}

/// Buffering dedup: colliding keys go through `merge(incoming, previous)`
/// and the table only drains once every input is fully consumed, since the
/// winner for a key is not knowable before that.
pub fn merging<T, K, F, M>(
    cancel: &CancellationToken,
    capacity: usize,
    key: F,
    merge: M,
    inputs: Vec<mpsc::Receiver<T>>,
) -> mpsc::Receiver<T>
where
    T: Send + 'static,
    K: Eq + Hash + Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
    M: Fn(T, T) -> T + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let table: Arc<Mutex<HashMap<K, T>>> = Arc::new(Mutex::new(HashMap::new()));
    let key = Arc::new(key);
    let merge = Arc::new(merge);

    let mut collectors = Vec::with_capacity(inputs.len());
    for mut input in inputs {
        let cancel = cancel.clone();
        let table = Arc::clone(&table);
        let key = Arc::clone(&key);
        let merge = Arc::clone(&merge);
        collectors.push(tokio::spawn(async move {
            while let Some(value) = recv_or_cancel(&cancel, &mut input).await {
                let mut table = table.lock().expect("merge table lock poisoned");
                let k = key(&value);
                match table.remove(&k) {
                    None => {
                        table.insert(k, value);
                    }
                    Some(previous) => {
                        table.insert(k, merge(value, previous));
                    }
                }
            }
        }));
    }

    let cancel = cancel.clone();
    tokio::spawn(async move {
        join_all(collectors).await;

        let values: Vec<T> = {
            let mut table = table.lock().expect("merge table lock poisoned");
            table.drain().map(|(_, value)| value).collect()
        };
        for value in values {
            if !send_or_cancel(&cancel, &tx, value).await {
                return;
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel_of(values: Vec<&str>) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(values.len().max(1));
        for value in values {
            tx.try_send(value.to_string()).unwrap();
        }
        rx
    }

    async fn collect(mut rx: mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(value) = rx.recv().await {
            out.push(value);
        }
        out
    }

    #[tokio::test]
    async fn first_wins_emits_first_observation_per_key() {
        let cancel = CancellationToken::new();
        let input = channel_of(vec!["a1", "b1", "a2", "c1", "b2"]);

        let out = first_wins(
            &cancel,
            8,
            |value: &String| value.chars().next().unwrap(),
            vec![input],
        );
        let values = collect(out).await;

        assert_eq!(values, vec!["a1", "b1", "c1"]);
    }

    #[tokio::test]
    async fn first_wins_never_repeats_a_key_across_producers() {
        let cancel = CancellationToken::new();
        let left = channel_of(vec!["a", "b", "c"]);
        let right = channel_of(vec!["b", "c", "d"]);

        let out = first_wins(&cancel, 8, |value: &String| value.clone(), vec![left, right]);
        let mut values = collect(out).await;
        values.sort();

        assert_eq!(values, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn merging_emits_one_value_per_key() {
        let cancel = CancellationToken::new();
        let input = channel_of(vec!["a1", "a2", "b1", "a3"]);

        let out = merging(
            &cancel,
            8,
            |value: &String| value.chars().next().unwrap(),
            // Keep the highest suffix.
            |incoming: String, previous: String| {
                if incoming > previous { incoming } else { previous }
            },
            vec![input],
        );
        let mut values = collect(out).await;
        values.sort();

        assert_eq!(values, vec!["a3", "b1"]);
    }

    #[tokio::test]
    async fn merging_replay_reproduces_winners() {
        for _ in 0..10 {
            let cancel = CancellationToken::new();
            let input = channel_of(vec!["a1", "a3", "a2"]);
            let out = merging(
                &cancel,
                8,
                |value: &String| value.chars().next().unwrap(),
                // First-seen survives unless the incoming one is canonical.
                |incoming: String, previous: String| {
                    if incoming.ends_with('3') { incoming } else { previous }
                },
                vec![input],
            );
            assert_eq!(collect(out).await, vec!["a3"]);
        }
    }
}
