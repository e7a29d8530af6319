//! Process-lifetime typed cache.
//!
//! One cache is created per filter registration and shared by every
//! configuration and stream built from it. Values are stored type-erased and
//! recovered with an exact type check, so a lookup has three outcomes:
//! not found, found, or found with a different type.

use std::any::{type_name, Any};
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};

struct Entry {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Thread-safe typed key/value store.
///
/// Cloning is cheap; clones share the same entries.
pub struct Cache<K = String> {
    entries: Arc<RwLock<HashMap<K, Entry>>>,
}

impl<K> Clone for Cache<K> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<K: Eq + Hash> Default for Cache<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for Cache<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl<K: Eq + Hash> Cache<K> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Store `value` under `key`, replacing any previous value.
    pub fn store<V>(&self, key: impl Into<K>, value: V)
    where
        V: Any + Send + Sync,
    {
        let entry = Entry {
            value: Arc::new(value),
            type_name: type_name::<V>(),
        };
        self.entries.write().insert(key.into(), entry);
    }

    /// Load a shared reference to the value under `key`.
    ///
    /// Returns `Ok(None)` when the key is missing and
    /// [`Error::IncompatibleReceiver`] when the stored value is not a `V`.
    pub fn load_arc<V, Q>(&self, key: &Q) -> Result<Option<Arc<V>>>
    where
        V: Any + Send + Sync,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entries = self.entries.read();
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };

        Arc::clone(&entry.value)
            .downcast::<V>()
            .map(Some)
            .map_err(|_| Error::IncompatibleReceiver {
                stored: entry.type_name,
                requested: type_name::<V>(),
            })
    }

    /// Load a clone of the value under `key`.
    pub fn load<V, Q>(&self, key: &Q) -> Result<Option<V>>
    where
        V: Any + Send + Sync + Clone,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        Ok(self.load_arc::<V, Q>(key)?.map(|v| V::clone(&v)))
    }

    /// Receiver-style load: copies the value into `receiver`.
    ///
    /// Returns `Ok(true)` when the receiver was filled, `Ok(false)` when the
    /// key is missing, [`Error::NilReceiver`] when no receiver was given and
    /// [`Error::IncompatibleReceiver`] on a type mismatch. The receiver is
    /// left untouched on every outcome except `Ok(true)`.
    pub fn load_into<V, Q>(&self, key: &Q, receiver: Option<&mut V>) -> Result<bool>
    where
        V: Any + Send + Sync + Clone,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let receiver = receiver.ok_or(Error::NilReceiver)?;
        match self.load::<V, Q>(key)? {
            Some(value) => {
                *receiver = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove the value under `key`. Returns true if something was removed.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.write().remove(key).is_some()
    }

    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Debug, Clone, PartialEq)]
    struct Token {
        subject: String,
        expires_at: u64,
    }

    #[test]
    fn missing_key_is_not_an_error() {
        let cache: Cache = Cache::new();
        assert_eq!(cache.load::<u32, _>("absent").unwrap(), None);
    }

    #[test]
    fn load_returns_stored_value() {
        let cache: Cache = Cache::new();
        let token = Token {
            subject: "svc-a".to_string(),
            expires_at: 1_700_000_000,
        };
        cache.store("token", token.clone());

        assert_eq!(cache.load::<Token, _>("token").unwrap(), Some(token));
    }

    #[test]
    fn store_overwrites() {
        let cache: Cache = Cache::new();
        cache.store("limit", 10u32);
        cache.store("limit", 20u32);
        assert_eq!(cache.load::<u32, _>("limit").unwrap(), Some(20));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn type_mismatch_is_incompatible_receiver() {
        let cache: Cache = Cache::new();
        cache.store("limit", 10u32);

        let err = cache.load::<String, _>("limit").unwrap_err();
        assert!(matches!(err, Error::IncompatibleReceiver { .. }));
        assert!(err.to_string().contains("u32"));
    }

    #[test]
    fn load_into_outcomes() {
        let cache: Cache = Cache::new();
        cache.store("name", "gateway".to_string());

        let mut receiver = String::new();
        assert!(cache.load_into("name", Some(&mut receiver)).unwrap());
        assert_eq!(receiver, "gateway");

        let mut untouched = String::from("keep");
        assert!(!cache.load_into("missing", Some(&mut untouched)).unwrap());
        assert_eq!(untouched, "keep");

        let nil = cache.load_into::<String, _>("name", None);
        assert!(matches!(nil, Err(Error::NilReceiver)));

        let mut wrong = 0u64;
        let mismatch = cache.load_into("name", Some(&mut wrong));
        assert!(matches!(mismatch, Err(Error::IncompatibleReceiver { .. })));
        assert_eq!(wrong, 0);
    }

    #[test]
    fn load_arc_shares_the_allocation() {
        let cache: Cache = Cache::new();
        cache.store("shared", vec![1u8, 2, 3]);

        let a = cache.load_arc::<Vec<u8>, _>("shared").unwrap().unwrap();
        let b = cache.load_arc::<Vec<u8>, _>("shared").unwrap().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn clones_share_entries() {
        let cache: Cache = Cache::new();
        let other = cache.clone();
        other.store("k", 1i32);
        assert!(cache.contains("k"));
        assert!(cache.remove("k"));
        assert!(other.is_empty());
    }

    #[test]
    fn non_string_keys() {
        let cache: Cache<u64> = Cache::new();
        cache.store(7u64, "seven".to_string());
        assert_eq!(cache.load::<String, _>(&7u64).unwrap().as_deref(), Some("seven"));
    }

    #[test]
    fn concurrent_store_and_load() {
        let cache: Cache = Cache::new();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for n in 0..100u32 {
                        let key = format!("k{}", n % 10);
                        cache.store(key.clone(), n + i);
                        let loaded = cache.load::<u32, _>(key.as_str()).unwrap();
                        assert!(loaded.is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 10);
    }
}
