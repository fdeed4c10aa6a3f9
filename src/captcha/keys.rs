//! Round-robin API key rotation shared by concurrent workers.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::provider::{ProviderError, RecognitionProvider};

/// A fixed set of API keys with a shared cursor.
///
/// The cursor only moves through [`KeyRing::advance_from`], which is a
/// compare-and-swap: when several workers hit a rate limit on the same key
/// at once, exactly one of them advances it and the rest pick up the new
/// key instead of skipping past it.
#[derive(Debug)]
pub struct KeyRing {
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyRing {
    pub fn new(keys: Vec<String>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let keys: Vec<String> = keys
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .collect();
        Self {
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The key under the cursor and its index.
    pub fn current(&self) -> Option<(usize, &str)> {
        if self.keys.is_empty() {
            return None;
        }
        let index = self.cursor.load(Ordering::Acquire) % self.keys.len();
        Some((index, self.keys[index].as_str()))
    }

    /// Move past the key at `seen`. If another caller already moved the
    /// cursor, leave it where they put it. Returns the new index.
    pub fn advance_from(&self, seen: usize) -> usize {
        if self.keys.is_empty() {
            return 0;
        }
        let next = (seen + 1) % self.keys.len();
        match self
            .cursor
            .compare_exchange(seen, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => next,
            Err(actual) => actual % self.keys.len(),
        }
    }
}

/// A recognition channel that needs an API key per call.
#[async_trait]
pub trait KeyedChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize_with_key(&self, key: &str, image: &[u8]) -> Result<String, ProviderError>;
}

/// Presents a [`KeyedChannel`] and a [`KeyRing`] as a single provider.
///
/// A rate-limited or rejected key advances the ring and the same image is
/// retried on the next key straight away. That rotation is internal: the
/// resolver sees one provider call, successful or not.
pub struct RotatingKeys<C> {
    channel: C,
    ring: KeyRing,
}

impl<C: KeyedChannel> RotatingKeys<C> {
    pub fn new(channel: C, ring: KeyRing) -> Self {
        Self { channel, ring }
    }

    pub fn ring(&self) -> &KeyRing {
        &self.ring
    }
}

#[async_trait]
impl<C: KeyedChannel> RecognitionProvider for RotatingKeys<C> {
    fn name(&self) -> &str {
        self.channel.name()
    }

    fn is_available(&self) -> bool {
        !self.ring.is_empty()
    }

    async fn recognize(&self, image: &[u8]) -> Result<String, ProviderError> {
        let mut last_error = None;

        for _ in 0..self.ring.len() {
            let Some((index, key)) = self.ring.current() else {
                break;
            };
            match self.channel.recognize_with_key(key, image).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_key_exhausted() => {
                    let next = self.ring.advance_from(index);
                    warn!(
                        "{} key #{} exhausted ({}), rotating to key #{}",
                        self.channel.name(),
                        index + 1,
                        e,
                        next + 1
                    );
                    last_error = Some(e);
                }
                Err(e) => {
                    debug!("{} key #{} failed: {}", self.channel.name(), index + 1, e);
                    return Err(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::Unavailable(format!("{}: no API keys configured", self.channel.name()))
        }))
    }
}
