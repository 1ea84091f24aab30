//! Fast key/value store used for the projection and the query-result cache

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;

use crate::error::{AppError, AppResult};

/// Operations the engine needs from the fast store.
///
/// Every implementation is disposable: callers treat errors as misses.
#[async_trait]
pub trait FastStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()>;

    /// Delete keys, returning how many existed
    async fn del(&self, keys: &[String]) -> AppResult<u64>;

    /// Keys matching a glob pattern (`*`, `?`)
    async fn keys(&self, pattern: &str) -> AppResult<Vec<String>>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> AppResult<()>;

    /// Members by descending score, inclusive indexes
    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>>;

    async fn zcard(&self, key: &str) -> AppResult<u64>;

    async fn zrem(&self, key: &str, member: &str) -> AppResult<()>;

    async fn mget(&self, keys: &[String]) -> AppResult<Vec<Option<String>>>;

    async fn expire(&self, key: &str, ttl_secs: u64) -> AppResult<()>;
}

/// Convert a Redis-style glob into an anchored regex
pub fn glob_to_regex(pattern: &str) -> AppResult<Regex> {
    let mut re = String::with_capacity(pattern.len() + 8);
    re.push('^');
    for c in pattern.chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).map_err(|e| AppError::Internal(format!("Invalid key pattern {}: {}", pattern, e)))
}

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Sorted(HashMap<String, f64>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// In-process fast store honouring TTLs and glob patterns.
///
/// `set_offline(true)` makes every call fail, simulating an unreachable store.
#[derive(Clone, Default)]
pub struct MemoryFastStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    offline: Arc<AtomicBool>,
}

impl MemoryFastStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self) -> AppResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Cache("Fast store unreachable".to_string()));
        }
        Ok(())
    }

    /// Stable dump of live keys; sorted sets render as `member=score` lists
    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, e)| {
                let rendered = match &e.value {
                    Value::Text(s) => s.clone(),
                    Value::Sorted(members) => {
                        let mut pairs: Vec<String> =
                            members.iter().map(|(m, s)| format!("{}={}", m, s)).collect();
                        pairs.sort();
                        pairs.join(",")
                    }
                };
                (k.clone(), rendered)
            })
            .collect()
    }

    /// Drop a key regardless of type, simulating TTL expiry
    pub async fn evict(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }

    fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl FastStore for MemoryFastStore {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(Entry { value: Value::Text(s), .. }) => Ok(Some(s.clone())),
            Some(_) => Err(AppError::Cache(format!("Wrong type for key {}", key))),
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> AppResult<()> {
        self.check()?;
        let entry = Entry {
            value: Value::Text(value.to_string()),
            expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
        };
        self.entries.lock().await.insert(key.to_string(), entry);
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> AppResult<u64> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let removed = keys
            .iter()
            .filter_map(|k| entries.remove(k))
            .filter(|e| e.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn keys(&self, pattern: &str) -> AppResult<Vec<String>> {
        self.check()?;
        let re = glob_to_regex(pattern)?;
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(k, e)| e.is_live(now) && re.is_match(k))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> AppResult<()> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(Entry { value: Value::Sorted(members), .. }) => {
                members.insert(member.to_string(), score);
            }
            Some(_) => return Err(AppError::Cache(format!("Wrong type for key {}", key))),
            None => {
                let members = HashMap::from([(member.to_string(), score)]);
                entries.insert(
                    key.to_string(),
                    Entry { value: Value::Sorted(members), expires_at: None },
                );
            }
        }
        Ok(())
    }

    async fn zrevrange(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let members = match Self::live(&mut entries, key) {
            Some(Entry { value: Value::Sorted(members), .. }) => members,
            Some(_) => return Err(AppError::Cache(format!("Wrong type for key {}", key))),
            None => return Ok(Vec::new()),
        };

        let mut ordered: Vec<(&String, f64)> = members.iter().map(|(m, s)| (m, *s)).collect();
        ordered.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(a.0)));

        let len = ordered.len() as isize;
        let norm = |i: isize| if i < 0 { len + i } else { i };
        let (start, stop) = (norm(start).max(0), norm(stop).min(len - 1));
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(ordered[start as usize..=stop as usize]
            .iter()
            .map(|(m, _)| (*m).clone())
            .collect())
    }

    async fn zcard(&self, key: &str) -> AppResult<u64> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key) {
            Some(Entry { value: Value::Sorted(members), .. }) => Ok(members.len() as u64),
            Some(_) => Err(AppError::Cache(format!("Wrong type for key {}", key))),
            None => Ok(0),
        }
    }

    async fn zrem(&self, key: &str, member: &str) -> AppResult<()> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        let emptied = match Self::live(&mut entries, key) {
            Some(Entry { value: Value::Sorted(members), .. }) => {
                members.remove(member);
                members.is_empty()
            }
            _ => false,
        };
        if emptied {
            entries.remove(key);
        }
        Ok(())
    }

    async fn mget(&self, keys: &[String]) -> AppResult<Vec<Option<String>>> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        Ok(keys
            .iter()
            .map(|k| match Self::live(&mut entries, k) {
                Some(Entry { value: Value::Text(s), .. }) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> AppResult<()> {
        self.check()?;
        let mut entries = self.entries.lock().await;
        if let Some(entry) = Self::live(&mut entries, key) {
            entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
        }
        Ok(())
    }
}
