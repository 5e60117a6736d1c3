//! In-process [`Store`] with the semantics of the server commands it stands
//! in for
//!
//! Sets keep their members ordered by name, sorted sets are indexed both by
//! member and by `(score, member)`, and empty collections disappear the way
//! they do on a server. SCAN cursors remember the last key examined, so keys
//! deleted between steps never cause others to be skipped. At most
//! [`MAX_OPEN_CURSORS`] abandoned cursors are kept; older ones are forgotten
//! and resuming them fails like an invalid cursor.

use crate::commands::{ScanPage, ScoreRange};
use crate::core::error::{RedisError, RedisResult};
use crate::report::KeyCount;
use crate::store::{Store, WindowQuery, WriteBatch, WriteOp};
use async_trait::async_trait;
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;
use tokio::sync::Mutex;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug, Default)]
struct SortedSet {
    by_member: HashMap<String, f64>,
    by_score: BTreeSet<(OrderedFloat<f64>, String)>,
}

impl SortedSet {
    /// Insert or rescore; true when the member is new
    fn insert(&mut self, score: f64, member: String) -> bool {
        match self.by_member.insert(member.clone(), score) {
            Some(old) => {
                self.by_score.remove(&(OrderedFloat(old), member.clone()));
                self.by_score.insert((OrderedFloat(score), member));
                false
            }
            None => {
                self.by_score.insert((OrderedFloat(score), member));
                true
            }
        }
    }

    fn len(&self) -> u64 {
        self.by_member.len() as u64
    }

    fn count(&self, range: ScoreRange) -> u64 {
        if range.is_empty() {
            return 0;
        }
        let start = (OrderedFloat(range.min), String::new());
        self.by_score
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|(score, _)| score.0 <= range.max)
            .count() as u64
    }
}

/// Unfinished SCAN iterations remembered at once
pub const MAX_OPEN_CURSORS: usize = 1024;

#[derive(Debug)]
enum Value {
    Set(BTreeSet<String>),
    SortedSet(SortedSet),
}

#[derive(Debug, Default)]
struct Inner {
    keys: BTreeMap<String, Value>,
    /// Open SCAN cursors mapped to the last key they examined, oldest first
    cursors: BTreeMap<u64, String>,
    next_cursor: u64,
}

impl Inner {
    fn set(&self, key: &str) -> RedisResult<Option<&BTreeSet<String>>> {
        match self.keys.get(key) {
            None => Ok(None),
            Some(Value::Set(members)) => Ok(Some(members)),
            Some(_) => Err(RedisError::Server(WRONGTYPE.into())),
        }
    }

    fn sorted_set(&self, key: &str) -> RedisResult<Option<&SortedSet>> {
        match self.keys.get(key) {
            None => Ok(None),
            Some(Value::SortedSet(zset)) => Ok(Some(zset)),
            Some(_) => Err(RedisError::Server(WRONGTYPE.into())),
        }
    }

    fn sadd(&mut self, key: String, members: Vec<String>) -> RedisResult<i64> {
        if members.is_empty() {
            return Err(RedisError::Server(
                "ERR wrong number of arguments for 'sadd' command".into(),
            ));
        }
        let entry = self
            .keys
            .entry(key)
            .or_insert_with(|| Value::Set(BTreeSet::new()));
        match entry {
            Value::Set(set) => Ok(members.into_iter().filter(|m| set.insert(m.clone())).count() as i64),
            Value::SortedSet(_) => Err(RedisError::Server(WRONGTYPE.into())),
        }
    }

    fn zadd(&mut self, key: String, entries: Vec<(f64, String)>) -> RedisResult<i64> {
        if entries.is_empty() {
            return Err(RedisError::Server(
                "ERR wrong number of arguments for 'zadd' command".into(),
            ));
        }
        if entries.iter().any(|(score, _)| score.is_nan()) {
            return Err(RedisError::Server("ERR value is not a valid float".into()));
        }
        let entry = self
            .keys
            .entry(key)
            .or_insert_with(|| Value::SortedSet(SortedSet::default()));
        match entry {
            Value::SortedSet(zset) => Ok(entries
                .into_iter()
                .filter(|(score, member)| zset.insert(*score, member.clone()))
                .count() as i64),
            Value::Set(_) => Err(RedisError::Server(WRONGTYPE.into())),
        }
    }

    fn remove(&mut self, keys: Vec<String>) -> i64 {
        keys.iter()
            .filter(|key| self.keys.remove(key.as_str()).is_some())
            .count() as i64
    }

    fn scan(&mut self, cursor: u64, pattern: &str, count: usize) -> RedisResult<ScanPage> {
        let after = if cursor == 0 {
            None
        } else {
            Some(
                self.cursors
                    .remove(&cursor)
                    .ok_or_else(|| RedisError::Server("ERR invalid cursor".into()))?,
            )
        };
        let lower = match after {
            Some(ref last) => Bound::Excluded(last.clone()),
            None => Bound::Unbounded,
        };

        let pattern: Vec<char> = pattern.chars().collect();
        let mut examined = self
            .keys
            .range::<String, _>((lower, Bound::Unbounded))
            .map(|(key, _)| key);
        let mut keys = Vec::new();
        let mut last = None;
        for key in examined.by_ref().take(count.max(1)) {
            if glob_match(&pattern, &key.chars().collect::<Vec<_>>()) {
                keys.push(key.clone());
            }
            last = Some(key.clone());
        }
        let more = examined.next().is_some();

        let cursor = match (more, last) {
            (true, Some(last)) => {
                if self.cursors.len() >= MAX_OPEN_CURSORS {
                    self.cursors.pop_first();
                }
                self.next_cursor += 1;
                self.cursors.insert(self.next_cursor, last);
                self.next_cursor
            }
            _ => 0,
        };
        Ok(ScanPage { cursor, keys })
    }

    fn window_counts(&self, query: &WindowQuery) -> RedisResult<Vec<KeyCount>> {
        let mut targets: Vec<String> = self
            .set(&query.members_key)?
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();
        if let Some(ref routing_key) = query.routing_key {
            if matches!(self.keys.get(routing_key), Some(Value::SortedSet(_))) {
                targets.push(routing_key.clone());
            }
        }

        targets
            .into_iter()
            .map(|key| {
                let (total, windowed) = match self.sorted_set(&key)? {
                    Some(zset) => (zset.len(), zset.count(query.range)),
                    None => (0, 0),
                };
                Ok(KeyCount {
                    key,
                    total,
                    windowed,
                })
            })
            .collect()
    }
}

/// Store kept entirely in memory
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    scripting: bool,
}

impl MemoryStore {
    /// Empty store that supports atomic aggregation
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            scripting: true,
        }
    }

    /// Empty store that rejects atomic aggregation like a server with
    /// scripting disabled
    pub fn without_scripting() -> Self {
        Self {
            scripting: false,
            ..Self::new()
        }
    }

    /// Every key name, in order
    pub async fn keys(&self) -> Vec<String> {
        self.inner.lock().await.keys.keys().cloned().collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn dbsize(&self) -> RedisResult<i64> {
        Ok(self.inner.lock().await.keys.len() as i64)
    }

    async fn smembers(&self, key: &str) -> RedisResult<HashSet<String>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .set(key)?
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> RedisResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.set(key)?.map_or(0, |members| members.len() as u64))
    }

    async fn zcard(&self, key: &str) -> RedisResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.sorted_set(key)?.map_or(0, SortedSet::len))
    }

    async fn zcount(&self, key: &str, range: ScoreRange) -> RedisResult<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.sorted_set(key)?.map_or(0, |zset| zset.count(range)))
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> RedisResult<ScanPage> {
        self.inner.lock().await.scan(cursor, pattern, count)
    }

    async fn apply(&self, batch: WriteBatch) -> RedisResult<Vec<i64>> {
        let mut inner = self.inner.lock().await;
        // Every write runs even if an earlier one failed, as in a pipeline
        let results: Vec<RedisResult<i64>> = batch
            .into_ops()
            .into_iter()
            .map(|op| match op {
                WriteOp::SAdd { key, members } => inner.sadd(key, members),
                WriteOp::ZAdd { key, entries } => inner.zadd(key, entries),
                WriteOp::Del(keys) | WriteOp::Unlink(keys) => Ok(inner.remove(keys)),
            })
            .collect();
        results.into_iter().collect()
    }

    async fn aggregate_window(&self, query: &WindowQuery) -> RedisResult<Vec<KeyCount>> {
        if !self.scripting {
            return Err(RedisError::Unsupported(
                "scripting is disabled on this store".into(),
            ));
        }
        self.inner.lock().await.window_counts(query)
    }
}

/// Glob match with the server's SCAN MATCH rules: `*`, `?`, `[...]` classes
/// with ranges and `^` negation, and `\` escapes
fn glob_match(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Pattern and text positions just after the most recent '*'
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    star = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    let (matched, next) = match_class(pattern, p, text[t]);
                    if matched {
                        p = next;
                        t += 1;
                        continue;
                    }
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                c => {
                    if c == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }
        match star {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                star = Some((star_p, star_t + 1));
            }
            None => return false,
        }
    }

    pattern[p.min(pattern.len())..].iter().all(|&c| c == '*')
}

/// Match `c` against the class opening at `pattern[open]`; returns whether
/// it matched and the index after the class
fn match_class(pattern: &[char], open: usize, c: char) -> (bool, usize) {
    let mut i = open + 1;
    let negated = pattern.get(i) == Some(&'^');
    if negated {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != ']' {
        if pattern[i] == '\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == c;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let (lo, hi) = if pattern[i] <= pattern[i + 2] {
                (pattern[i], pattern[i + 2])
            } else {
                (pattern[i + 2], pattern[i])
            };
            matched |= lo <= c && c <= hi;
            i += 3;
        } else {
            matched |= pattern[i] == c;
            i += 1;
        }
    }

    if i >= pattern.len() {
        // Unterminated class: '[' is a literal
        return (c == '[', open + 1);
    }
    (matched != negated, i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, text: &str) -> bool {
        let pattern: Vec<char> = pattern.chars().collect();
        let text: Vec<char> = text.chars().collect();
        glob_match(&pattern, &text)
    }

    #[test]
    fn test_glob_star_and_question() {
        assert!(matches("user:*", "user:123"));
        assert!(matches("user:*", "user:"));
        assert!(matches("*:data", "foo:data"));
        assert!(!matches("user:*", "item:123"));
        assert!(matches("key?", "key1"));
        assert!(!matches("key?", "key"));
        assert!(matches("a*b*c", "axxbyyc"));
        assert!(!matches("a*b*c", "axxbyy"));
    }

    #[test]
    fn test_glob_classes() {
        assert!(matches("key[abc]", "keya"));
        assert!(!matches("key[abc]", "keyd"));
        assert!(matches("key[a-c]", "keyb"));
        assert!(matches("key[^a-c]", "keyz"));
        assert!(!matches("key[^a-c]", "keyb"));
        assert!(matches("key[", "key["));
    }

    #[test]
    fn test_glob_escapes() {
        assert!(matches("{whoIsHungry\\?}*", "{whoIsHungry?}email1@email.com"));
        assert!(!matches("{whoIsHungry\\?}*", "{whoIsHungryX}email1@email.com"));
        assert!(matches("a\\*", "a*"));
        assert!(!matches("a\\*", "ab"));
    }

    #[tokio::test]
    async fn test_sorted_set_rescore_and_count() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.zadd("z", vec![(1.0, "a".into()), (2.0, "b".into()), (3.0, "c".into())]);
        batch.zadd("z", vec![(10.0, "a".into())]);
        assert_eq!(store.apply(batch).await.unwrap(), vec![3, 0]);

        assert_eq!(store.zcard("z").await.unwrap(), 3);
        assert_eq!(store.zcount("z", ScoreRange::inclusive(2.0, 3.0)).await.unwrap(), 2);
        assert_eq!(store.zcount("z", ScoreRange::inclusive(1.0, 1.0)).await.unwrap(), 0);
        assert_eq!(store.zcount("z", ScoreRange::inclusive(10.0, 10.0)).await.unwrap(), 1);
        assert_eq!(store.zcount("z", ScoreRange::inclusive(5.0, 4.0)).await.unwrap(), 0);
        assert_eq!(store.zcard("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wrong_type_and_partial_batch() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch
            .sadd("s", vec!["m".into()])
            .zadd("s", vec![(1.0, "x".into())])
            .sadd("t", vec!["n".into()]);
        let err = store.apply(batch).await.unwrap_err();
        assert!(matches!(err, RedisError::Server(ref m) if m.starts_with("WRONGTYPE")));
        // Writes on either side of the failed one were still applied
        assert!(store.keys().await.contains(&"t".to_string()));
        assert!(store.zcard("s").await.is_err());
    }

    #[tokio::test]
    async fn test_scan_pages_and_cursor_reuse() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        for i in 0..7 {
            batch.sadd(format!("k{i}"), vec!["x".into()]);
        }
        batch.sadd("other", vec!["x".into()]);
        store.apply(batch).await.unwrap();

        let mut cursor = 0;
        let mut seen = Vec::new();
        let mut steps = 0;
        loop {
            let page = store.scan(cursor, "k*", 3).await.unwrap();
            seen.extend(page.keys);
            steps += 1;
            if page.cursor == 0 {
                break;
            }
            cursor = page.cursor;
        }
        assert_eq!(seen.len(), 7);
        assert!(steps >= 3);

        // Cursors are single use
        assert!(store.scan(cursor.max(1), "*", 3).await.is_err());
    }

    #[tokio::test]
    async fn test_abandoned_cursors_are_bounded() {
        let store = MemoryStore::new();
        let mut batch = WriteBatch::new();
        batch.sadd("a", vec!["x".into()]).sadd("b", vec!["x".into()]);
        store.apply(batch).await.unwrap();

        let first = store.scan(0, "*", 1).await.unwrap().cursor;
        let mut latest = first;
        for _ in 0..MAX_OPEN_CURSORS {
            latest = store.scan(0, "*", 1).await.unwrap().cursor;
        }
        assert_eq!(store.inner.lock().await.cursors.len(), MAX_OPEN_CURSORS);

        // The oldest abandoned cursor was dropped, the newest still resumes
        assert!(store.scan(first, "*", 1).await.is_err());
        let page = store.scan(latest, "*", 1).await.unwrap();
        assert_eq!(page.keys, vec!["b".to_string()]);
        assert_eq!(page.cursor, 0);
    }

    #[tokio::test]
    async fn test_without_scripting() {
        let store = MemoryStore::without_scripting();
        let query = WindowQuery {
            members_key: "{T}".into(),
            routing_key: None,
            range: ScoreRange::inclusive(0.0, 1.0),
        };
        assert!(matches!(
            store.aggregate_window(&query).await,
            Err(RedisError::Unsupported(_))
        ));
    }
}
