use crate::{candle::Timeframe, error::StoreError, exchange::ExchangeId, signal::Direction};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    hash::Hash,
    time::{Duration, Instant},
};

/// Per-user monitoring settings, owned by the external settings store. The
/// pipeline reads a snapshot per cycle and writes back only the quota fields
/// (`signals_sent_today`, `last_reset`).
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub enabled_exchanges: Vec<ExchangeId>,
    pub pump_enabled: bool,
    pub dump_enabled: bool,
    pub timeframe: Timeframe,
    pub threshold_pct: f64,
    pub daily_limit: u32,
    #[serde(default)]
    pub signals_sent_today: u32,
    #[serde(default = "epoch_start")]
    pub last_reset: DateTime<Utc>,
    /// Per-user master toggle for the whole pipeline.
    #[serde(default = "default_true")]
    pub signals_enabled: bool,
    /// Admins are exempt from the daily quota cap.
    #[serde(default)]
    pub is_admin: bool,
}

impl UserProfile {
    /// New profile with the stock defaults: both venues, both directions,
    /// 15m timeframe, 1% threshold, 5 signals per day.
    pub fn new(user_id: i64) -> Self {
        Self {
            user_id,
            enabled_exchanges: vec![ExchangeId::Binance, ExchangeId::Bybit],
            pump_enabled: true,
            dump_enabled: true,
            timeframe: Timeframe::M15,
            threshold_pct: 1.0,
            daily_limit: 5,
            signals_sent_today: 0,
            last_reset: epoch_start(),
            signals_enabled: true,
            is_admin: false,
        }
    }

    pub fn direction_enabled(&self, direction: Direction) -> bool {
        match direction {
            Direction::Pump => self.pump_enabled,
            Direction::Dump => self.dump_enabled,
        }
    }
}

fn epoch_start() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn default_true() -> bool {
    true
}

/// External settings store collaborator: the persistent source of user
/// profiles and the sink for quota state mutations.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Profiles with a currently valid subscription and signals enabled.
    async fn list_active_profiles(&self) -> Result<Vec<UserProfile>, StoreError>;

    async fn profile(&self, user_id: i64) -> Result<Option<UserProfile>, StoreError>;

    /// Persist the only fields the pipeline owns mutations for.
    async fn update_quota_state(
        &self,
        user_id: i64,
        signals_sent_today: u32,
        last_reset: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// In-memory [`SettingsStore`], used by the monitor binary (seeded from a
/// profile file) and by tests.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    profiles: RwLock<HashMap<i64, UserProfile>>,
}

impl InMemoryStore {
    pub fn new(profiles: impl IntoIterator<Item = UserProfile>) -> Self {
        Self {
            profiles: RwLock::new(
                profiles
                    .into_iter()
                    .map(|profile| (profile.user_id, profile))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn list_active_profiles(&self) -> Result<Vec<UserProfile>, StoreError> {
        Ok(self
            .profiles
            .read()
            .values()
            .filter(|profile| profile.signals_enabled)
            .cloned()
            .collect())
    }

    async fn profile(&self, user_id: i64) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profiles.read().get(&user_id).cloned())
    }

    async fn update_quota_state(
        &self,
        user_id: i64,
        signals_sent_today: u32,
        last_reset: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut profiles = self.profiles.write();
        let profile = profiles
            .get_mut(&user_id)
            .ok_or_else(|| StoreError(format!("unknown user: {user_id}")))?;
        profile.signals_sent_today = signals_sent_today;
        profile.last_reset = last_reset;
        Ok(())
    }
}

/// Keyed transient state with explicit per-entry expiry, exposed for the
/// external chat layer's short-lived flows (eg/ "awaiting activation key").
/// Not used by the detection pipeline itself.
#[derive(Debug)]
pub struct TransientStates<K, V> {
    entries: Mutex<HashMap<K, (V, Instant)>>,
}

impl<K, V> Default for TransientStates<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> TransientStates<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `key`, expiring after `ttl`.
    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        self.entries
            .lock()
            .insert(key, (value, Instant::now() + ttl));
    }

    /// Current value for `key`, pruning it first if expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Remove and return the value for `key`, unless already expired.
    pub fn take(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        entries
            .remove(key)
            .filter(|(_, expires_at)| *expires_at > Instant::now())
            .map(|(value, _)| value)
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries
            .lock()
            .retain(|_, (_, expires_at)| *expires_at > now);
    }
}
