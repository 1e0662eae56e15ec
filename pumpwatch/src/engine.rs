use crate::{
    candle::Candle,
    config::{CANDLE_FETCH_COUNT, MonitorConfig},
    error::{ConfigError, EngineError, FetchError},
    exchange::{ExchangeId, MarketDataClient, SymbolKey},
    metric::{CycleMetricCache, MetricResolver},
    notify::{self, Notifier},
    quota,
    signal::{Direction, Evaluation, Signal, evaluate},
    store::{SettingsStore, UserProfile},
};
use chrono::Utc;
use itertools::Itertools;
use smol_str::SmolStr;
use std::{
    cmp::Ordering as CmpOrdering,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{task::JoinSet, time::MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Aggregate counters for one completed detection cycle.
#[derive(Clone, Copy, Default, Eq, PartialEq, Debug)]
pub struct CycleSummary {
    /// Profiles processed this cycle.
    pub users: usize,
    /// (user, exchange, symbol) fetch-and-evaluate tasks submitted.
    pub tuples: usize,
    /// Signals handed to the delivery collaborator.
    pub signals_sent: usize,
    /// Tuples skipped due to contained per-task failures.
    pub failures: usize,
}

/// The dispatch scheduler: orchestrates the recurring detection cycle across
/// users, venues and symbols.
///
/// A cycle is `Idle -> Running -> Idle` and never concurrent with itself:
/// [`Engine::run_cycle`] is guarded by an atomic running flag, and the
/// [`Engine::run`] ticker skips (never queues) ticks missed while a cycle
/// overruns the interval.
pub struct Engine {
    config: MonitorConfig,
    clients: Vec<Arc<dyn MarketDataClient>>,
    resolver: Arc<MetricResolver>,
    store: Arc<dyn SettingsStore>,
    notifier: Arc<dyn Notifier>,
    running: AtomicBool,
}

impl Engine {
    /// Construct the engine, validating configuration up front. Configuration
    /// problems are the only fatal errors in the pipeline.
    pub fn new(
        config: MonitorConfig,
        clients: Vec<Arc<dyn MarketDataClient>>,
        resolver: Arc<MetricResolver>,
        store: Arc<dyn SettingsStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            clients,
            resolver,
            store,
            notifier,
            running: AtomicBool::new(false),
        }))
    }

    /// Drive detection cycles on the configured interval until `shutdown`
    /// resolves. In-flight work is abandoned on shutdown, not awaited: the
    /// cycle's task set aborts when dropped.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()> + Send) {
        let mut ticker = tokio::time::interval(self.config.cycle_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            interval_secs = self.config.cycle_interval.as_secs(),
            symbols = self.config.symbols.len(),
            "monitor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown signal received, stopping monitor");
                    break;
                }
                _ = ticker.tick() => {
                    // Race the cycle against shutdown so resolving the
                    // shutdown future drops the cycle mid-flight, aborting
                    // its task set rather than awaiting it
                    let result = tokio::select! {
                        biased;
                        _ = &mut shutdown => {
                            info!("shutdown signal received, abandoning in-flight cycle");
                            break;
                        }
                        result = self.run_cycle() => result,
                    };

                    match result {
                        Ok(summary) => info!(
                            users = summary.users,
                            tuples = summary.tuples,
                            signals_sent = summary.signals_sent,
                            failures = summary.failures,
                            "cycle complete"
                        ),
                        Err(EngineError::CycleInProgress) => {
                            warn!("previous cycle still running, tick skipped")
                        }
                        Err(error) => error!(%error, "cycle failed"),
                    }
                }
            }
        }
    }

    /// Run one detection cycle. Returns [`EngineError::CycleInProgress`]
    /// when invoked while a previous cycle is still running.
    pub async fn run_cycle(self: &Arc<Self>) -> Result<CycleSummary, EngineError> {
        let _guard =
            RunningGuard::acquire(&self.running).ok_or(EngineError::CycleInProgress)?;

        let profiles = self.store.list_active_profiles().await?;
        let cache = Arc::new(CycleMetricCache::new(Arc::clone(&self.resolver)));
        let now = Utc::now();

        let mut summary = CycleSummary::default();
        let mut users = JoinSet::new();
        for mut profile in profiles {
            if !profile.signals_enabled {
                continue;
            }
            summary.users += 1;

            // Epoch reset happens once per user per cycle, before any
            // evaluation, and is persisted immediately
            if quota::reset_if_epoch_elapsed(&mut profile, now) {
                if let Err(error) = self
                    .store
                    .update_quota_state(
                        profile.user_id,
                        profile.signals_sent_today,
                        profile.last_reset,
                    )
                    .await
                {
                    warn!(user = profile.user_id, %error, "failed to persist quota reset");
                }
            }

            users.spawn(Arc::clone(self).process_user(profile, Arc::clone(&cache)));
        }

        while let Some(joined) = users.join_next().await {
            match joined {
                Ok(outcome) => {
                    summary.tuples += outcome.tuples;
                    summary.signals_sent += outcome.signals_sent;
                    summary.failures += outcome.failures;
                }
                Err(error) => {
                    summary.failures += 1;
                    warn!(%error, "user task failed");
                }
            }
        }

        Ok(summary)
    }

    /// Fan out fetch-and-evaluate tasks for one user, then process the
    /// qualifying candidates sequentially: this loop is the per-user quota
    /// serialization point, and it never blocks other users.
    async fn process_user(
        self: Arc<Self>,
        mut profile: UserProfile,
        cache: Arc<CycleMetricCache>,
    ) -> UserOutcome {
        let mut outcome = UserOutcome::default();

        let mut tasks = JoinSet::new();
        for client in &self.clients {
            if !profile.enabled_exchanges.contains(&client.exchange()) {
                continue;
            }
            for symbol in &self.config.symbols {
                outcome.tuples += 1;
                let key = SymbolKey::new(client.exchange(), symbol.clone(), profile.timeframe);
                tasks.spawn(fetch_and_evaluate(
                    Arc::clone(client),
                    key,
                    profile.threshold_pct,
                ));
            }
        }

        let mut candidates = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(Some(candidate))) => candidates.push(candidate),
                Ok(Ok(None)) => {}
                Ok(Err(fetch_error)) => {
                    outcome.failures += 1;
                    warn!(
                        user = profile.user_id,
                        error = %fetch_error,
                        "tuple skipped this cycle"
                    );
                }
                Err(join_error) => {
                    outcome.failures += 1;
                    warn!(user = profile.user_id, error = %join_error, "fetch task failed");
                }
            }
        }

        candidates.retain(|candidate| profile.direction_enabled(candidate.direction));

        for candidate in suppress_duplicates(candidates) {
            if !quota::can_send(&profile) {
                debug!(
                    user = profile.user_id,
                    sent = profile.signals_sent_today,
                    limit = profile.daily_limit,
                    "daily quota reached, suppressing remaining signals"
                );
                break;
            }

            let metrics = cache
                .bundle(
                    candidate.exchange,
                    &candidate.symbol,
                    profile.timeframe,
                    Arc::clone(&candidate.candles),
                )
                .await;

            let signal = Signal {
                user_id: profile.user_id,
                exchange: candidate.exchange,
                symbol: candidate.symbol.clone(),
                direction: candidate.direction,
                price_change_pct: candidate.evaluation.price_change_pct,
                volume_change_pct: candidate.evaluation.volume_change_pct,
                price: candidate.evaluation.price,
                volume: candidate.evaluation.volume,
                metrics,
            };

            let text = notify::format_signal(&signal);
            if let Err(error) = self.notifier.deliver(profile.user_id, &text).await {
                warn!(
                    user = profile.user_id,
                    symbol = %signal.symbol,
                    %error,
                    "delivery failed, not retried"
                );
            }

            // At-least-once: the attempt counts against the quota whether or
            // not delivery succeeded
            quota::record_sent(&mut profile);
            outcome.signals_sent += 1;
            if let Err(error) = self
                .store
                .update_quota_state(
                    profile.user_id,
                    profile.signals_sent_today,
                    profile.last_reset,
                )
                .await
            {
                warn!(user = profile.user_id, %error, "failed to persist quota state");
            }

            info!(
                user = profile.user_id,
                exchange = %signal.exchange,
                symbol = %signal.symbol,
                direction = %signal.direction,
                price_change_pct = signal.price_change_pct,
                "signal dispatched"
            );
        }

        outcome
    }
}

#[derive(Clone, Copy, Default, Debug)]
struct UserOutcome {
    tuples: usize,
    signals_sent: usize,
    failures: usize,
}

/// A qualifying evaluation awaiting duplicate suppression and quota checks.
#[derive(Clone, Debug)]
struct Candidate {
    exchange: ExchangeId,
    symbol: SmolStr,
    direction: Direction,
    evaluation: Evaluation,
    candles: Arc<[Candle]>,
}

/// Fetch the evaluation window for one (exchange, symbol) tuple and evaluate
/// the latest consecutive candle pair. The fetched candles ride along with a
/// qualifying candidate so metric resolution can reuse them.
async fn fetch_and_evaluate(
    client: Arc<dyn MarketDataClient>,
    key: SymbolKey,
    threshold_pct: f64,
) -> Result<Option<Candidate>, FetchError> {
    let candles = client
        .fetch_candles(&key.symbol, key.timeframe, CANDLE_FETCH_COUNT)
        .await?;

    let [.., previous, current] = candles.as_slice() else {
        return Err(FetchError::malformed(
            key.exchange,
            "fewer than two candles returned",
        ));
    };

    let evaluation = evaluate(previous, current, threshold_pct);

    Ok(evaluation.direction.map(|direction| Candidate {
        exchange: key.exchange,
        symbol: key.symbol,
        direction,
        evaluation,
        candles: Arc::from(candles),
    }))
}

/// At most one signal per (symbol, direction) per user per cycle, however
/// many venues qualify. Tie-break is deterministic: the numerically larger
/// |price change| wins, equal magnitudes fall back to the fixed venue order
/// ([`ExchangeId`] declaration order, Binance first). Winners come out in
/// symbol order so processing is reproducible.
fn suppress_duplicates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut winners = candidates
        .into_iter()
        .map(|candidate| ((candidate.symbol.clone(), candidate.direction), candidate))
        .into_group_map()
        .into_values()
        .filter_map(|group| {
            group.into_iter().reduce(|best, next| {
                let next_magnitude = next.evaluation.price_change_pct.abs();
                let best_magnitude = best.evaluation.price_change_pct.abs();
                match next_magnitude.partial_cmp(&best_magnitude) {
                    Some(CmpOrdering::Greater) => next,
                    Some(CmpOrdering::Less) => best,
                    _ => {
                        if next.exchange < best.exchange {
                            next
                        } else {
                            best
                        }
                    }
                }
            })
        })
        .collect::<Vec<_>>();

    winners.sort_by(|a, b| {
        a.symbol
            .cmp(&b.symbol)
            .then_with(|| a.direction.cmp(&b.direction))
    });
    winners
}

/// RAII guard over the engine's running flag, released on drop so the flag
/// clears even when a cycle is cancelled mid-flight.
struct RunningGuard<'a>(&'a AtomicBool);

impl<'a> RunningGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            .then_some(Self(flag))
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
