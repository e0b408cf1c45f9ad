//! Trailing stop engine: polls prices, trails stops, and exits breached positions.
//!
//! Each tick:
//! - snapshots the registry and fetches a price per symbol (bounded by a timeout)
//! - runs the gauge for every symbol that produced a price
//! - submits a market sell for triggered positions and retires them once accepted
//! - persists the registry once if anything changed

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::config::EngineConfig;
use super::gauge::{TrailGauge, TriggerDecision};
use super::registry::PositionRegistry;
use crate::api::{OrderExecutor, PriceFeed};
use crate::error::{FeedError, OrderError, StopLossError};
use crate::models::{ClosedTrade, ExitOutcome, StopLossPosition, StopMode};
use crate::store::{ConfigStore, TradeJournal};

/// Outcome of a single pass over the registry.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Positions retired this tick, executed or abandoned
    pub exits: Vec<ClosedTrade>,
    /// Symbols without a usable price this tick
    pub skipped: Vec<(String, FeedError)>,
    /// Exit orders that did not go through
    pub failed_orders: Vec<(String, StopLossError)>,
    /// Whether the registry was written to the store
    pub persisted: bool,
    /// Stop was requested before every symbol was processed
    pub interrupted: bool,
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub running: bool,
    pub tracked_positions: usize,
    pub pending_exits: usize,
    pub ticks: u64,
    pub exits: u64,
    pub failed_orders: u64,
    pub skipped_quotes: u64,
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Trailing Stop Statistics ===")?;
        writeln!(f, "Status:          {}", if self.running { "Running" } else { "Stopped" })?;
        writeln!(f, "Tracked:         {} ({} pending exit)", self.tracked_positions, self.pending_exits)?;
        writeln!(f, "Ticks:           {}", self.ticks)?;
        writeln!(f, "Exits:           {} (Failed orders: {})", self.exits, self.failed_orders)?;
        writeln!(f, "Skipped Quotes:  {}", self.skipped_quotes)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Counters {
    ticks: AtomicU64,
    exits: AtomicU64,
    failed_orders: AtomicU64,
    skipped_quotes: AtomicU64,
}

/// Drives trailing stops for every registered position.
///
/// All registry mutation, from the loop and from external callers, goes
/// through one mutex. The lock is held across an exit order so a concurrent
/// re-registration cannot be overwritten by a stale removal.
pub struct TrailingStopEngine {
    config: EngineConfig,
    registry: Arc<Mutex<PositionRegistry>>,
    feed: Arc<dyn PriceFeed>,
    executor: Arc<dyn OrderExecutor>,
    journal: Option<Arc<dyn TradeJournal>>,
    running: AtomicBool,
    generation: AtomicU64,
    wake: Notify,
    counters: Counters,
}

impl TrailingStopEngine {
    /// Build an engine, loading the registry from `store`.
    pub async fn new(
        config: EngineConfig,
        store: Arc<dyn ConfigStore>,
        feed: Arc<dyn PriceFeed>,
        executor: Arc<dyn OrderExecutor>,
    ) -> Self {
        let registry = PositionRegistry::load(store).await;
        Self::with_registry(config, registry, feed, executor)
    }

    pub fn with_registry(
        config: EngineConfig,
        registry: PositionRegistry,
        feed: Arc<dyn PriceFeed>,
        executor: Arc<dyn OrderExecutor>,
    ) -> Self {
        Self {
            config,
            registry: Arc::new(Mutex::new(registry)),
            feed,
            executor,
            journal: None,
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            wake: Notify::new(),
            counters: Counters::default(),
        }
    }

    /// Record every retired position in `journal`.
    pub fn with_journal(mut self, journal: Arc<dyn TradeJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start trailing `symbol`. Fetches the current price as entry when
    /// `entry_price` is `None`. Replaces any existing position for the symbol.
    pub async fn register(
        &self,
        symbol: &str,
        quantity: u64,
        entry_price: Option<Decimal>,
        mode: StopMode,
        parameter: Decimal,
    ) -> Result<StopLossPosition, StopLossError> {
        if quantity == 0 {
            return Err(StopLossError::InvalidQuantity);
        }

        let entry_price = match entry_price {
            Some(price) => price,
            None => self
                .fetch_price(symbol)
                .await
                .map_err(|source| StopLossError::PriceUnavailable {
                    symbol: symbol.to_string(),
                    source,
                })?,
        };

        let position = StopLossPosition::new(symbol, quantity, entry_price, mode, parameter)?;

        let mut registry = self.registry.lock().await;
        if registry.register(position.clone()).await.is_some() {
            info!(symbol = %symbol, "Replaced existing trailing stop");
        }
        Ok(position)
    }

    pub async fn unregister(&self, symbol: &str) -> bool {
        self.registry.lock().await.unregister(symbol).await
    }

    pub async fn get(&self, symbol: &str) -> Option<StopLossPosition> {
        self.registry.lock().await.get(symbol)
    }

    pub async fn positions(&self) -> Vec<(String, StopLossPosition)> {
        self.registry.lock().await.all()
    }

    pub async fn credential_token(&self) -> Option<String> {
        self.registry.lock().await.credential_token().map(str::to_string)
    }

    pub async fn set_credential_token(&self, token: Option<String>) {
        self.registry.lock().await.set_credential_token(token).await;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the polling loop. Fails if it is already running.
    pub fn start(self: &Arc<Self>, poll_interval: Duration) -> Result<JoinHandle<()>, StopLossError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StopLossError::AlreadyRunning);
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let engine = Arc::clone(self);
        Ok(tokio::spawn(async move { engine.run_loop(generation, poll_interval).await }))
    }

    /// Ask the loop to stop after the symbol it is currently processing.
    /// Returns whether it was running.
    pub fn stop(&self) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if was_running {
            info!("Stop requested");
            self.wake.notify_one();
        }
        was_running
    }

    /// True while the loop started as `generation` should keep going. A
    /// loop left over from before a stop/start sees a newer generation.
    fn is_current(&self, generation: u64) -> bool {
        self.is_running() && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run_loop(&self, generation: u64, poll_interval: Duration) {
        info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            max_exit_attempts = ?self.config.max_exit_attempts,
            "Starting trailing stop loop"
        );

        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.is_current(generation) {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.wake.notified() => {}
            }
            if !self.is_current(generation) {
                break;
            }
            self.run_tick(Some(generation)).await;
        }

        info!(generation = generation, "Trailing stop loop stopped");
    }

    /// Run one pass over every registered position.
    pub async fn tick(&self) -> TickReport {
        self.run_tick(None).await
    }

    /// `generation` is set when driven by the loop, which makes the tick
    /// stop early once that loop is cancelled.
    async fn run_tick(&self, generation: Option<u64>) -> TickReport {
        let mut report = TickReport::default();
        let symbols: Vec<String> = self
            .registry
            .lock()
            .await
            .all()
            .into_iter()
            .map(|(symbol, _)| symbol)
            .collect();

        debug!(symbols = symbols.len(), "Tick");

        let quotes = if self.config.concurrent_quotes {
            join_all(symbols.iter().map(|symbol| self.fetch_price(symbol))).await
        } else {
            let mut quotes = Vec::with_capacity(symbols.len());
            for symbol in &symbols {
                quotes.push(self.fetch_price(symbol).await);
            }
            quotes
        };

        for (symbol, quote) in symbols.into_iter().zip(quotes) {
            if generation.is_some_and(|g| !self.is_current(g)) {
                debug!("Stop requested, ending tick early");
                report.interrupted = true;
                break;
            }

            let price = match quote {
                Ok(price) => price,
                Err(e) => {
                    self.counters.skipped_quotes.fetch_add(1, Ordering::Relaxed);
                    warn!(symbol = %symbol, error = %e, "Price unavailable, skipping this tick");
                    report.skipped.push((symbol, e));
                    continue;
                }
            };

            if let Some(trade) = self.process_symbol(&symbol, price, &mut report).await {
                self.record_exit(&trade).await;
                report.exits.push(trade);
            }
        }

        let mut registry = self.registry.lock().await;
        if registry.is_dirty() {
            match registry.save().await {
                Ok(()) => report.persisted = true,
                Err(e) => warn!(error = %e, "Failed to persist registry, will retry next tick"),
            }
        }
        drop(registry);

        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
        report
    }

    /// Trail or exit one symbol. Returns the closed trade if it was retired.
    async fn process_symbol(
        &self,
        symbol: &str,
        price: Decimal,
        report: &mut TickReport,
    ) -> Option<ClosedTrade> {
        let mut registry = self.registry.lock().await;

        let Some(position) = registry.get_mut(symbol) else {
            debug!(symbol = %symbol, "Unregistered during tick");
            return None;
        };

        let stop_price = match TrailGauge::update(position, price) {
            TriggerDecision::NotTriggered { raised: true } => {
                debug!(
                    symbol = %symbol,
                    high = %position.high_water_mark,
                    stop = %position.stop_price,
                    "Raised trailing stop"
                );
                registry.mark_dirty();
                return None;
            }
            TriggerDecision::NotTriggered { raised: false } => return None,
            TriggerDecision::Triggered { stop_price } => stop_price,
        };

        if position.triggered_at.is_none() {
            position.triggered_at = Some(Utc::now());
            info!(
                symbol = %symbol,
                price = %price,
                stop = %stop_price,
                high = %position.high_water_mark,
                pnl = %position.unrealized_pnl(price),
                "Trailing stop triggered"
            );
        }
        let quantity = position.quantity;
        registry.mark_dirty();

        let submitted = timeout(
            self.config.order_timeout(),
            self.executor.submit_market_sell(symbol, quantity),
        )
        .await
        .unwrap_or(Err(OrderError::Timeout));

        match submitted {
            Ok(accepted) => {
                let position = registry.get(symbol)?;
                registry.unregister(symbol).await;
                self.counters.exits.fetch_add(1, Ordering::Relaxed);
                info!(
                    symbol = %symbol,
                    quantity = quantity,
                    order_id = %accepted.order_id,
                    price = %price,
                    stop = %stop_price,
                    "Exit order accepted"
                );
                Some(ClosedTrade::from_position(
                    &position,
                    price,
                    Some(accepted.order_id),
                    ExitOutcome::Executed,
                ))
            }
            Err(e) => {
                self.counters.failed_orders.fetch_add(1, Ordering::Relaxed);
                let err = StopLossError::from_order(symbol, e);

                let position = registry.get_mut(symbol)?;
                position.failed_exit_attempts += 1;
                let attempts = position.failed_exit_attempts;
                report.failed_orders.push((symbol.to_string(), err.clone()));

                match self.config.max_exit_attempts {
                    Some(max) if attempts >= max => {
                        let position = position.clone();
                        registry.unregister(symbol).await;
                        error!(
                            symbol = %symbol,
                            attempts = attempts,
                            stop = %stop_price,
                            error = %err,
                            "Giving up on exit, position no longer tracked"
                        );
                        Some(ClosedTrade::from_position(&position, price, None, ExitOutcome::Abandoned))
                    }
                    _ => {
                        warn!(
                            symbol = %symbol,
                            attempts = attempts,
                            stop = %stop_price,
                            error = %err,
                            "Exit order failed, position stays triggered and will be retried"
                        );
                        None
                    }
                }
            }
        }
    }

    async fn record_exit(&self, trade: &ClosedTrade) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.record_exit(trade).await {
                warn!(symbol = %trade.symbol, error = %e, "Failed to record closed trade");
            }
        }
    }

    /// Fetch a price within the configured timeout. Non-positive quotes count
    /// as unavailable.
    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, FeedError> {
        match timeout(self.config.price_timeout(), self.feed.last_price(symbol)).await {
            Ok(Ok(price)) if price > Decimal::ZERO => Ok(price),
            Ok(Ok(price)) => Err(FeedError::Unavailable(format!("non-positive price {}", price))),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FeedError::Timeout),
        }
    }

    /// Write the registry if it has unsaved changes.
    pub async fn flush(&self) -> Result<(), StopLossError> {
        let mut registry = self.registry.lock().await;
        if registry.is_dirty() {
            registry.save().await?;
        }
        Ok(())
    }

    pub async fn stats(&self) -> EngineStats {
        let registry = self.registry.lock().await;
        EngineStats {
            running: self.is_running(),
            tracked_positions: registry.len(),
            pending_exits: registry.pending_exits(),
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            exits: self.counters.exits.load(Ordering::Relaxed),
            failed_orders: self.counters.failed_orders.load(Ordering::Relaxed),
            skipped_quotes: self.counters.skipped_quotes.load(Ordering::Relaxed),
        }
    }
}
