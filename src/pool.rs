use std::collections::BTreeMap;
use std::path::PathBuf;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::batch::{DecisionBatcher, PromptContext};
use crate::browser::StorefrontOpener;
use crate::error::{Result, RunnerError};
use crate::session::{SessionDriver, SessionId};
use crate::trace::TraceLog;
use crate::viewport::Resolution;

pub struct PoolConfig {
    /// Upper bound on concurrently active sessions.
    pub parallel_limit: usize,
    /// Total number of sessions to complete before the run ends.
    pub total_target: usize,
    /// Root directory for per-session traces and frames.
    pub log_root: PathBuf,
    /// Seed for resolution choice; `None` draws from OS entropy.
    pub seed: Option<u64>,
}

/// Orchestrates the bounded set of active sessions through the per-tick loop:
/// gather, one batched decision call, execute, reap, replenish.
pub struct SessionPool {
    config: PoolConfig,
    opener: Box<dyn StorefrontOpener>,
    batcher: DecisionBatcher,
    active: BTreeMap<SessionId, SessionDriver>,
    completed: usize,
    /// Strictly greater than any ordinal ever allocated, not merely any
    /// currently active one.
    next_ordinal: u64,
    rng: StdRng,
}

impl SessionPool {
    pub fn new(
        config: PoolConfig,
        opener: Box<dyn StorefrontOpener>,
        batcher: DecisionBatcher,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self {
            config,
            opener,
            batcher,
            active: BTreeMap::new(),
            completed: 0,
            next_ordinal: 0,
            rng,
        }
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    pub fn active_ids(&self) -> Vec<SessionId> {
        self.active.keys().copied().collect()
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Run ticks until the configured number of sessions has completed.
    pub async fn run(&mut self) -> Result<()> {
        self.replenish()?;
        while self.completed < self.config.total_target {
            self.tick().await?;
        }
        info!(completed = self.completed, "run finished");
        Ok(())
    }

    /// One full pass: top the pool up, gather every active session, issue the
    /// batched decision call, execute, reap. The decision call is the only
    /// await point; a decision failure aborts the tick with no session
    /// advanced.
    pub async fn tick(&mut self) -> Result<()> {
        self.replenish()?;

        let mut requests: BTreeMap<SessionId, PromptContext> = BTreeMap::new();
        for (id, driver) in self.active.iter_mut() {
            requests.insert(*id, driver.gather()?);
        }
        if requests.is_empty() {
            return Ok(());
        }

        let decisions = self.batcher.decide(&requests).await?;

        let mut terminal = Vec::new();
        for (id, driver) in self.active.iter_mut() {
            let Some(raw) = decisions.get(id) else {
                return Err(RunnerError::DecisionService(format!(
                    "no decision for {id}"
                )));
            };
            match driver.advance(raw) {
                Ok(()) => {}
                Err(RunnerError::ScrollExhausted { session, action }) => {
                    warn!(%session, %action, "scroll exhausted, forcing session terminal");
                    driver.abort()?;
                }
                Err(err) => return Err(err),
            }
            if driver.is_done() {
                terminal.push(*id);
            }
        }

        // Terminal sessions are reaped only here, never mid-tick.
        for id in terminal {
            if let Some(driver) = self.active.remove(&id) {
                driver.close();
                self.completed += 1;
                info!(session = %id, completed = self.completed, "session completed");
            }
        }

        self.replenish()
    }

    /// Keep `active == min(parallel_limit, total_target - completed)` so the
    /// pool never over-spawns near the end of the run.
    fn replenish(&mut self) -> Result<()> {
        let remaining = self.config.total_target.saturating_sub(self.completed);
        let desired = self.config.parallel_limit.min(remaining);
        while self.active.len() < desired {
            self.spawn_session()?;
        }
        Ok(())
    }

    fn spawn_session(&mut self) -> Result<()> {
        let id = SessionId(self.next_ordinal);
        self.next_ordinal += 1;

        let resolution = Resolution::choose(&mut self.rng);
        let store = self.opener.open(&id.to_string(), resolution)?;
        let trace = TraceLog::create(&self.config.log_root, &id.to_string())?;
        let driver = SessionDriver::new(id, store, trace)?;
        self.active.insert(id, driver);
        Ok(())
    }
}
