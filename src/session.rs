use std::fmt;

use tracing::{info, warn};

use crate::action::{Action, END_BUTTON};
use crate::batch::PromptContext;
use crate::browser::{ActionInventory, Locator, Storefront};
use crate::error::{Result, RunnerError};
use crate::trace::TraceLog;
use crate::viewport::BoundingBox;

/// Stable session identifier: a fixed prefix plus a monotonically allocated
/// ordinal. Never reused; ordering follows the ordinal, so it doubles as the
/// deterministic sort key for batching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    pub fn ordinal(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session_{}", self.0)
    }
}

/// Mutable per-session record. Owned exclusively by the session's driver; the
/// step counter counts rendered frames, scroll-induced ones included, and
/// starts at 1.
#[derive(Debug)]
pub struct SessionState {
    pub id: SessionId,
    pub step: u32,
    pub history: Vec<String>,
    pub observation: String,
    pub last_box: Option<BoundingBox>,
    pub done: bool,
}

impl SessionState {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            step: 1,
            history: Vec::new(),
            observation: String::new(),
            last_box: None,
            done: false,
        }
    }
}

/// Drives one session through its lifecycle: gather, scroll-until-visible,
/// execute, log. The pool decides *what* to do each tick; the driver owns
/// *how* it lands on the page.
pub struct SessionDriver {
    state: SessionState,
    store: Box<dyn Storefront>,
    trace: TraceLog,
    instruction: String,
    inventory: ActionInventory,
}

impl SessionDriver {
    pub fn new(id: SessionId, mut store: Box<dyn Storefront>, trace: TraceLog) -> Result<Self> {
        let instruction = store.instruction_text()?;
        info!(session = %id, %instruction, "session opened");
        Ok(Self {
            state: SessionState::new(id),
            store,
            trace,
            instruction,
            inventory: ActionInventory::default(),
        })
    }

    pub fn id(&self) -> SessionId {
        self.state.id
    }

    pub fn is_done(&self) -> bool {
        self.state.done
    }

    pub fn step(&self) -> u32 {
        self.state.step
    }

    /// Gather phase: rebuild the clickable registry, refresh the observation,
    /// and capture the frame for the current step.
    pub fn gather(&mut self) -> Result<PromptContext> {
        self.inventory = self.store.gather()?;
        self.state.observation = self.store.page_html()?;
        self.store
            .capture_frame(&self.trace.frame_path(self.state.step))?;

        Ok(PromptContext {
            instruction: self.instruction.clone(),
            history: self.state.history.clone(),
            observation: self.state.observation.clone(),
            has_search_bar: self.inventory.has_search_bar,
            clickables: self.inventory.keys(),
        })
    }

    /// Apply one decided raw action: parse it, scroll its target into view,
    /// write the pre-action record, execute, and advance the step counter.
    pub fn advance(&mut self, raw: &str) -> Result<()> {
        let action = Action::parse(raw);
        if let Some(entry) = action.history_entry() {
            self.state.history.push(entry);
        }

        let bb = self.scroll_into_view(&action)?;
        self.state.last_box = bb;
        self.trace.action(
            &action.to_string(),
            bb.as_ref(),
            &self.state.observation,
            self.store.resolution(),
        )?;

        self.execute(&action)
    }

    /// Force the session terminal after a per-session fault, appending the
    /// terminal record so the trace stays replayable.
    pub fn abort(&mut self) -> Result<()> {
        self.state.done = true;
        let resolution = self.store.resolution();
        self.trace.done(0.0, &self.state.observation, resolution)
    }

    pub fn close(self) {
        self.store.close();
    }

    fn locator_for(&self, action: &Action) -> Option<Locator> {
        match action {
            Action::Search(_) => Some(Locator::SearchInput),
            // Buying options scroll to their label; the label is what is
            // visually on the page.
            Action::Click(target) => self
                .inventory
                .resolve(target)
                .map(|t| Locator::Element(t.label_handle.unwrap_or(t.handle))),
            Action::End | Action::Invalid(_) => None,
        }
    }

    /// Scroll down by half the viewport height until the action's target box
    /// is fully visible, re-resolving the box fresh after every scroll. An
    /// absent box means visibility cannot be verified, so the loop stops. An
    /// offset that no longer moves means the target can never become visible.
    fn scroll_into_view(&mut self, action: &Action) -> Result<Option<BoundingBox>> {
        let Some(locator) = self.locator_for(action) else {
            return Ok(None);
        };
        let resolution = self.store.resolution();
        let viewport_height = f64::from(resolution.height);

        let mut bb = self.resolve_box(locator)?;
        loop {
            let Some(current) = bb else {
                return Ok(None);
            };
            let offset = self.store.scroll_offset()?;
            if current.fully_visible(offset, viewport_height) {
                return Ok(Some(current));
            }

            let distance = viewport_height / 2.0;
            self.store.scroll_by(distance)?;
            self.trace.scroll(distance, resolution)?;
            self.state.step += 1;
            self.store
                .capture_frame(&self.trace.frame_path(self.state.step))?;

            if self.store.scroll_offset()? == offset {
                return Err(RunnerError::ScrollExhausted {
                    session: self.state.id.to_string(),
                    action: action.to_string(),
                });
            }
            bb = self.resolve_box(locator)?;
        }
    }

    fn resolve_box(&mut self, locator: Locator) -> Result<Option<BoundingBox>> {
        match self.store.bounding_box(locator) {
            Ok(bb) => Ok(bb),
            Err(RunnerError::ElementNotFound(what)) => {
                warn!(session = %self.state.id, step = self.state.step, %what, "no box for target");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn execute(&mut self, action: &Action) -> Result<()> {
        let mut reward = 0.0;
        match action {
            Action::Search(query) => match self.store.submit_search(query) {
                Ok(()) => {}
                Err(RunnerError::ElementNotFound(_)) => {
                    warn!(session = %self.state.id, step = self.state.step, "no search bar found");
                }
                Err(err) => return Err(err),
            },
            Action::Click(target) => match self.inventory.resolve(target) {
                None => {
                    warn!(session = %self.state.id, step = self.state.step, %target, "unknown clickable, skipping");
                }
                Some(click_target) => {
                    let handle = click_target.handle;
                    match self.store.click(handle) {
                        Ok(()) => {
                            reward = self.store.reward()?;
                            if target == END_BUTTON {
                                self.state.done = true;
                            }
                        }
                        Err(RunnerError::ElementNotFound(what)) => {
                            warn!(session = %self.state.id, step = self.state.step, %what, "clickable vanished, skipping");
                        }
                        Err(err) => return Err(err),
                    }
                }
            },
            Action::End => {
                self.state.done = true;
            }
            Action::Invalid(raw) => {
                warn!(session = %self.state.id, step = self.state.step, %raw, "invalid action, nothing performed");
            }
        }

        self.state.observation = self.store.page_html()?;
        self.state.step += 1;
        self.store
            .capture_frame(&self.trace.frame_path(self.state.step))?;
        info!(session = %self.state.id, %action, reward, "action taken");

        if self.state.done {
            let resolution = self.store.resolution();
            self.trace
                .done(reward, &self.state.observation, resolution)?;
        }
        Ok(())
    }
}
