use crate::view::{ViewHandle, ViewSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Suggestion,
    Generation,
}

impl Phase {
    pub fn label(self) -> &'static str {
        match self {
            Phase::Suggestion => "suggestions",
            Phase::Generation => "code",
        }
    }
}

/// Text of one phase as it streams in, bound to the bubble that shows it.
#[derive(Debug)]
pub struct PhaseState {
    agent: String,
    text: String,
    handle: ViewHandle,
    open: bool,
}

impl PhaseState {
    pub fn open<V: ViewSink + ?Sized>(phase: Phase, agent: &str, view: &mut V) -> Self {
        let handle = view.open_bubble(phase, agent);
        Self {
            agent: agent.to_string(),
            text: String::new(),
            handle,
            open: true,
        }
    }

    /// Appends a fragment and re-renders everything received so far.
    pub fn append<V: ViewSink + ?Sized>(&mut self, fragment: &str, view: &mut V) {
        if !self.open {
            log::warn!("ignoring fragment for closed {} bubble", self.agent);
            return;
        }
        self.text.push_str(fragment);
        view.update_bubble(self.handle, &self.text);
    }

    /// Returns false when the phase was already closed.
    pub fn finalize<V: ViewSink + ?Sized>(&mut self, view: &mut V) -> bool {
        if !self.open {
            return false;
        }
        self.open = false;
        view.finalize_bubble(self.handle, &self.text);
        true
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn handle(&self) -> ViewHandle {
        self.handle
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

/// The latest accumulator of each phase. At most one of each is open.
#[derive(Debug, Default)]
pub struct Phases {
    suggestion: Option<PhaseState>,
    generation: Option<PhaseState>,
}

impl Phases {
    pub fn get(&self, phase: Phase) -> Option<&PhaseState> {
        match phase {
            Phase::Suggestion => self.suggestion.as_ref(),
            Phase::Generation => self.generation.as_ref(),
        }
    }

    fn slot_mut(&mut self, phase: Phase) -> &mut Option<PhaseState> {
        match phase {
            Phase::Suggestion => &mut self.suggestion,
            Phase::Generation => &mut self.generation,
        }
    }

    pub fn is_open(&self, phase: Phase) -> bool {
        self.get(phase).is_some_and(PhaseState::is_open)
    }

    /// Routes a fragment to the open accumulator of `phase`. A new one is
    /// opened when none is open or when `agent` differs from the owner of the
    /// open one, which is closed first. Returns whether a bubble was opened.
    pub fn append<V: ViewSink + ?Sized>(
        &mut self,
        phase: Phase,
        agent: &str,
        fragment: &str,
        view: &mut V,
    ) -> bool {
        let slot = self.slot_mut(phase);
        let reuse = matches!(slot.as_ref(), Some(state) if state.open && state.agent == agent);

        if !reuse {
            if let Some(previous) = slot.as_mut() {
                previous.finalize(view);
            }
            *slot = Some(PhaseState::open(phase, agent, view));
        }
        if let Some(state) = slot.as_mut() {
            state.append(fragment, view);
        }
        !reuse
    }

    /// Closes the open accumulator of `phase` if `agent` owns it. An empty
    /// agent matches any owner. Returns the closed state, or `None` when
    /// there was nothing to close.
    pub fn finalize<V: ViewSink + ?Sized>(
        &mut self,
        phase: Phase,
        agent: &str,
        view: &mut V,
    ) -> Option<&PhaseState> {
        let state = self.slot_mut(phase).as_mut()?;
        if !state.open || (!agent.is_empty() && state.agent != agent) {
            return None;
        }
        state.finalize(view);
        Some(&*state)
    }

    /// Closes whatever is still open. Returns how many phases were closed.
    pub fn finish<V: ViewSink + ?Sized>(&mut self, view: &mut V) -> usize {
        [&mut self.suggestion, &mut self.generation]
            .into_iter()
            .flatten()
            .map(|state| state.finalize(view))
            .filter(|closed| *closed)
            .count()
    }
}
