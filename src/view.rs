//! The rendering boundary.
//!
//! The reconciler never touches a terminal directly. It drives a [`ViewSink`]
//! through opaque [`ViewHandle`]s, so the same session logic feeds the TUI,
//! plain stdout, or a recording double in tests.

use crate::accumulator::Phase;
use crate::session::Suggestion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ViewHandle(u64);

impl ViewHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }
}

/// Loading marker shown while a session waits for the next phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Thinking,
    Generating,
}

impl Indicator {
    pub fn label(self) -> &'static str {
        match self {
            Indicator::Thinking => "Thinking...",
            Indicator::Generating => "Generating code...",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerateMode {
    /// Replay the whole message, suggestions included.
    Suggestions,
    /// Replay only code generation, reusing a cached suggestion.
    Implementation,
}

impl RegenerateMode {
    pub fn label(self) -> &'static str {
        match self {
            RegenerateMode::Suggestions => "regenerate suggestions",
            RegenerateMode::Implementation => "regenerate implementation",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegenerateAction {
    pub mode: RegenerateMode,
    pub message: String,
    pub suggestion: Option<Suggestion>,
    /// The message this replay replaces.
    pub target: ViewHandle,
}

/// Capabilities the reconciler needs from a renderer.
///
/// Handles that were removed, or never issued, must be ignored rather than
/// treated as errors: a superseded session may still finalize its bubbles.
pub trait ViewSink {
    /// Adds a bubble for `phase` attributed to `agent`, showing a streaming
    /// marker until it is finalized.
    fn open_bubble(&mut self, phase: Phase, agent: &str) -> ViewHandle;

    /// Replaces the bubble's content with `text`, the full text so far.
    fn update_bubble(&mut self, handle: ViewHandle, text: &str);

    /// Drops the streaming marker and renders `text` one last time.
    fn finalize_bubble(&mut self, handle: ViewHandle, text: &str);

    fn show_error(&mut self, agent: &str, message: &str) -> ViewHandle;

    /// Inline diagnostic that is not tied to a phase.
    fn show_notice(&mut self, message: &str) -> ViewHandle;

    fn attach_regenerate(&mut self, handle: ViewHandle, action: RegenerateAction);

    fn remove(&mut self, handle: ViewHandle);

    fn set_indicator(&mut self, indicator: Option<Indicator>);

    /// Enabling the composer also hands it input focus.
    fn set_composer_enabled(&mut self, enabled: bool);
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum BubbleKind {
        Phase(Phase),
        Error,
        Notice,
    }

    #[derive(Debug, Clone)]
    pub(crate) struct Bubble {
        pub kind: BubbleKind,
        pub agent: String,
        pub text: String,
        pub streaming: bool,
        pub renders: usize,
        pub regenerate: Option<RegenerateAction>,
    }

    /// Keeps the current state of every bubble plus a log of calls.
    #[derive(Debug)]
    pub(crate) struct RecordingView {
        next_id: u64,
        pub bubbles: BTreeMap<ViewHandle, Bubble>,
        pub removed: Vec<ViewHandle>,
        pub indicator: Option<Indicator>,
        pub indicator_history: Vec<Option<Indicator>>,
        pub composer_enabled: bool,
        pub calls: Vec<String>,
    }

    impl Default for RecordingView {
        fn default() -> Self {
            Self::new()
        }
    }

    impl RecordingView {
        pub(crate) fn new() -> Self {
            Self::starting_at(0)
        }

        /// Handles start at `first_id`, so several views can share a
        /// conversation without clashing.
        pub(crate) fn starting_at(first_id: u64) -> Self {
            Self {
                next_id: first_id,
                bubbles: BTreeMap::new(),
                removed: Vec::new(),
                indicator: None,
                indicator_history: Vec::new(),
                composer_enabled: true,
                calls: Vec::new(),
            }
        }

        pub(crate) fn of_kind(&self, kind: BubbleKind) -> Vec<&Bubble> {
            self.bubbles.values().filter(|b| b.kind == kind).collect()
        }

        pub(crate) fn regenerate_actions(&self) -> Vec<&RegenerateAction> {
            self.bubbles
                .values()
                .filter_map(|b| b.regenerate.as_ref())
                .collect()
        }

        fn add(&mut self, kind: BubbleKind, agent: &str, text: &str, streaming: bool) -> ViewHandle {
            let handle = ViewHandle::new(self.next_id);
            self.next_id += 1;
            self.bubbles.insert(
                handle,
                Bubble {
                    kind,
                    agent: agent.to_string(),
                    text: text.to_string(),
                    streaming,
                    renders: 0,
                    regenerate: None,
                },
            );
            handle
        }
    }

    impl ViewSink for RecordingView {
        fn open_bubble(&mut self, phase: Phase, agent: &str) -> ViewHandle {
            self.calls.push(format!("open {:?} {}", phase, agent));
            self.add(BubbleKind::Phase(phase), agent, "", true)
        }

        fn update_bubble(&mut self, handle: ViewHandle, text: &str) {
            self.calls.push(format!("update {}", handle.id()));
            if let Some(bubble) = self.bubbles.get_mut(&handle) {
                bubble.text = text.to_string();
                bubble.renders += 1;
            }
        }

        fn finalize_bubble(&mut self, handle: ViewHandle, text: &str) {
            self.calls.push(format!("finalize {}", handle.id()));
            if let Some(bubble) = self.bubbles.get_mut(&handle) {
                bubble.text = text.to_string();
                bubble.streaming = false;
                bubble.renders += 1;
            }
        }

        fn show_error(&mut self, agent: &str, message: &str) -> ViewHandle {
            self.calls.push(format!("error {}", agent));
            self.add(BubbleKind::Error, agent, message, false)
        }

        fn show_notice(&mut self, message: &str) -> ViewHandle {
            self.calls.push("notice".to_string());
            self.add(BubbleKind::Notice, "", message, false)
        }

        fn attach_regenerate(&mut self, handle: ViewHandle, action: RegenerateAction) {
            self.calls.push(format!("regenerate {}", handle.id()));
            if let Some(bubble) = self.bubbles.get_mut(&handle) {
                bubble.regenerate = Some(action);
            }
        }

        fn remove(&mut self, handle: ViewHandle) {
            self.calls.push(format!("remove {}", handle.id()));
            self.bubbles.remove(&handle);
            self.removed.push(handle);
        }

        fn set_indicator(&mut self, indicator: Option<Indicator>) {
            self.indicator = indicator;
            self.indicator_history.push(indicator);
        }

        fn set_composer_enabled(&mut self, enabled: bool) {
            self.composer_enabled = enabled;
        }
    }
}
