use crate::accumulator::{Phase, Phases};
use crate::config::MalformedLinePolicy;
use crate::protocol::StreamEvent;
use crate::session::Suggestion;
use crate::view::{Indicator, RegenerateAction, RegenerateMode, ViewHandle, ViewSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// The server reported a failure; nothing after it is read.
    Stop,
}

/// Applies the events of one response to the view.
#[derive(Debug)]
pub struct Dispatcher {
    message: String,
    cached: Option<Suggestion>,
    policy: MalformedLinePolicy,
    phases: Phases,
    completed: Option<Suggestion>,
    upstream_error: Option<String>,
    rendered: bool,
}

impl Dispatcher {
    /// `cached` is a suggestion carried over from an earlier exchange; while
    /// it is set, suggestion events from the server are not shown.
    pub fn new(message: &str, cached: Option<Suggestion>, policy: MalformedLinePolicy) -> Self {
        Self {
            message: message.to_string(),
            cached,
            policy,
            phases: Phases::default(),
            completed: None,
            upstream_error: None,
            rendered: false,
        }
    }

    #[cfg(test)]
    pub fn handle_line<V: ViewSink + ?Sized>(&mut self, line: &str, view: &mut V) -> Flow {
        match self.decode(line, view) {
            Some(event) => self.handle_event(event, view),
            None => Flow::Continue,
        }
    }

    /// Parses one line. Blank lines yield nothing; malformed ones are
    /// handled per the configured policy and yield nothing either.
    pub fn decode<V: ViewSink + ?Sized>(
        &mut self,
        line: &str,
        view: &mut V,
    ) -> Option<StreamEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match serde_json::from_str::<StreamEvent>(line) {
            Ok(event) => Some(event),
            Err(e) => {
                match self.policy {
                    MalformedLinePolicy::Skip => {
                        log::warn!("skipping malformed frame ({}): {}", e, line);
                    }
                    MalformedLinePolicy::Surface => {
                        log::warn!("malformed frame ({}): {}", e, line);
                        view.show_notice(&format!("Could not read a server message: {}", e));
                        self.rendered = true;
                    }
                }
                None
            }
        }
    }

    pub fn handle_event<V: ViewSink + ?Sized>(&mut self, event: StreamEvent, view: &mut V) -> Flow {
        log::trace!("{} from {}", event.kind(), event.agent());
        match event {
            StreamEvent::SuggestionsChunk { agent, content } => {
                if self.skipping_suggestions() {
                    return Flow::Continue;
                }
                self.phases.append(Phase::Suggestion, &agent, &content, view);
                self.rendered = true;
            }
            StreamEvent::SuggestionsEnd { agent, .. } => {
                if self.skipping_suggestions() {
                    return Flow::Continue;
                }
                self.complete_suggestion(&agent, view);
            }
            StreamEvent::Suggestions { agent, content } => {
                if self.skipping_suggestions() {
                    return Flow::Continue;
                }
                self.phases.append(Phase::Suggestion, &agent, &content, view);
                self.rendered = true;
                self.complete_suggestion(&agent, view);
            }
            StreamEvent::GeneratedCodeChunk { agent, content } => {
                let opened = self.phases.append(Phase::Generation, &agent, &content, view);
                if opened {
                    view.set_indicator(None);
                }
                self.rendered = true;
            }
            StreamEvent::StreamEnd { agent, .. } => {
                let Some(handle) = self
                    .phases
                    .finalize(Phase::Generation, &agent, view)
                    .map(|state| state.handle())
                else {
                    log::debug!("stream_end from {} with no open code block", agent);
                    return Flow::Continue;
                };
                let action = self.action(RegenerateMode::Implementation, handle);
                view.attach_regenerate(handle, action);
            }
            StreamEvent::Error { agent, content } => {
                let during = [Phase::Suggestion, Phase::Generation]
                    .into_iter()
                    .find(|phase| self.phases.is_open(*phase))
                    .map_or("between phases", Phase::label);
                log::warn!("server error from {} ({}): {}", agent, during, content);
                view.set_indicator(None);
                let handle = view.show_error(&agent, &content);
                self.rendered = true;
                let mode = if self.suggestion_ready() {
                    RegenerateMode::Implementation
                } else {
                    RegenerateMode::Suggestions
                };
                let action = self.action(mode, handle);
                view.attach_regenerate(handle, action);
                self.upstream_error = Some(content);
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    /// Closes phases the stream left open. Returns how many there were.
    pub fn finish<V: ViewSink + ?Sized>(&mut self, view: &mut V) -> usize {
        self.phases.finish(view)
    }

    /// The suggestion this response completed, if any.
    pub fn completed_suggestion(&self) -> Option<&Suggestion> {
        self.completed.as_ref()
    }

    pub fn upstream_error(&self) -> Option<&str> {
        self.upstream_error.as_deref()
    }

    /// Whether anything was put on screen so far.
    pub fn has_rendered(&self) -> bool {
        self.rendered
    }

    /// Builds a replay of this exchange that replaces `target`.
    pub fn action(&self, mode: RegenerateMode, target: ViewHandle) -> RegenerateAction {
        let suggestion = match mode {
            RegenerateMode::Suggestions => None,
            RegenerateMode::Implementation => self.replay_suggestion().cloned(),
        };
        RegenerateAction {
            mode,
            message: self.message.clone(),
            suggestion,
            target,
        }
    }

    fn skipping_suggestions(&self) -> bool {
        if self.cached.is_some() {
            log::debug!("suggestions already cached; ignoring suggestion frame");
            return true;
        }
        false
    }

    fn suggestion_ready(&self) -> bool {
        self.replay_suggestion().is_some()
    }

    fn replay_suggestion(&self) -> Option<&Suggestion> {
        self.cached.as_ref().or(self.completed.as_ref())
    }

    fn complete_suggestion<V: ViewSink + ?Sized>(&mut self, agent: &str, view: &mut V) {
        let Some(state) = self.phases.finalize(Phase::Suggestion, agent, view) else {
            log::debug!("suggestions_end from {} with no open suggestions", agent);
            return;
        };
        let handle = state.handle();
        self.completed = Some(Suggestion {
            agent: state.agent().to_string(),
            content: state.text().to_string(),
        });

        let action = self.action(RegenerateMode::Suggestions, handle);
        view.attach_regenerate(handle, action);
        view.set_indicator(Some(Indicator::Generating));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::recording::{BubbleKind, RecordingView};

    fn reviewer_suggestion() -> Suggestion {
        Suggestion {
            agent: "Reviewer".to_string(),
            content: "Use a for-loop.".to_string(),
        }
    }

    fn feed(dispatcher: &mut Dispatcher, view: &mut RecordingView, lines: &[&str]) -> Vec<Flow> {
        lines
            .iter()
            .map(|line| dispatcher.handle_line(line, view))
            .collect()
    }

    #[test]
    fn chunked_suggestions_finalize_and_offer_regenerate() {
        let mut view = RecordingView::new();
        let mut dispatcher = Dispatcher::new("fix this loop", None, MalformedLinePolicy::Skip);

        feed(
            &mut dispatcher,
            &mut view,
            &[
                r#"{"type":"suggestions_chunk","agent":"Reviewer","content":"Use "}"#,
                r#"{"type":"suggestions_chunk","agent":"Reviewer","content":"a for-loop."}"#,
                r#"{"type":"suggestions_end","agent":"Reviewer"}"#,
            ],
        );

        let bubbles = view.of_kind(BubbleKind::Phase(Phase::Suggestion));
        assert_eq!(bubbles.len(), 1);
        assert_eq!(bubbles[0].text, "Use a for-loop.");
        assert!(!bubbles[0].streaming);
        let action = bubbles[0].regenerate.as_ref().unwrap();
        assert_eq!(action.mode, RegenerateMode::Suggestions);
        assert_eq!(action.message, "fix this loop");
        assert_eq!(dispatcher.completed_suggestion(), Some(&reviewer_suggestion()));
        assert_eq!(view.indicator, Some(Indicator::Generating));
    }

    #[test]
    fn atomic_suggestions_complete_in_one_frame() {
        let mut view = RecordingView::new();
        let mut dispatcher = Dispatcher::new("code", None, MalformedLinePolicy::Skip);

        feed(
            &mut dispatcher,
            &mut view,
            &[r#"{"type":"suggestions","agent":"Reviewer","content":"Use a for-loop."}"#],
        );

        let bubbles = view.of_kind(BubbleKind::Phase(Phase::Suggestion));
        assert_eq!(bubbles.len(), 1);
        assert!(!bubbles[0].streaming);
        assert_eq!(dispatcher.completed_suggestion(), Some(&reviewer_suggestion()));
    }

    #[test]
    fn generation_clears_indicator_and_stream_end_offers_implementation_replay() {
        let mut view = RecordingView::new();
        let mut dispatcher = Dispatcher::new("code", None, MalformedLinePolicy::Skip);

        feed(
            &mut dispatcher,
            &mut view,
            &[
                r#"{"type":"suggestions","agent":"Reviewer","content":"Use a for-loop."}"#,
                r#"{"type":"generated_code_chunk","agent":"Coder","content":"for x in xs {"}"#,
                r#"{"type":"generated_code_chunk","agent":"Coder","content":" }"}"#,
                r#"{"type":"stream_end","agent":"Coder"}"#,
            ],
        );

        assert_eq!(view.indicator, None);
        let code = view.of_kind(BubbleKind::Phase(Phase::Generation));
        assert_eq!(code.len(), 1);
        assert_eq!(code[0].text, "for x in xs { }");
        let action = code[0].regenerate.as_ref().unwrap();
        assert_eq!(action.mode, RegenerateMode::Implementation);
        assert_eq!(action.suggestion, Some(reviewer_suggestion()));
    }

    #[test]
    fn end_markers_without_chunks_are_noops() {
        let mut view = RecordingView::new();
        let mut dispatcher = Dispatcher::new("code", None, MalformedLinePolicy::Skip);

        let flows = feed(
            &mut dispatcher,
            &mut view,
            &[
                r#"{"type":"suggestions_end","agent":"Reviewer"}"#,
                r#"{"type":"stream_end","agent":"Gemini"}"#,
            ],
        );

        assert_eq!(flows, vec![Flow::Continue, Flow::Continue]);
        assert!(view.calls.is_empty());
        assert!(view.indicator_history.is_empty());
        assert!(!dispatcher.has_rendered());
    }

    #[test]
    fn error_stops_and_scopes_replay_to_missing_phase() {
        let mut view = RecordingView::new();
        let mut dispatcher = Dispatcher::new("code", None, MalformedLinePolicy::Skip);

        let flow = dispatcher.handle_line(
            r#"{"type":"error","agent":"Coder","content":"rate limited"}"#,
            &mut view,
        );

        assert_eq!(flow, Flow::Stop);
        let errors = view.of_kind(BubbleKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].agent, "Coder");
        assert_eq!(errors[0].text, "rate limited");
        let action = errors[0].regenerate.as_ref().unwrap();
        assert_eq!(action.mode, RegenerateMode::Suggestions);
        assert_eq!(dispatcher.upstream_error(), Some("rate limited"));
    }

    #[test]
    fn error_after_suggestions_replays_only_generation() {
        let mut view = RecordingView::new();
        let mut dispatcher = Dispatcher::new("code", None, MalformedLinePolicy::Skip);

        feed(
            &mut dispatcher,
            &mut view,
            &[
                r#"{"type":"suggestions","agent":"Reviewer","content":"Use a for-loop."}"#,
                r#"{"type":"error","agent":"Coder","content":"quota"}"#,
            ],
        );

        let errors = view.of_kind(BubbleKind::Error);
        let action = errors[0].regenerate.as_ref().unwrap();
        assert_eq!(action.mode, RegenerateMode::Implementation);
        assert_eq!(action.suggestion, Some(reviewer_suggestion()));
    }

    #[test]
    fn malformed_line_between_chunks_is_skipped() {
        let mut view = RecordingView::new();
        let mut dispatcher = Dispatcher::new("code", None, MalformedLinePolicy::Skip);

        feed(
            &mut dispatcher,
            &mut view,
            &[
                r#"{"type":"generated_code_chunk","agent":"Coder","content":"a"}"#,
                "{not json",
                r#"{"type":"generated_code_chunk","agent":"Coder","content":"b"}"#,
            ],
        );

        let code = view.of_kind(BubbleKind::Phase(Phase::Generation));
        assert_eq!(code[0].text, "ab");
        assert!(view.of_kind(BubbleKind::Notice).is_empty());
    }

    #[test]
    fn malformed_line_can_be_surfaced() {
        let mut view = RecordingView::new();
        let mut dispatcher = Dispatcher::new("code", None, MalformedLinePolicy::Surface);

        let flow = dispatcher.handle_line("{not json", &mut view);

        assert_eq!(flow, Flow::Continue);
        assert_eq!(view.of_kind(BubbleKind::Notice).len(), 1);
        assert!(dispatcher.has_rendered());
    }

    #[test]
    fn cached_suggestion_hides_echoed_suggestions() {
        let mut view = RecordingView::new();
        let mut dispatcher = Dispatcher::new(
            "code",
            Some(reviewer_suggestion()),
            MalformedLinePolicy::Skip,
        );

        feed(
            &mut dispatcher,
            &mut view,
            &[
                r#"{"type":"suggestions","agent":"Reviewer","content":"Use a for-loop."}"#,
                r#"{"type":"generated_code_chunk","agent":"Coder","content":"x"}"#,
                r#"{"type":"error","agent":"Coder","content":"boom"}"#,
            ],
        );

        assert!(view.of_kind(BubbleKind::Phase(Phase::Suggestion)).is_empty());
        assert!(dispatcher.completed_suggestion().is_none());
        let errors = view.of_kind(BubbleKind::Error);
        let action = errors[0].regenerate.as_ref().unwrap();
        assert_eq!(action.mode, RegenerateMode::Implementation);
        assert_eq!(action.suggestion, Some(reviewer_suggestion()));
    }

    #[test]
    fn blank_lines_are_ignored() {
        let mut view = RecordingView::new();
        let mut dispatcher = Dispatcher::new("code", None, MalformedLinePolicy::Surface);

        assert_eq!(dispatcher.handle_line("   ", &mut view), Flow::Continue);
        assert!(view.calls.is_empty());
    }
}
