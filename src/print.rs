use crate::accumulator::Phase;
use crate::view::{Indicator, RegenerateAction, ViewHandle, ViewSink};
use std::collections::HashMap;
use std::io::{self, Write};

/// Streams bubbles to a plain writer for `refine ask`.
///
/// Output is append-only: updates print only the text added since the last
/// render, and removals cannot take anything back.
pub struct PrintView<W: Write> {
    out: W,
    next_id: u64,
    printed: HashMap<ViewHandle, String>,
    error: Option<io::Error>,
}

impl<W: Write> PrintView<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            next_id: 0,
            printed: HashMap::new(),
            error: None,
        }
    }

    /// Returns the writer, or the first write error seen.
    pub fn finish(mut self) -> io::Result<W> {
        if let Some(err) = self.error.take() {
            return Err(err);
        }
        self.out.flush()?;
        Ok(self.out)
    }

    fn next_handle(&mut self) -> ViewHandle {
        let handle = ViewHandle::new(self.next_id);
        self.next_id += 1;
        handle
    }

    fn write(&mut self, text: &str) {
        if self.error.is_some() {
            return;
        }
        let result = self
            .out
            .write_all(text.as_bytes())
            .and_then(|_| self.out.flush());
        if let Err(err) = result {
            log::warn!("failed to write to output: {}", err);
            self.error = Some(err);
        }
    }

    /// Prints whatever `text` adds to what the bubble already shows.
    fn render(&mut self, handle: ViewHandle, text: &str) {
        let Some(shown) = self.printed.get(&handle) else {
            return;
        };
        let suffix = match text.strip_prefix(shown.as_str()) {
            Some(suffix) => suffix.to_string(),
            // Content was rewritten rather than extended.
            None => format!("\n{}", text),
        };
        self.printed.insert(handle, text.to_string());
        self.write(&suffix);
    }
}

impl<W: Write> ViewSink for PrintView<W> {
    fn open_bubble(&mut self, phase: Phase, agent: &str) -> ViewHandle {
        let handle = self.next_handle();
        self.printed.insert(handle, String::new());
        self.write(&format!("\n== {} · {} ==\n", agent, phase.label()));
        handle
    }

    fn update_bubble(&mut self, handle: ViewHandle, text: &str) {
        self.render(handle, text);
    }

    fn finalize_bubble(&mut self, handle: ViewHandle, text: &str) {
        self.render(handle, text);
        if self.printed.remove(&handle).is_some() && !text.ends_with('\n') {
            self.write("\n");
        }
    }

    fn show_error(&mut self, agent: &str, message: &str) -> ViewHandle {
        let handle = self.next_handle();
        self.write(&format!("\n✗ {}: {}\n", agent, message));
        handle
    }

    fn show_notice(&mut self, message: &str) -> ViewHandle {
        let handle = self.next_handle();
        self.write(&format!("ℹ {}\n", message));
        handle
    }

    fn attach_regenerate(&mut self, handle: ViewHandle, action: RegenerateAction) {
        log::debug!("{} offered for bubble {}", action.mode.label(), handle.id());
    }

    fn remove(&mut self, handle: ViewHandle) {
        log::debug!("cannot remove printed bubble {}", handle.id());
    }

    fn set_indicator(&mut self, indicator: Option<Indicator>) {
        if let Some(indicator) = indicator {
            log::info!("{}", indicator.label());
        }
    }

    fn set_composer_enabled(&mut self, _enabled: bool) {}
}
