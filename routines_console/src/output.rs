//! Places a session paints its reconstructed buffer into.

/// A display for the whole reconstructed buffer.
///
/// `paint` always receives the complete text, never a delta.
pub trait OutputArea {
    fn paint(&mut self, text: &str);
    fn scroll_to_bottom(&mut self);
}

/// Scrollable line view backing the terminal UI.
#[derive(Debug, Clone)]
pub struct ScrollView {
    lines: Vec<String>,
    offset: usize,
    viewport: usize,
}

impl Default for ScrollView {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            offset: 0,
            viewport: 1,
        }
    }
}

impl ScrollView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Index of the first visible line.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn viewport(&self) -> usize {
        self.viewport
    }

    /// Sets how many lines fit on screen.
    pub fn set_viewport(&mut self, height: usize) {
        self.viewport = height.max(1);
        self.offset = self.offset.min(self.max_offset());
    }

    pub fn max_offset(&self) -> usize {
        self.lines.len().saturating_sub(self.viewport)
    }

    pub fn is_at_bottom(&self) -> bool {
        self.offset >= self.max_offset()
    }

    pub fn visible(&self) -> &[String] {
        let end = (self.offset + self.viewport).min(self.lines.len());
        &self.lines[self.offset.min(end)..end]
    }

    pub fn scroll_up(&mut self, lines: usize) {
        self.offset = self.offset.saturating_sub(lines);
    }

    pub fn scroll_down(&mut self, lines: usize) {
        self.offset = (self.offset + lines).min(self.max_offset());
    }

    pub fn page_up(&mut self) {
        self.scroll_up(self.viewport);
    }

    pub fn page_down(&mut self) {
        self.scroll_down(self.viewport);
    }
}

impl OutputArea for ScrollView {
    fn paint(&mut self, text: &str) {
        // A trailing newline opens an empty last line, as in a text area.
        self.lines = text.split('\n').map(str::to_string).collect();
        self.offset = self.offset.min(self.max_offset());
    }

    fn scroll_to_bottom(&mut self) {
        self.offset = self.max_offset();
    }
}

/// Keeps the last painted text so it can be printed once the run ends.
#[derive(Debug, Clone, Default)]
pub struct PlainOutput {
    text: String,
}

impl PlainOutput {
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl OutputArea for PlainOutput {
    fn paint(&mut self, text: &str) {
        self.text.clear();
        self.text.push_str(text);
    }

    fn scroll_to_bottom(&mut self) {}
}

/// Records every call, for tests.
#[derive(Debug, Clone, Default)]
pub struct RecordingOutput {
    pub paints: Vec<String>,
    pub scrolls: usize,
}

impl RecordingOutput {
    pub fn last(&self) -> Option<&str> {
        self.paints.last().map(String::as_str)
    }
}

impl OutputArea for RecordingOutput {
    fn paint(&mut self, text: &str) {
        self.paints.push(text.to_string());
    }

    fn scroll_to_bottom(&mut self) {
        self.scrolls += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(count: usize) -> String {
        (1..=count)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_scroll_to_bottom_shows_the_last_lines() {
        let mut view = ScrollView::new();
        view.set_viewport(3);
        view.paint(&numbered(10));
        assert_eq!(view.offset(), 0);

        view.scroll_to_bottom();
        assert_eq!(view.offset(), 7);
        assert_eq!(view.visible(), ["line 8", "line 9", "line 10"]);
        assert!(view.is_at_bottom());
    }

    #[test]
    fn test_repaint_keeps_offset_within_bounds() {
        let mut view = ScrollView::new();
        view.set_viewport(2);
        view.paint(&numbered(10));
        view.scroll_to_bottom();

        // A rewrite token shortened the buffer.
        view.paint(&numbered(4));
        assert_eq!(view.offset(), 2);
        assert_eq!(view.visible(), ["line 3", "line 4"]);
    }

    #[test]
    fn test_paging_is_clamped() {
        let mut view = ScrollView::new();
        view.set_viewport(4);
        view.paint(&numbered(6));
        view.page_down();
        assert_eq!(view.offset(), 2);
        view.page_up();
        view.page_up();
        assert_eq!(view.offset(), 0);
        view.scroll_down(100);
        assert_eq!(view.offset(), 2);
    }

    #[test]
    fn test_short_text_fits_without_scrolling() {
        let mut view = ScrollView::new();
        view.set_viewport(10);
        view.paint("only");
        view.scroll_to_bottom();
        assert_eq!(view.offset(), 0);
        assert_eq!(view.visible(), ["only"]);
    }

    #[test]
    fn test_trailing_blank_lines_are_shown() {
        let mut view = ScrollView::new();
        view.set_viewport(3);
        view.paint("10%\nDone!\n\n");
        view.scroll_to_bottom();
        assert_eq!(view.lines().len(), 4);
        assert_eq!(view.visible(), ["Done!", "", ""]);
    }

    #[test]
    fn test_plain_output_keeps_only_the_latest_paint() {
        let mut output = PlainOutput::default();
        output.paint("10%\n");
        output.paint("100%\n");
        assert_eq!(output.text(), "100%\n");
    }
}
