//! Structured spans for billing runs.

use std::time::Instant;

use tracing::{Level, Span, field, span};

use crate::model::Window;

/// Span around one window build; records the tree count and latency on finish.
pub struct WindowSpan {
    span: Span,
    start: Instant,
}

impl WindowSpan {
    pub fn new(window: &Window) -> Self {
        let span = span!(
            Level::INFO,
            "billing.window",
            from = %window.from,
            to = %window.to,
            trees = field::Empty,
            latency_ms = field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    pub fn finish(self, trees: usize) -> f64 {
        let latency_ms = self.elapsed_ms();
        self.span.record("trees", trees);
        self.span.record("latency_ms", latency_ms as u64);
        latency_ms
    }
}

pub fn persist_span(user_id: &str, window: &Window) -> Span {
    span!(
        Level::DEBUG,
        "billing.persist",
        user_id = user_id,
        from = %window.from,
    )
}

pub fn process_tree_span(user_id: &str) -> Span {
    span!(Level::DEBUG, "billing.process_tree", user_id = user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_span_finish() {
        let window = Window::month(2024, 1).unwrap();
        let span = WindowSpan::new(&window);
        let latency = span.finish(4);
        assert!(latency >= 0.0);
    }
}
