//! Minimal Server-Sent Events framing over a blocking reader.

use std::io::{self, BufRead};

/// One dispatched SSE event.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any.
    pub event: Option<String>,
    /// Concatenated `data:` lines, joined with `\n`.
    pub data: String,
}

/// Iterator over the events of an SSE body.
///
/// Ends at end of input. An I/O error is yielded once and ends iteration.
pub struct SseReader<R> {
    reader: R,
    line: String,
    finished: bool,
}

impl<R: BufRead> SseReader<R> {
    /// Wrap a buffered reader.
    #[must_use]
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            finished: false,
        }
    }
}

impl<R: BufRead> Iterator for SseReader<R> {
    type Item = io::Result<SseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let mut event: Option<String> = None;
        let mut data = String::new();
        let mut has_data = false;

        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => {
                    self.finished = true;
                    if has_data || event.is_some() {
                        return Some(Ok(SseEvent { event, data }));
                    }
                    return None;
                }
                Ok(_) => {}
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }

            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if has_data || event.is_some() {
                    return Some(Ok(SseEvent { event, data }));
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event = Some(value.to_string()),
                "data" => {
                    if has_data {
                        data.push('\n');
                    }
                    data.push_str(value);
                    has_data = true;
                }
                _ => {}
            }
        }
    }
}
