//! Lazy fragment streams produced by providers.

use std::io::BufRead;

use crate::llm::errors::{ProviderError, ProviderResult};
use crate::llm::sse::{SseEvent, SseReader};

/// Outcome of decoding one SSE event.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Decoded {
    /// A text fragment to relay.
    Text(String),
    /// Nothing to relay (keep-alive, metadata, empty delta).
    Skip,
    /// The provider signalled the end of the response.
    Done,
}

/// Decoder from a provider's SSE event to a [`Decoded`] value.
pub type EventDecoder = fn(&SseEvent) -> ProviderResult<Decoded>;

/// A finite, non-restartable sequence of response text fragments.
///
/// The stream yields `Ok(fragment)` items until the provider signals the end
/// of the response or the body ends. The first `Err` is also the last item.
pub struct FragmentStream {
    inner: Box<dyn Iterator<Item = ProviderResult<String>> + Send>,
}

impl FragmentStream {
    /// Wrap any fragment iterator.
    pub fn new<I>(fragments: I) -> Self
    where
        I: Iterator<Item = ProviderResult<String>> + Send + 'static,
    {
        Self {
            inner: Box::new(fragments),
        }
    }

    /// Decode an SSE body with a provider-specific decoder.
    pub fn from_sse<R>(reader: R, decode: EventDecoder) -> Self
    where
        R: BufRead + Send + 'static,
    {
        Self::new(SseFragments {
            events: SseReader::new(reader),
            decode,
            done: false,
        })
    }

    /// Drain the stream, relaying each fragment, and return the full text.
    ///
    /// On failure the text received so far is returned alongside the error.
    pub fn collect_with<F>(self, mut on_fragment: F) -> Result<String, (String, ProviderError)>
    where
        F: FnMut(&str),
    {
        let mut text = String::new();
        for fragment in self {
            match fragment {
                Ok(fragment) => {
                    on_fragment(&fragment);
                    text.push_str(&fragment);
                }
                Err(err) => return Err((text, err)),
            }
        }
        Ok(text)
    }
}

impl Iterator for FragmentStream {
    type Item = ProviderResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

struct SseFragments<R> {
    events: SseReader<R>,
    decode: EventDecoder,
    done: bool,
}

impl<R: BufRead> Iterator for SseFragments<R> {
    type Item = ProviderResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let event = match self.events.next() {
                Some(Ok(event)) => event,
                Some(Err(err)) => {
                    self.done = true;
                    return Some(Err(ProviderError::Io(err)));
                }
                None => {
                    self.done = true;
                    return None;
                }
            };

            match (self.decode)(&event) {
                Ok(Decoded::Text(text)) => return Some(Ok(text)),
                Ok(Decoded::Skip) => {}
                Ok(Decoded::Done) => {
                    self.done = true;
                    return None;
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
