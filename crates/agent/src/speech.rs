//! Spoken-output side channel.
//!
//! `speak` content is split into sentences and handed to a background task
//! that synthesizes each one and forwards the audio as base64 chunks on the
//! conversation's event stream. The text stream never waits on synthesis.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use relaymind_core::speech::SpeechSynthesizer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::stream_event::AgentStreamEvent;

/// Raw audio bytes per `audio-chunk` event.
const AUDIO_CHUNK_BYTES: usize = 16 * 1024;

/// Splits streamed text into sentences.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace, or at a newline.
#[derive(Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every sentence it completes.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);
        let mut sentences = Vec::new();
        while let Some(end) = self.boundary() {
            let sentence: String = self.buffer.drain(..end).collect();
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// The trailing partial sentence, if any.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        let rest = rest.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Byte offset just past the first sentence terminator.
    fn boundary(&self) -> Option<usize> {
        let mut chars = self.buffer.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\n' {
                return Some(i + 1);
            }
            if matches!(c, '.' | '!' | '?')
                && let Some((j, next)) = chars.peek()
                && next.is_whitespace()
            {
                return Some(*j);
            }
        }
        None
    }
}

/// Handle to the background synthesis task of one conversation.
pub struct SpeechChannel {
    segmenter: SentenceSegmenter,
    sentences: Option<mpsc::UnboundedSender<String>>,
    task: JoinHandle<()>,
}

impl SpeechChannel {
    pub fn start(
        synthesizer: Arc<dyn SpeechSynthesizer>,
        events: mpsc::Sender<AgentStreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_synthesis(synthesizer, rx, events, cancel));
        Self {
            segmenter: SentenceSegmenter::new(),
            sentences: Some(tx),
            task,
        }
    }

    /// Queue spoken text; complete sentences go to the synthesizer.
    pub fn feed(&mut self, text: &str) {
        for sentence in self.segmenter.push(text) {
            self.send(sentence);
        }
    }

    fn send(&self, sentence: String) {
        if let Some(tx) = &self.sentences
            && tx.send(sentence).is_err()
        {
            debug!("Speech task already stopped");
        }
    }

    /// Flush the partial sentence and wait for all audio to be emitted.
    pub async fn finish(mut self) {
        if let Some(rest) = self.segmenter.finish() {
            self.send(rest);
        }
        self.sentences = None;
        if let Err(e) = self.task.await {
            warn!(error = %e, "Speech task failed");
        }
    }

    /// Stop synthesis without emitting anything further.
    pub fn abort(self) {
        self.task.abort();
    }
}

async fn run_synthesis(
    synthesizer: Arc<dyn SpeechSynthesizer>,
    mut sentences: mpsc::UnboundedReceiver<String>,
    events: mpsc::Sender<AgentStreamEvent>,
    cancel: CancellationToken,
) {
    let mut sequence: u64 = 0;
    let mut header_sent = false;

    loop {
        let sentence = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = sentences.recv() => match next {
                Some(s) => s,
                None => break,
            },
        };

        let audio = match synthesizer.synthesize(&sentence).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(synthesizer = synthesizer.name(), error = %e, "Sentence synthesis failed");
                continue;
            }
        };

        if !header_sent {
            let header = AgentStreamEvent::AudioHeader {
                format: synthesizer.format(),
            };
            if events.send(header).await.is_err() {
                return;
            }
            header_sent = true;
        }

        for chunk in audio.chunks(AUDIO_CHUNK_BYTES) {
            if cancel.is_cancelled() {
                return;
            }
            let event = AgentStreamEvent::AudioChunk {
                sequence,
                data: STANDARD.encode(chunk),
            };
            if events.send(event).await.is_err() {
                return;
            }
            sequence += 1;
        }
    }

    if header_sent {
        let _ = events
            .send(AgentStreamEvent::AudioEnd { chunks: sequence })
            .await;
    }
}
