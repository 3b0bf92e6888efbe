//! VerificationEngine: streams the comparator's verdict.
//!
//! Each model fragment is forwarded as soon as it arrives. The assembled
//! payload is parsed only after the upstream stream ends, and the stream
//! always finishes with exactly one terminal chunk: [`VerdictChunk::Complete`]
//! or [`VerdictChunk::Error`].

use futures::stream::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use thiserror::Error;
use url::Url;

use atlas_core::text::replace_control_chars;
use atlas_core::{parse_verdict, VerdictError, VerificationVerdict};

use crate::prompts::{comparator_message, COMPARATOR_SYSTEM_PROMPT};
use crate::providers::{ChatMessage, CompletionConfig, FragmentStream, LlmProvider, ProviderError};

/// Errors from the comparator, delivered inside the verdict stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    #[error("Comparator unavailable: {0}")]
    Upstream(String),

    #[error("Comparator stream interrupted: {0}")]
    Stream(String),

    #[error("Comparator returned an invalid verdict: {0}")]
    Malformed(#[from] VerdictError),
}

/// One item of a verdict stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerdictChunk {
    /// Raw payload text, in arrival order
    Fragment(String),

    /// The parsed verdict; last item of a successful stream
    Complete(VerificationVerdict),

    /// The failure; last item of a failed stream
    Error(VerificationError),
}

impl VerdictChunk {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerdictChunk::Fragment(_))
    }
}

pub type VerdictStream = Pin<Box<dyn Stream<Item = VerdictChunk> + Send>>;

type OpenFuture = Pin<Box<dyn Future<Output = Result<FragmentStream, ProviderError>> + Send>>;

/// Compares an answer against evidence through the comparator model.
///
/// Holds no per-request state; every call starts a fresh conversation.
pub struct VerificationEngine {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
}

impl VerificationEngine {
    pub fn new(provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self {
            provider,
            completion,
        }
    }

    /// Start a verification. Nothing is sent until the stream is first polled.
    pub fn verify(&self, answer: &str, evidence: &str, source: &Url) -> VerdictStream {
        let messages = vec![
            ChatMessage::system(COMPARATOR_SYSTEM_PROMPT),
            ChatMessage::user(comparator_message(answer, evidence, source)),
        ];

        let provider = Arc::clone(&self.provider);
        let completion = self.completion.clone();
        let open: OpenFuture =
            Box::pin(async move { provider.complete_stream(messages, &completion).await });

        Box::pin(VerdictAssembler {
            state: State::Opening(open),
            buffer: String::new(),
            source: source.clone(),
        })
    }
}

enum State {
    Opening(OpenFuture),
    Streaming(FragmentStream),
    Finished,
}

/// Forwards fragments and parses the buffered payload at the end.
struct VerdictAssembler {
    state: State,
    buffer: String,
    source: Url,
}

impl VerdictAssembler {
    fn finish(&mut self) -> VerdictChunk {
        self.state = State::Finished;
        match parse_verdict(&self.buffer, &self.source) {
            Ok(verdict) => {
                tracing::info!(
                    stage = "verify",
                    status = %verdict.status,
                    source = %verdict.source,
                    "Verdict complete"
                );
                VerdictChunk::Complete(verdict)
            }
            Err(e) => {
                tracing::warn!(stage = "verify", error = %e, chars = self.buffer.len(), "Verdict payload rejected");
                VerdictChunk::Error(VerificationError::Malformed(e))
            }
        }
    }

    fn fail(&mut self, error: VerificationError) -> VerdictChunk {
        tracing::warn!(stage = "verify", error = %error, "Comparator failed");
        self.state = State::Finished;
        VerdictChunk::Error(error)
    }
}

impl Stream for VerdictAssembler {
    type Item = VerdictChunk;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                State::Opening(open) => match ready!(open.as_mut().poll(cx)) {
                    Ok(fragments) => this.state = State::Streaming(fragments),
                    Err(e) => {
                        let chunk = this.fail(VerificationError::Upstream(e.to_string()));
                        return Poll::Ready(Some(chunk));
                    }
                },
                State::Streaming(fragments) => match ready!(fragments.poll_next_unpin(cx)) {
                    Some(Ok(fragment)) => {
                        let fragment = replace_control_chars(&fragment);
                        if fragment.is_empty() {
                            continue;
                        }
                        tracing::debug!(chars = fragment.len(), "Verdict fragment");
                        this.buffer.push_str(&fragment);
                        return Poll::Ready(Some(VerdictChunk::Fragment(fragment)));
                    }
                    Some(Err(e)) => {
                        let chunk = this.fail(VerificationError::Stream(e.to_string()));
                        return Poll::Ready(Some(chunk));
                    }
                    None => return Poll::Ready(Some(this.finish())),
                },
                State::Finished => return Poll::Ready(None),
            }
        }
    }
}

/// Drain a verdict stream, returning the concatenated fragments and the outcome.
pub async fn collect_verdict(
    mut stream: VerdictStream,
) -> (String, Result<VerificationVerdict, VerificationError>) {
    let mut payload = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            VerdictChunk::Fragment(text) => payload.push_str(&text),
            VerdictChunk::Complete(verdict) => return (payload, Ok(verdict)),
            VerdictChunk::Error(e) => return (payload, Err(e)),
        }
    }
    (
        payload,
        Err(VerificationError::Stream("stream ended without a verdict".to_string())),
    )
}
