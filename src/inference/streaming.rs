//! Streaming text generation via async channels.
//!
//! The generation loop is synchronous, so it runs on tokio's blocking pool
//! and forwards events over an unbounded channel as they happen.

use super::generator::TextGenerator;
use super::observer::GenerationEvent;
use crate::config::GenerationRequest;
use crate::model::SequenceModel;
use crate::tokenizer::Tokenizer;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Start a completion in the background.
///
/// The receiver yields `Token`, `Progress` and `Diagnostic` events, then
/// exactly one `Done` or `Failed`. Dropping the receiver cancels the request
/// before its next step. The join handle gives the generator back.
///
/// Must be called from within a tokio runtime.
pub fn stream_completion<M, T>(
    generator: TextGenerator<M, T>,
    request: GenerationRequest,
) -> (
    mpsc::UnboundedReceiver<GenerationEvent>,
    JoinHandle<TextGenerator<M, T>>,
)
where
    M: SequenceModel + Send + 'static,
    T: Tokenizer + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::task::spawn_blocking(move || {
        let mut generator = generator;
        let mut events = tx;
        match generator.complete(&request, &mut events) {
            Ok(completion) => {
                debug!(finish = ?completion.finish, "Stream finished");
                let _ = events.send(GenerationEvent::Done(completion));
            }
            Err(e) => {
                let _ = events.send(GenerationEvent::Failed(e.to_string()));
            }
        }
        generator
    });
    (rx, handle)
}
