//! Streaming generation: tokens arrive over a channel while the loop runs on
//! tokio's blocking pool.

use anyhow::Result;
use slm_oxidized::{
    create_demo_model, stream_completion, ByteVocab, GenerationEvent, GenerationRequest,
    TextGenerator, TwoPhase,
};
use std::io::Write;

#[tokio::main]
async fn main() -> Result<()> {
    let generator = TextGenerator::new(create_demo_model(9), TwoPhase::new(ByteVocab));
    let request = GenerationRequest::new("Streaming: ")
        .max_new_tokens(40)
        .stop_on_closing_brace(false);

    let (mut rx, handle) = stream_completion(generator, request);
    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        match event {
            GenerationEvent::Token { piece, .. } => {
                stdout.write_all(&piece)?;
                stdout.flush()?;
            }
            GenerationEvent::Progress { done, max } => eprintln!("[{}/{}]", done, max),
            GenerationEvent::Diagnostic(d) => eprintln!("note: {}", d),
            GenerationEvent::Done(c) => {
                println!();
                println!("finished: {:?} after {:?}", c.finish, c.elapsed);
            }
            GenerationEvent::Failed(e) => eprintln!("failed: {}", e),
        }
    }
    handle.await?;
    Ok(())
}
