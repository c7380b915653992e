//! Basic completion with the demo model and the byte-level tokenizer.
//!
//! Demonstrates:
//! - Building a request from `GenerationConfig`
//! - Greedy vs seeded sampling
//! - Reading the finish reason and diagnostics

use anyhow::Result;
use slm_oxidized::{
    create_demo_model, ByteVocab, GenerationConfig, ProgressFn, TextGenerator, TwoPhase,
};

fn main() -> Result<()> {
    let mut generator = TextGenerator::new(create_demo_model(42), TwoPhase::new(ByteVocab));

    let config = GenerationConfig {
        max_new_tokens: 24,
        stop_on_closing_brace: false,
        ..GenerationConfig::default()
    };
    let greedy = config.request("Once upon a time")?;
    let completion = generator.complete(&greedy, &mut ())?;
    println!("Greedy ({:?}): {:?}", completion.finish, completion.text);

    let sampled = greedy.clone().temperature(0.9).top_p(0.95).seed(Some(7));
    let mut progress =
        ProgressFn(|done: usize, max: usize| println!("  progress {}/{}", done, max));
    let completion = generator.complete(&sampled, &mut progress)?;
    println!("Sampled ({:?}): {:?}", completion.finish, completion.text);
    for d in &completion.diagnostics {
        println!("  note: {}", d);
    }
    println!(
        "{} tokens, {} forward calls in {:?}",
        completion.tokens.len(),
        completion.forward_calls,
        completion.elapsed
    );
    Ok(())
}
