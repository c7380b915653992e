//! Grammar-constrained generation: the demo model's output is forced into a
//! small JSON object shape.

use anyhow::Result;
use slm_oxidized::{create_demo_model, ByteVocab, GenerationRequest, Grammar, TextGenerator, TwoPhase};

const GRAMMAR: &str = r#"
# {"key": 123, "other": 4}
root  ::= "{" ws pair ("," ws pair){0,2} ws "}"
pair  ::= "\"" [a-z]{1,8} "\"" ":" ws [1-9] [0-9]{0,3}
ws    ::= " "?
"#;

fn main() -> Result<()> {
    let grammar = Grammar::parse(GRAMMAR)?;
    println!("Compiled grammar:\n{}", grammar);

    let mut generator = TextGenerator::new(create_demo_model(3), TwoPhase::new(ByteVocab));
    for seed in [1u64, 2, 3] {
        let request = GenerationRequest::new("Answer in JSON: ")
            .grammar(GRAMMAR)
            .max_new_tokens(64)
            .temperature(0.7)
            .seed(Some(seed));
        let completion = generator.complete(&request, &mut ())?;
        println!("seed {}: {} ({:?})", seed, completion.text, completion.finish);
    }
    Ok(())
}
