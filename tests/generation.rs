//! Integration tests: generation loop against scripted and demo models.

use slm_oxidized::tokenizer::{BYTE_EOS, BYTE_VOCAB_SIZE};
use slm_oxidized::{
    create_demo_model, generate, ByteVocab, Diagnostic, FinishReason, GenerationObserver,
    GenerationRequest, ProgressFn, ScriptedModel, SelectorKind, SlmError, TokenId, Tokenizer,
    TwoPhase,
};

fn bytes(s: &str) -> Vec<TokenId> {
    s.bytes().map(TokenId::from).collect()
}

fn byte_tok() -> TwoPhase<ByteVocab> {
    TwoPhase::new(ByteVocab)
}

fn scripted(s: &str) -> ScriptedModel {
    ScriptedModel::preferring(BYTE_VOCAB_SIZE, BYTE_EOS, bytes(s))
}

/// Tiny fixed vocabulary; every prompt encodes to token 0.
struct PieceVocab {
    pieces: Vec<&'static str>,
}

impl Tokenizer for PieceVocab {
    fn encode(&self, text: &str, _add: bool, _parse: bool) -> Result<Vec<TokenId>, SlmError> {
        Ok(if text.is_empty() { Vec::new() } else { vec![0] })
    }

    fn decode(&self, token: TokenId) -> Result<Vec<u8>, SlmError> {
        self.pieces
            .get(token as usize)
            .map(|p| p.as_bytes().to_vec())
            .ok_or(SlmError::InvalidToken(token))
    }
}

/// ids: 0 = "a", 1 = "b", 2 = "c", 3 = EOS
fn abc_vocab() -> PieceVocab {
    PieceVocab {
        pieces: vec!["a", "b", "c", ""],
    }
}

#[test]
fn forward_calls_bounded_by_budget() {
    for (seed, prompt) in [(1u64, "Hello"), (2, "{\"k\":"), (3, "x"), (4, "a longer prompt here")] {
        for max in [1usize, 5, 17] {
            let mut model = create_demo_model(seed);
            let req = GenerationRequest::new(prompt).max_new_tokens(max);
            let c = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
            assert!(c.forward_calls >= 1);
            assert!(
                c.forward_calls - 1 <= max,
                "{} calls beyond the prompt for budget {}",
                c.forward_calls - 1,
                max
            );
            assert!(c.tokens.len() <= max);
        }
    }
}

#[test]
fn positions_increase_by_one_without_reuse() {
    let mut model = scripted("hello world");
    let req = GenerationRequest::new("prompt").max_new_tokens(8);
    generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();

    let positions = model.positions();
    let expected: Vec<u32> = (0..positions.len() as u32).collect();
    assert_eq!(positions, expected);

    // Prompt batch flags only its last entry; every later batch has one flagged entry.
    let calls = model.calls();
    let prompt = &calls[0];
    assert_eq!(prompt.len(), 7); // BOS + "prompt"
    assert!(prompt[..6].iter().all(|e| !e.wants_logits));
    assert!(prompt[6].wants_logits);
    for call in &calls[1..] {
        assert_eq!(call.len(), 1);
        assert!(call[0].wants_logits);
        assert_eq!(call[0].sequence_id, 0);
    }
}

#[test]
fn step_batch_carries_previous_sample() {
    let mut model = scripted("abc");
    let req = GenerationRequest::new("p").max_new_tokens(3);
    generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
    let submitted: Vec<TokenId> = model.calls()[1..].iter().map(|c| c[0].token).collect();
    assert_eq!(submitted, bytes("abc"));
}

#[test]
fn out_of_range_temperature_leaves_sampling_unchanged() {
    let run = |temperature: f32| {
        let mut model = create_demo_model(11);
        let req = GenerationRequest::new("Once upon a time")
            .max_new_tokens(24)
            .temperature(temperature)
            .top_p(1.0)
            .seed(Some(1234))
            .selector(SelectorKind::Sample)
            .stop_on_closing_brace(false);
        generate(&mut model, &byte_tok(), &req, &mut ()).unwrap()
    };
    let zero = run(0.0);
    let negative = run(-2.5);
    assert_eq!(zero.tokens, negative.tokens);
    assert!(zero
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::TemperatureDisabled { .. })));
}

#[test]
fn grammar_excludes_tokens_the_model_prefers() {
    // "c" dominates every step; the grammar only accepts "ab".
    let row = vec![1.0, 0.5, 50.0, 0.0];
    let mut model = ScriptedModel::with_rows(4, 3, vec![row]);
    let req = GenerationRequest::new("go")
        .grammar(r#"root ::= "ab""#)
        .max_new_tokens(10);
    let c = generate(&mut model, &abc_vocab(), &req, &mut ()).unwrap();
    assert_eq!(c.text, "ab");
    assert_eq!(c.tokens, vec![0, 1]);
    assert_eq!(c.finish, FinishReason::EndOfSequence);
}

#[test]
fn grammar_masks_unfinishable_utf8_lead_bytes() {
    // Step 2 prefers 0xC3, which only starts non-ASCII code points.
    let mut model = ScriptedModel::preferring(
        BYTE_VOCAB_SIZE,
        BYTE_EOS,
        vec![TokenId::from(b'a'), 0xC3, 0xA9],
    );
    let req = GenerationRequest::new("p")
        .grammar(r#"root ::= "ab""#)
        .max_new_tokens(8);
    let c = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
    assert_eq!(c.tokens, bytes("ab"));
    assert_eq!(c.text, "ab");
    assert_eq!(c.finish, FinishReason::EndOfSequence);
}

#[test]
fn grammar_admits_split_code_point_it_can_finish() {
    let mut model = scripted("é");
    let req = GenerationRequest::new("p").grammar(r#"root ::= "é""#);
    let c = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
    assert_eq!(c.tokens, vec![0xC3, 0xA9]);
    assert_eq!(c.text, "é");
    assert_eq!(c.finish, FinishReason::EndOfSequence);
}

#[test]
fn grammar_under_stochastic_sampling() {
    for seed in 0..8u64 {
        let row = vec![0.0, 0.0, 8.0, 0.0];
        let mut model = ScriptedModel::with_rows(4, 3, vec![row]);
        let req = GenerationRequest::new("go")
            .grammar(r#"root ::= ("a" | "b")+ "#)
            .max_new_tokens(6)
            .temperature(1.0)
            .seed(Some(seed));
        let c = generate(&mut model, &abc_vocab(), &req, &mut ()).unwrap();
        assert!(!c.text.contains('c'), "seed {} produced {:?}", seed, c.text);
        assert!(!c.text.is_empty());
    }
}

#[test]
fn grammar_compile_failure_degrades_to_unconstrained() {
    let mut model = scripted("hi");
    let req = GenerationRequest::new("p").grammar("root ::= (\"a\"");
    let c = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
    assert_eq!(c.text, "hi");
    assert_eq!(c.finish, FinishReason::EndOfSequence);
    assert!(c
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::GrammarCompileFailed(_))));
}

#[test]
fn grammar_exhaustion_aborts_visibly() {
    // top-p keeps only "c"; the grammar rejects it.
    let row = vec![0.0, 0.0, 50.0, 0.0];
    let mut model = ScriptedModel::with_rows(4, 3, vec![row]);
    let req = GenerationRequest::new("go")
        .grammar(r#"root ::= "ab""#)
        .top_p(0.5);
    let c = generate(&mut model, &abc_vocab(), &req, &mut ()).unwrap();
    assert_eq!(c.finish, FinishReason::GrammarExhausted);
    assert!(c.finish.is_aborted());
    assert_eq!(c.text, "");
    assert!(c
        .diagnostics
        .contains(&Diagnostic::GrammarExhausted { step: 1 }));
}

#[test]
fn closing_brace_stops_and_keeps_its_text() {
    let mut model = scripted("{x}yz");
    let req = GenerationRequest::new("p").max_new_tokens(10);
    let c = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
    assert_eq!(c.text, "{x}");
    assert_eq!(c.finish, FinishReason::BraceClosed);
    // Prompt + the steps after "{" and "x"; no call after the closing step.
    assert_eq!(c.forward_calls, 3);
}

#[test]
fn brace_in_one_fragment_stops() {
    let vocab = PieceVocab {
        pieces: vec!["{x}", "y", ""],
    };
    let mut model = ScriptedModel::preferring(3, 2, vec![0, 1, 1]);
    let req = GenerationRequest::new("p").max_new_tokens(5);
    let c = generate(&mut model, &vocab, &req, &mut ()).unwrap();
    assert_eq!(c.text, "{x}");
    assert_eq!(c.finish, FinishReason::BraceClosed);
}

#[test]
fn unclosed_brace_runs_to_budget() {
    let mut model = scripted("{xxxxxxxxxx");
    let req = GenerationRequest::new("p").max_new_tokens(6);
    let c = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
    assert_eq!(c.text, "{xxxxx");
    assert_eq!(c.finish, FinishReason::MaxTokens);
    assert_eq!(c.forward_calls, 7);
}

#[test]
fn brace_stop_can_be_disabled() {
    let mut model = scripted("{x}yz");
    let req = GenerationRequest::new("p").stop_on_closing_brace(false);
    let c = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
    assert_eq!(c.text, "{x}yz");
    assert_eq!(c.finish, FinishReason::EndOfSequence);
}

#[test]
fn eos_first_gives_empty_output_and_one_call() {
    let mut model = ScriptedModel::preferring(BYTE_VOCAB_SIZE, BYTE_EOS, vec![BYTE_EOS]);
    let req = GenerationRequest::new("hello");
    let c = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
    assert_eq!(c.text, "");
    assert!(c.tokens.is_empty());
    assert_eq!(c.finish, FinishReason::EndOfSequence);
    assert_eq!(model.forward_calls(), 1);
}

#[test]
fn forward_failure_keeps_earlier_fragments() {
    let script = "abcde";
    for k in 1..=4usize {
        // The call issued after step k-1 produces the logits for step k.
        let mut model = scripted(script).failing_on_call(k - 1);
        let req = GenerationRequest::new("p").max_new_tokens(10);
        let c = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
        assert_eq!(c.text, &script[..k - 1], "failure before step {}", k);
        if k == 1 {
            assert_eq!(c.finish, FinishReason::PromptFailed);
            assert!(c.finish.is_aborted());
        } else {
            assert_eq!(c.finish, FinishReason::ForwardFailed);
            assert!(!c.finish.is_aborted());
        }
        assert!(c
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::ForwardFailed { .. })));
    }
}

#[test]
fn empty_logits_count_as_failed_forward_call() {
    let mut model = ScriptedModel::with_rows(4, 3, vec![vec![0.0, 5.0, 0.0, 0.0], Vec::new()]);
    let c = generate(&mut model, &abc_vocab(), &GenerationRequest::new("go"), &mut ()).unwrap();
    assert_eq!(c.text, "b");
    assert_eq!(c.finish, FinishReason::ForwardFailed);
    assert!(c
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::ForwardFailed { step: 1, .. })));

    let mut model = ScriptedModel::with_rows(4, 3, vec![Vec::new()]);
    let c = generate(&mut model, &abc_vocab(), &GenerationRequest::new("go"), &mut ()).unwrap();
    assert_eq!(c.text, "");
    assert!(c.tokens.is_empty());
    assert_eq!(c.finish, FinishReason::PromptFailed);
}

#[test]
fn empty_prompt_ends_without_forward_call() {
    let mut model = scripted("abc");
    let req = GenerationRequest::new("").add_special(false);
    let c = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
    assert_eq!(c.finish, FinishReason::EmptyPrompt);
    assert_eq!(c.text, "");
    assert_eq!(model.forward_calls(), 0);
    assert_eq!(c.diagnostics, vec![Diagnostic::EmptyPrompt]);
}

#[test]
fn tokenizer_failure_is_prompt_failure() {
    struct Broken;
    impl Tokenizer for Broken {
        fn encode(&self, _: &str, _: bool, _: bool) -> Result<Vec<TokenId>, SlmError> {
            Err(SlmError::Tokenizer("no vocabulary".into()))
        }
        fn decode(&self, token: TokenId) -> Result<Vec<u8>, SlmError> {
            Err(SlmError::InvalidToken(token))
        }
    }
    let mut model = scripted("abc");
    let c = generate(&mut model, &Broken, &GenerationRequest::new("p"), &mut ()).unwrap();
    assert_eq!(c.finish, FinishReason::PromptFailed);
    assert_eq!(model.forward_calls(), 0);
}

#[test]
fn decode_failure_appends_nothing() {
    // Token 5 has no piece.
    let mut model = ScriptedModel::preferring(6, 3, vec![0, 5, 1]);
    let req = GenerationRequest::new("p");
    let c = generate(&mut model, &abc_vocab(), &req, &mut ()).unwrap();
    assert_eq!(c.text, "ab");
    assert_eq!(c.tokens, vec![0, 5, 1]);
    assert!(c
        .diagnostics
        .iter()
        .any(|d| matches!(d, Diagnostic::DecodeFailed { token: 5, .. })));
}

#[test]
fn progress_every_eight_tokens() {
    let mut model = scripted(&"a".repeat(30));
    let req = GenerationRequest::new("p").max_new_tokens(20);
    let mut seen = Vec::new();
    let c = generate(
        &mut model,
        &byte_tok(),
        &req,
        &mut ProgressFn(|done: usize, max: usize| seen.push((done, max))),
    )
    .unwrap();
    assert_eq!(c.finish, FinishReason::MaxTokens);
    assert_eq!(seen, vec![(8, 20), (16, 20)]);
}

#[test]
fn observer_can_cancel() {
    struct StopAfter {
        tokens: usize,
        limit: usize,
    }
    impl GenerationObserver for StopAfter {
        fn on_token(&mut self, _: TokenId, _: &[u8]) {
            self.tokens += 1;
        }
        fn should_cancel(&mut self) -> bool {
            self.tokens >= self.limit
        }
    }
    let mut model = scripted("abcdef");
    let mut obs = StopAfter { tokens: 0, limit: 2 };
    let c = generate(&mut model, &byte_tok(), &GenerationRequest::new("p"), &mut obs).unwrap();
    assert_eq!(c.text, "ab");
    assert_eq!(c.finish, FinishReason::Cancelled);
    assert!(c.diagnostics.contains(&Diagnostic::Cancelled { step: 3 }));
}

#[test]
fn split_utf8_pieces_join_in_output() {
    let mut model = scripted("é中");
    let c = generate(&mut model, &byte_tok(), &GenerationRequest::new("p"), &mut ()).unwrap();
    assert_eq!(c.text, "é中");
}

#[test]
fn every_request_starts_from_a_fresh_cache() {
    let mut model = create_demo_model(3);
    let req = GenerationRequest::new("same prompt").max_new_tokens(12);
    let a = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
    let b = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap();
    assert_eq!(a.tokens, b.tokens);

    let mut scripted = scripted("ab");
    generate(&mut scripted, &byte_tok(), &req, &mut ()).unwrap();
    generate(&mut scripted, &byte_tok(), &req, &mut ()).unwrap();
    assert_eq!(scripted.resets(), 2);
}

#[test]
fn invalid_request_is_an_error() {
    let mut model = scripted("a");
    let req = GenerationRequest::new("p").max_new_tokens(0);
    let err = generate(&mut model, &byte_tok(), &req, &mut ()).unwrap_err();
    assert!(matches!(err, SlmError::InvalidConfig(_)));
}
