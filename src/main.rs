//! CLI for slm-oxidized: complete, grammar, tokenize.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use slm_oxidized::model::ModelConfig;
use slm_oxidized::{
    ByteVocab, DemoModel, GenerationConfig, Grammar, HfTokenizer, ProgressFn, TextGenerator,
    Tokenizer, TwoPhase,
};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "slm-oxidized")]
#[command(about = "Grammar-constrained text generation in Rust")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a completion with the demo model
    Complete {
        #[arg(long)]
        prompt: String,
        /// GBNF grammar file constraining the output
        #[arg(long)]
        grammar: Option<PathBuf>,
        #[arg(long)]
        max_tokens: Option<usize>,
        #[arg(short, long)]
        temperature: Option<f32>,
        #[arg(long)]
        top_p: Option<f32>,
        #[arg(long)]
        seed: Option<u64>,
        /// HuggingFace tokenizer.json; the byte-level vocabulary is used otherwise
        #[arg(long)]
        tokenizer: Option<PathBuf>,
        /// JSON generation config; SLM_* environment variables override it
        #[arg(long)]
        config: Option<PathBuf>,
        /// Seed for the demo model's logits
        #[arg(long, default_value = "42")]
        model_seed: u64,
        /// Keep generating past the first closing brace
        #[arg(long)]
        no_brace_stop: bool,
    },

    /// Compile a grammar file and print its normalized rules
    Grammar {
        #[arg(long)]
        file: PathBuf,
    },

    /// Show token ids and pieces for a text
    Tokenize {
        #[arg(long)]
        text: String,
        #[arg(long)]
        tokenizer: Option<PathBuf>,
        #[arg(long)]
        no_special: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Complete {
            prompt,
            grammar,
            max_tokens,
            temperature,
            top_p,
            seed,
            tokenizer,
            config,
            model_seed,
            no_brace_stop,
        } => {
            let mut cfg = match config {
                Some(path) => GenerationConfig::from_json_file(&path)
                    .with_context(|| format!("reading config {:?}", path))?,
                None => GenerationConfig::default(),
            };
            cfg.apply_env()?;
            if let Some(path) = grammar {
                cfg.grammar_file = Some(path);
            }
            if let Some(n) = max_tokens {
                cfg.max_new_tokens = n;
            }
            if let Some(t) = temperature {
                cfg.temperature = t;
            }
            if let Some(p) = top_p {
                cfg.top_p = p;
            }
            if seed.is_some() {
                cfg.seed = seed;
            }
            if no_brace_stop {
                cfg.stop_on_closing_brace = false;
            }
            run_complete(&cfg, &prompt, tokenizer.as_deref(), model_seed)?
        }
        Commands::Grammar { file } => run_grammar(&file)?,
        Commands::Tokenize {
            text,
            tokenizer,
            no_special,
        } => run_tokenize(&text, tokenizer.as_deref(), !no_special)?,
    }
    Ok(())
}

fn load_tokenizer(path: Option<&Path>) -> Result<(Box<dyn Tokenizer + Send>, ModelConfig)> {
    match path {
        Some(path) => {
            let tok = HfTokenizer::from_file(path)?;
            let config = ModelConfig {
                vocab_size: tok.vocab_size(),
                eos_token: tok
                    .require_eos()
                    .with_context(|| format!("loading {:?}", path))?,
                ..ModelConfig::default()
            };
            info!(
                "Loaded tokenizer from {:?} (vocab {})",
                path, config.vocab_size
            );
            Ok((Box::new(tok), config))
        }
        None => Ok((Box::new(TwoPhase::new(ByteVocab)), ModelConfig::default())),
    }
}

fn run_complete(
    cfg: &GenerationConfig,
    prompt: &str,
    tokenizer_path: Option<&Path>,
    model_seed: u64,
) -> Result<()> {
    let (tokenizer, model_config) = load_tokenizer(tokenizer_path)?;
    let model = DemoModel::new(ModelConfig {
        seed: model_seed,
        ..model_config
    });
    let request = cfg.request(prompt)?;
    let mut generator = TextGenerator::new(model, tokenizer);

    let mut progress =
        ProgressFn(|done: usize, max: usize| info!("Generated {}/{} tokens", done, max));
    let completion = generator.complete(&request, &mut progress)?;
    for d in &completion.diagnostics {
        info!("{}", d);
    }
    info!(
        "Finished ({:?}): {} tokens, {} forward calls, {:?}",
        completion.finish,
        completion.tokens.len(),
        completion.forward_calls,
        completion.elapsed
    );
    println!("{}", completion.text);
    Ok(())
}

fn run_grammar(path: &Path) -> Result<()> {
    let src = std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    let grammar = Grammar::parse(&src)?;
    info!("Compiled {} rules", grammar.rules().len());
    print!("{}", grammar);
    Ok(())
}

fn run_tokenize(text: &str, tokenizer_path: Option<&Path>, add_special: bool) -> Result<()> {
    let (tokenizer, _) = load_tokenizer(tokenizer_path)?;
    let ids = tokenizer.encode(text, add_special, false)?;
    info!("{} tokens", ids.len());
    for id in ids {
        let piece = tokenizer.decode(id)?;
        println!("{:>8}  {:?}", id, String::from_utf8_lossy(&piece));
    }
    Ok(())
}
