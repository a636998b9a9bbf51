//! tallow CLI - text generation with cutoff truncation sampling.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use tallow::{config::ModelConfig, generate, loader, GenerationConfig};

#[derive(Parser)]
#[command(name = "tallow")]
#[command(author, version, about = "Text generation with cutoff truncation sampling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate text from a prompt
    Generate {
        /// Model path or HuggingFace repo id
        #[arg(short, long)]
        model: String,

        /// Input prompt
        #[arg(short, long)]
        prompt: String,

        /// Relative-drop threshold widening the sampled candidate set
        #[arg(long)]
        cutoff: f32,

        /// Maximum new tokens to generate
        #[arg(long, default_value = "100")]
        max_tokens: usize,

        /// Random seed for reproducible sampling
        #[arg(long)]
        seed: Option<u64>,

        /// Print the full text at the end instead of streaming tokens
        #[arg(long)]
        quiet: bool,

        /// HuggingFace token for private repos
        #[arg(long, env = "HF_TOKEN")]
        hf_token: Option<String>,
    },

    /// Show information about a local model
    Info {
        /// Model path
        #[arg(short, long)]
        model: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tallow=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate {
            model,
            prompt,
            cutoff,
            max_tokens,
            seed,
            quiet,
            hf_token,
        } => {
            run_generate(
                &model,
                &prompt,
                cutoff,
                max_tokens,
                seed,
                !quiet,
                hf_token.as_deref(),
            )
            .await?;
        }

        Commands::Info { model } => {
            show_info(&model)?;
        }
    }

    Ok(())
}

async fn run_generate(
    model_id: &str,
    prompt: &str,
    cutoff: f32,
    max_tokens: usize,
    seed: Option<u64>,
    verbose: bool,
    hf_token: Option<&str>,
) -> anyhow::Result<()> {
    println!("Loading model: {model_id}");
    let (model, tokenizer) = loader::load(model_id, hf_token).await?;

    let mut config = GenerationConfig::new(cutoff)
        .with_max_tokens(max_tokens)
        .with_verbose(verbose);
    config.seed = seed;

    let text = generate(&model, &tokenizer, prompt, &config)?;
    if !verbose {
        println!("{text}");
    }

    Ok(())
}

fn show_info(model_path: &PathBuf) -> anyhow::Result<()> {
    let config = ModelConfig::from_file(model_path.join("config.json"))?;

    println!("Model Information");
    println!("=================");
    println!("Architecture: {:?}", config.architecture());
    println!("Vocab size: {}", config.vocab_size);
    println!("Hidden size: {}", config.hidden_size);
    println!("Intermediate size: {}", config.intermediate_size);
    println!("Num layers: {}", config.num_hidden_layers);
    println!("Num attention heads: {}", config.num_attention_heads);
    println!("Num KV heads: {}", config.num_kv_heads());
    println!("Head dim: {}", config.head_dim());
    println!("Max position embeddings: {}", config.max_position_embeddings);
    println!("RoPE theta: {}", config.rope_theta);
    println!("EOS token id: {}", config.eos_token_id);

    match config.quantization {
        Some(quant) => println!(
            "Quantization: {}-bit, group size {}",
            quant.bits, quant.group_size
        ),
        None => println!("Quantization: none"),
    }

    Ok(())
}
