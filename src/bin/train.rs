//! Train a Character-Level Bigram Model
//!
//! Loads a text corpus (downloading it on first run), builds the character
//! vocabulary, trains the bigram table with AdamW, and samples text from it.
//!
//! ## Usage
//!
//! ```bash
//! # Default run: 3000 iterations, batch 32, block 8, lr 1e-3
//! cargo run --release --bin train
//!
//! # Use a local corpus, never touch the network
//! cargo run --release --bin train -- --data shakespeare.txt --no-download
//!
//! # Short run with a CSV log and a checkpoint
//! cargo run --release --bin train -- --max-iters 500 --log bigram.csv --save bigram.ckpt
//!
//! # Sample from that checkpoint without further training
//! cargo run --release --bin train -- --resume bigram.ckpt --max-iters 0
//! ```

use clap::Parser;
use rand::{rngs::StdRng, SeedableRng};
use touchstone::{
    load_corpus, train, AdamWOptimizer, BigramLanguageModel, CharTokenizer, Checkpoint, Dataset,
    TrainingConfig, TrainingLogger,
};

const DEFAULT_URL: &str =
    "https://raw.githubusercontent.com/babayaga24/nanoGPT/master/merged_text1.txt";

#[derive(Parser)]
#[command(name = "train", about = "Train a character-level bigram language model")]
struct Args {
    /// Path to the training text file
    #[arg(long, default_value = "merged_text1.txt")]
    data: String,

    /// Where to fetch the corpus from when the file is missing
    #[arg(long, default_value = DEFAULT_URL)]
    url: String,

    /// Fail instead of downloading a missing corpus
    #[arg(long)]
    no_download: bool,

    /// Number of optimizer steps
    #[arg(long, default_value = "3000")]
    max_iters: usize,

    /// Estimate losses every N steps
    #[arg(long, default_value = "300")]
    eval_interval: usize,

    /// Batches averaged per split when estimating loss
    #[arg(long, default_value = "200")]
    eval_iters: usize,

    /// Sequences per batch
    #[arg(long, default_value = "32")]
    batch_size: usize,

    /// Context window length
    #[arg(long, default_value = "8")]
    block_size: usize,

    /// AdamW learning rate
    #[arg(long, default_value = "0.001")]
    lr: f32,

    /// RNG seed for initialization, batching, and sampling
    #[arg(long, default_value = "1337")]
    seed: u64,

    /// Characters to generate after training
    #[arg(long, default_value = "400")]
    max_new_tokens: usize,

    /// Write a CSV training log to this path
    #[arg(long)]
    log: Option<String>,

    /// Save a checkpoint to this path after training
    #[arg(long)]
    save: Option<String>,

    /// Continue from a saved checkpoint (model, tokenizer, optimizer state).
    /// With `--max-iters 0` this only samples from it.
    #[arg(long)]
    resume: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = TrainingConfig {
        batch_size: args.batch_size,
        block_size: args.block_size,
        max_iters: args.max_iters,
        eval_interval: args.eval_interval,
        learning_rate: args.lr,
        eval_iters: args.eval_iters,
        seed: args.seed,
        max_new_tokens: args.max_new_tokens,
        ..TrainingConfig::default()
    };
    config.validate()?;

    // ========================================================================
    // 1. Load Training Data
    // ========================================================================
    println!("{}", "=".repeat(70));
    println!("1. Loading Training Data");
    println!("{}", "=".repeat(70));
    println!();

    let url = (!args.no_download).then_some(args.url.as_str());
    let text = load_corpus(&args.data, url)
        .map_err(|e| format!("could not load {}: {}", args.data, e))?;

    println!("Length of dataset in characters:  {}", text.chars().count());
    println!();
    let preview: String = text.chars().take(1000).collect();
    println!("{}", preview);

    // ========================================================================
    // 2. Vocabulary
    // ========================================================================
    println!("\n{}", "=".repeat(70));
    println!("2. Vocabulary");
    println!("{}", "=".repeat(70));
    println!();

    let checkpoint = args.resume.as_deref().map(Checkpoint::load).transpose()?;
    let tokenizer = match &checkpoint {
        Some(checkpoint) => checkpoint.tokenizer.clone(),
        None => CharTokenizer::from_text(&text),
    };
    println!("{}", tokenizer.chars());
    println!("{}", tokenizer.vocab_size());

    let dataset = Dataset::new(tokenizer.encode(&text)?, config.train_fraction);
    println!(
        "Train: {} tokens, Val: {} tokens",
        dataset.train().len(),
        dataset.val().len()
    );

    // ========================================================================
    // 3. Training
    // ========================================================================
    println!("\n{}", "=".repeat(70));
    println!("3. Training");
    println!("{}", "=".repeat(70));
    println!();

    let mut rng = StdRng::seed_from_u64(config.seed);
    let (mut model, mut optimizer, start_step) = match checkpoint {
        Some(checkpoint) => {
            let optimizer = checkpoint
                .optimizer
                .unwrap_or_else(|| AdamWOptimizer::new(&checkpoint.model));
            println!("  Resuming from step {}", checkpoint.step);
            (checkpoint.model, optimizer, checkpoint.step)
        }
        None => {
            let model = BigramLanguageModel::new(tokenizer.vocab_size(), &mut rng);
            let optimizer = AdamWOptimizer::new(&model);
            (model, optimizer, 0)
        }
    };

    println!("  Parameters: {}", model.parameter_count());
    println!("  Steps: {}", config.max_iters);
    println!("  Learning rate: {}", config.learning_rate);
    println!("  Batch size: {}", config.batch_size);
    println!("  Block size: {}", config.block_size);
    println!();

    let mut logger = args.log.as_deref().map(TrainingLogger::new).transpose()?;
    let report = train(
        &mut model,
        &mut optimizer,
        &dataset,
        &config,
        &mut rng,
        logger.as_mut(),
    )?;
    if let Some(loss) = report.final_loss {
        println!("Final batch loss: {:.4}", loss);
    }

    if let Some(path) = &args.save {
        let checkpoint = Checkpoint {
            model: model.clone(),
            optimizer: Some(optimizer),
            tokenizer: tokenizer.clone(),
            step: start_step + config.max_iters,
            val_loss: report.evaluations.last().map(|e| e.val_loss),
        };
        checkpoint.save(path)?;
    }

    // ========================================================================
    // 4. Sample Generation
    // ========================================================================
    println!("\n{}", "=".repeat(70));
    println!("4. Sample Generation");
    println!("{}", "=".repeat(70));
    println!();

    let context = vec![vec![0]];
    let generated = model.generate(&context, config.max_new_tokens, &mut rng)?;
    println!("{}", tokenizer.decode(&generated[0])?);

    Ok(())
}
