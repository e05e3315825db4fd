use std::env;

use ndarray::Array2;
use ndarray_rand::RandomExt;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::Normal;
use tinygpt::utils::{column, dot, row, sub};
use tinygpt::{AttentionBlock, Initializer, ModelInfo, TinyGptError};

const SEED: u64 = 42;

/// Loads the configuration named on the command line, or the defaults.
fn load_info(path: Option<&str>) -> Result<ModelInfo, TinyGptError> {
    match path {
        Some(path) => Ok(ModelInfo::from_path(path)?),
        None => Ok(ModelInfo::default()),
    }
}

fn print_info(info: &ModelInfo) {
    println!("embedding_dim: {}", info.embedding_dim());
    println!("key_query_dim: {}", info.key_query_dim());
    println!("context_size:  {}", info.context_size());
    println!("head_count:    {}", info.head_count());
    println!("temperature:   {}", info.temperature());
    println!(
        "parameters:    {}",
        info.head_count() * info.head_parameter_count()
    );
}

/// Runs one block over random embeddings and reports what each head attended to.
fn run_forward(info: ModelInfo, seq_len: usize) -> Result<(), TinyGptError> {
    let mut rng = StdRng::seed_from_u64(SEED);
    let block = AttentionBlock::with_rng(info, Initializer::Xavier, &mut rng)?;

    let normal = Normal::new(0.0f32, 1.0).map_err(|e| TinyGptError::Usage(e.to_string()))?;
    let input = Array2::random_using((seq_len, info.embedding_dim()), normal, &mut rng);

    let mut arena = block.snapshot_arena();
    let delta = block.forward_recorded(input.view(), &mut arena)?;

    println!("input shape: {:?}", input.dim());
    println!("delta shape: {:?}", delta.dim());
    let last = row(delta.view(), seq_len - 1)?;
    println!("last token delta norm: {:.4}", dot(last, last)?.sqrt());

    let mut residual = input.clone();
    block.apply(&mut residual)?;
    let moved = sub(residual.view(), input.view())?;
    let drift = moved
        .iter()
        .zip(delta.iter())
        .fold(0.0f32, |acc, (m, d)| acc.max((m - d).abs()));
    println!("residual update max drift from delta: {:.2e}", drift);

    for (id, snapshot) in arena.iter().enumerate() {
        let attention = snapshot.attention();
        let last = row(attention, attention.nrows() - 1)?;
        let weights: Vec<String> = last.iter().map(|w| format!("{:.3}", w)).collect();
        println!("head {} last-token attention: [{}]", id, weights.join(", "));

        let first = column(attention, 0)?;
        println!(
            "head {} mean attention on first token: {:.3}",
            id,
            first.sum() / first.len() as f32
        );
    }
    Ok(())
}

fn usage() {
    println!("Usage: cargo run -- [info|forward] [args]");
    println!("Example commands:");
    println!("  cargo run -- info config.toml");
    println!("  cargo run -- forward 8");
    println!("  cargo run -- forward 8 config.json");
}

fn main() -> Result<(), TinyGptError> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(|s| s.as_str()) {
        Some("info") => {
            let info = load_info(args.get(2).map(|s| s.as_str()))?;
            print_info(&info);
        }
        Some("forward") => {
            let seq_len = match args.get(2) {
                Some(arg) => arg
                    .parse()
                    .map_err(|_| TinyGptError::Usage(format!("invalid sequence length '{}'", arg)))?,
                None => 8,
            };
            let info = load_info(args.get(3).map(|s| s.as_str()))?;
            run_forward(info, seq_len)?;
        }
        _ => usage(),
    }
    Ok(())
}
