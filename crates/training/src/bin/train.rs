use clap::Parser;
use training::util::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_tracing();
    let args = TrainArgs::parse();
    let summary = run_train(args)?;
    println!(
        "Trained {} epochs; best loss {:.4}; best checkpoint {}",
        summary.epochs_run,
        summary.best_loss,
        summary.best_checkpoint.display()
    );
    if let Some(stats) = summary.test_stats {
        println!("{stats}");
    }
    Ok(())
}
