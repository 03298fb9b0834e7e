use clap::{Parser, Subcommand};
use std::path::PathBuf;

use typeproof::leaderboard::Window;
use typeproof::Engine;

/// Maintenance surface for the typing-test integrity engine. The scheduled
/// job runner calls `prune-leaderboard` daily; the rest are operator tools.
#[derive(Parser, Debug)]
#[clap(version, about)]
struct Cli {
    /// Database path (defaults to the platform state directory)
    #[clap(long)]
    db: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drop today/week leaderboard entries that aged out of their window
    PruneLeaderboard,
    /// Recompute one user's stats cache from source rows
    RebuildStats {
        #[clap(long)]
        user: i64,
    },
    /// Re-run achievement reconciliation for one user
    Recheck {
        #[clap(long)]
        user: i64,
    },
    /// Print a ranked leaderboard
    Leaderboard {
        #[clap(long, value_enum, default_value_t = Window::AllTime)]
        window: Window,
        #[clap(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print one user's cached aggregates and check cache consistency
    Stats {
        #[clap(long)]
        user: i64,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> typeproof::Result<()> {
    let mut engine = match &cli.db {
        Some(path) => Engine::open(path)?,
        None => Engine::open_default()?,
    };

    match cli.command {
        Command::PruneLeaderboard => {
            let counts = engine.prune_stale_leaderboard_entries()?;
            println!("pruned {} today / {} week entries", counts.today, counts.week);
        }
        Command::RebuildStats { user } => {
            engine.rebuild_stats(user)?;
            println!("stats cache rebuilt for user {user}");
        }
        Command::Recheck { user } => {
            let (added, removed) = engine.recheck_achievements(user)?;
            println!("added: {added:?}");
            println!("removed: {removed:?}");
        }
        Command::Leaderboard { window, limit } => {
            let entries = engine.get_leaderboard(window, limit)?;
            if entries.is_empty() {
                println!("no eligible results in this window");
            }
            for entry in entries {
                println!(
                    "{:>3}. {:<20} {:>6.1} wpm  ({})",
                    entry.rank,
                    entry.display_name,
                    entry.wpm,
                    entry.achieved_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Stats { user } => {
            let view = engine.get_user_stats(user)?;
            match view.stats {
                Some(stats) => {
                    println!(
                        "tests: {}  best: {:.1} wpm  avg: {:.1} wpm  avg accuracy: {:.1}%",
                        stats.test_count,
                        stats.best_wpm,
                        stats.avg_wpm(),
                        stats.avg_accuracy()
                    );
                    let ok = engine.stats_cache_consistent(user)?;
                    println!("cache consistent: {ok}");
                }
                None => println!("no completed tests"),
            }
        }
    }
    Ok(())
}
