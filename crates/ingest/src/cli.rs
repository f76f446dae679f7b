use anyhow::Result;
use common::keys;
use common::store::Store;
use common::time::Clock;
use common::types::{LeaderboardKind, WalletProfile};

use crate::cleanup::Sweeper;
use crate::scoring::recompute_reputation;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run,
    Sweep,
    Reputation { wallet: String },
    Wallet { wallet: String },
}

pub fn parse_args<I>(mut args: I) -> std::result::Result<Command, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let Some(cmd) = args.next() else {
        return Ok(Command::Run);
    };

    let wallet_arg = |args: &mut I, usage: &str| {
        args.next()
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .ok_or_else(|| format!("usage: ingest {usage} <wallet>"))
    };

    match cmd.as_str() {
        "run" => Ok(Command::Run),
        "sweep" => Ok(Command::Sweep),
        "reputation" => Ok(Command::Reputation {
            wallet: wallet_arg(&mut args, "reputation")?,
        }),
        "wallet" => Ok(Command::Wallet {
            wallet: wallet_arg(&mut args, "wallet")?,
        }),
        other => Err(format!("unknown command: {other}")),
    }
}

pub async fn run_command<S: Store>(
    store: &S,
    sweeper: &Sweeper<S>,
    clock: &dyn Clock,
    cmd: Command,
) -> Result<()> {
    match cmd {
        Command::Run => Ok(()),
        Command::Sweep => {
            let report = sweeper.sweep(clock.now()).await?;
            println!(
                "Swept: daily={} weekly={} expired={}",
                report.daily_deleted, report.weekly_deleted, report.expired_purged
            );
            Ok(())
        }
        Command::Reputation { wallet } => {
            let score = recompute_reputation(store, &wallet).await?;
            println!("{wallet}  reputation={score:.2}");
            Ok(())
        }
        Command::Wallet { wallet } => show_wallet(store, &wallet).await,
    }
}

async fn show_wallet<S: Store>(store: &S, wallet: &str) -> Result<()> {
    println!("Wallet: {wallet}");

    let fields = store.hash_get_all(&keys::wallet_profile(wallet)).await?;
    if fields.is_empty() {
        println!("  (no activity recorded)");
        return Ok(());
    }
    let profile = WalletProfile::from_fields(&fields);
    println!(
        "  mints={}  attempts={}  failures={}  volume={:.4}  gas={:.4}",
        profile.total_mints,
        profile.total_attempts,
        profile.total_failures,
        profile.total_volume,
        profile.total_gas
    );
    println!(
        "  points={}  streak={}  longest={}  last_active_date={}",
        profile.total_points,
        profile.streak,
        profile.longest_streak,
        profile.last_active_date.as_deref().unwrap_or("-")
    );

    for kind in LeaderboardKind::ALL {
        let rank = store
            .zset_rev_rank(&keys::leaderboard(kind), wallet)
            .await?;
        match rank {
            Some(r) => println!("  rank[{}]=#{}", kind.as_str(), r + 1),
            None => println!("  rank[{}]=-", kind.as_str()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::store_at;
    use common::config::Retention;
    use common::store::Batch;
    use std::sync::Arc;

    fn args(v: &[&str]) -> impl Iterator<Item = String> {
        v.iter()
            .map(|s| (*s).to_string())
            .collect::<Vec<_>>()
            .into_iter()
    }

    #[test]
    fn test_parse_args_default_is_run() {
        assert_eq!(parse_args(args(&["ingest"])).unwrap(), Command::Run);
    }

    #[test]
    fn test_parse_args_wallet_commands() {
        assert_eq!(
            parse_args(args(&["ingest", "reputation", "0xABC"])).unwrap(),
            Command::Reputation {
                wallet: "0xabc".to_string()
            }
        );
        assert_eq!(
            parse_args(args(&["ingest", "wallet", "0xdef"])).unwrap(),
            Command::Wallet {
                wallet: "0xdef".to_string()
            }
        );
        assert!(parse_args(args(&["ingest", "wallet"]))
            .unwrap_err()
            .contains("usage"));
    }

    #[test]
    fn test_parse_args_rejects_unknown() {
        assert!(parse_args(args(&["ingest", "nope"])).is_err());
        assert_eq!(parse_args(args(&["ingest", "sweep"])).unwrap(), Command::Sweep);
    }

    #[tokio::test]
    async fn test_reputation_command_updates_board() {
        let (store, clock) = store_at("2025-01-01").await;
        let mut seed = Batch::new();
        seed.hincr(keys::wallet_profile("0xabc"), "total_mints", 2);
        store.commit(seed).await.unwrap();

        let sweeper = Sweeper::new(Arc::clone(&store), Retention::default(), 0.0);
        run_command(
            &*store,
            &sweeper,
            &*clock,
            Command::Reputation {
                wallet: "0xabc".to_string(),
            },
        )
        .await
        .unwrap();

        let rank = store
            .zset_rev_rank(&keys::leaderboard(LeaderboardKind::Reputation), "0xabc")
            .await
            .unwrap();
        assert_eq!(rank, Some(0));
    }
}
