use anyhow::{Context, bail};
use clap::Parser;
use tracing::{error, info, warn};

use chess_sync::chess::log;
use chess_sync::chess::month::month_label;
use chess_sync::config::SyncArgs;
use chess_sync::sync::archive::HttpArchive;
use chess_sync::sync::engine::UciEngineFactory;
use chess_sync::sync::signals::TerminationSignals;
use chess_sync::SyncOrchestrator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = SyncArgs::parse();
    log::init(&args.log);

    let store = args.store_config().open();

    if args.list {
        for player in store.players().context("listing players")? {
            println!("{player}");
        }
        return Ok(());
    }

    let Some(player) = args.player.clone() else {
        bail!("no player given");
    };

    let archive = HttpArchive::new(&args.api_base, &args.user_agent)?;
    let engine = UciEngineFactory::new(args.engine.clone(), args.engine_args.clone());
    let orchestrator = SyncOrchestrator::new(archive, store, engine, args.pool_config());
    let shutdown = orchestrator.shutdown();
    let mut signals = TerminationSignals::install().context("installing signal handlers")?;

    let handle = tokio::select! {
        handle = orchestrator.sync(&player) => handle.with_context(|| format!("syncing {player}"))?,
        name = signals.recv() => bail!("received {name} while syncing {player}"),
    };

    let games = handle.games.clone();
    if let Some(span) = games.month_span() {
        info!(
            "{player}: {} games from {} to {} over {} active months",
            games.len(),
            month_label(span.first),
            month_label(span.last),
            span.active_months
        );
    }

    let evaluation = handle.wait_for_evaluation();
    tokio::pin!(evaluation);

    let result = tokio::select! {
        result = &mut evaluation => result,
        name = signals.recv() => {
            warn!("received {name}, stopping engines");
            shutdown.trigger();
            evaluation.await
        }
    };

    match result {
        Ok(report) => {
            info!(
                "{player} ready: {} games evaluated in {:.1}s",
                report.games,
                report.elapsed.as_secs_f64()
            );
            Ok(())
        }
        Err(e) => {
            error!("evaluation of {player} did not complete: {e}");
            Err(e).context("evaluating games")
        }
    }
}
