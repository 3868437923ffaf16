//! Analysis engine seam and its UCI subprocess implementation.
//!
//! One [`UciEngine`] wraps one long-lived engine process. The child is spawned
//! with `kill_on_drop(true)`, so a handle dropped on any path (including a
//! panicking worker) takes its process down with it; [`Analyzer::quit`] is the
//! orderly path.

use std::future::Future;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use shakmaty::Chess;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::chess::moves::fen;
use crate::chess::{Color, MATE_SCORE, MATE_THRESHOLD};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(300);
const QUIT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to start engine '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("engine i/o: {0}")]
    Io(#[from] io::Error),

    #[error("engine closed its output")]
    Closed,

    #[error("engine did not answer '{0}' in time")]
    Timeout(&'static str),

    #[error("engine protocol: {0}")]
    Protocol(String),
}

/// Engine verdict for a position, from the side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Cp(i32),
    /// Moves to mate. Positive when the side to move mates, negative when it
    /// gets mated, zero when it is already checkmated.
    Mate(i32),
}

impl Score {
    fn from_side_to_move(self) -> i32 {
        match self {
            Self::Cp(cp) => cp.clamp(-MATE_THRESHOLD, MATE_THRESHOLD),
            Self::Mate(0) => -MATE_SCORE,
            Self::Mate(n) if n > 0 => MATE_SCORE - n.min(MATE_SCORE - MATE_THRESHOLD - 1),
            Self::Mate(n) => -(MATE_SCORE + n.max(-(MATE_SCORE - MATE_THRESHOLD - 1))),
        }
    }

    /// Centipawns for `perspective`, given whose turn it was in the scored position.
    pub fn centipawns_for(self, to_move: shakmaty::Color, perspective: Color) -> i32 {
        let score = self.from_side_to_move();
        if to_move == perspective.to_shakmaty() {
            score
        } else {
            -score
        }
    }
}

/// Extracts the score of a UCI `info` line, if it carries an exact one.
pub fn parse_info_score(line: &str) -> Option<Score> {
    let mut tokens = line.split_whitespace();
    if tokens.next()? != "info" {
        return None;
    }
    while let Some(token) = tokens.next() {
        if token != "score" {
            continue;
        }
        let kind = tokens.next()?;
        let value: i32 = tokens.next()?.parse().ok()?;
        if matches!(tokens.next(), Some("lowerbound" | "upperbound")) {
            return None;
        }
        return match kind {
            "cp" => Some(Score::Cp(value)),
            "mate" => Some(Score::Mate(value)),
            _ => None,
        };
    }
    None
}

/// A live analysis handle owned by exactly one worker.
pub trait Analyzer: Send {
    fn analyse(
        &mut self,
        position: &Chess,
        depth: u32,
    ) -> impl Future<Output = Result<Score, EngineError>> + Send;

    /// Asks the engine to terminate and reaps it.
    fn quit(self) -> impl Future<Output = ()> + Send;
}

pub trait AnalyzerFactory: Send + Sync + 'static {
    type Analyzer: Analyzer + 'static;

    fn spawn(&self) -> impl Future<Output = Result<Self::Analyzer, EngineError>> + Send;
}

pub struct UciEngine {
    child: Child,
    stdin: ChildStdin,
    lines: Lines<BufReader<ChildStdout>>,
}

impl UciEngine {
    pub async fn spawn(program: &str, args: &[String]) -> Result<Self, EngineError> {
        let spawn_error = |source: io::Error| EngineError::Spawn {
            program: program.to_string(),
            source,
        };

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let missing = || spawn_error(io::Error::other("engine pipes unavailable"));
        let stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;

        let mut engine = Self {
            child,
            stdin,
            lines: BufReader::new(stdout).lines(),
        };
        debug!("spawned engine '{program}' (pid {})", engine.child.id().unwrap_or(0));

        engine.send("uci").await?;
        engine.wait_for("uciok", HANDSHAKE_TIMEOUT).await?;
        engine.send("isready").await?;
        engine.wait_for("readyok", HANDSHAKE_TIMEOUT).await?;
        Ok(engine)
    }

    async fn send(&mut self, command: &str) -> Result<(), EngineError> {
        self.stdin.write_all(command.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String, EngineError> {
        self.lines.next_line().await?.ok_or(EngineError::Closed)
    }

    async fn wait_for(&mut self, token: &'static str, limit: Duration) -> Result<(), EngineError> {
        timeout(limit, async {
            loop {
                if self.next_line().await?.trim() == token {
                    return Ok::<(), EngineError>(());
                }
            }
        })
        .await
        .map_err(|_| EngineError::Timeout(token))?
    }

    async fn search(&mut self) -> Result<Score, EngineError> {
        let mut score = None;
        loop {
            let line = self.next_line().await?;
            if line.starts_with("bestmove") {
                return score.ok_or_else(|| {
                    EngineError::Protocol("bestmove without a score".to_string())
                });
            }
            if let Some(found) = parse_info_score(&line) {
                score = Some(found);
            }
        }
    }
}

impl Analyzer for UciEngine {
    async fn analyse(&mut self, position: &Chess, depth: u32) -> Result<Score, EngineError> {
        self.send(&format!("position fen {}", fen(position))).await?;
        self.send(&format!("go depth {depth}")).await?;
        timeout(ANALYSIS_TIMEOUT, self.search())
            .await
            .map_err(|_| EngineError::Timeout("go"))?
    }

    async fn quit(mut self) {
        let _ = self.send("quit").await;
        match timeout(QUIT_TIMEOUT, self.child.wait()).await {
            Ok(Ok(status)) => debug!("engine exited with {status}"),
            _ => {
                warn!("engine ignored quit, killing it");
                let _ = self.child.kill().await;
            }
        }
    }
}

/// Spawns [`UciEngine`]s from a program path and fixed arguments.
#[derive(Debug, Clone)]
pub struct UciEngineFactory {
    pub program: String,
    pub args: Vec<String>,
}

impl UciEngineFactory {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl AnalyzerFactory for UciEngineFactory {
    type Analyzer = UciEngine;

    async fn spawn(&self) -> Result<UciEngine, EngineError> {
        UciEngine::spawn(&self.program, &self.args).await
    }
}
