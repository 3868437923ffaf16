use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::{ErrorAccumulator, SyncError};
use super::month::month_index_of;
use super::moves::format_movetext;
use super::timecontrol::{self, Period};
use super::types::{Color, GameOutcome, RawGame, TimeClass};
use super::visitor::{HeaderFields, read_single_game};

/// Score of a forced mate delivered on the board, in centipawns.
pub const MATE_SCORE: i32 = 32_000;
/// Any evaluation beyond this magnitude denotes a forced mate.
pub const MATE_THRESHOLD: i32 = 31_000;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{evaluations} evaluations recorded for {moves} moves")]
    EvaluationLength { moves: usize, evaluations: usize },

    #[error("evaluations already recorded")]
    AlreadyEvaluated,
}

/// One completed game seen from the synced player's side.
///
/// Everything but the evaluation sequence is fixed at construction; evaluations
/// are attached once, by the evaluation pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    url: String,
    color: Color,
    opponent: String,
    outcome: GameOutcome,
    result_tag: String,
    rating: Option<u32>,
    time_class: TimeClass,
    base_time: u32,
    increment: u32,
    movetext: String,
    moves: Vec<String>,
    time_per_move: Vec<f64>,
    evaluations: Option<Vec<i32>>,
    #[serde(with = "chrono::serde::ts_seconds")]
    start_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    end_time: DateTime<Utc>,
    duration: i64,
    month_index: i32,
}

fn parse_header_datetime(date: Option<&str>, time: Option<&str>) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date?, "%Y.%m.%d").ok()?;
    let time = NaiveTime::parse_from_str(time?, "%H:%M:%S").ok()?;
    Some(NaiveDateTime::new(date, time).and_utc())
}

/// Seconds spent on each of `color`'s plies, from the remaining-clock readings
/// of every ply in order.
///
/// The clock before the first own move is `base + increment`; after each move
/// the increment is credited back before the next subtraction.
pub fn time_per_move(clocks: &[f64], base: f64, increment: f64, color: Color) -> Vec<f64> {
    let mut previous = base + increment;
    clocks
        .iter()
        .skip(color.ply_offset())
        .step_by(2)
        .map(|&remaining| {
            let spent = previous - remaining;
            previous = remaining + increment;
            spent
        })
        .collect()
}

impl GameRecord {
    /// Builds a record from a remote archive entry for `player`.
    ///
    /// Fails without constructing anything when dates, time control or the
    /// player's result cannot be read.
    pub fn from_remote(raw: &RawGame, player: &str) -> Result<Self, SyncError> {
        let malformed = |reason: String| SyncError::MalformedRecord {
            id: raw.url.clone(),
            reason,
        };

        let Some((color, own, opponent)) = raw.sides_of(player) else {
            return Err(malformed(format!("player '{player}' did not play this game")));
        };
        let pgn = raw
            .pgn
            .as_deref()
            .ok_or_else(|| malformed("missing pgn".to_string()))?;
        let parsed = read_single_game(pgn)
            .map_err(|e| malformed(format!("unreadable pgn: {e}")))?
            .ok_or_else(|| malformed("pgn holds no game".to_string()))?;

        let mut problems = ErrorAccumulator::default();

        let headers = &parsed.headers;
        let start_time = parse_header_datetime(
            HeaderFields::opt(&headers.utc_date),
            HeaderFields::opt(&headers.utc_time),
        );
        if start_time.is_none() {
            problems.push("missing or invalid UTCDate/UTCTime");
        }
        let end_time = parse_header_datetime(
            HeaderFields::opt(&headers.end_date),
            HeaderFields::opt(&headers.end_time),
        );
        if end_time.is_none() {
            problems.push("missing or invalid EndDate/EndTime");
        }

        let raw_time_control = raw
            .time_control
            .as_deref()
            .or(HeaderFields::opt(&headers.time_control))
            .unwrap_or_default();
        let period = match timecontrol::parse_timecontrol(raw_time_control) {
            Ok(period) => Some(period),
            Err(e) => {
                problems.push(&e.message);
                None
            }
        };

        let result_tag = own.result.clone().filter(|tag| !tag.is_empty());
        if result_tag.is_none() {
            problems.push("missing player result");
        }

        if let Some(reason) = problems.take() {
            return Err(malformed(reason));
        }
        let (Some(start_time), Some(end_time), Some(period), Some(result_tag)) =
            (start_time, end_time, period, result_tag)
        else {
            return Err(malformed("incomplete header".to_string()));
        };

        let time_class = raw
            .time_class
            .as_deref()
            .and_then(TimeClass::parse)
            .unwrap_or_else(|| timecontrol::category_from_period(&period));

        Ok(Self::assemble(
            raw.url.clone(),
            color,
            opponent.username.clone(),
            own.rating,
            result_tag,
            time_class,
            period,
            parsed.sans.into_vec(),
            &parsed.clocks,
            start_time,
            end_time,
        ))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        url: String,
        color: Color,
        opponent: String,
        rating: Option<u32>,
        result_tag: String,
        time_class: TimeClass,
        period: Period,
        moves: Vec<String>,
        clocks: &[f64],
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        let (time_per_move, duration) = if time_class.has_clock() && !period.is_correspondence()
        {
            (
                time_per_move(
                    clocks,
                    period.base_seconds as f64,
                    period.increment_seconds as f64,
                    color,
                ),
                (end_time - start_time).num_seconds(),
            )
        } else {
            (Vec::new(), 0)
        };

        Self {
            url,
            color,
            opponent,
            outcome: GameOutcome::from_result_tag(&result_tag),
            result_tag,
            rating,
            time_class,
            base_time: period.base_seconds,
            increment: period.increment_seconds,
            movetext: format_movetext(&moves, None),
            moves,
            time_per_move,
            evaluations: None,
            start_time,
            end_time,
            duration,
            month_index: month_index_of(&start_time),
        }
    }

    /// Rehydrates a record previously produced by [`GameRecord::to_local`].
    pub fn from_local(raw: &[u8]) -> Result<Self, RecordError> {
        let record: Self = serde_json::from_slice(raw)?;
        if let Some(evaluations) = &record.evaluations
            && evaluations.len() != record.moves.len()
        {
            return Err(RecordError::EvaluationLength {
                moves: record.moves.len(),
                evaluations: evaluations.len(),
            });
        }
        Ok(record)
    }

    pub fn to_local(&self) -> Result<Vec<u8>, RecordError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Attaches the per-ply evaluations. Allowed once, with one score per move.
    pub fn attach_evaluations(&mut self, evaluations: Vec<i32>) -> Result<(), RecordError> {
        if self.evaluations.is_some() {
            return Err(RecordError::AlreadyEvaluated);
        }
        if evaluations.len() != self.moves.len() {
            return Err(RecordError::EvaluationLength {
                moves: self.moves.len(),
                evaluations: evaluations.len(),
            });
        }
        self.evaluations = Some(evaluations);
        Ok(())
    }

    pub fn is_evaluated(&self) -> bool {
        self.evaluations.is_some()
    }

    /// Source identifier (the archive URL of the game).
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn opponent(&self) -> &str {
        &self.opponent
    }

    pub fn outcome(&self) -> GameOutcome {
        self.outcome
    }

    pub fn result_tag(&self) -> &str {
        &self.result_tag
    }

    pub fn rating(&self) -> Option<u32> {
        self.rating
    }

    pub fn time_class(&self) -> TimeClass {
        self.time_class
    }

    pub fn base_time(&self) -> u32 {
        self.base_time
    }

    pub fn increment(&self) -> u32 {
        self.increment
    }

    pub fn movetext(&self) -> &str {
        &self.movetext
    }

    pub fn moves(&self) -> &[String] {
        &self.moves
    }

    pub fn time_per_move(&self) -> &[f64] {
        &self.time_per_move
    }

    /// Per-ply scores for the player's side; empty until evaluated.
    pub fn evaluations(&self) -> &[i32] {
        self.evaluations.as_deref().unwrap_or_default()
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        self.end_time
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn month_index(&self) -> i32 {
        self.month_index
    }
}
