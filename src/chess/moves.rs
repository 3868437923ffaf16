use std::fmt::Write;

use shakmaty::{Chess, EnPassantMode, Position, fen::Fen, san::SanPlus};
use smallvec::SmallVec;

pub type MoveList = SmallVec<[String; 128]>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal or unreadable move '{san}' at ply {ply}: {reason}")]
pub struct MoveError {
    pub ply: usize,
    pub san: String,
    pub reason: String,
}

/// Applies SAN tokens one ply at a time from the standard starting position.
pub struct Replay<'a> {
    moves: &'a [String],
    position: Chess,
    ply: usize,
}

impl<'a> Replay<'a> {
    pub fn new(moves: &'a [String]) -> Self {
        Self {
            moves,
            position: Chess::default(),
            ply: 0,
        }
    }
}

impl Iterator for Replay<'_> {
    type Item = Result<Chess, MoveError>;

    fn next(&mut self) -> Option<Self::Item> {
        let token = self.moves.get(self.ply)?;
        let ply = self.ply + 1;
        self.ply = ply;

        let fail = |reason: String| MoveError {
            ply,
            san: token.clone(),
            reason,
        };

        let step = token
            .parse::<SanPlus>()
            .map_err(|e| fail(e.to_string()))
            .and_then(|san| san.san.to_move(&self.position).map_err(|e| fail(e.to_string())));

        match step {
            Ok(m) => {
                self.position.play_unchecked(m);
                Some(Ok(self.position.clone()))
            }
            Err(err) => {
                // Stop after the first bad token; later positions are meaningless.
                self.ply = self.moves.len();
                Some(Err(err))
            }
        }
    }
}

pub fn replay(moves: &[String]) -> Replay<'_> {
    Replay::new(moves)
}

pub fn fen(pos: &Chess) -> String {
    Fen::from_position(pos, EnPassantMode::Legal).to_string()
}

/// Numbered movetext (`1. e4 e5 2. Nf3`) of the first `limit` plies, or all of them.
pub fn format_movetext(moves: &[String], limit: Option<usize>) -> String {
    let count = limit.map_or(moves.len(), |limit| limit.min(moves.len()));
    let mut out = String::new();

    for (i, token) in moves.iter().take(count).enumerate() {
        if !out.is_empty() {
            out.push(' ');
        }
        if i % 2 == 0 {
            let _ = write!(out, "{}. ", i / 2 + 1);
        }
        out.push_str(token);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(moves: &[&str]) -> Vec<String> {
        moves.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn test_replay_yields_one_position_per_ply() {
        let moves = tokens(&["e4", "e5", "Qh5", "Nc6", "Bc4", "Nf6", "Qxf7#"]);
        let positions: Vec<Chess> = replay(&moves).collect::<Result<_, _>>().unwrap();

        assert_eq!(positions.len(), 7);
        assert!(positions.last().unwrap().is_checkmate());
        assert_eq!(positions[0].turn(), shakmaty::Color::Black);
    }

    #[test]
    fn test_replay_stops_at_illegal_move() {
        let moves = tokens(&["e4", "e4", "Nf3"]);
        let results: Vec<_> = replay(&moves).collect();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        let err = results[1].clone().unwrap_err();
        assert_eq!(err.ply, 2);
        assert_eq!(err.san, "e4");
    }

    #[test]
    fn test_fen_after_first_move() {
        let moves = tokens(&["e4"]);
        let pos = replay(&moves).next().unwrap().unwrap();
        assert_eq!(
            fen(&pos),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1"
        );
    }

    #[test]
    fn test_format_movetext() {
        let moves = tokens(&["e4", "e5", "Nf3", "Nc6"]);
        assert_eq!(format_movetext(&moves, None), "1. e4 e5 2. Nf3 Nc6");
        assert_eq!(format_movetext(&moves, Some(3)), "1. e4 e5 2. Nf3");
        assert_eq!(format_movetext(&moves, Some(10)), "1. e4 e5 2. Nf3 Nc6");
        assert_eq!(format_movetext(&[], None), "");
    }
}
