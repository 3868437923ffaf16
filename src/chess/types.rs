use serde::{Deserialize, Serialize};

/// Standard starting position as the remote archive spells it.
pub const STANDARD_SETUP: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// Offset of this color's plies within the ply sequence.
    pub fn ply_offset(self) -> usize {
        match self {
            Self::White => 0,
            Self::Black => 1,
        }
    }

    pub fn to_shakmaty(self) -> shakmaty::Color {
        match self {
            Self::White => shakmaty::Color::White,
            Self::Black => shakmaty::Color::Black,
        }
    }
}

/// Outcome of a game from the player's side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameOutcome {
    Win,
    Draw,
    Loss,
}

impl GameOutcome {
    /// Classifies a per-player result tag of the remote archive.
    pub fn from_result_tag(tag: &str) -> Self {
        match tag {
            "win" => Self::Win,
            "checkmated" | "resigned" | "timeout" | "abandoned" | "lose" => Self::Loss,
            // stalemate, repetition, agreed, 50move, insufficient, timevsinsufficient, ...
            _ => Self::Draw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeClass {
    Bullet,
    Blitz,
    Rapid,
    Daily,
}

impl TimeClass {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "bullet" => Some(Self::Bullet),
            "blitz" => Some(Self::Blitz),
            "rapid" => Some(Self::Rapid),
            "daily" => Some(Self::Daily),
            _ => None,
        }
    }

    /// Daily games carry no clock annotations worth reconstructing.
    pub fn has_clock(self) -> bool {
        !matches!(self, Self::Daily)
    }
}

/// One player's side of a remote entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPlayer {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub rating: Option<u32>,
    #[serde(default)]
    pub result: Option<String>,
}

/// A game entry exactly as one remote monthly partition returns it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawGame {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub pgn: Option<String>,
    #[serde(default)]
    pub time_control: Option<String>,
    #[serde(default)]
    pub time_class: Option<String>,
    #[serde(default)]
    pub rules: Option<String>,
    #[serde(default)]
    pub initial_setup: Option<String>,
    #[serde(default)]
    pub white: RawPlayer,
    #[serde(default)]
    pub black: RawPlayer,
}

impl RawGame {
    /// Standard chess from the standard position, in a recognised time class.
    pub fn is_valid(&self) -> bool {
        let standard_rules = self.rules.as_deref() == Some("chess");
        let standard_setup = matches!(
            self.initial_setup.as_deref(),
            None | Some("") | Some(STANDARD_SETUP)
        );
        let known_class = self
            .time_class
            .as_deref()
            .is_none_or(|class| TimeClass::parse(class).is_some());

        standard_rules && standard_setup && known_class && self.pgn.is_some()
    }

    /// Side and opposing side of `player`, matched case-insensitively.
    pub fn sides_of(&self, player: &str) -> Option<(Color, &RawPlayer, &RawPlayer)> {
        if self.white.username.eq_ignore_ascii_case(player) {
            Some((Color::White, &self.white, &self.black))
        } else if self.black.username.eq_ignore_ascii_case(player) {
            Some((Color::Black, &self.black, &self.white))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_tags() {
        assert_eq!(GameOutcome::from_result_tag("win"), GameOutcome::Win);
        assert_eq!(GameOutcome::from_result_tag("timeout"), GameOutcome::Loss);
        assert_eq!(GameOutcome::from_result_tag("abandoned"), GameOutcome::Loss);
        assert_eq!(GameOutcome::from_result_tag("repetition"), GameOutcome::Draw);
        assert_eq!(GameOutcome::from_result_tag("timevsinsufficient"), GameOutcome::Draw);
    }

    #[test]
    fn test_validity_filter() {
        let mut raw = RawGame {
            pgn: Some("1. e4 1-0".to_string()),
            rules: Some("chess".to_string()),
            initial_setup: Some(STANDARD_SETUP.to_string()),
            time_class: Some("blitz".to_string()),
            ..RawGame::default()
        };
        assert!(raw.is_valid());

        raw.rules = Some("chess960".to_string());
        assert!(!raw.is_valid());

        raw.rules = Some("chess".to_string());
        raw.initial_setup = Some("8/8/8/8/8/8/8/K6k w - - 0 1".to_string());
        assert!(!raw.is_valid());

        raw.initial_setup = Some(String::new());
        raw.time_class = Some("hyperbullet".to_string());
        assert!(!raw.is_valid());

        raw.time_class = None;
        raw.pgn = None;
        assert!(!raw.is_valid());
    }

    #[test]
    fn test_sides_are_case_insensitive() {
        let raw = RawGame {
            white: RawPlayer {
                username: "Alice".to_string(),
                ..RawPlayer::default()
            },
            black: RawPlayer {
                username: "bob".to_string(),
                ..RawPlayer::default()
            },
            ..RawGame::default()
        };

        let (color, own, opponent) = raw.sides_of("alice").unwrap();
        assert_eq!(color, Color::White);
        assert_eq!(own.username, "Alice");
        assert_eq!(opponent.username, "bob");
        assert!(raw.sides_of("carol").is_none());
    }

    #[test]
    fn test_raw_game_deserializes_archive_payload() {
        let json = r#"{
            "url": "https://www.chess.com/game/live/1",
            "pgn": "1. e4 1-0",
            "time_control": "180+2",
            "end_time": 1714557900,
            "rated": true,
            "time_class": "blitz",
            "rules": "chess",
            "white": {"rating": 1500, "result": "win", "@id": "x", "username": "alice"},
            "black": {"rating": 1480, "result": "resigned", "@id": "y", "username": "bob"}
        }"#;

        let raw: RawGame = serde_json::from_str(json).unwrap();
        assert_eq!(raw.white.rating, Some(1500));
        assert_eq!(raw.black.result.as_deref(), Some("resigned"));
        assert!(raw.is_valid());
    }
}
