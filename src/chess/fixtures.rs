//! Archive entries for tests.

use super::types::{RawGame, RawPlayer, STANDARD_SETUP};

pub const SCHOLARS_MATE: &str = "1. e4 {[%clk 0:03:01.9]} 1... e5 {[%clk 0:03:01]} \
2. Qh5 {[%clk 0:02:58.5]} 2... Nc6 {[%clk 0:02:59]} 3. Bc4 {[%clk 0:02:55]} \
3... Nf6 {[%clk 0:02:50]} 4. Qxf7# {[%clk 0:02:54]} 1-0";

/// Builds a blitz game where `alice` (white) mates `bob` at `start`
/// (`YYYY.MM.DD HH:MM:SS`), ending 4m30s later.
pub struct RawGameBuilder {
    url: String,
    start: String,
    time_control: String,
    time_class: Option<String>,
    rules: String,
}

impl RawGameBuilder {
    pub fn new(url: &str, start: &str) -> Self {
        Self {
            url: url.to_string(),
            start: start.to_string(),
            time_control: "180+2".to_string(),
            time_class: Some("blitz".to_string()),
            rules: "chess".to_string(),
        }
    }

    pub fn time_control(mut self, time_control: &str, time_class: Option<&str>) -> Self {
        self.time_control = time_control.to_string();
        self.time_class = time_class.map(str::to_string);
        self
    }

    pub fn rules(mut self, rules: &str) -> Self {
        self.rules = rules.to_string();
        self
    }

    pub fn build(self) -> RawGame {
        let (date, time) = self
            .start
            .split_once(' ')
            .expect("start must be 'YYYY.MM.DD HH:MM:SS'");
        let (hours, rest) = time.split_once(':').expect("time must be HH:MM:SS");
        let (minutes, _) = rest.split_once(':').expect("time must be HH:MM:SS");
        let end_minutes: u32 = minutes.parse::<u32>().expect("minutes") + 4;
        let end_time = format!("{hours}:{end_minutes:02}:30");

        let pgn = format!(
            "[Event \"Live Chess\"]\n[Site \"Chess.com\"]\n[White \"alice\"]\n[Black \"bob\"]\n\
             [Result \"1-0\"]\n[TimeControl \"{tc}\"]\n[UTCDate \"{date}\"]\n[UTCTime \"{time}\"]\n\
             [EndDate \"{date}\"]\n[EndTime \"{end_time}\"]\n\n{SCHOLARS_MATE}\n",
            tc = self.time_control,
        );

        RawGame {
            url: self.url,
            pgn: Some(pgn),
            time_control: Some(self.time_control),
            time_class: self.time_class,
            rules: Some(self.rules),
            initial_setup: Some(STANDARD_SETUP.to_string()),
            white: RawPlayer {
                username: "alice".to_string(),
                rating: Some(1500),
                result: Some("win".to_string()),
            },
            black: RawPlayer {
                username: "bob".to_string(),
                rating: Some(1480),
                result: Some("checkmated".to_string()),
            },
        }
    }
}
