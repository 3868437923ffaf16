use std::mem;
use std::ops::ControlFlow;
use std::sync::LazyLock;

use pgn_reader::{Nag, RawComment, RawTag, Reader, SanPlus, Skip, Visitor};
use regex::Regex;

use super::moves::MoveList;

static CLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[%clk\s+(\d+):(\d{1,2}):(\d{1,2}(?:\.\d+)?)\]").expect("clock pattern")
});

/// Parses one `[%clk h:mm:ss(.f)]` annotation into seconds.
pub fn parse_clock(comment: &str) -> Option<f64> {
    let caps = CLOCK.captures(comment)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Header tags the record builder needs.
#[derive(Debug, Default, Clone)]
pub struct HeaderFields {
    pub utc_date: String,
    pub utc_time: String,
    pub end_date: String,
    pub end_time: String,
    pub time_control: String,
}

impl HeaderFields {
    fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn opt(field: &str) -> Option<&str> {
        let trimmed = field.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    fn set_known_tag(&mut self, key: &[u8], value: RawTag<'_>) {
        let slot: &mut String = match key {
            b"UTCDate" => &mut self.utc_date,
            b"UTCTime" => &mut self.utc_time,
            b"EndDate" => &mut self.end_date,
            b"EndTime" => &mut self.end_time,
            b"TimeControl" => &mut self.time_control,
            _ => return,
        };

        if !slot.is_empty() {
            return;
        }

        let bytes = value.as_bytes();
        if bytes.is_empty() {
            return;
        }

        *slot = String::from_utf8_lossy(bytes).into_owned();
    }
}

/// Mainline of one game: headers, SAN tokens and the clock reading after each ply.
#[derive(Debug, Default, Clone)]
pub struct ParsedGame {
    pub headers: HeaderFields,
    pub sans: MoveList,
    /// Remaining clock after each ply that carried an annotation, in ply order.
    pub clocks: Vec<f64>,
}

/// Streaming visitor (pgn-reader) over a single annotated game.
///
/// Variations are skipped; only `[%clk]` comments are kept, and only one per ply.
#[derive(Default)]
pub struct GameVisitor {
    current: ParsedGame,
    clock_pending: bool,
}

impl GameVisitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(&mut self) -> ParsedGame {
        self.clock_pending = false;
        mem::take(&mut self.current)
    }
}

impl Visitor for GameVisitor {
    type Tags = ();
    type Movetext = ();
    type Output = ();

    fn begin_tags(&mut self) -> ControlFlow<Self::Output, Self::Tags> {
        self.current.headers.clear();
        self.current.sans.clear();
        self.current.clocks.clear();
        self.clock_pending = false;
        ControlFlow::Continue(())
    }

    fn tag(
        &mut self,
        _: &mut Self::Tags,
        key: &[u8],
        value: RawTag<'_>,
    ) -> ControlFlow<Self::Output> {
        self.current.headers.set_known_tag(key, value);
        ControlFlow::Continue(())
    }

    fn begin_movetext(&mut self, _: Self::Tags) -> ControlFlow<Self::Output, Self::Movetext> {
        ControlFlow::Continue(())
    }

    fn san(&mut self, _: &mut Self::Movetext, san_plus: SanPlus) -> ControlFlow<Self::Output> {
        self.current.sans.push(san_plus.to_string());
        self.clock_pending = true;
        ControlFlow::Continue(())
    }

    fn nag(&mut self, _: &mut Self::Movetext, _: Nag) -> ControlFlow<Self::Output> {
        ControlFlow::Continue(())
    }

    fn comment(
        &mut self,
        _: &mut Self::Movetext,
        comment: RawComment<'_>,
    ) -> ControlFlow<Self::Output> {
        if self.clock_pending {
            let text = String::from_utf8_lossy(comment.as_bytes());
            if let Some(seconds) = parse_clock(&text) {
                self.current.clocks.push(seconds);
                self.clock_pending = false;
            }
        }
        ControlFlow::Continue(())
    }

    fn partial_comment(
        &mut self,
        _: &mut Self::Movetext,
        _: RawComment<'_>,
    ) -> ControlFlow<Self::Output> {
        ControlFlow::Continue(())
    }

    fn begin_variation(&mut self, _: &mut Self::Movetext) -> ControlFlow<Self::Output, Skip> {
        ControlFlow::Continue(Skip(true))
    }

    fn end_game(&mut self, _: Self::Movetext) -> Self::Output {
        self.clock_pending = false;
    }
}

/// Reads the first game of `pgn`. `None` when the text holds no game at all.
pub fn read_single_game(pgn: &str) -> std::io::Result<Option<ParsedGame>> {
    let mut reader = Reader::new(pgn.as_bytes());
    let mut visitor = GameVisitor::new();

    match reader.read_game(&mut visitor)? {
        Some(()) => Ok(Some(visitor.finish())),
        None => Ok(None),
    }
}
