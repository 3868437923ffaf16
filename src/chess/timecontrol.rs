use super::types::TimeClass;

/// Clock budget of a remote time-control string.
///
/// Live games use `base` or `base+increment` (seconds). Correspondence games
/// use `moves/seconds`, e.g. `1/86400` for one day per move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub moves: Option<u32>,
    pub base_seconds: u32,
    pub increment_seconds: u32,
}

impl Period {
    pub fn is_correspondence(&self) -> bool {
        self.moves.is_some()
    }

    /// Estimated length of a 40-move game for one player.
    pub fn estimated_seconds(&self) -> u64 {
        self.base_seconds as u64 + 40 * self.increment_seconds as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct TimeControlError {
    pub message: String,
}

fn parse_u32(s: &str, raw: &str) -> Result<u32, TimeControlError> {
    s.trim().parse().map_err(|_| TimeControlError {
        message: format!("invalid time control '{raw}'"),
    })
}

pub fn parse_timecontrol(raw: &str) -> Result<Period, TimeControlError> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(TimeControlError {
            message: "empty time control".to_string(),
        });
    }

    if let Some((moves, seconds)) = input.split_once('/') {
        return Ok(Period {
            moves: Some(parse_u32(moves, raw)?),
            base_seconds: parse_u32(seconds, raw)?,
            increment_seconds: 0,
        });
    }

    let (base, increment) = match input.split_once('+') {
        Some((base, increment)) => (parse_u32(base, raw)?, parse_u32(increment, raw)?),
        None => (parse_u32(input, raw)?, 0),
    };

    Ok(Period {
        moves: None,
        base_seconds: base,
        increment_seconds: increment,
    })
}

/// Time class for entries whose remote payload omits one.
pub fn category_from_period(period: &Period) -> TimeClass {
    if period.is_correspondence() {
        return TimeClass::Daily;
    }

    match period.estimated_seconds() {
        0..=179 => TimeClass::Bullet,
        180..=599 => TimeClass::Blitz,
        _ => TimeClass::Rapid,
    }
}
