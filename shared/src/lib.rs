//! Types and constants shared between the game server and the console client:
//! the hunt grid and its coordinate model, plus the wire protocol
//! ([`codec`]) and the reliable-delivery engine ([`channel`]) that both
//! sides run on top of a plain UDP socket.

use std::fmt;
use std::time::Duration;

pub mod channel;
pub mod codec;

/// Grid width in cells. Coordinates are 1-indexed.
pub const GRID_W: i32 = 3;
/// Grid height in cells. Coordinates are 1-indexed.
pub const GRID_H: i32 = 3;
/// Every player starts a login here; the treasure is never drawn on it.
pub const START_POS: Pos = Pos { x: 1, y: 1 };

/// Default UDP port the server listens on.
pub const DEFAULT_PORT: u16 = 5000;
/// Receive buffer size. Commands and replies are far smaller than this.
pub const MAX_DATAGRAM: usize = 2048;
/// How long a sender waits for an acknowledgment before retransmitting.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(2);
/// Length of one game round.
pub const DEFAULT_ROUND_TIME: Duration = Duration::from_secs(10);

/// A cell on the hunt grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pos {
    pub x: i32,
    pub y: i32,
}

impl Pos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// The neighbouring cell in `dir`, without any bounds check.
    pub fn step(self, dir: Direction) -> Pos {
        let (dx, dy) = dir.delta();
        Pos {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// Whether this cell lies on the grid.
    pub fn in_grid(self) -> bool {
        (1..=GRID_W).contains(&self.x) && (1..=GRID_H).contains(&self.y)
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// One of the four cardinal movement directions.
///
/// `up` increases `y`, `right` increases `x`; the origin is the bottom-left
/// corner of the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Parse a direction keyword, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("up") {
            Some(Direction::Up)
        } else if s.eq_ignore_ascii_case("down") {
            Some(Direction::Down)
        } else if s.eq_ignore_ascii_case("left") {
            Some(Direction::Left)
        } else if s.eq_ignore_ascii_case("right") {
            Some(Direction::Right)
        } else {
            None
        }
    }

    /// Unit vector for this direction.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, 1),
            Direction::Down => (0, -1),
            Direction::Left => (-1, 0),
            Direction::Right => (1, 0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
