use std::fmt;
use std::str::FromStr;

/// Plain-text SDK instruction. Sent as-is: no framing, no correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Enter SDK mode. Must precede everything else.
    Command,
    Takeoff,
    Land,
    Emergency,
    StreamOn,
    StreamOff,
    /// Stick channels, each -100..=100.
    Rc { roll: i8, pitch: i8, throttle: i8, yaw: i8 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("rc expects 4 integer channels, got {0:?}")]
    BadRc(String),
}

const RC_LIMIT: i32 = 100;

impl Command {
    pub fn rc(roll: i32, pitch: i32, throttle: i32, yaw: i32) -> Self {
        let ch = |v: i32| v.clamp(-RC_LIMIT, RC_LIMIT) as i8;
        Command::Rc { roll: ch(roll), pitch: ch(pitch), throttle: ch(throttle), yaw: ch(yaw) }
    }

    pub fn wire(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Command => f.write_str("command"),
            Command::Takeoff => f.write_str("takeoff"),
            Command::Land => f.write_str("land"),
            Command::Emergency => f.write_str("emergency"),
            Command::StreamOn => f.write_str("streamon"),
            Command::StreamOff => f.write_str("streamoff"),
            Command::Rc { roll, pitch, throttle, yaw } => {
                write!(f, "rc {} {} {} {}", roll, pitch, throttle, yaw)
            }
        }
    }
}

impl FromStr for Command {
    type Err = CommandParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let mut parts = s.split_whitespace();
        let keyword = parts.next().unwrap_or_default().to_ascii_lowercase();
        let cmd = match keyword.as_str() {
            "command" => Command::Command,
            "takeoff" => Command::Takeoff,
            "land" => Command::Land,
            "emergency" => Command::Emergency,
            "streamon" => Command::StreamOn,
            "streamoff" => Command::StreamOff,
            "rc" => {
                let channels: Vec<i32> = parts
                    .by_ref()
                    .map(|p| p.parse::<i32>())
                    .collect::<Result<_, _>>()
                    .map_err(|_| CommandParseError::BadRc(s.to_string()))?;
                let &[roll, pitch, throttle, yaw] = channels.as_slice() else {
                    return Err(CommandParseError::BadRc(s.to_string()));
                };
                return Ok(Command::rc(roll, pitch, throttle, yaw));
            }
            _ => return Err(CommandParseError::Unknown(s.to_string())),
        };
        if parts.next().is_some() {
            return Err(CommandParseError::Unknown(s.to_string()));
        }
        Ok(cmd)
    }
}
