pub mod command;
pub mod telemetry;

pub use command::{Command, CommandParseError};
pub use telemetry::{classify, looks_like_telemetry, Inbound, ParseError, TelemetrySnapshot};
