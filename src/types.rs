use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Operating mode reported by the external language-analysis service.
///
/// `Unknown` is the value before the service has reported anything. Services
/// that predate mode reporting never leave it, so capability checks treat it
/// like `Standard`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[serde(alias = "light")]
    LightWeight,
    Standard,
    Hybrid,
    #[default]
    Unknown,
}

impl ServerMode {
    /// Standard mode, or a service too old to report its mode at all.
    pub fn is_standard_ready(self) -> bool {
        matches!(self, ServerMode::Standard | ServerMode::Unknown)
    }
}

impl FromStr for ServerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" | "lightweight" => Ok(ServerMode::LightWeight),
            "standard" => Ok(ServerMode::Standard),
            "hybrid" => Ok(ServerMode::Hybrid),
            "unknown" => Ok(ServerMode::Unknown),
            other => Err(format!(
                "invalid server mode: {other} (expected \"light\", \"standard\", \"hybrid\" or \"unknown\")"
            )),
        }
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServerMode::LightWeight => "light",
            ServerMode::Standard => "standard",
            ServerMode::Hybrid => "hybrid",
            ServerMode::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Whether a session runs the tests plainly or under a debugger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunMode {
    Run,
    Debug,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Run => f.write_str("run"),
            RunMode::Debug => f.write_str("debug"),
        }
    }
}

/// What the runtime does with a run/debug command that arrives while a
/// session is already active.
///
/// - `Reject`: report `Busy` back to the user (default).
/// - `Queue`: hold the request on the run queue and start it, in arrival
///   order, once the active session has ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusyBehaviour {
    #[default]
    Reject,
    Queue,
}

impl FromStr for BusyBehaviour {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(BusyBehaviour::Reject),
            "queue" => Ok(BusyBehaviour::Queue),
            other => Err(format!(
                "invalid busy_behaviour: {other} (expected \"reject\" or \"queue\")"
            )),
        }
    }
}
