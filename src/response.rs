//! Wire-shaped results of a dispatched request.
//!
//! Each strategy answers in the shape its route always had:
//!
//! ```text
//! {"hello":"0"}                   allocated; the value read before writing
//! "Table busy"                    ROW_LOCK_NOWAIT could not lock
//! [{"id":1,"value":0}, ...]       FORCED_SERIAL: every committed row
//! ```

use serde::{Deserialize, Serialize};

use crate::store::CounterRow;
use crate::strategy::Outcome;

/// Body returned when a non-blocking lock was not available.
pub const BUSY_MESSAGE: &str = "Table busy";

/// A serializable response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    /// `{"hello": "<observed>"}`.
    Hello { hello: String },
    /// A bare string message.
    Message(String),
    /// The rows of the counter table.
    Records(Vec<CounterRow>),
}

impl Response {
    /// The greeting for an allocation that read `observed`.
    pub fn hello(observed: i64) -> Self {
        Response::Hello {
            hello: observed.to_string(),
        }
    }

    /// The busy message.
    pub fn busy() -> Self {
        Response::Message(BUSY_MESSAGE.to_string())
    }

    /// Maps a non-error outcome to its response.
    pub fn from_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Allocated(allocation) => Response::hello(allocation.observed),
            Outcome::Busy => Response::busy(),
        }
    }

    /// Returns `true` for the busy message.
    pub fn is_busy(&self) -> bool {
        matches!(self, Response::Message(msg) if msg == BUSY_MESSAGE)
    }

    /// Encodes the response as compact JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<Vec<CounterRow>> for Response {
    fn from(rows: Vec<CounterRow>) -> Self {
        Response::Records(rows)
    }
}
