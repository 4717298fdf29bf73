//! Interactions and the cassette that orders them

use std::collections::VecDeque;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::http::{HttpRequest, HttpResponse};

/// Which way an interaction travelled through the proxy
///
/// Persisted as `type: 0` for outgoing and `type: 1` for incoming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// A call the proxy made to the remote API on the client's behalf
    Outgoing = 0,
    /// A webhook pushed by the remote service and forwarded to the local app
    Incoming = 1,
}

impl Serialize for Direction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for Direction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Self::Outgoing),
            1 => Ok(Self::Incoming),
            other => Err(serde::de::Error::custom(format!(
                "unknown interaction type {other}, expected 0 (outgoing) or 1 (incoming)"
            ))),
        }
    }
}

/// One recorded exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// Direction tag
    #[serde(rename = "type")]
    pub direction: Direction,
    /// Request as received
    pub request: HttpRequest,
    /// Response as returned
    pub response: HttpResponse,
}

impl Interaction {
    /// Whether this is a webhook delivery
    #[must_use]
    pub fn is_incoming(&self) -> bool {
        self.direction == Direction::Incoming
    }
}

/// Ordered sequence of interactions
///
/// Appended to while recording. While replaying, matched interactions are
/// removed so each recorded event is served at most once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cassette {
    interactions: VecDeque<Interaction>,
}

impl Cassette {
    /// Create an empty cassette
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an interaction at the end
    pub fn push(&mut self, direction: Direction, request: HttpRequest, response: HttpResponse) {
        self.interactions.push_back(Interaction {
            direction,
            request,
            response,
        });
    }

    /// Number of interactions left
    #[must_use]
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether the cassette is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Iterate in cassette order
    pub fn iter(&self) -> impl Iterator<Item = &Interaction> {
        self.interactions.iter()
    }

    /// First remaining interaction
    #[must_use]
    pub fn front(&self) -> Option<&Interaction> {
        self.interactions.front()
    }

    /// Remove and return the interaction at `index`
    pub fn remove(&mut self, index: usize) -> Option<Interaction> {
        self.interactions.remove(index)
    }

    /// Whether everything left is incoming, so no live request can ever reach it
    #[must_use]
    pub fn only_incoming(&self) -> bool {
        !self.interactions.is_empty() && self.interactions.iter().all(Interaction::is_incoming)
    }

    /// Pop the contiguous run of incoming interactions starting at `index`
    ///
    /// Stops at the first outgoing interaction or the end of the cassette.
    pub fn take_incoming_run(&mut self, index: usize) -> Vec<Interaction> {
        let index = index.min(self.interactions.len());
        let run = self
            .interactions
            .iter()
            .skip(index)
            .take_while(|i| i.is_incoming())
            .count();
        self.interactions.drain(index..index + run).collect()
    }
}

impl FromIterator<Interaction> for Cassette {
    fn from_iter<T: IntoIterator<Item = Interaction>>(iter: T) -> Self {
        Self {
            interactions: iter.into_iter().collect(),
        }
    }
}
