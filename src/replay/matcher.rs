//! Cassette scan that picks the recorded answer for a live request

use crate::cassette::{Cassette, HttpRequest, HttpResponse, Interaction};
use crate::{PlaybackError, Result};

use super::Comparator;

/// Recorded response plus the webhooks that followed it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matched {
    /// Response to send back to the client
    pub response: HttpResponse,
    /// Incoming interactions recorded right after the matched call, in order
    pub webhooks: Vec<Interaction>,
}

/// Position of the interaction `comparator` selects for `live`, if any
///
/// Scans outgoing interactions from the front, remembering the latest accepted
/// one, and stops at the first verdict that short-circuits.
#[must_use]
pub fn find_match(cassette: &Cassette, live: &HttpRequest, comparator: &Comparator) -> Option<usize> {
    let mut chosen = None;

    for (index, interaction) in cassette.iter().enumerate() {
        if interaction.is_incoming() {
            continue;
        }

        let verdict = comparator.compare(&interaction.request, live);
        if verdict.accept {
            chosen = Some(index);
            if verdict.short_circuit {
                break;
            }
        }
    }

    chosen
}

/// Consume the interaction matching `live` and the webhook run behind it
///
/// # Errors
///
/// Returns `NoMatchingEvents` when nothing is accepted; the cassette is left
/// untouched in that case.
pub fn match_request(
    cassette: &mut Cassette,
    live: &HttpRequest,
    comparator: &Comparator,
) -> Result<Matched> {
    let index = find_match(cassette, live, comparator).ok_or(PlaybackError::NoMatchingEvents)?;
    let interaction = cassette
        .remove(index)
        .ok_or(PlaybackError::NoMatchingEvents)?;
    let webhooks = cassette.take_incoming_run(index);

    Ok(Matched {
        response: interaction.response,
        webhooks,
    })
}
