//! WIDEn-N digipeating: eligibility checks and single-hop path rewriting.

use crate::frame::{Frame, PathElement, same_callsign};

/// Generic path aliases asking any station to repeat the frame
const HOP_ALIASES: [&str; 3] = ["WIDE", "TRACE", "RELAY"];

/// Path markers meaning "came from the internet" or "keep off RF"
const NO_REPEAT_MARKERS: [&str; 4] = ["TCPIP", "TCPXX", "NOGATE", "RFONLY"];

/// Why a frame was not repeated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// Unparsed line
    Passthrough,
    /// No WIDE/TRACE/RELAY alias anywhere in the path
    NoAlias,
    /// Some station already repeated it
    AlreadyRepeated,
    /// TCPIP/TCPXX/NOGATE/RFONLY in the path
    NoRepeatMarker,
    /// Our own transmission
    OwnFrame,
    /// The first alias has zero hops left
    HopsExhausted,
}

impl Skip {
    pub fn as_str(self) -> &'static str {
        match self {
            Skip::Passthrough => "passthrough",
            Skip::NoAlias => "no_alias",
            Skip::AlreadyRepeated => "already_repeated",
            Skip::NoRepeatMarker => "no_repeat_marker",
            Skip::OwnFrame => "own_frame",
            Skip::HopsExhausted => "hops_exhausted",
        }
    }
}

/// Check eligibility in the fixed order; the first failing check wins
pub fn check(frame: &Frame, own_callsign: &str) -> Result<(), Skip> {
    if frame.is_passthrough() {
        return Err(Skip::Passthrough);
    }
    if !frame
        .path
        .iter()
        .any(|element| HOP_ALIASES.iter().any(|alias| element.contains(alias)))
    {
        return Err(Skip::NoAlias);
    }
    if frame.path.iter().any(PathElement::has_repeat_marker) {
        return Err(Skip::AlreadyRepeated);
    }
    if frame
        .path
        .iter()
        .any(|element| NO_REPEAT_MARKERS.iter().any(|marker| element.contains(marker)))
    {
        return Err(Skip::NoRepeatMarker);
    }
    if same_callsign(&frame.source, own_callsign) {
        return Err(Skip::OwnFrame);
    }
    Ok(())
}

fn is_hop_alias(element: &PathElement) -> bool {
    HOP_ALIASES.iter().any(|alias| element.call.starts_with(alias))
}

/// Hops left on an alias element.
/// Without a numeric suffix (`RELAY`, `WIDE2-X`) it counts as one hop.
fn remaining_hops(element: &PathElement) -> u8 {
    element.hops().unwrap_or(1)
}

/// Rewrite the path for retransmission, consuming exactly one hop.
///
/// The first alias in the path is the hop. It is decremented and `<own>*` is
/// inserted right before it. When that alias is already at zero the frame is
/// not repeated, even if a later alias still has hops left.
pub fn rewrite(frame: &Frame, own_callsign: &str) -> Result<Frame, Skip> {
    check(frame, own_callsign)?;

    // Only the first alias counts; later ones are never considered
    let position = frame
        .path
        .iter()
        .position(is_hop_alias)
        .ok_or(Skip::HopsExhausted)?;

    let consumed = &frame.path[position];
    let hops = remaining_hops(consumed);
    if hops == 0 {
        return Err(Skip::HopsExhausted);
    }
    let decremented = PathElement {
        call: consumed.call.clone(),
        ssid: Some((hops - 1).to_string()),
        used: false,
    };

    let mut path = Vec::with_capacity(frame.path.len() + 1);
    path.extend_from_slice(&frame.path[..position]);
    path.push(PathElement::used_by(own_callsign));
    path.push(decremented);
    path.extend_from_slice(&frame.path[position + 1..]);

    Ok(Frame {
        source: frame.source.clone(),
        destination: frame.destination.clone(),
        path,
        info: frame.info.clone(),
    })
}

/// Frame to retransmit on radio, or `None` when it must not be repeated
pub fn digipeat(frame: &Frame, own_callsign: &str) -> Option<Frame> {
    rewrite(frame, own_callsign).ok()
}
