//! Peer signaling relay
//!
//! `peer-offer`, `peer-answer`, and `peer-ice-candidate` frames are opaque
//! to the server: the payload is forwarded verbatim to the client named in
//! its `to` field, within the sender's session. No controller
//! authorization applies.

use serde_json::Value;

use crate::error::EventError;
use crate::router::event::ServerEvent;
use crate::router::handler::ConnCtx;
use crate::types::ClientId;

/// Forward a signaling payload to its target.
///
/// # Errors
/// `NotFound` when the sender is unbound or the target is not connected;
/// `InvalidArgument` when the payload lacks a usable `to` field.
pub async fn relay(ctx: &ConnCtx, event: &str, payload: Value) -> Result<Value, EventError> {
    let handle = ctx
        .session()
        .ok_or_else(|| EventError::NotFound("Join a session first".to_string()))?;

    let to = payload
        .get("to")
        .and_then(Value::as_str)
        .ok_or_else(|| EventError::InvalidArgument("Missing 'to' field".to_string()))?;
    let target = ClientId::parse(to)
        .map_err(|_| EventError::InvalidArgument("Invalid target client id".to_string()))?;

    let forwarded = match event {
        "peer-offer" => ServerEvent::PeerOffer(payload),
        "peer-answer" => ServerEvent::PeerAnswer(payload),
        _ => ServerEvent::PeerIceCandidate(payload),
    };

    let session = handle.state.lock().await;
    if !session.send_to_client(&target, &forwarded) {
        return Err(EventError::NotFound(
            "Target client is not connected".to_string(),
        ));
    }
    Ok(Value::Object(serde_json::Map::new()))
}
