//! Shared in-crate test fixtures

use serde_json::Value;
use tokio::sync::mpsc;

use crate::session::members::MemberInfo;
use crate::transport::ConnHandle;
use crate::types::ClientId;

/// A fake connection: a [`ConnHandle`] whose frames land in an inspectable
/// channel instead of a socket.
pub struct TestConn {
    /// Send-side handle, as the session sees it
    pub handle: ConnHandle,
    frames: mpsc::Receiver<String>,
    shutdown: mpsc::Receiver<()>,
}

impl TestConn {
    /// Fake connection with the given id.
    pub fn new(id: u64) -> Self {
        let (handle, frames, shutdown) = ConnHandle::test_pair(id, 256);
        Self {
            handle,
            frames,
            shutdown,
        }
    }

    /// Next queued frame, if any.
    pub fn try_recv_frame(&mut self) -> Option<String> {
        self.frames.try_recv().ok()
    }

    /// Next queued frame decoded into `(event, payload)`.
    pub fn try_recv_event(&mut self) -> Option<(String, Value)> {
        let frame = self.try_recv_frame()?;
        let value: Value = serde_json::from_str(&frame).ok()?;
        let event = value.get("event")?.as_str()?.to_string();
        let payload = value.get("payload").cloned().unwrap_or(Value::Null);
        Some((event, payload))
    }

    /// Drain every queued frame into `(event, payload)` pairs.
    pub fn drain_events(&mut self) -> Vec<(String, Value)> {
        let mut events = Vec::new();
        while let Some(pair) = self.try_recv_event() {
            events.push(pair);
        }
        events
    }

    /// Drain and keep only payloads of events named `name`.
    pub fn drain_named(&mut self, name: &str) -> Vec<Value> {
        self.drain_events()
            .into_iter()
            .filter(|(event, _)| event == name)
            .map(|(_, payload)| payload)
            .collect()
    }

    /// Whether the connection was asked to shut down.
    pub fn shutdown_signalled(&mut self) -> bool {
        self.shutdown.try_recv().is_ok()
    }
}

/// Member record for a fake connection.
pub fn member(client: &str, conn: &TestConn) -> MemberInfo {
    MemberInfo {
        client_id: ClientId::parse(client).unwrap(),
        display_name: client.to_string(),
        device_info: None,
        handle: conn.handle.clone(),
    }
}
