//! Per-session member table
//!
//! Maps transport connections to client identities and owns the controller
//! pointers. `controller_client` is authoritative; `controller_conn` is the
//! derived binding and is re-pointed on reconnect.

use std::collections::{BTreeMap, HashMap};

use crate::transport::ConnHandle;
use crate::types::{ClientId, ConnId};

/// One connected member of a session.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    /// Stable client identity
    pub client_id: ClientId,
    /// Sanitized display name
    pub display_name: String,
    /// Opaque device description supplied at join
    pub device_info: Option<serde_json::Value>,
    /// Send-side handle of the member's connection
    pub handle: ConnHandle,
}

/// What an insert did to the table.
#[derive(Debug)]
pub struct JoinOutcome {
    /// Handle of an older connection evicted because it held the same
    /// client id (the client reconnected)
    pub evicted: Option<ConnHandle>,
    /// Whether the controller bindings changed in any way
    pub controller_changed: bool,
}

/// What a removal did to the table.
#[derive(Debug)]
pub struct LeaveOutcome {
    /// The removed member, if the connection was present
    pub removed: Option<MemberInfo>,
    /// Whether the departing connection held the controller binding
    pub controller_changed: bool,
}

/// conn_id ↔ client_id table plus controller pointers.
///
/// Iteration order is join order (conn ids are monotonic).
#[derive(Debug, Default)]
pub struct MemberTable {
    members: BTreeMap<ConnId, MemberInfo>,
    by_client: HashMap<ClientId, ConnId>,
    controller_client: Option<ClientId>,
    controller_conn: Option<ConnId>,
}

impl MemberTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connected members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the session has no connected members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Current controller connection, if bound.
    #[must_use]
    pub fn controller_conn(&self) -> Option<ConnId> {
        self.controller_conn
    }

    /// Authoritative controller client, if any.
    #[must_use]
    pub fn controller_client(&self) -> Option<&ClientId> {
        self.controller_client.as_ref()
    }

    /// Whether `conn_id` is the live controller connection.
    #[must_use]
    pub fn is_controller_conn(&self, conn_id: ConnId) -> bool {
        self.controller_conn == Some(conn_id)
    }

    /// Member bound to a connection.
    #[must_use]
    pub fn get(&self, conn_id: ConnId) -> Option<&MemberInfo> {
        self.members.get(&conn_id)
    }

    /// Member holding a client identity.
    #[must_use]
    pub fn get_by_client(&self, client_id: &ClientId) -> Option<&MemberInfo> {
        self.by_client
            .get(client_id)
            .and_then(|conn| self.members.get(conn))
    }

    /// Connection currently bound to a client identity.
    #[must_use]
    pub fn conn_of(&self, client_id: &ClientId) -> Option<ConnId> {
        self.by_client.get(client_id).copied()
    }

    /// Iterate members in join order.
    pub fn iter(&self) -> impl Iterator<Item = (&ConnId, &MemberInfo)> {
        self.members.iter()
    }

    /// Install a member.
    ///
    /// A live connection already holding the same client id is evicted and
    /// returned so the caller can signal it to shut down. If the session has
    /// no controller client at all the joiner becomes controller; if the
    /// joining client id matches the retained `controller_client`, the
    /// controller binding follows the client to the new connection. A
    /// retained `controller_client` whose connection merely dropped keeps
    /// its reservation, so an unrelated joiner never takes the role out
    /// from under a reconnecting controller.
    pub fn join(&mut self, conn_id: ConnId, info: MemberInfo) -> JoinOutcome {
        let client_id = info.client_id.clone();

        let evicted = self.by_client.get(&client_id).copied().and_then(|old| {
            let old_info = self.members.remove(&old)?;
            if self.controller_conn == Some(old) {
                self.controller_conn = None;
            }
            Some(old_info.handle)
        });

        self.by_client.insert(client_id.clone(), conn_id);
        self.members.insert(conn_id, info);

        let controller_changed = if self.controller_client.as_ref() == Some(&client_id) {
            // Reconnect path: the binding follows the client.
            let changed = self.controller_conn != Some(conn_id);
            self.controller_conn = Some(conn_id);
            changed
        } else if self.controller_client.is_none() {
            self.controller_client = Some(client_id);
            self.controller_conn = Some(conn_id);
            true
        } else {
            false
        };

        JoinOutcome {
            evicted,
            controller_changed,
        }
    }

    /// Remove the member bound to a connection.
    ///
    /// When the departing connection held the controller binding,
    /// `controller_conn` is re-pointed at the client's current connection if
    /// one remains, otherwise left unbound (`controller_client` is retained
    /// so a reconnect can reclaim the role).
    pub fn leave(&mut self, conn_id: ConnId) -> LeaveOutcome {
        let Some(removed) = self.members.remove(&conn_id) else {
            return LeaveOutcome {
                removed: None,
                controller_changed: false,
            };
        };

        if self.by_client.get(&removed.client_id) == Some(&conn_id) {
            self.by_client.remove(&removed.client_id);
        }

        let mut controller_changed = false;
        if self.controller_conn == Some(conn_id) {
            self.controller_conn = self
                .controller_client
                .as_ref()
                .and_then(|c| self.by_client.get(c))
                .copied();
            controller_changed = self.controller_conn.is_none();
        }

        LeaveOutcome {
            removed: Some(removed),
            controller_changed,
        }
    }

    /// Bind the controller role to a client and its live connection.
    ///
    /// Returns the bound connection, or `None` (and no change) if the client
    /// is not currently connected.
    pub fn set_controller(&mut self, client_id: &ClientId) -> Option<ConnId> {
        let conn = self.conn_of(client_id)?;
        self.controller_client = Some(client_id.clone());
        self.controller_conn = Some(conn);
        Some(conn)
    }
}
