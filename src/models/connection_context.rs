use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifiers around a connection, hydrated once per checkpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionContext {
    pub connection_id: Uuid,
    pub workspace_id: Uuid,
    pub organization_id: Uuid,
    pub source_id: Uuid,
    pub destination_id: Uuid,
    pub source_definition_id: Option<Uuid>,
    pub destination_definition_id: Option<Uuid>,
}

impl ConnectionContext {
    /// Context with fresh random ids around `connection_id`.
    pub fn generate(connection_id: Uuid) -> Self {
        Self {
            connection_id,
            workspace_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            destination_id: Uuid::new_v4(),
            source_definition_id: None,
            destination_definition_id: None,
        }
    }
}
