use serde::{Deserialize, Serialize};

pub const ESTADO_ACTIVO: &str = "Activo";

/// Staff record. Owned by HR; read-only to this service.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Personal {
    pub id_personal: u64,
    pub nombres: String,
    pub apellidos: String,
    pub dni_ce: String,
    pub estado: String,
}

impl Personal {
    pub fn esta_activo(&self) -> bool {
        self.estado == ESTADO_ACTIVO
    }
}
