use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Posting of a staff member to a residence. A staff member may hold
/// several concurrently-active postings. Owned by HR; this service only
/// reads it to resolve which assignments a marking applies to.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PersonalResidencia {
    pub id: u64,
    pub id_personal: u64,
    pub id_residencia: u64,
    pub cargo: Option<String>,
    pub activo: bool,
    pub fecha_asignacion: Option<NaiveDate>,
    pub fecha_fin: Option<NaiveDate>,
}
