use chrono::NaiveDate;
use sqlx::MySqlPool;

use crate::error::AppError;
use crate::model::asignacion_recurrente::AsignacionRecurrente;

const COLUMNAS: &str = "id_asignacion_recurrente, id_personal_residencia, dias_semana, \
     hora_entrada, hora_salida, fecha_inicio, fecha_fin, activa";

pub struct ScheduleResolver;

impl ScheduleResolver {
    /// Schedule governing `fecha` across the given assignments, or `None`.
    ///
    /// When several assignments are queried the first match wins, in
    /// assignment-id then schedule-id order; callers that need a specific
    /// assignment pass a singleton slice. The date may be today or the
    /// origin date of an open record (overnight lookups).
    pub async fn resolve(
        pool: &MySqlPool,
        asignaciones: &[u64],
        fecha: NaiveDate,
    ) -> Result<Option<AsignacionRecurrente>, AppError> {
        if asignaciones.is_empty() {
            return Ok(None);
        }

        let marcadores = vec!["?"; asignaciones.len()].join(", ");
        let sql = format!(
            "SELECT {COLUMNAS} FROM asignacion_recurrente \
             WHERE activa = 1 AND id_personal_residencia IN ({marcadores}) \
             ORDER BY id_personal_residencia, id_asignacion_recurrente"
        );

        let mut consulta = sqlx::query_as::<_, AsignacionRecurrente>(&sql);
        for id in asignaciones {
            consulta = consulta.bind(*id);
        }

        let horarios = consulta.fetch_all(pool).await?;
        Ok(seleccionar(&horarios, fecha).cloned())
    }
}

/// First schedule in the (already deterministically ordered) candidate list
/// that governs the date.
pub fn seleccionar(
    horarios: &[AsignacionRecurrente],
    fecha: NaiveDate,
) -> Option<&AsignacionRecurrente> {
    horarios.iter().find(|h| h.applies_on(fecha))
}
