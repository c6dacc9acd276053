use chrono::{Duration, NaiveDate, NaiveDateTime};
use sqlx::{Executor, MySql, MySqlPool};

use crate::error::{is_duplicate_key, AppError};
use crate::model::registro_asistencia::RegistroAsistencia;

const COLUMNAS: &str = "id_registro, id_personal_residencia, fecha_entrada, hora_entrada, \
     latitud_entrada, longitud_entrada, foto_entrada, fecha_salida, hora_salida, \
     latitud_salida, longitud_salida, foto_salida, estado, observaciones";

/// Row cap for history queries, regardless of the requested window.
const HISTORIAL_MAX: u32 = 100;

pub struct NewEntry<'a> {
    pub id_personal_residencia: u64,
    pub fecha_entrada: NaiveDate,
    pub hora_entrada: NaiveDateTime,
    pub latitud: f64,
    pub longitud: f64,
    pub foto: &'a str,
    pub estado: &'a str,
    pub observaciones: &'a str,
    pub usuario_creacion: u64,
}

pub struct ExitUpdate<'a> {
    pub fecha_salida: NaiveDate,
    pub hora_salida: NaiveDateTime,
    pub latitud: f64,
    pub longitud: f64,
    pub foto: &'a str,
}

/// Data access for `registro_asistencia`. Mutating callers run these
/// against their own transaction with `para_actualizar = true`, so the
/// existence check and the write are serialized against concurrent
/// markings of the same assignment.
pub struct AttendanceStore;

impl AttendanceStore {
    /// Record whose entry date is `fecha`, newest first across the given
    /// assignments. Placeholder rows (no entry time yet) are included.
    pub async fn find_today_record<'e, E>(
        ejecutor: E,
        asignaciones: &[u64],
        fecha: NaiveDate,
        para_actualizar: bool,
    ) -> Result<Option<RegistroAsistencia>, AppError>
    where
        E: Executor<'e, Database = MySql>,
    {
        if asignaciones.is_empty() {
            return Ok(None);
        }

        let marcadores = vec!["?"; asignaciones.len()].join(", ");
        let candado = if para_actualizar { " FOR UPDATE" } else { "" };
        let sql = format!(
            "SELECT {COLUMNAS} FROM registro_asistencia \
             WHERE id_personal_residencia IN ({marcadores}) AND fecha_entrada = ? \
             ORDER BY hora_entrada DESC, id_registro DESC LIMIT 1{candado}"
        );

        let mut consulta = sqlx::query_as::<_, RegistroAsistencia>(&sql);
        for id in asignaciones {
            consulta = consulta.bind(*id);
        }
        Ok(consulta.bind(fecha).fetch_optional(ejecutor).await?)
    }

    /// Most recent record with an entry and no exit across the given
    /// assignments. Supports closing shifts that span a day boundary.
    pub async fn find_open_record<'e, E>(
        ejecutor: E,
        asignaciones: &[u64],
        para_actualizar: bool,
    ) -> Result<Option<RegistroAsistencia>, AppError>
    where
        E: Executor<'e, Database = MySql>,
    {
        if asignaciones.is_empty() {
            return Ok(None);
        }

        let marcadores = vec!["?"; asignaciones.len()].join(", ");
        let candado = if para_actualizar { " FOR UPDATE" } else { "" };
        let sql = format!(
            "SELECT {COLUMNAS} FROM registro_asistencia \
             WHERE id_personal_residencia IN ({marcadores}) \
             AND hora_entrada IS NOT NULL AND hora_salida IS NULL \
             ORDER BY fecha_entrada DESC, hora_entrada DESC LIMIT 1{candado}"
        );

        let mut consulta = sqlx::query_as::<_, RegistroAsistencia>(&sql);
        for id in asignaciones {
            consulta = consulta.bind(*id);
        }
        Ok(consulta.fetch_optional(ejecutor).await?)
    }

    pub async fn fetch_by_id<'e, E>(
        ejecutor: E,
        id_registro: u64,
    ) -> Result<Option<RegistroAsistencia>, AppError>
    where
        E: Executor<'e, Database = MySql>,
    {
        let sql = format!("SELECT {COLUMNAS} FROM registro_asistencia WHERE id_registro = ?");
        Ok(sqlx::query_as::<_, RegistroAsistencia>(&sql)
            .bind(id_registro)
            .fetch_optional(ejecutor)
            .await?)
    }

    /// Inserts a fresh entry record and returns its id. A unique-key
    /// violation (another worker won the race for this assignment/date)
    /// surfaces as a conflict, never as a silent overwrite.
    pub async fn insert_entry<'e, E>(ejecutor: E, entrada: &NewEntry<'_>) -> Result<u64, AppError>
    where
        E: Executor<'e, Database = MySql>,
    {
        let resultado = sqlx::query(
            "INSERT INTO registro_asistencia \
             (id_personal_residencia, fecha_entrada, hora_entrada, latitud_entrada, \
              longitud_entrada, foto_entrada, estado, observaciones, fecha_creacion, \
              usuario_creacion) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(entrada.id_personal_residencia)
        .bind(entrada.fecha_entrada)
        .bind(entrada.hora_entrada)
        .bind(entrada.latitud)
        .bind(entrada.longitud)
        .bind(entrada.foto)
        .bind(entrada.estado)
        .bind(entrada.observaciones)
        .bind(entrada.hora_entrada)
        .bind(entrada.usuario_creacion)
        .execute(ejecutor)
        .await;

        match resultado {
            Ok(r) => Ok(r.last_insert_id()),
            Err(e) if is_duplicate_key(&e) => Err(AppError::Conflict(
                "Ya tiene entrada marcada para hoy".to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Fills the entry fields of a same-day placeholder row created by the
    /// back office (a record that exists without an entry time yet).
    pub async fn attach_entry<'e, E>(
        ejecutor: E,
        id_registro: u64,
        entrada: &NewEntry<'_>,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = MySql>,
    {
        sqlx::query(
            "UPDATE registro_asistencia \
             SET hora_entrada = ?, latitud_entrada = ?, longitud_entrada = ?, \
                 foto_entrada = ?, estado = ?, observaciones = ? \
             WHERE id_registro = ?",
        )
        .bind(entrada.hora_entrada)
        .bind(entrada.latitud)
        .bind(entrada.longitud)
        .bind(entrada.foto)
        .bind(entrada.estado)
        .bind(entrada.observaciones)
        .bind(id_registro)
        .execute(ejecutor)
        .await?;
        Ok(())
    }

    /// Writes the exit half of a record; entry fields stay untouched.
    pub async fn apply_exit<'e, E>(
        ejecutor: E,
        id_registro: u64,
        salida: &ExitUpdate<'_>,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = MySql>,
    {
        sqlx::query(
            "UPDATE registro_asistencia \
             SET fecha_salida = ?, hora_salida = ?, latitud_salida = ?, \
                 longitud_salida = ?, foto_salida = ? \
             WHERE id_registro = ?",
        )
        .bind(salida.fecha_salida)
        .bind(salida.hora_salida)
        .bind(salida.latitud)
        .bind(salida.longitud)
        .bind(salida.foto)
        .bind(id_registro)
        .execute(ejecutor)
        .await?;
        Ok(())
    }

    /// Points the entry photo at its final reference after a rebind.
    pub async fn set_foto_entrada<'e, E>(
        ejecutor: E,
        id_registro: u64,
        ruta: &str,
    ) -> Result<(), AppError>
    where
        E: Executor<'e, Database = MySql>,
    {
        sqlx::query("UPDATE registro_asistencia SET foto_entrada = ? WHERE id_registro = ?")
            .bind(ruta)
            .bind(id_registro)
            .execute(ejecutor)
            .await?;
        Ok(())
    }

    /// Attendance history for the assignments, newest first, capped at 100
    /// rows. Without explicit bounds the window defaults to the last
    /// `dias` days counted from `hoy`.
    pub async fn history(
        pool: &MySqlPool,
        asignaciones: &[u64],
        desde: Option<NaiveDate>,
        hasta: Option<NaiveDate>,
        dias: i64,
        hoy: NaiveDate,
    ) -> Result<Vec<RegistroAsistencia>, AppError> {
        if asignaciones.is_empty() {
            return Ok(Vec::new());
        }

        let marcadores = vec!["?"; asignaciones.len()].join(", ");
        let mut sql = format!(
            "SELECT {COLUMNAS} FROM registro_asistencia \
             WHERE id_personal_residencia IN ({marcadores})"
        );

        let mut fechas: Vec<NaiveDate> = Vec::new();
        if let Some(d) = desde {
            sql.push_str(" AND fecha_entrada >= ?");
            fechas.push(d);
        }
        if let Some(h) = hasta {
            sql.push_str(" AND fecha_entrada <= ?");
            fechas.push(h);
        }
        if desde.is_none() && hasta.is_none() {
            let corte = Duration::try_days(dias)
                .and_then(|ventana| hoy.checked_sub_signed(ventana))
                .ok_or_else(|| {
                    AppError::Validation("limite de días fuera de rango".to_string())
                })?;
            sql.push_str(" AND fecha_entrada >= ?");
            fechas.push(corte);
        }

        sql.push_str(&format!(
            " ORDER BY fecha_entrada DESC, hora_entrada DESC LIMIT {HISTORIAL_MAX}"
        ));

        let mut consulta = sqlx::query_as::<_, RegistroAsistencia>(&sql);
        for id in asignaciones {
            consulta = consulta.bind(*id);
        }
        for fecha in fechas {
            consulta = consulta.bind(fecha);
        }
        Ok(consulta.fetch_all(pool).await?)
    }
}
