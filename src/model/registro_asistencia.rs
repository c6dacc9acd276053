use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Attendance marking status persisted in `registro_asistencia.estado`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum EstadoRegistro {
    Presente,
    Tardanza,
}

/// One attendance record for a residence assignment. A record with an
/// entry time and no exit time is an "open" shift; at most one open record
/// may exist per assignment.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RegistroAsistencia {
    pub id_registro: u64,
    pub id_personal_residencia: u64,
    pub fecha_entrada: NaiveDate,
    pub hora_entrada: Option<NaiveDateTime>,
    pub latitud_entrada: Option<f64>,
    pub longitud_entrada: Option<f64>,
    pub foto_entrada: Option<String>,
    pub fecha_salida: Option<NaiveDate>,
    pub hora_salida: Option<NaiveDateTime>,
    pub latitud_salida: Option<f64>,
    pub longitud_salida: Option<f64>,
    pub foto_salida: Option<String>,
    pub estado: Option<String>,
    pub observaciones: Option<String>,
}

impl RegistroAsistencia {
    pub fn tiene_entrada(&self) -> bool {
        self.hora_entrada.is_some()
    }

    pub fn tiene_salida(&self) -> bool {
        self.hora_salida.is_some()
    }

    pub fn is_open(&self) -> bool {
        self.tiene_entrada() && !self.tiene_salida()
    }
}
