use chrono::{Datelike, Duration, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

/// Recurring schedule attached to one residence assignment.
///
/// `dias_semana` holds a comma-separated list of English weekday names
/// ("Monday,Tuesday,..."), as written by the back office. An exit time
/// earlier than the entry time means the shift ends on the following
/// calendar day.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AsignacionRecurrente {
    pub id_asignacion_recurrente: u64,
    pub id_personal_residencia: u64,
    pub dias_semana: String,
    pub hora_entrada: NaiveTime,
    pub hora_salida: NaiveTime,
    pub fecha_inicio: NaiveDate,
    pub fecha_fin: Option<NaiveDate>,
    pub activa: bool,
}

impl AsignacionRecurrente {
    /// Whether this schedule governs the given date: active, the weekday is
    /// listed, and the validity window covers the date (open-ended when
    /// `fecha_fin` is null).
    pub fn applies_on(&self, fecha: NaiveDate) -> bool {
        self.activa
            && self.dias_semana.contains(weekday_name(fecha.weekday()))
            && self.fecha_inicio <= fecha
            && self.fecha_fin.map_or(true, |fin| fin >= fecha)
    }

    pub fn is_overnight(&self) -> bool {
        self.hora_salida < self.hora_entrada
    }

    /// Calendar date the exit falls on for a shift that entered on
    /// `fecha_entrada`.
    pub fn effective_exit_date(&self, fecha_entrada: NaiveDate) -> NaiveDate {
        if self.is_overnight() {
            fecha_entrada + Duration::days(1)
        } else {
            fecha_entrada
        }
    }
}

pub fn weekday_name(dia: Weekday) -> &'static str {
    match dia {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn horario(dias: &str, entrada: (u32, u32), salida: (u32, u32)) -> AsignacionRecurrente {
        AsignacionRecurrente {
            id_asignacion_recurrente: 1,
            id_personal_residencia: 10,
            dias_semana: dias.to_string(),
            hora_entrada: NaiveTime::from_hms_opt(entrada.0, entrada.1, 0).unwrap(),
            hora_salida: NaiveTime::from_hms_opt(salida.0, salida.1, 0).unwrap(),
            fecha_inicio: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            fecha_fin: None,
            activa: true,
        }
    }

    #[test]
    fn aplica_por_dia_de_semana() {
        let h = horario("Monday,Wednesday", (8, 0), (17, 0));
        // 2024-01-10 is a Wednesday
        assert!(h.applies_on(NaiveDate::from_ymd_opt(2024, 1, 10).unwrap()));
        // 2024-01-11 is a Thursday
        assert!(!h.applies_on(NaiveDate::from_ymd_opt(2024, 1, 11).unwrap()));
    }

    #[test]
    fn respeta_ventana_de_vigencia() {
        let mut h = horario("Monday,Tuesday,Wednesday,Thursday,Friday", (8, 0), (17, 0));
        h.fecha_inicio = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        h.fecha_fin = Some(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());

        assert!(!h.applies_on(NaiveDate::from_ymd_opt(2024, 5, 31).unwrap()));
        assert!(h.applies_on(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()));
        assert!(!h.applies_on(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()));
    }

    #[test]
    fn inactiva_nunca_aplica() {
        let mut h = horario("Monday,Tuesday,Wednesday,Thursday,Friday", (8, 0), (17, 0));
        h.activa = false;
        assert!(!h.applies_on(NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()));
    }

    #[test]
    fn turno_nocturno_sale_al_dia_siguiente() {
        let nocturno = horario("Wednesday", (23, 0), (6, 0));
        assert!(nocturno.is_overnight());
        let entrada = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        assert_eq!(
            nocturno.effective_exit_date(entrada),
            NaiveDate::from_ymd_opt(2024, 1, 11).unwrap()
        );

        let diurno = horario("Wednesday", (8, 0), (17, 0));
        assert!(!diurno.is_overnight());
        assert_eq!(diurno.effective_exit_date(entrada), entrada);
    }
}
