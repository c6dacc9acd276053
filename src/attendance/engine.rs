use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::Serialize;
use sqlx::MySqlPool;

use crate::attendance::leave::{LeaveChecker, LeaveStatus};
use crate::attendance::photo::{PhotoBinder, PhotoStore, TipoFoto};
use crate::attendance::schedule::ScheduleResolver;
use crate::attendance::store::{AttendanceStore, ExitUpdate, NewEntry};
use crate::auth::auth::AuthUser;
use crate::error::AppError;
use crate::model::asignacion_recurrente::AsignacionRecurrente;
use crate::model::personal::Personal;
use crate::model::personal_residencia::PersonalResidencia;
use crate::model::registro_asistencia::{EstadoRegistro, RegistroAsistencia};

/// Fixed note identifying the mobile self-service channel.
pub const NOTA_APP_MOVIL: &str = "Marcado desde app móvil";

const COLUMNAS_PERSONAL: &str = "id_personal, nombres, apellidos, dni_ce, estado";
const COLUMNAS_ASIGNACION: &str =
    "id, id_personal, id_residencia, cargo, activo, fecha_asignacion, fecha_fin";

/// All timestamps in this module are wall-clock time in Lima.
pub fn ahora_lima() -> NaiveDateTime {
    Utc::now().with_timezone(&chrono_tz::America::Lima).naive_local()
}

/// Who the request acts for: the authenticated user's own staff record, or
/// a staff member identified by national id (supervisor/kiosk marking).
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityParams<'a> {
    pub dni_ce: Option<&'a str>,
    pub id_personal_residencia: Option<u64>,
}

pub struct FotoSubida {
    pub bytes: Vec<u8>,
    pub extension: String,
}

pub struct Marcacion {
    pub latitud: f64,
    pub longitud: f64,
    pub foto: FotoSubida,
}

/// Resolved actor: the staff member plus every active residence
/// assignment, in assignment-id order.
pub struct Actor {
    pub personal: Personal,
    pub asignaciones: Vec<PersonalResidencia>,
}

/// Assignment ids the operation works over. An explicit assignment must
/// belong to the actor's active set and narrows the search to it.
pub fn narrow(actor: &Actor, explicita: Option<u64>) -> Result<Vec<u64>, AppError> {
    match explicita {
        None => Ok(actor.asignaciones.iter().map(|a| a.id).collect()),
        Some(id) if actor.asignaciones.iter().any(|a| a.id == id) => Ok(vec![id]),
        Some(_) => Err(AppError::Authorization(
            "La residencia indicada no está asignada al empleado".to_string(),
        )),
    }
}

/// Inputs for one status derivation, all fetched for the same instant.
pub struct SnapshotInputs<'a> {
    pub fecha: NaiveDate,
    pub registro_hoy: Option<&'a RegistroAsistencia>,
    /// Most recent open record; may predate `fecha` (overnight carryover).
    pub registro_abierto: Option<&'a RegistroAsistencia>,
    pub horario_hoy: Option<&'a AsignacionRecurrente>,
    /// Schedule governing the open record's origin date, when that date is
    /// earlier than `fecha`.
    pub horario_origen: Option<&'a AsignacionRecurrente>,
    pub leave: LeaveStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EstadoDerivado {
    pub tiene_entrada: bool,
    pub tiene_salida: bool,
    pub puede_marcar_entrada: bool,
    pub puede_marcar_salida: bool,
    pub tiene_horario: bool,
    /// Assignment the governing schedule belongs to.
    pub id_personal_residencia_horario: Option<u64>,
    pub mensaje: String,
}

/// Pure state derivation: same inputs, same snapshot.
pub fn derivar_estado(i: &SnapshotInputs) -> EstadoDerivado {
    let tiene_entrada = i.registro_hoy.map_or(false, |r| r.tiene_entrada());
    let tiene_salida = i.registro_hoy.map_or(false, |r| r.tiene_salida());
    let tiene_horario = i.horario_hoy.is_some() || i.horario_origen.is_some();
    let puede_marcar_entrada = !tiene_entrada && i.horario_hoy.is_some() && !i.leave.any();
    let puede_marcar_salida = i.registro_abierto.is_some();

    let mensaje = if i.leave.en_vacaciones {
        "El empleado está en vacaciones aprobadas".to_string()
    } else if i.leave.en_licencia {
        "El empleado está en licencia aprobada".to_string()
    } else if !tiene_horario {
        "No tiene horario asignado para hoy".to_string()
    } else if tiene_entrada && tiene_salida {
        "Asistencia completa del día".to_string()
    } else if let Some(abierto) = i.registro_abierto {
        if abierto.fecha_entrada < i.fecha {
            format!(
                "Puede marcar su salida (entrada del {})",
                abierto.fecha_entrada.format("%Y-%m-%d")
            )
        } else {
            "Puede marcar su salida".to_string()
        }
    } else {
        "Puede marcar su entrada".to_string()
    };

    EstadoDerivado {
        tiene_entrada,
        tiene_salida,
        puede_marcar_entrada,
        puede_marcar_salida,
        tiene_horario,
        id_personal_residencia_horario: i
            .horario_hoy
            .or(i.horario_origen)
            .map(|h| h.id_personal_residencia),
        mensaje,
    }
}

/// Presente, or Tardanza when the marking happens strictly after the
/// scheduled entry time. Minute precision, matching what the app displays.
pub fn estado_entrada(ahora: NaiveTime, hora_entrada_horario: NaiveTime) -> EstadoRegistro {
    if truncar_minuto(ahora) > truncar_minuto(hora_entrada_horario) {
        EstadoRegistro::Tardanza
    } else {
        EstadoRegistro::Presente
    }
}

fn truncar_minuto(t: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(t.hour(), t.minute(), 0).unwrap_or(t)
}

/// Clock-in preconditions once a schedule resolved: an existing entry
/// reports the duplicate before any leave message, so a double tap gets
/// "already marked" even while a leave record covers the day.
pub fn precondicion_entrada(
    existente: Option<&RegistroAsistencia>,
    leave: LeaveStatus,
) -> Result<(), AppError> {
    if existente.map_or(false, |r| r.tiene_entrada()) {
        return Err(AppError::Conflict(
            "Ya tiene entrada marcada para hoy".to_string(),
        ));
    }
    if leave.en_vacaciones {
        return Err(AppError::Conflict(
            "No puede marcar asistencia: está en vacaciones aprobadas".to_string(),
        ));
    }
    if leave.en_licencia {
        return Err(AppError::Conflict(
            "No puede marcar asistencia: está en licencia aprobada".to_string(),
        ));
    }
    Ok(())
}

/// The exit must fall strictly after the entry and within the allowed
/// window; anything older is a stale open record that needs back-office
/// correction, not a mobile exit.
pub fn validar_salida(
    entrada: NaiveDateTime,
    salida: NaiveDateTime,
    max_horas: i64,
) -> Result<(), AppError> {
    if salida <= entrada {
        return Err(AppError::Conflict(
            "La hora de salida debe ser posterior a la hora de entrada".to_string(),
        ));
    }
    if salida - entrada > Duration::hours(max_horas) {
        return Err(AppError::Conflict(format!(
            "La salida excede la ventana máxima de {max_horas} horas desde la entrada"
        )));
    }
    Ok(())
}

pub struct EstadoResumen {
    pub fecha: NaiveDate,
    pub derivado: EstadoDerivado,
    pub en_vacaciones: bool,
    pub en_licencia: bool,
    pub registro: Option<RegistroAsistencia>,
    pub registro_abierto: Option<RegistroAsistencia>,
    /// Governing schedule and the entry date it was resolved for, so the
    /// effective exit boundary can be displayed consistently.
    pub horario: Option<(AsignacionRecurrente, NaiveDate)>,
}

pub struct AsistenciaEngine;

impl AsistenciaEngine {
    pub async fn resolver_actor(
        pool: &MySqlPool,
        auth: &AuthUser,
        dni_ce: Option<&str>,
    ) -> Result<Actor, AppError> {
        let personal = match dni_ce {
            Some(dni) => {
                let personal = personal_por_dni(pool, dni).await?.ok_or_else(|| {
                    AppError::NotFound(
                        "No se encontró personal con el DNI proporcionado".to_string(),
                    )
                })?;
                if !personal.esta_activo() {
                    return Err(AppError::Authorization(
                        "El personal no está activo".to_string(),
                    ));
                }
                personal
            }
            None => {
                let id_personal = auth.id_personal.ok_or_else(|| {
                    AppError::Authorization(
                        "El usuario no está asociado a un empleado".to_string(),
                    )
                })?;
                personal_por_id(pool, id_personal).await?.ok_or_else(|| {
                    AppError::NotFound("No se encontró el personal del usuario".to_string())
                })?
            }
        };

        let asignaciones = asignaciones_activas(pool, personal.id_personal).await?;
        if asignaciones.is_empty() {
            return Err(AppError::Authorization(
                "El empleado no tiene residencias asignadas activas".to_string(),
            ));
        }

        Ok(Actor {
            personal,
            asignaciones,
        })
    }

    /// Status snapshot for "now": today's record, the most recent open
    /// record (an open shift from a prior date keeps exit marking
    /// available), the governing schedule and leave flags.
    pub async fn estado(
        pool: &MySqlPool,
        leave: &LeaveChecker,
        tenant: &str,
        auth: &AuthUser,
        params: IdentityParams<'_>,
    ) -> Result<EstadoResumen, AppError> {
        let actor = Self::resolver_actor(pool, auth, params.dni_ce).await?;
        let ids = narrow(&actor, params.id_personal_residencia)?;
        let hoy = ahora_lima().date();

        let registro_hoy = AttendanceStore::find_today_record(pool, &ids, hoy, false).await?;
        let registro_abierto = AttendanceStore::find_open_record(pool, &ids, false).await?;
        let horario_hoy = ScheduleResolver::resolve(pool, &ids, hoy).await?;
        let horario_origen = match &registro_abierto {
            Some(abierto) if abierto.fecha_entrada < hoy => {
                ScheduleResolver::resolve(pool, &[abierto.id_personal_residencia], abierto.fecha_entrada)
                    .await?
            }
            _ => None,
        };
        let leave_status = leave
            .status_for(pool, tenant, actor.personal.id_personal, hoy)
            .await;

        let derivado = derivar_estado(&SnapshotInputs {
            fecha: hoy,
            registro_hoy: registro_hoy.as_ref(),
            registro_abierto: registro_abierto.as_ref(),
            horario_hoy: horario_hoy.as_ref(),
            horario_origen: horario_origen.as_ref(),
            leave: leave_status,
        });

        let horario = match (horario_hoy, horario_origen, &registro_abierto) {
            (Some(h), _, _) => Some((h, hoy)),
            (None, Some(h), Some(abierto)) => Some((h, abierto.fecha_entrada)),
            _ => None,
        };

        Ok(EstadoResumen {
            fecha: hoy,
            derivado,
            en_vacaciones: leave_status.en_vacaciones,
            en_licencia: leave_status.en_licencia,
            registro: registro_hoy,
            registro_abierto,
            horario,
        })
    }

    /// Clock-in. Precondition order: active assignments, schedule today,
    /// no prior entry today, not on approved leave. The entry check runs
    /// once before the photo is stored and again under lock inside the
    /// transaction, so concurrent attempts for the same assignment/date
    /// cannot both succeed.
    pub async fn marcar_entrada<S: PhotoStore>(
        pool: &MySqlPool,
        leave: &LeaveChecker,
        binder: &PhotoBinder,
        store: &S,
        tenant: &str,
        auth: &AuthUser,
        params: IdentityParams<'_>,
        marca: Marcacion,
    ) -> Result<RegistroAsistencia, AppError> {
        let actor = Self::resolver_actor(pool, auth, params.dni_ce).await?;
        let ids = narrow(&actor, params.id_personal_residencia)?;
        let ahora = ahora_lima();
        let hoy = ahora.date();

        let horario = ScheduleResolver::resolve(pool, &ids, hoy)
            .await?
            .ok_or_else(|| {
                AppError::Conflict("No tiene horario asignado para hoy".to_string())
            })?;
        let asignacion = horario.id_personal_residencia;

        let existente =
            AttendanceStore::find_today_record(pool, &[asignacion], hoy, false).await?;
        let leave_status = leave
            .status_for(pool, tenant, actor.personal.id_personal, hoy)
            .await;
        precondicion_entrada(existente.as_ref(), leave_status)?;

        let estado = estado_entrada(ahora.time(), horario.hora_entrada).to_string();

        // phase 1: the record id is unknown until the row exists. The blob
        // is only written once the preconditions passed, so a duplicate
        // tap does not leave an orphan on disk.
        let ruta_provisional = binder
            .guardar(
                store,
                &marca.foto.bytes,
                TipoFoto::Entrada,
                PhotoBinder::ID_PROVISIONAL,
                actor.personal.id_personal,
                hoy,
                &marca.foto.extension,
            )
            .await?;

        let entrada = NewEntry {
            id_personal_residencia: asignacion,
            fecha_entrada: hoy,
            hora_entrada: ahora,
            latitud: marca.latitud,
            longitud: marca.longitud,
            foto: &ruta_provisional,
            estado: &estado,
            observaciones: NOTA_APP_MOVIL,
            usuario_creacion: auth.user_id,
        };

        let mut tx = pool.begin().await?;

        let existente =
            AttendanceStore::find_today_record(&mut *tx, &[asignacion], hoy, true).await?;
        let id_registro = match existente {
            Some(r) if r.tiene_entrada() => {
                // lost the race after storing the blob; no row points at it
                limpiar_blob(store, &ruta_provisional).await;
                return Err(AppError::Conflict(
                    "Ya tiene entrada marcada para hoy".to_string(),
                ));
            }
            Some(r) => {
                AttendanceStore::attach_entry(&mut *tx, r.id_registro, &entrada).await?;
                r.id_registro
            }
            None => match AttendanceStore::insert_entry(&mut *tx, &entrada).await {
                Ok(id) => id,
                Err(e) => {
                    limpiar_blob(store, &ruta_provisional).await;
                    return Err(e);
                }
            },
        };

        // phase 2: move the blob to its definitive reference; on failure
        // the record keeps the provisional path, which still resolves
        if let Some(ruta_final) = binder
            .rebind(
                store,
                &ruta_provisional,
                TipoFoto::Entrada,
                id_registro,
                actor.personal.id_personal,
                hoy,
            )
            .await
        {
            AttendanceStore::set_foto_entrada(&mut *tx, id_registro, &ruta_final).await?;
        }

        tx.commit().await?;

        tracing::info!(
            id_registro,
            id_personal = actor.personal.id_personal,
            asignacion,
            estado,
            "entrada marcada"
        );

        AttendanceStore::fetch_by_id(pool, id_registro)
            .await?
            .ok_or(AppError::Infrastructure)
    }

    /// Clock-out. Closes today's record when it is open, otherwise the most
    /// recent open record across the assignments (overnight shifts).
    pub async fn marcar_salida<S: PhotoStore>(
        pool: &MySqlPool,
        binder: &PhotoBinder,
        store: &S,
        auth: &AuthUser,
        params: IdentityParams<'_>,
        marca: Marcacion,
        max_horas: i64,
    ) -> Result<RegistroAsistencia, AppError> {
        let actor = Self::resolver_actor(pool, auth, params.dni_ce).await?;
        let ids = narrow(&actor, params.id_personal_residencia)?;
        let ahora = ahora_lima();
        let hoy = ahora.date();

        let mut tx = pool.begin().await?;

        let registro_hoy = AttendanceStore::find_today_record(&mut *tx, &ids, hoy, true).await?;
        let abierto = match registro_hoy {
            Some(r) if r.is_open() => r,
            Some(r) if r.tiene_salida() => {
                match AttendanceStore::find_open_record(&mut *tx, &ids, true).await? {
                    Some(otro) => otro,
                    None => {
                        return Err(AppError::Conflict(
                            "Ya tiene salida marcada para hoy".to_string(),
                        ));
                    }
                }
            }
            _ => AttendanceStore::find_open_record(&mut *tx, &ids, true)
                .await?
                .ok_or_else(|| {
                    AppError::Conflict("No tiene entrada marcada para hoy".to_string())
                })?,
        };

        let entrada = abierto.hora_entrada.ok_or_else(|| {
            AppError::Conflict("No tiene hora de entrada registrada".to_string())
        })?;
        validar_salida(entrada, ahora, max_horas)?;

        let ruta = binder
            .guardar(
                store,
                &marca.foto.bytes,
                TipoFoto::Salida,
                abierto.id_registro,
                actor.personal.id_personal,
                hoy,
                &marca.foto.extension,
            )
            .await?;

        AttendanceStore::apply_exit(
            &mut *tx,
            abierto.id_registro,
            &ExitUpdate {
                fecha_salida: hoy,
                hora_salida: ahora,
                latitud: marca.latitud,
                longitud: marca.longitud,
                foto: &ruta,
            },
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            id_registro = abierto.id_registro,
            id_personal = actor.personal.id_personal,
            "salida marcada"
        );

        AttendanceStore::fetch_by_id(pool, abierto.id_registro)
            .await?
            .ok_or(AppError::Infrastructure)
    }

    pub async fn historial(
        pool: &MySqlPool,
        auth: &AuthUser,
        params: IdentityParams<'_>,
        desde: Option<NaiveDate>,
        hasta: Option<NaiveDate>,
        dias: i64,
    ) -> Result<Vec<RegistroAsistencia>, AppError> {
        let actor = Self::resolver_actor(pool, auth, params.dni_ce).await?;
        let ids = narrow(&actor, params.id_personal_residencia)?;
        let hoy = ahora_lima().date();
        AttendanceStore::history(pool, &ids, desde, hasta, dias, hoy).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fecha(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn hora(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn horario(asignacion: u64, entrada: NaiveTime, salida: NaiveTime) -> AsignacionRecurrente {
        AsignacionRecurrente {
            id_asignacion_recurrente: 1,
            id_personal_residencia: asignacion,
            dias_semana: "Monday,Tuesday,Wednesday,Thursday,Friday,Saturday,Sunday".to_string(),
            hora_entrada: entrada,
            hora_salida: salida,
            fecha_inicio: fecha(2024, 1, 1),
            fecha_fin: None,
            activa: true,
        }
    }

    fn registro(asignacion: u64, dia: NaiveDate) -> RegistroAsistencia {
        RegistroAsistencia {
            id_registro: 1,
            id_personal_residencia: asignacion,
            fecha_entrada: dia,
            hora_entrada: None,
            latitud_entrada: None,
            longitud_entrada: None,
            foto_entrada: None,
            fecha_salida: None,
            hora_salida: None,
            latitud_salida: None,
            longitud_salida: None,
            foto_salida: None,
            estado: None,
            observaciones: None,
        }
    }

    fn abierto(asignacion: u64, dia: NaiveDate, h: NaiveTime) -> RegistroAsistencia {
        let mut r = registro(asignacion, dia);
        r.hora_entrada = Some(dia.and_time(h));
        r
    }

    fn completo(asignacion: u64, dia: NaiveDate) -> RegistroAsistencia {
        let mut r = abierto(asignacion, dia, hora(8, 0));
        r.fecha_salida = Some(dia);
        r.hora_salida = Some(dia.and_time(hora(17, 0)));
        r
    }

    fn personal_activo() -> Personal {
        Personal {
            id_personal: 7,
            nombres: "Ana".to_string(),
            apellidos: "Quispe".to_string(),
            dni_ce: "12345678".to_string(),
            estado: "Activo".to_string(),
        }
    }

    fn asignacion(id: u64) -> PersonalResidencia {
        PersonalResidencia {
            id,
            id_personal: 7,
            id_residencia: 3,
            cargo: Some("Conserje".to_string()),
            activo: true,
            fecha_asignacion: Some(fecha(2024, 1, 1)),
            fecha_fin: None,
        }
    }

    #[test]
    fn sin_horario_no_puede_marcar_entrada() {
        let hoy = fecha(2024, 1, 10);
        let derivado = derivar_estado(&SnapshotInputs {
            fecha: hoy,
            registro_hoy: None,
            registro_abierto: None,
            horario_hoy: None,
            horario_origen: None,
            leave: LeaveStatus::default(),
        });
        assert!(!derivado.puede_marcar_entrada);
        assert!(!derivado.tiene_horario);
        assert_eq!(derivado.mensaje, "No tiene horario asignado para hoy");
    }

    #[test]
    fn con_horario_y_sin_registro_puede_marcar_entrada() {
        let hoy = fecha(2024, 1, 10);
        let h = horario(10, hora(8, 0), hora(17, 0));
        let derivado = derivar_estado(&SnapshotInputs {
            fecha: hoy,
            registro_hoy: None,
            registro_abierto: None,
            horario_hoy: Some(&h),
            horario_origen: None,
            leave: LeaveStatus::default(),
        });
        assert!(derivado.puede_marcar_entrada);
        assert!(!derivado.puede_marcar_salida);
        assert_eq!(derivado.id_personal_residencia_horario, Some(10));
        assert_eq!(derivado.mensaje, "Puede marcar su entrada");
    }

    #[test]
    fn vacaciones_bloquean_la_entrada_aunque_haya_horario() {
        let hoy = fecha(2024, 1, 10);
        let h = horario(10, hora(8, 0), hora(17, 0));
        let derivado = derivar_estado(&SnapshotInputs {
            fecha: hoy,
            registro_hoy: None,
            registro_abierto: None,
            horario_hoy: Some(&h),
            horario_origen: None,
            leave: LeaveStatus {
                en_vacaciones: true,
                en_licencia: false,
            },
        });
        assert!(!derivado.puede_marcar_entrada);
        assert_eq!(derivado.mensaje, "El empleado está en vacaciones aprobadas");
    }

    #[test]
    fn asistencia_completa() {
        let hoy = fecha(2024, 1, 10);
        let h = horario(10, hora(8, 0), hora(17, 0));
        let r = completo(10, hoy);
        let derivado = derivar_estado(&SnapshotInputs {
            fecha: hoy,
            registro_hoy: Some(&r),
            registro_abierto: None,
            horario_hoy: Some(&h),
            horario_origen: None,
            leave: LeaveStatus::default(),
        });
        assert!(derivado.tiene_entrada && derivado.tiene_salida);
        assert!(!derivado.puede_marcar_entrada);
        assert!(!derivado.puede_marcar_salida);
        assert_eq!(derivado.mensaje, "Asistencia completa del día");
    }

    #[test]
    fn turno_abierto_de_ayer_mantiene_la_salida_disponible() {
        // overnight carryover: no record today, open record from yesterday
        let hoy = fecha(2024, 1, 11);
        let ayer = fecha(2024, 1, 10);
        let nocturno = horario(10, hora(23, 0), hora(6, 0));
        let r = abierto(10, ayer, hora(23, 50));
        let derivado = derivar_estado(&SnapshotInputs {
            fecha: hoy,
            registro_hoy: None,
            registro_abierto: Some(&r),
            horario_hoy: None,
            horario_origen: Some(&nocturno),
            leave: LeaveStatus::default(),
        });
        assert!(derivado.puede_marcar_salida);
        assert!(derivado.tiene_horario);
        assert_eq!(derivado.mensaje, "Puede marcar su salida (entrada del 2024-01-10)");
    }

    #[test]
    fn entrada_de_hoy_pendiente_de_salida() {
        let hoy = fecha(2024, 1, 10);
        let h = horario(10, hora(8, 0), hora(17, 0));
        let r = abierto(10, hoy, hora(8, 5));
        let derivado = derivar_estado(&SnapshotInputs {
            fecha: hoy,
            registro_hoy: Some(&r),
            registro_abierto: Some(&r),
            horario_hoy: Some(&h),
            horario_origen: None,
            leave: LeaveStatus::default(),
        });
        assert!(!derivado.puede_marcar_entrada);
        assert!(derivado.puede_marcar_salida);
        assert_eq!(derivado.mensaje, "Puede marcar su salida");
    }

    #[test]
    fn dos_asignaciones_atribuye_el_horario_a_la_correcta() {
        // the schedule belongs to assignment 11; snapshot must say so
        let hoy = fecha(2024, 1, 10);
        let h = horario(11, hora(8, 0), hora(17, 0));
        let derivado = derivar_estado(&SnapshotInputs {
            fecha: hoy,
            registro_hoy: None,
            registro_abierto: None,
            horario_hoy: Some(&h),
            horario_origen: None,
            leave: LeaveStatus::default(),
        });
        assert!(derivado.tiene_horario);
        assert!(derivado.puede_marcar_entrada);
        assert_eq!(derivado.id_personal_residencia_horario, Some(11));
    }

    #[test]
    fn derivacion_es_idempotente() {
        let hoy = fecha(2024, 1, 10);
        let h = horario(10, hora(8, 0), hora(17, 0));
        let r = abierto(10, hoy, hora(8, 5));
        let inputs = SnapshotInputs {
            fecha: hoy,
            registro_hoy: Some(&r),
            registro_abierto: Some(&r),
            horario_hoy: Some(&h),
            horario_origen: None,
            leave: LeaveStatus::default(),
        };
        assert_eq!(derivar_estado(&inputs), derivar_estado(&inputs));
    }

    #[test]
    fn entrada_duplicada_gana_al_mensaje_de_vacaciones() {
        // double tap while a leave record covers today: the duplicate wins
        let hoy = fecha(2024, 1, 10);
        let r = abierto(10, hoy, hora(8, 5));
        let err = precondicion_entrada(
            Some(&r),
            LeaveStatus {
                en_vacaciones: true,
                en_licencia: false,
            },
        )
        .unwrap_err();
        match err {
            AppError::Conflict(m) => assert_eq!(m, "Ya tiene entrada marcada para hoy"),
            otro => panic!("se esperaba Conflict, fue {otro:?}"),
        }
    }

    #[test]
    fn vacaciones_bloquean_una_entrada_nueva() {
        let hoy = fecha(2024, 1, 10);
        let err = precondicion_entrada(
            None,
            LeaveStatus {
                en_vacaciones: true,
                en_licencia: false,
            },
        )
        .unwrap_err();
        match err {
            AppError::Conflict(m) => {
                assert_eq!(m, "No puede marcar asistencia: está en vacaciones aprobadas")
            }
            otro => panic!("se esperaba Conflict, fue {otro:?}"),
        }

        // a placeholder row without entry time does not count as marked
        let placeholder = registro(10, hoy);
        let err = precondicion_entrada(
            Some(&placeholder),
            LeaveStatus {
                en_vacaciones: false,
                en_licencia: true,
            },
        )
        .unwrap_err();
        match err {
            AppError::Conflict(m) => {
                assert_eq!(m, "No puede marcar asistencia: está en licencia aprobada")
            }
            otro => panic!("se esperaba Conflict, fue {otro:?}"),
        }
    }

    #[test]
    fn sin_entrada_ni_permiso_la_precondicion_pasa() {
        assert!(precondicion_entrada(None, LeaveStatus::default()).is_ok());
    }

    #[test]
    fn tardanza_solo_despues_del_minuto_de_entrada() {
        let programada = hora(8, 0);
        assert_eq!(estado_entrada(hora(7, 59), programada), EstadoRegistro::Presente);
        // same minute, later seconds: still on time
        assert_eq!(
            estado_entrada(NaiveTime::from_hms_opt(8, 0, 45).unwrap(), programada),
            EstadoRegistro::Presente
        );
        assert_eq!(estado_entrada(hora(8, 1), programada), EstadoRegistro::Tardanza);
    }

    #[test]
    fn salida_debe_ser_posterior_a_la_entrada() {
        let entrada = fecha(2024, 1, 10).and_time(hora(8, 0));
        assert!(validar_salida(entrada, entrada, 48).is_err());
        assert!(validar_salida(entrada, entrada - Duration::minutes(1), 48).is_err());
        assert!(validar_salida(entrada, entrada + Duration::minutes(1), 48).is_ok());
    }

    #[test]
    fn salida_fuera_de_ventana_de_48_horas() {
        let entrada = fecha(2024, 1, 10).and_time(hora(8, 0));
        assert!(validar_salida(entrada, entrada + Duration::hours(48), 48).is_ok());
        assert!(validar_salida(
            entrada,
            entrada + Duration::hours(48) + Duration::minutes(1),
            48
        )
        .is_err());
    }

    #[test]
    fn salida_nocturna_cruzando_medianoche_es_valida() {
        // entry 2024-01-10 23:50, exit 2024-01-11 06:10
        let entrada = fecha(2024, 1, 10).and_time(NaiveTime::from_hms_opt(23, 50, 0).unwrap());
        let salida = fecha(2024, 1, 11).and_time(NaiveTime::from_hms_opt(6, 10, 0).unwrap());
        assert!(validar_salida(entrada, salida, 48).is_ok());

        let nocturno = horario(10, hora(23, 0), hora(6, 0));
        assert_eq!(
            nocturno.effective_exit_date(fecha(2024, 1, 10)),
            fecha(2024, 1, 11)
        );
    }

    #[test]
    fn narrow_sin_asignacion_explicita_usa_todas() {
        let actor = Actor {
            personal: personal_activo(),
            asignaciones: vec![asignacion(10), asignacion(11)],
        };
        assert_eq!(narrow(&actor, None).unwrap(), vec![10, 11]);
        assert_eq!(narrow(&actor, Some(11)).unwrap(), vec![11]);
    }

    #[test]
    fn narrow_rechaza_asignacion_ajena() {
        let actor = Actor {
            personal: personal_activo(),
            asignaciones: vec![asignacion(10)],
        };
        let err = narrow(&actor, Some(99)).unwrap_err();
        assert!(matches!(err, AppError::Authorization(_)));
    }
}

/// Best-effort removal of a blob no record references.
async fn limpiar_blob<S: PhotoStore>(store: &S, ruta: &str) {
    if let Err(e) = store.remove(ruta).await {
        tracing::warn!(error = %e, ruta, "failed to remove unreferenced photo");
    }
}

async fn personal_por_dni(pool: &MySqlPool, dni: &str) -> Result<Option<Personal>, AppError> {
    let sql = format!("SELECT {COLUMNAS_PERSONAL} FROM personal WHERE dni_ce = ?");
    Ok(sqlx::query_as::<_, Personal>(&sql)
        .bind(dni)
        .fetch_optional(pool)
        .await?)
}

async fn personal_por_id(pool: &MySqlPool, id_personal: u64) -> Result<Option<Personal>, AppError> {
    let sql = format!("SELECT {COLUMNAS_PERSONAL} FROM personal WHERE id_personal = ?");
    Ok(sqlx::query_as::<_, Personal>(&sql)
        .bind(id_personal)
        .fetch_optional(pool)
        .await?)
}

async fn asignaciones_activas(
    pool: &MySqlPool,
    id_personal: u64,
) -> Result<Vec<PersonalResidencia>, AppError> {
    let sql = format!(
        "SELECT {COLUMNAS_ASIGNACION} FROM personal_residencia \
         WHERE id_personal = ? AND activo = 1 ORDER BY id"
    );
    Ok(sqlx::query_as::<_, PersonalResidencia>(&sql)
        .bind(id_personal)
        .fetch_all(pool)
        .await?)
}
