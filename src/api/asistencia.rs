use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use chrono::NaiveDate;
use futures_util::TryStreamExt;
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use crate::attendance::engine::{
    AsistenciaEngine, FotoSubida, IdentityParams, Marcacion,
};
use crate::attendance::leave::LeaveChecker;
use crate::attendance::photo::{FsPhotoStore, PhotoBinder, PhotoStore};
use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::db::TenantPools;
use crate::error::AppError;
use crate::model::asignacion_recurrente::AsignacionRecurrente;
use crate::model::registro_asistencia::RegistroAsistencia;

const MAX_FOTO_BYTES: usize = 5 * 1024 * 1024;

/// Widest default-window history request accepted, in days.
const HISTORIAL_MAX_DIAS: i64 = 365;

/// Accepted photo mime types and the extension each is stored under.
static EXTENSION_POR_MIME: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("image/jpeg", "jpg"),
        ("image/jpg", "jpg"),
        ("image/png", "png"),
        ("image/webp", "webp"),
    ])
});

#[derive(Deserialize)]
pub struct EstadoQuery {
    pub dni_ce: Option<String>,
    pub id_personal_residencia: Option<u64>,
}

#[derive(Deserialize)]
pub struct HistorialQuery {
    pub dni_ce: Option<String>,
    pub id_personal_residencia: Option<u64>,
    pub desde: Option<NaiveDate>,
    pub hasta: Option<NaiveDate>,
    /// Days of history when no explicit range is given.
    pub limite: Option<i64>,
}

/// GET /mobile/asistencia/estado
pub async fn estado(
    auth: AuthUser,
    pools: web::Data<TenantPools>,
    leave: web::Data<LeaveChecker>,
    fotos: web::Data<FsPhotoStore>,
    query: web::Query<EstadoQuery>,
) -> Result<HttpResponse, AppError> {
    let tenant = auth.tenant.clone();
    let pool = pools.for_tenant(tenant.as_deref())?;

    let resumen = AsistenciaEngine::estado(
        pool,
        &leave,
        TenantPools::canonical(tenant.as_deref()),
        &auth,
        IdentityParams {
            dni_ce: query.dni_ce.as_deref(),
            id_personal_residencia: query.id_personal_residencia,
        },
    )
    .await?;

    let registro = resumen.registro.as_ref().map(|r| registro_view(r, fotos.get_ref()));
    let registro_abierto = resumen
        .registro_abierto
        .as_ref()
        .filter(|abierto| {
            resumen
                .registro
                .as_ref()
                .map_or(true, |hoy| hoy.id_registro != abierto.id_registro)
        })
        .map(|r| registro_view(r, fotos.get_ref()));
    let horario = resumen
        .horario
        .as_ref()
        .map(|(h, fecha_origen)| horario_view(h, *fecha_origen));

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "fecha": resumen.fecha.format("%Y-%m-%d").to_string(),
        "tiene_entrada": resumen.derivado.tiene_entrada,
        "tiene_salida": resumen.derivado.tiene_salida,
        "puede_marcar_entrada": resumen.derivado.puede_marcar_entrada,
        "puede_marcar_salida": resumen.derivado.puede_marcar_salida,
        "tiene_horario": resumen.derivado.tiene_horario,
        "id_personal_residencia_horario": resumen.derivado.id_personal_residencia_horario,
        "en_vacaciones": resumen.en_vacaciones,
        "en_licencia": resumen.en_licencia,
        "horario": horario,
        "registro": registro,
        "registro_abierto": registro_abierto,
        "mensaje": resumen.derivado.mensaje,
    })))
}

/// POST /mobile/asistencia/marcar-entrada (multipart/form-data)
pub async fn marcar_entrada(
    auth: AuthUser,
    pools: web::Data<TenantPools>,
    leave: web::Data<LeaveChecker>,
    fotos: web::Data<FsPhotoStore>,
    binder: web::Data<PhotoBinder>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let (dni_ce, id_personal_residencia, marca) =
        MarcacionForm::parse(payload).await?.into_partes()?;
    let tenant = auth.tenant.clone();
    let pool = pools.for_tenant(tenant.as_deref())?;

    let registro = AsistenciaEngine::marcar_entrada(
        pool,
        &leave,
        &binder,
        fotos.get_ref(),
        TenantPools::canonical(tenant.as_deref()),
        &auth,
        IdentityParams {
            dni_ce: dni_ce.as_deref(),
            id_personal_residencia,
        },
        marca,
    )
    .await?;

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "message": "Entrada marcada correctamente",
        "registro": registro_view(&registro, fotos.get_ref()),
    })))
}

/// POST /mobile/asistencia/marcar-salida (multipart/form-data)
pub async fn marcar_salida(
    auth: AuthUser,
    pools: web::Data<TenantPools>,
    fotos: web::Data<FsPhotoStore>,
    binder: web::Data<PhotoBinder>,
    config: web::Data<Config>,
    payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let (dni_ce, id_personal_residencia, marca) =
        MarcacionForm::parse(payload).await?.into_partes()?;
    let tenant = auth.tenant.clone();
    let pool = pools.for_tenant(tenant.as_deref())?;

    let registro = AsistenciaEngine::marcar_salida(
        pool,
        &binder,
        fotos.get_ref(),
        &auth,
        IdentityParams {
            dni_ce: dni_ce.as_deref(),
            id_personal_residencia,
        },
        marca,
        config.salida_max_horas,
    )
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Salida marcada correctamente",
        "registro": registro_view(&registro, fotos.get_ref()),
    })))
}

/// GET /mobile/asistencia/historial
pub async fn historial(
    auth: AuthUser,
    pools: web::Data<TenantPools>,
    fotos: web::Data<FsPhotoStore>,
    query: web::Query<HistorialQuery>,
) -> Result<HttpResponse, AppError> {
    let tenant = auth.tenant.clone();
    let pool = pools.for_tenant(tenant.as_deref())?;

    let dias = validar_limite(query.limite)?;

    let registros = AsistenciaEngine::historial(
        pool,
        &auth,
        IdentityParams {
            dni_ce: query.dni_ce.as_deref(),
            id_personal_residencia: query.id_personal_residencia,
        },
        query.desde,
        query.hasta,
        dias,
    )
    .await?;

    let historial: Vec<_> = registros
        .iter()
        .map(|r| registro_view(r, fotos.get_ref()))
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "total": historial.len(),
        "historial": historial,
    })))
}

fn registro_view(r: &RegistroAsistencia, fotos: &FsPhotoStore) -> serde_json::Value {
    json!({
        "id_registro": r.id_registro,
        "id_personal_residencia": r.id_personal_residencia,
        "fecha_entrada": r.fecha_entrada.format("%Y-%m-%d").to_string(),
        "hora_entrada": r.hora_entrada.map(|h| h.format("%H:%M").to_string()),
        "latitud_entrada": r.latitud_entrada,
        "longitud_entrada": r.longitud_entrada,
        "foto_entrada": r.foto_entrada,
        "foto_entrada_url": r.foto_entrada.as_deref().map(|ruta| fotos.url(ruta)),
        "fecha_salida": r.fecha_salida.map(|f| f.format("%Y-%m-%d").to_string()),
        "hora_salida": r.hora_salida.map(|h| h.format("%H:%M").to_string()),
        "latitud_salida": r.latitud_salida,
        "longitud_salida": r.longitud_salida,
        "foto_salida": r.foto_salida,
        "foto_salida_url": r.foto_salida.as_deref().map(|ruta| fotos.url(ruta)),
        "estado": r.estado,
        "observaciones": r.observaciones,
    })
}

fn horario_view(h: &AsignacionRecurrente, fecha_origen: NaiveDate) -> serde_json::Value {
    json!({
        "id_personal_residencia": h.id_personal_residencia,
        "dias_semana": h.dias_semana,
        "hora_entrada": h.hora_entrada.format("%H:%M").to_string(),
        "hora_salida": h.hora_salida.format("%H:%M").to_string(),
        "es_nocturno": h.is_overnight(),
        "fecha_entrada": fecha_origen.format("%Y-%m-%d").to_string(),
        "fecha_salida_efectiva": h
            .effective_exit_date(fecha_origen)
            .format("%Y-%m-%d")
            .to_string(),
    })
}

/// Parsed multipart body of the marking endpoints.
struct MarcacionForm {
    latitud: f64,
    longitud: f64,
    dni_ce: Option<String>,
    id_personal_residencia: Option<u64>,
    foto: FotoSubida,
}

impl MarcacionForm {
    /// Splits the form into the identity selectors and the marking
    /// payload, validating the coordinates on the way.
    fn into_partes(self) -> Result<(Option<String>, Option<u64>, Marcacion), AppError> {
        validar_coordenadas(self.latitud, self.longitud)?;
        Ok((
            self.dni_ce,
            self.id_personal_residencia,
            Marcacion {
                latitud: self.latitud,
                longitud: self.longitud,
                foto: self.foto,
            },
        ))
    }

    async fn parse(mut payload: Multipart) -> Result<Self, AppError> {
        let mut latitud: Option<f64> = None;
        let mut longitud: Option<f64> = None;
        let mut dni_ce: Option<String> = None;
        let mut id_personal_residencia: Option<u64> = None;
        let mut foto: Option<FotoSubida> = None;

        while let Some(mut field) = payload.try_next().await.map_err(|e| {
            AppError::Validation(format!("Cuerpo multipart inválido: {e}"))
        })? {
            let nombre = field
                .content_disposition()
                .get_name()
                .unwrap_or_default()
                .to_string();

            match nombre.as_str() {
                "foto" => {
                    let mime = field
                        .content_type()
                        .map(|m| m.essence_str().to_string())
                        .unwrap_or_default();
                    let extension = *EXTENSION_POR_MIME.get(mime.as_str()).ok_or_else(|| {
                        AppError::Validation(
                            "La foto debe ser una imagen jpeg, jpg, png o webp".to_string(),
                        )
                    })?;
                    let bytes = leer_bytes(&mut field, MAX_FOTO_BYTES).await?;
                    if bytes.is_empty() {
                        return Err(AppError::Validation("La foto está vacía".to_string()));
                    }
                    foto = Some(FotoSubida {
                        bytes,
                        extension: extension.to_string(),
                    });
                }
                "latitud" => {
                    latitud = Some(leer_numero(&mut field, "latitud").await?);
                }
                "longitud" => {
                    longitud = Some(leer_numero(&mut field, "longitud").await?);
                }
                "dni_ce" => {
                    let valor = leer_texto(&mut field).await?;
                    if valor.len() > 20 {
                        return Err(AppError::Validation(
                            "dni_ce no puede exceder 20 caracteres".to_string(),
                        ));
                    }
                    if !valor.is_empty() {
                        dni_ce = Some(valor);
                    }
                }
                "id_personal_residencia" => {
                    let valor = leer_texto(&mut field).await?;
                    id_personal_residencia = Some(valor.parse().map_err(|_| {
                        AppError::Validation(
                            "id_personal_residencia debe ser un entero".to_string(),
                        )
                    })?);
                }
                // unknown fields are drained and ignored
                _ => {
                    leer_bytes(&mut field, MAX_FOTO_BYTES).await?;
                }
            }
        }

        Ok(Self {
            latitud: latitud
                .ok_or_else(|| AppError::Validation("latitud es requerida".to_string()))?,
            longitud: longitud
                .ok_or_else(|| AppError::Validation("longitud es requerida".to_string()))?,
            dni_ce,
            id_personal_residencia,
            foto: foto.ok_or_else(|| AppError::Validation("foto es requerida".to_string()))?,
        })
    }
}

fn validar_limite(limite: Option<i64>) -> Result<i64, AppError> {
    let dias = limite.unwrap_or(30);
    if !(1..=HISTORIAL_MAX_DIAS).contains(&dias) {
        return Err(AppError::Validation(format!(
            "limite debe estar entre 1 y {HISTORIAL_MAX_DIAS} días"
        )));
    }
    Ok(dias)
}

pub fn validar_coordenadas(latitud: f64, longitud: f64) -> Result<(), AppError> {
    if !latitud.is_finite() || !(-90.0..=90.0).contains(&latitud) {
        return Err(AppError::Validation(
            "latitud debe estar entre -90 y 90".to_string(),
        ));
    }
    if !longitud.is_finite() || !(-180.0..=180.0).contains(&longitud) {
        return Err(AppError::Validation(
            "longitud debe estar entre -180 y 180".to_string(),
        ));
    }
    Ok(())
}

async fn leer_bytes(
    field: &mut actix_multipart::Field,
    max: usize,
) -> Result<Vec<u8>, AppError> {
    let mut datos = Vec::new();
    while let Some(chunk) = field.try_next().await.map_err(|e| {
        AppError::Validation(format!("Error leyendo el cuerpo multipart: {e}"))
    })? {
        if datos.len() + chunk.len() > max {
            return Err(AppError::Validation(
                "La foto no puede superar los 5 MB".to_string(),
            ));
        }
        datos.extend_from_slice(&chunk);
    }
    Ok(datos)
}

async fn leer_texto(field: &mut actix_multipart::Field) -> Result<String, AppError> {
    let bytes = leer_bytes(field, 1024).await?;
    String::from_utf8(bytes)
        .map(|s| s.trim().to_string())
        .map_err(|_| AppError::Validation("Campo de texto inválido".to_string()))
}

async fn leer_numero(
    field: &mut actix_multipart::Field,
    nombre: &str,
) -> Result<f64, AppError> {
    leer_texto(field)
        .await?
        .parse()
        .map_err(|_| AppError::Validation(format!("{nombre} debe ser numérica")))
}
