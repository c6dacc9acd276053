use std::collections::HashMap;

use chrono::NaiveDate;
use sqlx::MySqlPool;

use crate::db::TenantPools;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LeaveStatus {
    pub en_vacaciones: bool,
    pub en_licencia: bool,
}

impl LeaveStatus {
    pub fn any(&self) -> bool {
        self.en_vacaciones || self.en_licencia
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct LeaveCapabilities {
    vacaciones: bool,
    licencias: bool,
}

/// Best-effort leave lookup. Leave tracking is optionally provisioned per
/// tenant, so table presence is probed once at startup instead of probing
/// with exceptions on every call. A missing table or a failed query counts
/// as "not on leave": absence of leave tracking must never block marking.
pub struct LeaveChecker {
    capacidades: HashMap<String, LeaveCapabilities>,
}

impl LeaveChecker {
    pub async fn probe(pools: &TenantPools) -> Self {
        let mut capacidades = HashMap::new();
        for (tenant, pool) in pools.iter() {
            let caps = LeaveCapabilities {
                vacaciones: table_exists(pool, "vacaciones").await,
                licencias: table_exists(pool, "licencias").await,
            };
            tracing::info!(
                tenant,
                vacaciones = caps.vacaciones,
                licencias = caps.licencias,
                "leave tracking capabilities"
            );
            capacidades.insert(tenant.to_string(), caps);
        }
        Self { capacidades }
    }

    /// Approved vacation/licence status for the staff member on `fecha`.
    /// Never fails: infrastructure problems degrade to `false` with a log.
    pub async fn status_for(
        &self,
        pool: &MySqlPool,
        tenant: &str,
        id_personal: u64,
        fecha: NaiveDate,
    ) -> LeaveStatus {
        let caps = self
            .capacidades
            .get(tenant)
            .copied()
            .unwrap_or_default();

        LeaveStatus {
            en_vacaciones: if caps.vacaciones {
                approved_leave_exists(pool, "vacaciones", id_personal, fecha).await
            } else {
                false
            },
            en_licencia: if caps.licencias {
                approved_leave_exists(pool, "licencias", id_personal, fecha).await
            } else {
                false
            },
        }
    }

    pub async fn is_on_approved_leave(
        &self,
        pool: &MySqlPool,
        tenant: &str,
        id_personal: u64,
        fecha: NaiveDate,
    ) -> bool {
        self.status_for(pool, tenant, id_personal, fecha).await.any()
    }
}

async fn table_exists(pool: &MySqlPool, tabla: &str) -> bool {
    let resultado = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_name = ?",
    )
    .bind(tabla)
    .fetch_one(pool)
    .await;

    match resultado {
        Ok(n) => n > 0,
        Err(e) => {
            tracing::warn!(error = %e, tabla, "table probe failed, assuming absent");
            false
        }
    }
}

async fn approved_leave_exists(
    pool: &MySqlPool,
    tabla: &str,
    id_personal: u64,
    fecha: NaiveDate,
) -> bool {
    // tabla is one of the two fixed names probed at startup, never user input
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {tabla} \
         WHERE id_personal = ? AND estado = 'Aprobada' \
         AND fecha_inicio <= ? AND fecha_fin >= ?)"
    );

    let resultado = sqlx::query_scalar::<_, i64>(&sql)
        .bind(id_personal)
        .bind(fecha)
        .bind(fecha)
        .fetch_one(pool)
        .await;

    match resultado {
        Ok(n) => n > 0,
        Err(e) => {
            tracing::warn!(error = %e, tabla, id_personal, "leave lookup failed, treating as not on leave");
            false
        }
    }
}
