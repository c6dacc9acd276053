use std::collections::HashMap;

use anyhow::Context;
use sqlx::MySqlPool;

use crate::config::Config;
use crate::error::AppError;

pub const DEFAULT_TENANT: &str = "default";

/// Connection pools keyed by tenant identifier, built once at startup and
/// handed to request handlers by reference. Per-request code never mutates
/// this map.
pub struct TenantPools {
    default: MySqlPool,
    tenants: HashMap<String, MySqlPool>,
}

impl TenantPools {
    pub async fn init(config: &Config) -> anyhow::Result<Self> {
        let default = MySqlPool::connect(&config.database_url)
            .await
            .context("failed to connect to default database")?;

        let mut tenants = HashMap::new();
        for (clave, url) in &config.tenant_databases {
            let pool = MySqlPool::connect(url)
                .await
                .with_context(|| format!("failed to connect to tenant database '{clave}'"))?;
            tenants.insert(clave.clone(), pool);
        }

        Ok(Self { default, tenants })
    }

    /// Pool for the given tenant claim; `None` selects the default schema.
    pub fn for_tenant(&self, tenant: Option<&str>) -> Result<&MySqlPool, AppError> {
        match tenant {
            None => Ok(&self.default),
            Some(clave) => self.tenants.get(clave).ok_or_else(|| {
                AppError::Authorization(format!("Tenant desconocido: {clave}"))
            }),
        }
    }

    /// Canonical key used to index per-tenant capabilities.
    pub fn canonical(tenant: Option<&str>) -> &str {
        tenant.unwrap_or(DEFAULT_TENANT)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MySqlPool)> {
        std::iter::once((DEFAULT_TENANT, &self.default)).chain(
            self.tenants
                .iter()
                .map(|(clave, pool)| (clave.as_str(), pool)),
        )
    }
}
