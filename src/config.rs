use dotenvy::dotenv;
use std::env;

#[derive(Clone)]
pub struct Config {
    pub server_addr: String,
    pub database_url: String,
    pub jwt_secret: String,

    /// Extra tenant schemas, parsed from `TENANT_DATABASES`
    /// (`tenant=mysql://...;otro=mysql://...`). The default schema is
    /// always `DATABASE_URL`.
    pub tenant_databases: Vec<(String, String)>,

    /// Disk root the photo store writes under.
    pub fotos_dir: String,
    /// Key prefix for attendance photos inside the store.
    pub fotos_ruta_base: String,
    /// Public URL prefix the stored keys are served from.
    pub fotos_base_url: String,

    /// Maximum hours an open shift may stay open before an exit is rejected.
    pub salida_max_horas: i64,

    // Rate limiting
    pub rate_mobile_per_min: u32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        Self {
            server_addr: env::var("SERVER_ADDR").expect("SERVER_ADDR must be set"),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            jwt_secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),

            tenant_databases: env::var("TENANT_DATABASES")
                .map(|raw| parse_tenant_databases(&raw))
                .unwrap_or_default(),

            fotos_dir: env::var("ASISTENCIA_FOTOS_DIR")
                .unwrap_or_else(|_| "storage".to_string()),
            fotos_ruta_base: env::var("ASISTENCIA_FOTOS_PATH")
                .unwrap_or_else(|_| "asistencia/fotos".to_string()),
            fotos_base_url: env::var("ASISTENCIA_FOTOS_URL")
                .unwrap_or_else(|_| "/storage".to_string()),

            salida_max_horas: env::var("SALIDA_MAX_HORAS")
                .unwrap_or_else(|_| "48".to_string())
                .parse()
                .unwrap(),

            rate_mobile_per_min: env::var("RATE_MOBILE_PER_MIN")
                .unwrap_or_else(|_| "120".to_string())
                .parse()
                .unwrap(),
        }
    }
}

fn parse_tenant_databases(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter(|par| !par.trim().is_empty())
        .filter_map(|par| {
            par.split_once('=')
                .map(|(clave, url)| (clave.trim().to_string(), url.trim().to_string()))
        })
        .collect()
}
