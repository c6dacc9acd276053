use crate::{api::asistencia, auth::middleware::auth_middleware, config::Config};
use actix_governor::{
    governor::middleware::NoOpMiddleware, Governor, GovernorConfigBuilder, PeerIpKeyExtractor,
};
use actix_web::{middleware::from_fn, web};

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    // Helper to build per-scope limiter
    fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
        let per_ms = if requests_per_min == 0 {
            1
        } else {
            60_000 / requests_per_min as u64
        };
        let cfg = GovernorConfigBuilder::default()
            .per_millisecond(per_ms)
            .burst_size(requests_per_min)
            .key_extractor(PeerIpKeyExtractor)
            .finish()
            .unwrap();
        Governor::new(&cfg)
    }

    let mobile_limiter = build_limiter(config.rate_mobile_per_min);

    cfg.service(
        web::scope("/mobile/asistencia")
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(mobile_limiter) // rate limiting
            .service(web::resource("/estado").route(web::get().to(asistencia::estado)))
            .service(
                web::resource("/marcar-entrada")
                    .route(web::post().to(asistencia::marcar_entrada)),
            )
            .service(
                web::resource("/marcar-salida").route(web::post().to(asistencia::marcar_salida)),
            )
            .service(web::resource("/historial").route(web::get().to(asistencia::historial))),
    );
}
