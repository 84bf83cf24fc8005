use actix_web::{middleware::Compress, web, App, HttpServer};
use actix_cors::Cors;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod config;
mod error;
mod models;
mod openapi;
mod rate_limit;
mod repo;
mod routes;
mod security;
mod token;

use config::AppConfig;
use openapi::ApiDoc;
use rate_limit::{RateLimit, RateLimiter};
use routes::AppState;
use security::SecurityHeaders;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()

use std::sync::Arc;
use tracing::{info, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds; production gets its
    // environment from the process manager.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    let config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("bootstrapping velo server");

    let prometheus = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    #[cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]
    let repo = {
        let repo = match &config.data_dir {
            Some(dir) => repo::inmem::InMemRepo::with_snapshot(dir),
            None => repo::inmem::InMemRepo::new(),
        };
        info!("using in-memory repository backend");
        repo
    };

    #[cfg(feature = "postgres-store")]
    let repo = {
        use sqlx::postgres::PgPoolOptions;
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(&config.database_url)
            .map_err(|e| anyhow::anyhow!("failed to create Pg pool: {e}"))?;
        info!("using Postgres repository backend");
        repo::pg::PgRepo::new(pool)
    };

    let limiter = RateLimiter::in_memory(config.rate_limit.clone());
    let rate_limit = RateLimit::new(limiter, &config.token_secret);

    let openapi = ApiDoc::openapi();
    let bind_addr = config.bind_addr.clone();
    info!(%bind_addr, "listening");

    let server = HttpServer::new(move || {
        let cors = {
            let mut c = Cors::default()
                .allowed_origin("http://localhost:5173")
                .allowed_origin("http://127.0.0.1:5173")
                .allow_any_header()
                .allowed_methods(["GET", "POST", "PATCH", "DELETE", "OPTIONS"])
                .supports_credentials()
                .max_age(3600);
            for origin in &config.cors_origins {
                c = c.allowed_origin(origin);
            }
            c
        };

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(SecurityHeaders::new(config.enable_hsts))
            .wrap(cors)
            .app_data(web::Data::new(AppState { repo: Arc::new(repo.clone()) }))
            .app_data(web::Data::new(config.clone()))
            .app_data(web::Data::new(prometheus.clone()))
            .service(
                web::scope("/api/v1")
                    .wrap(rate_limit.clone())
                    .configure(routes::api),
            )
            .configure(routes::ops)
            .route("/metrics", web::get().to(routes::metrics))
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
    })
    .bind(bind_addr)?;

    server.run().await?;
    Ok(())
}
