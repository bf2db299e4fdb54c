use actix_web::{web, App, HttpServer};
use anyhow::Result;
use tracing::{info, warn};

use homefix::api::{configure_routes, cors_headers, fallback_route, json_config, upload_files};
use homefix::config::{AppConfig, ConfigOverrides};
use homefix::logging::{init_logging, LogContext, RequestIdGenerator};
use homefix::HomeFixService;

#[actix_web::main]
async fn main() -> Result<()> {
    let mut config = match std::env::var("HOMEFIX_CONFIG") {
        Ok(path) => AppConfig::load_from_file(&path).await?,
        Err(_) => AppConfig::load().await?,
    };
    ConfigOverrides::apply(&mut config);
    config.validate()?;

    init_logging(&config.logging)?;

    let context = LogContext::new("main", "startup")
        .with_request_id(RequestIdGenerator::generate())
        .with_field("version", env!("CARGO_PKG_VERSION"));
    homefix::log_info!(context, "HomeFix Assist starting up");

    if config.llm.api_key.is_empty() {
        warn!("OPENAI_API_KEY is not set; every analysis will return the fallback plan");
    }

    config.ensure_directories().await?;

    let host = config.api.host.clone();
    let port = config.api.port;
    let origin = config.api.cors_origin.clone();
    let api_config = config.api.clone();

    let service = match HomeFixService::new(config).await {
        Ok(service) => web::Data::new(service),
        Err(e) => {
            let context = LogContext::new("main", "startup").with_status("fatal");
            homefix::log_error!(context, format!("{:#}", e), "Failed to initialize service");
            return Err(e);
        }
    };
    info!("Core service initialized");

    info!("Listening on http://{}:{}", host, port);
    HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .app_data(json_config())
            .wrap(cors_headers(&origin))
            .configure(configure_routes)
            .service(upload_files(&api_config))
            .default_service(web::to(fallback_route))
    })
    .bind((host.as_str(), port))?
    .run()
    .await?;

    info!("HomeFix Assist shutting down");
    Ok(())
}
