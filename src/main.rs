use std::sync::Arc;

use actix_files as fs;
use actix_web::{web::Data, App, HttpServer};
use anyhow::Context as _;
use dotenv::dotenv;
use log::{error, info, warn};
use tera::Tera;

use stream_chat::config::AppConfig;
use stream_chat::model::OpenAiModel;
use stream_chat::web::relay::Relay;
use stream_chat::web::{routes, AppState};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize environment
    dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting chat relay");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    if config.provider.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set. The chat API will fail.");
    }
    info!(
        "Model {} (temperature {}, max_tokens {}, timeout {:?})",
        config.chat.model, config.chat.temperature, config.chat.max_tokens, config.chat.relay_timeout
    );

    let model = Arc::new(OpenAiModel::new(&config.provider));
    let relay = Relay::new(model, Arc::new(config.chat.clone()));

    // Initialize template engine
    let mut tera = Tera::new(&format!("{}/**/*", config.server.templates_dir))
        .context("Template parsing error")?;
    tera.autoescape_on(vec![".html"]);

    let app_state = Data::new(AppState { tera, relay });
    let static_dir = config.server.static_dir.clone();

    info!("Listening on {}:{}", config.server.host, config.server.port);

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(routes::configure)
            .service(fs::Files::new("/static", &static_dir))
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}
