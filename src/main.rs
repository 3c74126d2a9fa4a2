use actix_web::{web, App, HttpServer};
use std::error::Error;
use tracing::{error, info};

use student_dropout::config::AppConfig;
use student_dropout::data::Dataset;
use student_dropout::model::load_model;
use student_dropout::session::SessionStore;
use student_dropout::web::{routes, AppState};
use student_dropout::{logging, CredentialStore};

#[actix_web::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    let config = AppConfig::load()?;
    logging::init(&config.logging);

    info!(database_url = %config.storage.database_url, "opening credential store");
    let store = CredentialStore::connect(&config.storage.database_url).await?;
    store.initialize().await?;

    let dataset = match Dataset::load(&config.data.primary_csv, &config.data.fallback_csv) {
        Ok(dataset) => {
            info!(
                path = %dataset.source().map(|p| p.display().to_string()).unwrap_or_default(),
                rows = dataset.len(),
                "dataset loaded"
            );
            dataset
        }
        Err(e) => {
            error!(error = %e, "dataset unavailable; dashboard will be empty");
            Dataset::default()
        }
    };

    let model = load_model(&config.data.model_path);

    let state = web::Data::new(AppState::new(store, dataset, model));
    let sessions = web::Data::new(SessionStore::with_ttl(config.session.ttl()));

    let addr = (config.server.host.clone(), config.server.port);
    info!("Student Dropout Dashboard listening on http://{}:{}", addr.0, addr.1);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .app_data(sessions.clone())
            .configure(routes)
    })
    .bind(addr)?
    .run()
    .await?;

    Ok(())
}
