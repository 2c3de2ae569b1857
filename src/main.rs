use std::sync::{Arc, Mutex};

use anyhow::Context;
use axum::Router;
use faq_rag_rig_webapp::{
    api,
    app_state::AppState,
    config,
    ingest::CorpusSource,
    llm,
    rag::RagService,
};
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = config::AppConfig::from_env().context("Error al cargar la configuración")?;

    // 3. Inicializar gestor de LLMs (embeddings + chat)
    let llm_manager = Arc::new(llm::LlmManager::from_config(&cfg));

    // 4. Construir el índice una vez; si falla, no se arranca el servidor.
    let rag = Arc::new(RagService::new(
        cfg.rag.clone(),
        CorpusSource::Path(cfg.corpus_path.clone()),
        llm_manager.clone(),
        llm_manager,
    ));
    let stats = rag
        .warm_up()
        .await
        .context("Error construyendo el índice vectorial")?;
    info!(
        documents = stats.documents,
        chunks = stats.chunks,
        dimensions = ?stats.dimensions,
        "📚 Índice construido a partir de {}",
        stats.corpus_version
    );

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 5. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        rag,
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 6. Configurar el router de la API
    let app = Router::new()
        .merge(api::create_router(app_state.clone()))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // 7. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("No se pudo escuchar en {server_addr}"))?;
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await?;

    info!("✅ Servidor cerrado correctamente.");
    Ok(())
}
