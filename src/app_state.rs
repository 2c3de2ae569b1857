use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use crate::{config::AppConfig, rag::RagService};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub rag: Arc<RagService>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}
