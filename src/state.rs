use std::sync::Arc;

use crate::config::Config;
use crate::db::Db;
use crate::storage::ContentStore;

#[derive(Clone)]
pub struct AppState {
    pub pool: Db,
    pub store: Arc<dyn ContentStore>,
    pub config: Arc<Config>,
}
