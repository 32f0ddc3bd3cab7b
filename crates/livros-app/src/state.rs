use std::sync::Arc;

use livros_dal::Pool;

use crate::csrf::AntiForgery;

#[derive(Clone)]
pub struct AppState {
    state: Arc<AppStateInner>,
}

impl AppState {
    pub fn new(app_config: AppConfig, pool: Pool, anti_forgery: AntiForgery) -> Self {
        AppState {
            state: Arc::new(AppStateInner {
                pool,
                app_config,
                anti_forgery,
            }),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.state.app_config
    }

    pub fn pool(&self) -> &Pool {
        &self.state.pool
    }

    pub fn anti_forgery(&self) -> &AntiForgery {
        &self.state.anti_forgery
    }
}

struct AppStateInner {
    pool: Pool,
    app_config: AppConfig,
    anti_forgery: AntiForgery,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub default_page_size: u32,
    /// Mark anti-forgery cookie as `Secure` (served over https)
    pub secure_cookies: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_page_size: 5,
            secure_cookies: false,
        }
    }
}
