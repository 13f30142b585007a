use std::sync::Arc;

use crate::{
    auth::jwt::JwtService, config::AppConfig, db::Database, mail::Mailer, media::MediaStore,
};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Arc<AppConfig>,
    pub media: Arc<dyn MediaStore>,
    pub mailer: Arc<dyn Mailer>,
    pub jwt: JwtService,
}

impl AppState {
    pub fn new(
        db: Database,
        config: AppConfig,
        media: Arc<dyn MediaStore>,
        mailer: Arc<dyn Mailer>,
        jwt: JwtService,
    ) -> Self {
        Self {
            db,
            config: Arc::new(config),
            media,
            mailer,
            jwt,
        }
    }
}
