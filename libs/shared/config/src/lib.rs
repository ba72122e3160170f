use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store_url: String,
    pub store_service_key: String,
    pub hospital_name: String,
    pub hospital_address: String,
    pub hospital_contact: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            store_url: env::var("STORE_URL").unwrap_or_else(|_| {
                warn!("STORE_URL not set, using empty value");
                String::new()
            }),
            store_service_key: env::var("STORE_SERVICE_KEY").unwrap_or_else(|_| {
                warn!("STORE_SERVICE_KEY not set, using empty value");
                String::new()
            }),
            hospital_name: env::var("HOSPITAL_NAME").unwrap_or_else(|_| {
                warn!("HOSPITAL_NAME not set, using empty value");
                String::new()
            }),
            hospital_address: env::var("HOSPITAL_ADDRESS").unwrap_or_else(|_| {
                warn!("HOSPITAL_ADDRESS not set, using empty value");
                String::new()
            }),
            hospital_contact: env::var("HOSPITAL_CONTACT").unwrap_or_else(|_| {
                warn!("HOSPITAL_CONTACT not set, using empty value");
                String::new()
            }),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.store_url.is_empty() && !self.store_service_key.is_empty()
    }
}
