pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AppConfig, DashboardConfig, DatabaseConfig, GatewayConfig, RateLimitConfig, SecurityConfig,
};
