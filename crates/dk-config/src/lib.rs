pub mod auth;
pub mod llm;
pub mod paths;
pub mod quota;
pub mod server;

pub use auth::AuthConfig;
pub use llm::LlmConfig;
pub use paths::ConfigPaths;
pub use quota::QuotaConfig;
pub use server::ServerConfig;
