//! 编排核心的基础设施：凭证轮换、代理轮换与健康检查、结果缓存

pub mod cache;
pub mod credentials;
pub mod proxy;

pub use cache::{
    cache_key, create_cache_backend, CacheBackend, CacheStats, ConfiguredBackend,
    RedisCacheBackend, ResultCache, SqliteCacheBackend,
};
pub use credentials::{CredentialRotator, CredentialStatus};
pub use proxy::{HealthCheckSummary, HttpProxyProbe, ProxyRotator, ProxyStatus};
