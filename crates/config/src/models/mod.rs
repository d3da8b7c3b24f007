pub mod app_config;
pub mod cache;
pub mod credentials;
pub mod logging;
pub mod proxy;
pub mod scheduler;

pub use app_config::*;
pub use cache::*;
pub use credentials::*;
pub use logging::*;
pub use proxy::*;
pub use scheduler::*;
