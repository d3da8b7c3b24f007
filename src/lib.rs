//! 多租户抓取代理的任务编排核心
//!
//! 组件分布在工作区各 crate 中，这里提供组装根 [`Application`] 并重新导出常用类型。

pub mod app;
pub mod observer;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;

pub use harvest_config::AppConfig;
pub use harvest_dispatcher::{Scheduler, TaskHandle};
pub use harvest_domain::{handler_fn, Priority, Task, TaskHandler, TaskId, TaskRequest};
pub use harvest_errors::{HarvestError, HarvestResult};
pub use harvest_infrastructure::{CredentialRotator, ProxyRotator, ResultCache};
