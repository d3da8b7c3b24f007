use thiserror::Error;

/// 错误分类，对应编排核心的三类错误以及基础设施错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 配置类错误：立即返回，永不重试
    Configuration,
    /// 资源耗尽：凭证或代理暂时不可用
    ResourceExhaustion,
    /// 任务执行失败
    TaskExecution,
    /// 缓存、数据库、网络等基础设施错误
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("无效的任务: {0}")]
    InvalidTask(String),
    #[error("无效的调度: {0}")]
    InvalidSchedule(String),
    #[error("未配置凭证: {provider}")]
    NoCredentialsConfigured { provider: String },
    #[error("所有凭证均不可用: {provider}")]
    AllCredentialsUnavailable { provider: String },
    #[error("没有可用的健康代理")]
    NoHealthyProxy,
    #[error("任务执行错误: {0}")]
    TaskExecution(String),
    #[error("调度器已停止")]
    SchedulerStopped,
    #[error("缓存错误: {0}")]
    Cache(String),
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("网络错误: {0}")]
    Network(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type HarvestResult<T> = Result<T, HarvestError>;

impl HarvestError {
    pub fn invalid_task<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTask(msg.into())
    }
    pub fn invalid_schedule<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSchedule(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn task_failed<S: Into<String>>(msg: S) -> Self {
        Self::TaskExecution(msg.into())
    }
    pub fn cache_error<S: Into<String>>(msg: S) -> Self {
        Self::Cache(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HarvestError::Configuration(_)
            | HarvestError::InvalidTask(_)
            | HarvestError::InvalidSchedule(_)
            | HarvestError::NoCredentialsConfigured { .. } => ErrorKind::Configuration,
            HarvestError::AllCredentialsUnavailable { .. } | HarvestError::NoHealthyProxy => {
                ErrorKind::ResourceExhaustion
            }
            HarvestError::TaskExecution(_) | HarvestError::SchedulerStopped => {
                ErrorKind::TaskExecution
            }
            HarvestError::Cache(_)
            | HarvestError::Database(_)
            | HarvestError::Serialization(_)
            | HarvestError::Network(_)
            | HarvestError::Internal(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// 处理器返回此错误后调度器是否应当重试
    pub fn is_retryable(&self) -> bool {
        !self.is_fatal() && !matches!(self, HarvestError::SchedulerStopped)
    }

    pub fn user_message(&self) -> &str {
        match self {
            HarvestError::InvalidTask(_) => "任务参数配置有误",
            HarvestError::InvalidSchedule(_) => "调度时间或CRON表达式无效",
            HarvestError::NoCredentialsConfigured { .. } => "该服务商没有配置任何凭证",
            HarvestError::AllCredentialsUnavailable { .. } => "凭证暂时全部不可用，请稍后重试",
            HarvestError::NoHealthyProxy => "没有健康的代理可用，请稍后重试",
            HarvestError::SchedulerStopped => "调度器已停止，不再接受任务",
            _ => "系统繁忙，请稍后重试",
        }
    }
}

impl From<serde_json::Error> for HarvestError {
    fn from(err: serde_json::Error) -> Self {
        HarvestError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for HarvestError {
    fn from(err: anyhow::Error) -> Self {
        HarvestError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests;
