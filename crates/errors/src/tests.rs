use crate::*;

#[test]
fn test_harvest_error_display() {
    let error = HarvestError::InvalidTask("缺少处理器".to_string());
    assert_eq!(error.to_string(), "无效的任务: 缺少处理器");

    let error = HarvestError::AllCredentialsUnavailable {
        provider: "serpapi".to_string(),
    };
    assert_eq!(error.to_string(), "所有凭证均不可用: serpapi");

    let error = HarvestError::NoHealthyProxy;
    assert_eq!(error.to_string(), "没有可用的健康代理");

    let error = HarvestError::SchedulerStopped;
    assert_eq!(error.to_string(), "调度器已停止");
}

#[test]
fn test_error_kind_taxonomy() {
    assert_eq!(
        HarvestError::invalid_schedule("past").kind(),
        ErrorKind::Configuration
    );
    assert_eq!(
        HarvestError::NoCredentialsConfigured {
            provider: "x".to_string()
        }
        .kind(),
        ErrorKind::Configuration
    );
    assert_eq!(
        HarvestError::NoHealthyProxy.kind(),
        ErrorKind::ResourceExhaustion
    );
    assert_eq!(
        HarvestError::task_failed("boom").kind(),
        ErrorKind::TaskExecution
    );
    assert_eq!(
        HarvestError::cache_error("down").kind(),
        ErrorKind::Infrastructure
    );
}

#[test]
fn test_retryable_classification() {
    assert!(HarvestError::task_failed("timeout").is_retryable());
    assert!(HarvestError::NoHealthyProxy.is_retryable());
    assert!(HarvestError::Network("reset".to_string()).is_retryable());

    assert!(!HarvestError::config_error("bad").is_retryable());
    assert!(!HarvestError::invalid_task("bad").is_retryable());
    assert!(!HarvestError::SchedulerStopped.is_retryable());
}

#[test]
fn test_conversions() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: HarvestError = json_err.into();
    assert!(matches!(error, HarvestError::Serialization(_)));

    let error: HarvestError = anyhow::anyhow!("oops").into();
    assert!(matches!(error, HarvestError::Internal(ref m) if m == "oops"));
}

#[test]
fn test_user_message() {
    assert_eq!(
        HarvestError::NoHealthyProxy.user_message(),
        "没有健康的代理可用，请稍后重试"
    );
    assert_eq!(
        HarvestError::Internal("x".to_string()).user_message(),
        "系统繁忙，请稍后重试"
    );
}
