//! 存储层错误类型
//!
//! 写入路径需要区分错误类别以决定重试还是逐行回退：
//! - Transient：连接断开、连接池超时等，可整批重试
//! - Rejected：数据异常或约束冲突（SQLSTATE 22xx / 23xx），重试无意义
//! - Other：其他错误

/// 错误类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorKind {
    Transient,
    Rejected,
    Other,
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct StorageError {
    kind: StorageErrorKind,
    message: String,
    /// 唯一约束冲突（SQLSTATE 23505）。
    unique_violation: bool,
}

/// 唯一约束冲突的 SQLSTATE。
pub const UNIQUE_VIOLATION: &str = "23505";

impl StorageError {
    fn with_kind(kind: StorageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            unique_violation: false,
        }
    }

    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(StorageErrorKind::Other, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::with_kind(StorageErrorKind::Transient, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::with_kind(StorageErrorKind::Rejected, message)
    }

    /// 同一 (device_id, metric_name, ts) 已存在。
    pub fn duplicate(message: impl Into<String>) -> Self {
        Self {
            unique_violation: true,
            ..Self::rejected(message)
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        self.unique_violation
    }

    pub fn kind(&self) -> StorageErrorKind {
        self.kind
    }

    pub fn is_transient(&self) -> bool {
        self.kind == StorageErrorKind::Transient
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        let unique_violation = matches!(
            &err,
            sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION)
        );
        Self {
            kind: classify_sqlx(&err),
            message: err.to_string(),
            unique_violation,
        }
    }
}

impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        let kind = if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() {
            StorageErrorKind::Transient
        } else {
            StorageErrorKind::Other
        };
        Self::with_kind(kind, err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

fn classify_sqlx(err: &sqlx::Error) -> StorageErrorKind {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StorageErrorKind::Transient,
        sqlx::Error::Database(db_err) => match db_err.code() {
            Some(code) => classify_sqlstate(&code),
            None => StorageErrorKind::Other,
        },
        _ => StorageErrorKind::Other,
    }
}

/// 按 SQLSTATE 前缀归类。
pub fn classify_sqlstate(code: &str) -> StorageErrorKind {
    match code.get(..2) {
        Some("22") | Some("23") => StorageErrorKind::Rejected,
        // 08: 连接异常；53: 资源不足；57: 管理员关停 / 查询取消；40: 事务回滚（死锁等）
        Some("08") | Some("53") | Some("57") | Some("40") => StorageErrorKind::Transient,
        _ => StorageErrorKind::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlstate_classes() {
        assert_eq!(classify_sqlstate("23505"), StorageErrorKind::Rejected);
        assert_eq!(classify_sqlstate("23503"), StorageErrorKind::Rejected);
        assert_eq!(classify_sqlstate("22P02"), StorageErrorKind::Rejected);
        assert_eq!(classify_sqlstate("08006"), StorageErrorKind::Transient);
        assert_eq!(classify_sqlstate("42P01"), StorageErrorKind::Other);
    }

    #[test]
    fn duplicate_is_rejected_unique_violation() {
        let err = StorageError::duplicate("duplicate key");
        assert_eq!(err.kind(), StorageErrorKind::Rejected);
        assert!(err.is_unique_violation());
        assert!(!StorageError::rejected("fk").is_unique_violation());
    }

    #[test]
    fn pool_timeout_is_transient() {
        let err: StorageError = sqlx::Error::PoolTimedOut.into();
        assert!(err.is_transient());
    }
}
