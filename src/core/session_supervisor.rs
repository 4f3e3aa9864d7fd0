//! 会话监管：取消令牌的生命周期
//!
//! 每个请求从监管者取一个子 token；Cancel 命令触发当前 token，
//! 之后 `reset` 换一个新的根 token，下一次 Submit 不受上一次取消影响。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct SessionSupervisor {
    session_id: String,
    cancel_token: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            cancel_token: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn current(&self) -> CancellationToken {
        match self.cancel_token.lock() {
            Ok(token) => token.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// 为单个请求创建子 token
    pub fn child_token(&self) -> CancellationToken {
        self.current().child_token()
    }

    /// 触发取消（所有子 token 同时失效）
    pub fn cancel(&self) {
        tracing::info!(session = %self.session_id, "session cancel requested");
        self.current().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.current().is_cancelled()
    }

    /// 取消生效后换新 token
    pub fn reset(&self) {
        let mut guard = match self.cancel_token.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = CancellationToken::new();
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
