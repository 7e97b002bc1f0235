//! 会话监管：取消当前这一轮
//!
//! 每轮开始时从根 token 派生一个子 token；cancel_turn 只取消当前轮，shutdown 取消整个会话。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct SessionSupervisor {
    root: CancellationToken,
    current: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        let root = CancellationToken::new();
        let current = Mutex::new(root.child_token());
        Self { root, current }
    }

    /// 开始新的一轮，返回本轮的取消令牌
    pub fn begin_turn(&self) -> CancellationToken {
        let token = self.root.child_token();
        if let Ok(mut current) = self.current.lock() {
            *current = token.clone();
        }
        token
    }

    /// 取消当前这一轮（用户 Ctrl+C）；会话本身仍可继续使用
    pub fn cancel_turn(&self) {
        if let Ok(current) = self.current.lock() {
            current.cancel();
        }
    }

    /// 结束整个会话
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
