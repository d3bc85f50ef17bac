//! 请求上下文与调度状态机

use std::fmt;
use std::time::Instant;

use tollway_core::models::account::User;
use tollway_core::{GatewayError, GatewayResult};

/// 调度阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchStage {
    Estimating,
    Reserving,
    SelectingProvider,
    Dispatching,
    Streaming,
    Completing,
    Settling,
    Done,
    Error,
}

impl DispatchStage {
    /// 是否允许迁移到 `next`
    pub fn can_transition_to(self, next: DispatchStage) -> bool {
        use DispatchStage::*;
        matches!(
            (self, next),
            (Estimating, Reserving)
                | (Reserving, SelectingProvider)
                | (SelectingProvider, Dispatching)
                | (SelectingProvider, Error)
                | (Dispatching, Streaming)
                | (Dispatching, Completing)
                | (Dispatching, Error)
                | (Streaming, Settling)
                | (Streaming, Error)
                | (Completing, Settling)
                | (Settling, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Estimating => "estimating",
            Self::Reserving => "reserving",
            Self::SelectingProvider => "selecting_provider",
            Self::Dispatching => "dispatching",
            Self::Streaming => "streaming",
            Self::Completing => "completing",
            Self::Settling => "settling",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个请求的上下文
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: String,
    pub model_id: String,
    pub stage: DispatchStage,
    /// 最终服务本次请求的凭证
    pub credential: Option<String>,
    started_at: Instant,
}

impl RequestContext {
    pub fn new(user: &User, model_id: &str) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().simple().to_string(),
            user_id: user.id.clone(),
            model_id: model_id.to_string(),
            stage: DispatchStage::Estimating,
            credential: None,
            started_at: Instant::now(),
        }
    }

    /// 迁移阶段，非法迁移返回内部错误
    pub fn advance(&mut self, next: DispatchStage) -> GatewayResult<()> {
        if !self.stage.can_transition_to(next) {
            tracing::error!(
                "[ROUTE] request_id={} 非法状态迁移: {} -> {}",
                self.request_id,
                self.stage,
                next
            );
            return Err(GatewayError::internal(format!(
                "illegal dispatch transition {} -> {}",
                self.stage, next
            )));
        }
        tracing::trace!(
            "[ROUTE] request_id={} stage {} -> {}",
            self.request_id,
            self.stage,
            next
        );
        self.stage = next;
        Ok(())
    }

    /// 进入错误状态；不可达时保持原状态
    pub fn fail(&mut self) {
        if self.stage.can_transition_to(DispatchStage::Error) {
            self.stage = DispatchStage::Error;
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use DispatchStage::*;

    const ALL: [DispatchStage; 9] = [
        Estimating,
        Reserving,
        SelectingProvider,
        Dispatching,
        Streaming,
        Completing,
        Settling,
        Done,
        Error,
    ];

    fn context() -> RequestContext {
        RequestContext::new(&User::issue(0, 100, 0), "gpt-4o")
    }

    #[test]
    fn test_happy_paths() {
        let mut ctx = context();
        for stage in [Reserving, SelectingProvider, Dispatching, Completing, Settling, Done] {
            ctx.advance(stage).unwrap();
        }
        assert!(ctx.stage.is_terminal());

        let mut ctx = context();
        for stage in [Reserving, SelectingProvider, Dispatching, Streaming, Settling, Done] {
            ctx.advance(stage).unwrap();
        }
    }

    #[test]
    fn test_illegal_transition_refused() {
        let mut ctx = context();
        assert!(ctx.advance(Dispatching).is_err());
        assert_eq!(ctx.stage, Estimating);
    }

    #[test]
    fn test_error_only_from_active_stages() {
        assert!(SelectingProvider.can_transition_to(Error));
        assert!(Dispatching.can_transition_to(Error));
        assert!(Streaming.can_transition_to(Error));
        assert!(!Reserving.can_transition_to(Error));
        assert!(!Settling.can_transition_to(Error));

        let mut ctx = context();
        ctx.fail();
        assert_eq!(ctx.stage, Estimating);
    }

    proptest! {
        #[test]
        fn prop_terminal_stages_absorb(from in 7usize..9, to in 0usize..9) {
            prop_assert!(!ALL[from].can_transition_to(ALL[to]));
        }
    }
}
