/// 订阅会话状态。
///
/// # 教案式说明
/// - **意图 (Why)**：把“参数解析 → 绑定频道 → 鉴权 → 回放 → 登记 → 心跳”固化为显式状态，
///   失败时报告到达的最后一个状态，清理责任由此可判定；
/// - **契约 (What)**：跃迁受 [`SessionState::can_transition_to`] 约束；任意状态都可直接进入
///   [`SessionState::Terminated`]；关闭鉴权时 `Resolved` 直接跃迁到 `Replayed`；
/// - **风险 (Trade-offs)**：状态只前进不回退，一次会话对应一次订阅。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionState {
    /// 校验 `sub` 参数并填充默认值。
    ParsingArgs,
    /// 已在注册表中找到或创建频道。
    Resolved,
    /// 令牌已通过校验（仅鉴权模式）。
    Authenticated,
    /// 离线消息已回放完毕。
    Replayed,
    /// 连接已在频道登记，注销义务生效。
    Registered,
    /// 心跳监督循环。
    HeartbeatLoop,
    /// 会话结束。
    Terminated,
}

impl SessionState {
    /// 判断状态是否允许跃迁至 `target`。
    pub fn can_transition_to(self, target: SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            (ParsingArgs, Resolved)
                | (Resolved, Authenticated)
                | (Resolved, Replayed)
                | (Authenticated, Replayed)
                | (Replayed, Registered)
                | (Registered, HeartbeatLoop)
                | (_, Terminated)
        )
    }

    /// 是否已达到登记（含之后的状态），即会话结束时是否欠一次注销。
    pub fn owes_deregistration(self) -> bool {
        matches!(self, SessionState::Registered | SessionState::HeartbeatLoop)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Terminated)
    }
}
