//! Phase：一次两角色对话及其状态迁移
//!
//! 执行流程：
//! 1. 检查两个角色均已招募、轮数在 1..=100
//! 2. 按 [`PhaseLogic::reads`] 从项目状态填充占位符，再由 `prepare` 补充本 Phase 特有的占位符
//! 3. 两角色交换，直到出现最终答案、对话终止或轮数耗尽
//! 4. 没有最终答案且需要反思时，由 Product Owner 与 Development Team 做一次单轮反思
//! 5. 去掉 `<INFO>` 标记得到结论，交给 `apply` 更新项目状态

pub mod coding;
pub mod docs;
pub mod planning;
pub mod prompt;
pub mod registry;
pub mod testing;

pub use registry::{PhaseBook, PhaseRegistry};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::chat::{render_transcript, ChatRequest, Message, RoleSpec, INFO_MARKER};
use crate::core::{EngineContext, EngineError, EnvKey, ProjectState, Result};

/// 反思子对话的两个监督角色
pub const REFLECTION_ASSISTANT: &str = "Product Owner";
pub const REFLECTION_USER: &str = "Development Team";

const REFLECTION_PHASE: &str = "Reflection";
const REFLECTION_TEMPLATE: &str =
    "Here is a conversation between two roles: {conversations} {question}";
const GENERIC_QUESTION: &str =
    "Conclude the final agreed answer of the discussion above in one message, without any other words.";

const MAX_TURN_LIMIT: usize = 100;

/// Phase 局部环境：占位符与组合 Phase 的退出条件所需的标志
#[derive(Debug, Clone, Default)]
pub struct PhaseEnv {
    pub placeholders: BTreeMap<String, String>,
    /// 选用的提示词变体（如 `missing_module`）；None 用默认模板
    pub prompt_variant: Option<&'static str>,
    pub has_correct_format: Option<bool>,
    pub has_no_comment: bool,
    /// 代码评审修改后本次改动的文件；None 表示尚未执行过
    pub changed_files: Option<Vec<String>>,
    /// 待补全的文件；Some("") 表示已没有需要补全的文件
    pub unimplemented_file: Option<String>,
    pub num_tried: BTreeMap<String, u32>,
    pub exist_bugs: Option<bool>,
}

impl PhaseEnv {
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.placeholders.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.placeholders.get(key).map(String::as_str)
    }
}

/// 每个具体 Phase 的行为
#[async_trait]
pub trait PhaseLogic: Send + Sync {
    /// 执行前从项目状态读取的字段（自动填入占位符）
    fn reads(&self) -> &'static [EnvKey];

    /// apply 会写入的字段
    fn writes(&self) -> &'static [EnvKey];

    /// 补充占位符或选择提示词变体；返回 Some 时跳过对话直接以其为结论
    async fn prepare(
        &self,
        _ctx: &EngineContext,
        _state: &mut ProjectState,
        _env: &mut PhaseEnv,
    ) -> Result<Option<String>> {
        Ok(None)
    }

    fn reflection_question(&self) -> &'static str {
        GENERIC_QUESTION
    }

    /// 对话与反思都没有给出内容时使用
    fn default_conclusion(&self) -> &'static str {
        ""
    }

    /// 保留结论中的 `<INFO>` 标记
    fn keep_marker(&self) -> bool {
        false
    }

    async fn apply(
        &self,
        ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
        conclusion: &str,
    ) -> Result<()>;
}

/// 取最后一个 `<INFO>` 之后的文本
pub fn strip_marker(text: &str) -> &str {
    text.rsplit(INFO_MARKER).next().unwrap_or(text).trim()
}

/// 一个可执行的 Phase：配置（角色、模板）加上行为
#[derive(Clone)]
pub struct Phase {
    name: String,
    assistant_role: String,
    user_role: String,
    template: String,
    variants: BTreeMap<String, String>,
    role_prompts: Arc<BTreeMap<String, String>>,
    logic: Arc<dyn PhaseLogic>,
}

impl std::fmt::Debug for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Phase")
            .field("name", &self.name)
            .field("assistant_role", &self.assistant_role)
            .field("user_role", &self.user_role)
            .finish()
    }
}

impl Phase {
    pub fn new(
        name: impl Into<String>,
        assistant_role: impl Into<String>,
        user_role: impl Into<String>,
        template: impl Into<String>,
        role_prompts: Arc<BTreeMap<String, String>>,
        logic: Arc<dyn PhaseLogic>,
    ) -> Self {
        Self {
            name: name.into(),
            assistant_role: assistant_role.into(),
            user_role: user_role.into(),
            template: template.into(),
            variants: BTreeMap::new(),
            role_prompts,
            logic,
        }
    }

    pub fn with_variants(mut self, variants: BTreeMap<String, String>) -> Self {
        self.variants = variants;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn logic(&self) -> &dyn PhaseLogic {
        self.logic.as_ref()
    }

    fn role_prompt(&self, role: &str, env: &PhaseEnv) -> String {
        let raw = self.role_prompts.get(role).map(String::as_str).unwrap_or("");
        prompt::render(raw, &env.placeholders)
    }

    /// 执行一次，返回结论
    pub async fn execute(
        &self,
        ctx: &EngineContext,
        state: &mut ProjectState,
        env: &mut PhaseEnv,
        turn_limit: usize,
        need_reflect: bool,
    ) -> Result<String> {
        for role in [&self.assistant_role, &self.user_role] {
            if !state.roster.exists(role) {
                return Err(EngineError::RoleNotRecruited(role.clone()));
            }
        }
        if turn_limit == 0 || turn_limit > MAX_TURN_LIMIT {
            return Err(EngineError::InvalidTurnLimit(turn_limit));
        }

        for key in self.logic.reads() {
            env.set(key.placeholder(), state.read(*key));
        }
        env.set("assistant_role", self.assistant_role.clone());
        env.set("user_role", self.user_role.clone());
        env.prompt_variant = None;

        tracing::info!(phase = %self.name, turn_limit, need_reflect, "phase started");
        let raw = match self.logic.prepare(ctx, state, env).await? {
            Some(shortcut) => {
                tracing::info!(phase = %self.name, "phase concluded without chat");
                shortcut
            }
            None => self.converse(ctx, env, turn_limit, need_reflect).await?,
        };

        let mut conclusion = if self.logic.keep_marker() {
            raw.trim().to_string()
        } else {
            strip_marker(&raw).to_string()
        };
        if conclusion.is_empty() {
            conclusion = self.logic.default_conclusion().to_string();
        }

        self.logic.apply(ctx, state, env, &conclusion).await?;
        state.bump_revision();
        tracing::info!(
            phase = %self.name,
            revision = state.revision(),
            writes = ?self.logic.writes(),
            "phase finished"
        );
        Ok(conclusion)
    }

    async fn converse(
        &self,
        ctx: &EngineContext,
        env: &PhaseEnv,
        turn_limit: usize,
        need_reflect: bool,
    ) -> Result<String> {
        let template = env
            .prompt_variant
            .and_then(|v| self.variants.get(v))
            .unwrap_or(&self.template);
        let missing = prompt::unresolved(template, &env.placeholders);
        if !missing.is_empty() {
            tracing::debug!(phase = %self.name, ?missing, "unresolved placeholders");
        }
        let phase_prompt = prompt::render(template, &env.placeholders);
        let assistant = RoleSpec::new(&self.assistant_role, self.role_prompt(&self.assistant_role, env));
        let user = RoleSpec::new(&self.user_role, self.role_prompt(&self.user_role, env));

        let mut transcript = vec![Message::user(phase_prompt).from_speaker(&self.user_role)];
        let mut concluded: Option<String> = None;
        let mut last_reply = String::new();

        for turn in 0..turn_limit {
            let reply = ctx
                .chat
                .step(ChatRequest {
                    phase: &self.name,
                    assistant: &assistant,
                    user: &user,
                    transcript: &transcript,
                    placeholders: &env.placeholders,
                    single_turn: turn_limit == 1,
                })
                .await?;
            tracing::debug!(
                phase = %self.name,
                turn,
                is_final = reply.is_final,
                terminated = reply.terminated,
                "chat turn"
            );

            transcript.push(Message::assistant(reply.assistant.clone()).from_speaker(&self.assistant_role));
            last_reply = reply.assistant.clone();
            if let Some(user_text) = &reply.user {
                transcript.push(Message::user(user_text.clone()).from_speaker(&self.user_role));
            }
            if reply.is_final {
                concluded = Some(reply.final_text().to_string());
                break;
            }
            if reply.terminated || reply.user.is_none() {
                break;
            }
        }

        let unusable = concluded
            .as_deref()
            .map(|c| strip_marker(c).is_empty())
            .unwrap_or(true);
        if need_reflect && unusable {
            let answer = self.reflect(ctx, &transcript).await?;
            return Ok(format!("{INFO_MARKER} {answer}"));
        }
        Ok(concluded.unwrap_or(last_reply))
    }

    /// 监督角色读完整段对话，回答 Phase 特定的封闭问题
    async fn reflect(&self, ctx: &EngineContext, transcript: &[Message]) -> Result<String> {
        let mut placeholders = BTreeMap::new();
        placeholders.insert("conversations".to_string(), render_transcript(transcript));
        placeholders.insert(
            "question".to_string(),
            self.logic.reflection_question().to_string(),
        );
        let assistant = RoleSpec::new(
            REFLECTION_ASSISTANT,
            self.role_prompts
                .get(REFLECTION_ASSISTANT)
                .cloned()
                .unwrap_or_default(),
        );
        let user = RoleSpec::new(
            REFLECTION_USER,
            self.role_prompts.get(REFLECTION_USER).cloned().unwrap_or_default(),
        );
        let request_transcript =
            vec![Message::user(prompt::render(REFLECTION_TEMPLATE, &placeholders)).from_speaker(REFLECTION_USER)];

        tracing::info!(phase = %self.name, "reflecting on conversation");
        let reply = ctx
            .chat
            .step(ChatRequest {
                phase: REFLECTION_PHASE,
                assistant: &assistant,
                user: &user,
                transcript: &request_transcript,
                placeholders: &placeholders,
                single_turn: true,
            })
            .await?;
        Ok(strip_marker(&reply.assistant).to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::artifacts::StoreThresholds;
    use crate::chat::{ChatReply, ScriptedChat};
    use crate::core::ProjectSettings;
    use crate::testing::{RecordingInstaller, ScriptedRunner};

    /// 记录结论的最简 Phase
    #[derive(Default)]
    struct Capture {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PhaseLogic for Capture {
        fn reads(&self) -> &'static [EnvKey] {
            &[EnvKey::TaskPrompt]
        }

        fn writes(&self) -> &'static [EnvKey] {
            &[EnvKey::Modality]
        }

        fn default_conclusion(&self) -> &'static str {
            "fallback"
        }

        async fn apply(
            &self,
            _ctx: &EngineContext,
            state: &mut ProjectState,
            _env: &mut PhaseEnv,
            conclusion: &str,
        ) -> Result<()> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(conclusion.to_string());
            }
            state.env.modality = conclusion.to_string();
            Ok(())
        }
    }

    fn context(chat: ScriptedChat) -> EngineContext {
        EngineContext::new(
            Arc::new(chat),
            Arc::new(ScriptedRunner::new()),
            Arc::new(RecordingInstaller::default()),
        )
    }

    fn state() -> ProjectState {
        let mut state = ProjectState::new(ProjectSettings::default(), StoreThresholds::default());
        for role in ["Product Owner", "Development Team", "Programmer"] {
            state.roster.recruit(role);
        }
        state.env.task_prompt = "build a calculator".to_string();
        state
    }

    fn phase(logic: Arc<dyn PhaseLogic>) -> Phase {
        Phase::new(
            "DemandAnalysis",
            "Product Owner",
            "Programmer",
            "Task: {task}",
            Arc::new(BTreeMap::new()),
            logic,
        )
    }

    #[tokio::test]
    async fn test_final_answer_is_stripped() {
        let chat = ScriptedChat::new().reply("DemandAnalysis", "We agree. <INFO> Application");
        let ctx = context(chat);
        let mut state = state();
        let mut env = PhaseEnv::default();
        let conclusion = phase(Arc::new(Capture::default()))
            .execute(&ctx, &mut state, &mut env, 3, false)
            .await
            .unwrap();
        assert_eq!(conclusion, "Application");
        assert_eq!(state.env.modality, "Application");
        assert_eq!(env.get("task"), Some("build a calculator"));
        assert_eq!(state.revision(), 1);
    }

    #[tokio::test]
    async fn test_reflection_when_no_final_answer() {
        let chat = ScriptedChat::new()
            .turn(
                "DemandAnalysis",
                ChatReply {
                    assistant: "maybe a website".to_string(),
                    user: Some("or an app".to_string()),
                    ..Default::default()
                },
            )
            .reply("Reflection", "Website");
        let ctx = context(chat);
        let mut state = state();
        let mut env = PhaseEnv::default();
        let conclusion = phase(Arc::new(Capture::default()))
            .execute(&ctx, &mut state, &mut env, 1, true)
            .await
            .unwrap();
        assert_eq!(conclusion, "Website");
    }

    #[tokio::test]
    async fn test_empty_conclusion_uses_default() {
        let ctx = context(ScriptedChat::new());
        let mut state = state();
        let mut env = PhaseEnv::default();
        let conclusion = phase(Arc::new(Capture::default()))
            .execute(&ctx, &mut state, &mut env, 2, false)
            .await
            .unwrap();
        assert_eq!(conclusion, "fallback");
    }

    #[tokio::test]
    async fn test_unrecruited_role_is_fatal() {
        let ctx = context(ScriptedChat::new());
        let mut state = ProjectState::new(ProjectSettings::default(), StoreThresholds::default());
        state.roster.recruit("Product Owner");
        let mut env = PhaseEnv::default();
        let err = phase(Arc::new(Capture::default()))
            .execute(&ctx, &mut state, &mut env, 2, false)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RoleNotRecruited(ref r) if r == "Programmer"));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_turn_limit_bounds() {
        let ctx = context(ScriptedChat::new());
        let mut state = state();
        let mut env = PhaseEnv::default();
        let p = phase(Arc::new(Capture::default()));
        assert!(matches!(
            p.execute(&ctx, &mut state, &mut env, 0, false).await,
            Err(EngineError::InvalidTurnLimit(0))
        ));
        assert!(matches!(
            p.execute(&ctx, &mut state, &mut env, 101, false).await,
            Err(EngineError::InvalidTurnLimit(101))
        ));
    }

    #[test]
    fn test_strip_marker_takes_last_segment() {
        assert_eq!(strip_marker("a <INFO> b <INFO> Python"), "Python");
        assert_eq!(strip_marker("no marker"), "no marker");
    }
}
