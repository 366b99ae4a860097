//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CREW__*` 覆盖（双下划线表示嵌套，如 `CREW__ENGINE__MAX_SPRINTS=3`）。
//! Phase 链、Phase 提示词与角色定义属于公司配置（JSON），见 [`CompanyConfig`]。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::artifacts::StoreThresholds;
use crate::core::{EngineError, ProjectSettings, RetryPolicy};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub artifacts: ArtifactsSection,
    #[serde(default)]
    pub testing: TestingSection,
}

/// [project] 段：任务、项目名、组织名、输出根目录
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectSection {
    #[serde(default)]
    pub task: String,
    #[serde(default = "default_project_name")]
    pub name: String,
    #[serde(default = "default_org")]
    pub org: String,
    #[serde(default = "default_warehouse")]
    pub warehouse: PathBuf,
    /// 存放 ChatChainConfig.json / PhaseConfig.json / RoleConfig.json 的目录
    #[serde(default = "default_company_dir")]
    pub company_dir: PathBuf,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            task: String::new(),
            name: default_project_name(),
            org: default_org(),
            warehouse: default_warehouse(),
            company_dir: default_company_dir(),
        }
    }
}

fn default_project_name() -> String {
    "project".to_string()
}

fn default_org() -> String {
    "DefaultOrganization".to_string()
}

fn default_warehouse() -> PathBuf {
    PathBuf::from("warehouse")
}

fn default_company_dir() -> PathBuf {
    PathBuf::from("company/Agile")
}

/// [llm] 段：OpenAI 兼容后端
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    /// 采样温度；角色扮演对话偏向稳定输出
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key: None,
            temperature: default_temperature(),
        }
    }
}

fn default_temperature() -> f32 {
    0.2
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

/// [engine] 段：链路、重试与并发参数
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_true")]
    pub clear_structure: bool,
    #[serde(default)]
    pub git_management: bool,
    #[serde(default)]
    pub gui_design: bool,
    /// 运行前先用一次单轮对话改写任务描述
    #[serde(default)]
    pub self_improve: bool,
    /// max_turn_step <= 0 时使用的对话轮数
    #[serde(default = "default_turn_limit")]
    pub default_turn_limit: usize,
    #[serde(default = "default_max_sprints")]
    pub max_sprints: usize,
    /// 链路中 sprint 循环项的位置；之前为前缀，之后为后缀
    #[serde(default = "default_sprint_index")]
    pub sprint_index: usize,
    #[serde(default = "default_transactional_retries")]
    pub transactional_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_format_retries")]
    pub format_retries: u32,
    #[serde(default = "default_fan_out_cap")]
    pub fan_out_cap: usize,
    /// 每个未实现文件最多尝试补全的次数
    #[serde(default = "default_code_complete_attempts")]
    pub code_complete_attempts: u32,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            clear_structure: true,
            git_management: false,
            gui_design: false,
            self_improve: false,
            default_turn_limit: default_turn_limit(),
            max_sprints: default_max_sprints(),
            sprint_index: default_sprint_index(),
            transactional_retries: default_transactional_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            format_retries: default_format_retries(),
            fan_out_cap: default_fan_out_cap(),
            code_complete_attempts: default_code_complete_attempts(),
        }
    }
}

impl EngineSection {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.transactional_retries,
            Duration::from_millis(self.retry_backoff_ms),
        )
    }

    pub fn project_settings(&self) -> ProjectSettings {
        ProjectSettings {
            clear_structure: self.clear_structure,
            git_management: self.git_management,
            gui_design: self.gui_design,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_turn_limit() -> usize {
    10
}

fn default_max_sprints() -> usize {
    10
}

fn default_sprint_index() -> usize {
    5
}

fn default_transactional_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

fn default_format_retries() -> u32 {
    3
}

fn default_fan_out_cap() -> usize {
    5
}

fn default_code_complete_attempts() -> u32 {
    5
}

/// [artifacts] 段：相似度与完整性阈值（经验值，可调）
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsSection {
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f64,
    #[serde(default = "default_completeness_ratio")]
    pub completeness_ratio: f64,
    #[serde(default = "default_rename_threshold")]
    pub rename_threshold: f64,
}

impl Default for ArtifactsSection {
    fn default() -> Self {
        Self {
            duplicate_threshold: default_duplicate_threshold(),
            completeness_ratio: default_completeness_ratio(),
            rename_threshold: default_rename_threshold(),
        }
    }
}

impl ArtifactsSection {
    pub fn thresholds(&self) -> StoreThresholds {
        StoreThresholds {
            duplicate: self.duplicate_threshold,
            completeness: self.completeness_ratio,
            rename: self.rename_threshold,
        }
    }
}

fn default_duplicate_threshold() -> f64 {
    0.6
}

fn default_completeness_ratio() -> f64 {
    0.5
}

fn default_rename_threshold() -> f64 {
    0.6
}

/// [testing] 段：被测程序的执行方式
#[derive(Debug, Clone, Deserialize)]
pub struct TestingSection {
    /// 宽限期（秒）：到期仍在运行视为成功并终止
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    /// `{file}` 替换为程序文件名
    #[serde(default = "default_program_command")]
    pub program_command: String,
    #[serde(default = "default_suite_command")]
    pub suite_command: String,
    /// 额外配置的测试命令（原样执行）
    #[serde(default)]
    pub extra_commands: Vec<String>,
    /// 测试框架失败时保留的失败块数量（top-K）
    #[serde(default = "default_failure_blocks")]
    pub failure_blocks: usize,
    /// `{module}` 替换为缺失模块名
    #[serde(default = "default_install_command")]
    pub install_command: String,
}

impl Default for TestingSection {
    fn default() -> Self {
        Self {
            grace_period_secs: default_grace_period_secs(),
            program_command: default_program_command(),
            suite_command: default_suite_command(),
            extra_commands: Vec::new(),
            failure_blocks: default_failure_blocks(),
            install_command: default_install_command(),
        }
    }
}

impl TestingSection {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

fn default_grace_period_secs() -> u64 {
    3
}

fn default_program_command() -> String {
    "python3 {file}".to_string()
}

fn default_suite_command() -> String {
    "python3 -m pytest -q {file}".to_string()
}

fn default_failure_blocks() -> usize {
    3
}

fn default_install_command() -> String {
    "pip install {module}".to_string()
}

/// ChatChainConfig.json 中的 `"True"` / `"False"` 字符串或 JSON 布尔值
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Text(s) => s.eq_ignore_ascii_case("true"),
    })
}

/// 链路中的一项：单个 Phase 或可嵌套的组合 Phase
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "phaseType")]
pub enum ChainItem {
    SimplePhase {
        phase: String,
        /// <= 0 表示使用 engine.default_turn_limit
        #[serde(default)]
        max_turn_step: i64,
        #[serde(default, deserialize_with = "flag")]
        need_reflect: bool,
    },
    ComposedPhase {
        phase: String,
        #[serde(rename = "cycleNum", default = "default_cycle_num")]
        cycle_num: usize,
        #[serde(rename = "Composition", default)]
        composition: Vec<ChainItem>,
    },
}

fn default_cycle_num() -> usize {
    1
}

impl ChainItem {
    pub fn phase(&self) -> &str {
        match self {
            ChainItem::SimplePhase { phase, .. } | ChainItem::ComposedPhase { phase, .. } => phase,
        }
    }
}

/// ChatChainConfig.json
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain: Vec<ChainItem>,
    #[serde(default)]
    pub recruitments: Vec<String>,
}

/// PhaseConfig.json 中的一个 Phase
#[derive(Debug, Clone, Deserialize)]
pub struct PhaseConfig {
    pub assistant_role_name: String,
    pub user_role_name: String,
    pub phase_prompt: Vec<String>,
    /// 按错误类别选用的替代提示词（如 `missing_module`）
    #[serde(default)]
    pub prompt_variants: BTreeMap<String, Vec<String>>,
}

impl PhaseConfig {
    pub fn template(&self) -> String {
        self.phase_prompt.join("\n\n")
    }

    pub fn variants(&self) -> BTreeMap<String, String> {
        self.prompt_variants
            .iter()
            .map(|(name, lines)| (name.clone(), lines.join("\n\n")))
            .collect()
    }
}

/// 公司配置：链路、Phase 提示词与角色提示词
#[derive(Debug, Clone)]
pub struct CompanyConfig {
    pub directory: PathBuf,
    pub chain: ChainConfig,
    pub phases: BTreeMap<String, PhaseConfig>,
    pub roles: BTreeMap<String, Vec<String>>,
}

pub const CHAIN_FILE: &str = "ChatChainConfig.json";
pub const PHASE_FILE: &str = "PhaseConfig.json";
pub const ROLE_FILE: &str = "RoleConfig.json";

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> crate::core::Result<T> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
}

impl CompanyConfig {
    pub fn load(directory: impl AsRef<Path>) -> crate::core::Result<Self> {
        let directory = directory.as_ref();
        Ok(Self {
            directory: directory.to_path_buf(),
            chain: read_json(&directory.join(CHAIN_FILE))?,
            phases: read_json(&directory.join(PHASE_FILE))?,
            roles: read_json(&directory.join(ROLE_FILE))?,
        })
    }

    /// 角色名 -> 系统提示（多行拼接）
    pub fn role_prompts(&self) -> BTreeMap<String, String> {
        self.roles
            .iter()
            .map(|(role, lines)| (role.clone(), lines.join("\n")))
            .collect()
    }

    /// 三个配置文件的路径（复制到项目目录用）
    pub fn files(&self) -> [PathBuf; 3] {
        [CHAIN_FILE, PHASE_FILE, ROLE_FILE].map(|f| self.directory.join(f))
    }
}

/// 加载配置：config_path 为 None 时使用 config/default.toml（文件可选）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let path = config_path.unwrap_or_else(|| PathBuf::from("config/default.toml"));
    let builder = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix("CREW")
                .separator("__")
                .try_parsing(true),
        );
    let cfg = builder.build()?;
    cfg.try_deserialize()
}
