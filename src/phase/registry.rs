//! Phase 注册表：名字 -> 行为构造器；PhaseBook 把公司配置与行为组装成可执行的 Phase
//!
//! 链路在任何对话之前整体校验：未注册的 Phase、缺少提示词配置的 Phase、
//! 未知的组合 Phase 都是致命错误。

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::composed::ComposedKind;
use crate::config::{ChainItem, CompanyConfig};
use crate::core::{EngineError, Result};
use crate::phase::coding::{CodeComplete, CodeFormatting, CodeReviewComment, CodeReviewModification, Coding};
use crate::phase::docs::{EnvironmentDoc, Manual};
use crate::phase::planning::{
    DemandAnalysis, LanguageChoose, ProductBacklogCreating, ProductBacklogModification,
    ProductBacklogReview, RolesEngagement, SprintBacklogCreating, SprintBacklogModification,
    SprintBacklogReview, SprintReview,
};
use crate::phase::testing::{TestErrorSummary, TestModification, TestWriting};
use crate::phase::{Phase, PhaseLogic};

/// 行为构造器
pub type LogicFactory = fn() -> Arc<dyn PhaseLogic>;

fn make<T: PhaseLogic + Default + 'static>() -> Arc<dyn PhaseLogic> {
    Arc::new(T::default())
}

fn next_sprint_backlog() -> Arc<dyn PhaseLogic> {
    Arc::new(SprintBacklogCreating::following())
}

fn inherit_coding() -> Arc<dyn PhaseLogic> {
    Arc::new(Coding::inherited())
}

pub struct PhaseRegistry {
    factories: BTreeMap<&'static str, LogicFactory>,
}

impl PhaseRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// 内置的全部 Phase
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry
            .register("DemandAnalysis", make::<DemandAnalysis>)
            .register("LanguageChoose", make::<LanguageChoose>)
            .register("ProductBacklogCreating", make::<ProductBacklogCreating>)
            .register("ProductBacklogReview", make::<ProductBacklogReview>)
            .register("ProductBacklogModification", make::<ProductBacklogModification>)
            .register("SprintBacklogCreating", make::<SprintBacklogCreating>)
            .register("NextSprintBacklogCreating", next_sprint_backlog)
            .register("SprintBacklogReview", make::<SprintBacklogReview>)
            .register("SprintBacklogModification", make::<SprintBacklogModification>)
            .register("RolesEngagement", make::<RolesEngagement>)
            .register("SprintReview", make::<SprintReview>)
            .register("Coding", make::<Coding>)
            .register("InheritCoding", inherit_coding)
            .register("CodeFormatting", make::<CodeFormatting>)
            .register("CodeComplete", make::<CodeComplete>)
            .register("CodeReviewComment", make::<CodeReviewComment>)
            .register("CodeReviewModification", make::<CodeReviewModification>)
            .register("TestErrorSummary", make::<TestErrorSummary>)
            .register("TestModification", make::<TestModification>)
            .register("TestWriting", make::<TestWriting>)
            .register("EnvironmentDoc", make::<EnvironmentDoc>)
            .register("Manual", make::<Manual>);
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: LogicFactory) -> &mut Self {
        self.factories.insert(name, factory);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn create(&self, name: &str) -> Result<Arc<dyn PhaseLogic>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| EngineError::UnknownPhase(name.to_string()))
    }
}

impl Default for PhaseRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// 一次运行中可用的全部 Phase
#[derive(Debug, Clone, Default)]
pub struct PhaseBook {
    phases: BTreeMap<String, Phase>,
}

impl PhaseBook {
    /// 组装并校验；链路中引用的每个名字都必须可解析
    pub fn build(company: &CompanyConfig, registry: &PhaseRegistry) -> Result<Self> {
        let role_prompts = Arc::new(company.role_prompts());
        let mut phases = BTreeMap::new();
        for (name, config) in &company.phases {
            if !registry.contains(name) {
                tracing::warn!(phase = %name, "phase configured but not registered, ignored");
                continue;
            }
            let phase = Phase::new(
                name.clone(),
                config.assistant_role_name.clone(),
                config.user_role_name.clone(),
                config.template(),
                role_prompts.clone(),
                registry.create(name)?,
            )
            .with_variants(config.variants());
            phases.insert(name.clone(), phase);
        }
        let book = Self { phases };
        book.validate(&company.chain.chain, registry)?;
        tracing::info!(phases = book.phases.len(), "phase book ready");
        Ok(book)
    }

    /// 递归检查链路中的每一项
    pub fn validate(&self, items: &[ChainItem], registry: &PhaseRegistry) -> Result<()> {
        for item in items {
            match item {
                ChainItem::SimplePhase { phase, .. } => {
                    if !registry.contains(phase) {
                        return Err(EngineError::UnknownPhase(phase.clone()));
                    }
                    if !self.phases.contains_key(phase) {
                        return Err(EngineError::MissingPhaseConfig(phase.clone()));
                    }
                }
                ChainItem::ComposedPhase {
                    phase, composition, ..
                } => {
                    if ComposedKind::from_name(phase).is_none() {
                        return Err(EngineError::UnknownComposedPhase(phase.clone()));
                    }
                    self.validate(composition, registry)?;
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Phase> {
        self.phases
            .get(name)
            .ok_or_else(|| EngineError::MissingPhaseConfig(name.to_string()))
    }

    pub fn insert(&mut self, phase: Phase) {
        self.phases.insert(phase.name().to_string(), phase);
    }
}
