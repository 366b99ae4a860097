//! 链路集成测试：前缀 / sprint 循环 / 后缀、项目目录产物、启动前校验

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use crewforge::chat::ScriptedChat;
    use crewforge::testing::{RecordingInstaller, ScriptedRunner};
    use crewforge::{AppConfig, ChatChain, CompanyConfig, EngineContext, EngineError};
    use serde_json::{json, Value};

    fn phase(assistant: &str) -> Value {
        json!({
            "assistant_role_name": assistant,
            "user_role_name": "Scrum Master",
            "phase_prompt": ["Task: {task}", "Modality: {modality}"]
        })
    }

    fn simple(name: &str) -> Value {
        json!({"phase": name, "phaseType": "SimplePhase", "max_turn_step": 1, "need_reflect": "False"})
    }

    fn write_company(dir: &Path, chain: Value) -> CompanyConfig {
        let phases = json!({
            "DemandAnalysis": phase("Product Owner"),
            "LanguageChoose": phase("Development Team"),
            "NextSprintBacklogCreating": phase("Product Owner"),
            "Manual": phase("Product Owner")
        });
        let roles = json!({
            "Product Owner": ["You are the Product Owner.", "Task: {task}"],
            "Scrum Master": ["You are the Scrum Master."]
        });
        std::fs::write(dir.join("ChatChainConfig.json"), chain.to_string()).unwrap();
        std::fs::write(dir.join("PhaseConfig.json"), phases.to_string()).unwrap();
        std::fs::write(dir.join("RoleConfig.json"), roles.to_string()).unwrap();
        CompanyConfig::load(dir).unwrap()
    }

    fn context(chat: Arc<ScriptedChat>) -> EngineContext {
        EngineContext::new(
            chat,
            Arc::new(ScriptedRunner::new()),
            Arc::new(RecordingInstaller::default()),
        )
    }

    #[tokio::test]
    async fn test_chain_runs_prefix_sprints_and_suffix() {
        let company_dir = tempfile::tempdir().unwrap();
        let warehouse = tempfile::tempdir().unwrap();
        std::fs::write(warehouse.path().join("stale.txt"), "x").unwrap();

        let company = write_company(
            company_dir.path(),
            json!({
                "chain": [
                    simple("DemandAnalysis"),
                    simple("LanguageChoose"),
                    {"phase": "SprintCompletion", "phaseType": "ComposedPhase", "cycleNum": 1,
                     "Composition": [simple("NextSprintBacklogCreating")]},
                    simple("Manual")
                ],
                "recruitments": ["Scrum Master", "Product Owner"]
            }),
        );

        let mut app = AppConfig::default();
        app.project.name = "snake".to_string();
        app.project.org = "acme".to_string();
        app.project.warehouse = warehouse.path().to_path_buf();
        app.engine.sprint_index = 2;
        app.engine.max_sprints = 3;
        app.engine.self_improve = true;

        let chat = Arc::new(
            ScriptedChat::new()
                .reply("TaskImprovement", "Sure. <INFO> Build A Snake Game")
                .reply("DemandAnalysis", "<INFO> Application.")
                .reply("LanguageChoose", "<INFO> Python")
                .reply("NextSprintBacklogCreating", "<INFO> DONE.")
                .reply("Manual", "<INFO> # Snake\nRun main.py"),
        );
        let mut chain = ChatChain::new(&app, company, context(chat.clone())).unwrap();
        let directory = chain.run("make a snake game").await.unwrap();

        let calls = chat.calls();
        let sprints = calls
            .iter()
            .filter(|c| c.as_str() == "NextSprintBacklogCreating")
            .count();
        assert_eq!(sprints, 1);
        assert!(calls.iter().any(|c| c == "Manual"));

        let state = chain.state();
        assert!(state.env.end_sprint);
        assert_eq!(state.env.task_prompt, "build a snake game");
        assert_eq!(state.env.modality, "application");
        assert_eq!(state.env.language, "Python");

        assert!(directory.starts_with(warehouse.path()));
        assert!(directory
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("snake_acme_"));
        assert!(!warehouse.path().join("stale.txt").exists());
        assert!(directory.join("assets").is_dir());
        assert!(directory.join("ChatChainConfig.json").exists());
        assert_eq!(
            std::fs::read_to_string(directory.join("snake.prompt")).unwrap(),
            "make a snake game"
        );
        assert_eq!(
            std::fs::read_to_string(directory.join("manual.md")).unwrap(),
            "# Snake\nRun main.py"
        );
        let meta = std::fs::read_to_string(directory.join("meta.txt")).unwrap();
        assert!(meta.starts_with("Task:\nbuild a snake game\n\n"));
        assert!(meta.contains("Modality:\napplication\n\n"));
        assert!(meta.contains("Roster:\nDevelopment Team, Product Owner, Scrum Master\n\n"));
        let diagnostics: Value =
            serde_json::from_str(&std::fs::read_to_string(directory.join("diagnostics.json")).unwrap()).unwrap();
        assert_eq!(diagnostics["class_lookup"], 0);
    }

    #[tokio::test]
    async fn test_unknown_phase_rejected_before_any_chat() {
        let company_dir = tempfile::tempdir().unwrap();
        let company = write_company(
            company_dir.path(),
            json!({
                "chain": [simple("DemandAnalysis"), simple("Brainstorm")],
                "recruitments": ["Scrum Master", "Product Owner"]
            }),
        );
        let chat = Arc::new(ScriptedChat::new());
        let err = ChatChain::new(&AppConfig::default(), company, context(chat.clone()))
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::UnknownPhase(ref name) if name == "Brainstorm"));
        assert!(chat.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_composed_phase_rejected() {
        let company_dir = tempfile::tempdir().unwrap();
        let company = write_company(
            company_dir.path(),
            json!({
                "chain": [{"phase": "Art", "phaseType": "ComposedPhase", "cycleNum": 1,
                           "Composition": [simple("DemandAnalysis")]}],
                "recruitments": ["Scrum Master", "Product Owner"]
            }),
        );
        let err = ChatChain::new(&AppConfig::default(), company, context(Arc::new(ScriptedChat::new())))
            .err()
            .unwrap();
        assert!(err.is_fatal());
        assert!(matches!(err, EngineError::UnknownComposedPhase(_)));
    }
}
