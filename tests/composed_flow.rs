//! 组合 Phase 集成测试：退出条件、扇出屏障、测试修复循环

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use crewforge::artifacts::StoreThresholds;
    use crewforge::chat::ScriptedChat;
    use crewforge::composed::{ComposedKind, ComposedPhase};
    use crewforge::config::{ChainConfig, ChainItem, CompanyConfig, PhaseConfig};
    use crewforge::core::{EngineContext, ProjectSettings, ProjectState};
    use crewforge::phase::{PhaseBook, PhaseRegistry};
    use crewforge::testing::{ProcessOutcome, RecordingInstaller, ScriptedRunner};

    const ROLES: [&str; 4] = ["Product Owner", "Scrum Master", "Programmer", "Software Test Engineer"];

    fn simple(name: &str) -> ChainItem {
        ChainItem::SimplePhase {
            phase: name.to_string(),
            max_turn_step: 1,
            need_reflect: false,
        }
    }

    fn book(composed: &ComposedPhase, items: &[ChainItem]) -> PhaseBook {
        let phases = items
            .iter()
            .map(|item| {
                let config = PhaseConfig {
                    assistant_role_name: "Programmer".to_string(),
                    user_role_name: "Product Owner".to_string(),
                    phase_prompt: vec!["Task: {task}".to_string()],
                    prompt_variants: BTreeMap::new(),
                };
                (item.phase().to_string(), config)
            })
            .collect();
        let company = CompanyConfig {
            directory: PathBuf::from("company"),
            chain: ChainConfig {
                chain: vec![ChainItem::ComposedPhase {
                    phase: composed.name().to_string(),
                    cycle_num: 1,
                    composition: items.to_vec(),
                }],
                recruitments: ROLES.iter().map(|r| r.to_string()).collect(),
            },
            phases,
            roles: BTreeMap::new(),
        };
        PhaseBook::build(&company, &PhaseRegistry::builtin()).unwrap()
    }

    fn state(directory: Option<&std::path::Path>) -> ProjectState {
        let mut state = ProjectState::new(ProjectSettings::default(), StoreThresholds::default());
        for role in ROLES {
            state.roster.recruit(role);
        }
        if let Some(directory) = directory {
            state.set_directory(directory).unwrap();
        }
        state
    }

    fn context(chat: Arc<ScriptedChat>, runner: Arc<ScriptedRunner>) -> EngineContext {
        EngineContext::new(chat, runner, Arc::new(RecordingInstaller::default()))
    }

    fn count(calls: &[String], label: &str) -> usize {
        calls.iter().filter(|c| c.as_str() == label).count()
    }

    #[tokio::test]
    async fn test_backlog_update_stops_when_review_finishes() {
        let chat = Arc::new(
            ScriptedChat::new()
                .reply("ProductBacklogReview", "<INFO> Add a login screen")
                .reply("ProductBacklogReview", "<INFO> Finished.")
                .reply("ProductBacklogModification", "<INFO> 1. Snake moves\n2. Login screen"),
        );
        let ctx = context(chat.clone(), Arc::new(ScriptedRunner::new()));
        let items = vec![simple("ProductBacklogReview"), simple("ProductBacklogModification")];
        let composed = ComposedPhase::new(ComposedKind::ProductBacklogUpdate, "ProductBacklogUpdate", 5, items.clone());
        let book = book(&composed, &items);
        let mut state = state(None);
        state.env.product_backlog = vec!["1. Snake moves".to_string()];

        composed.execute(&ctx, &book, &mut state).await.unwrap();

        let calls = chat.calls();
        assert_eq!(count(&calls, "ProductBacklogReview"), 2);
        assert_eq!(count(&calls, "ProductBacklogModification"), 1);
        assert_eq!(
            state.env.product_backlog,
            vec!["1. Snake moves".to_string(), "2. Login screen".to_string()]
        );
        assert_eq!(state.env.product_backlog_comments, "Finished.");
    }

    const TESTS_FOR_BOTH: &str = "FILENAME: test_board.py\n```python\nfrom board import Board\n\ndef test_size():\n    assert Board().size() == 9\n```\n\nFILENAME: test_main.py\n```python\nimport main\n\ndef test_main_module_loads():\n    assert main is not None\n```\n";

    #[tokio::test]
    async fn test_fan_out_waits_for_slow_file_before_merging() {
        let dir = tempfile::tempdir().unwrap();
        let chat = Arc::new(
            ScriptedChat::new()
                .with_fallback(TESTS_FOR_BOTH)
                .delay_for_file("board.py", Duration::from_millis(200)),
        );
        let ctx = context(chat.clone(), Arc::new(ScriptedRunner::new()));
        let items = vec![simple("TestWriting")];
        let composed = ComposedPhase::new(ComposedKind::WritingFullTestSuite, "WritingFullTestSuite", 1, items.clone());
        let book = book(&composed, &items);

        let mut state = state(Some(dir.path()));
        state.artifacts.insert(
            "board.py",
            "class Board:\n    def __init__(self):\n        self.cells = [0] * 9\n    def size(self):\n        return len(self.cells)".to_string(),
            false,
        );
        state.artifacts.insert(
            "main.py",
            "from board import Board\nif __name__ == '__main__':\n    print(Board().size())".to_string(),
            false,
        );
        state.rebuild_graph();

        composed.execute(&ctx, &book, &mut state).await.unwrap();

        let calls = chat.calls();
        let fast = calls.iter().position(|c| c == "done:TestWriting:main.py").unwrap();
        let slow = calls.iter().position(|c| c == "done:TestWriting:board.py").unwrap();
        assert!(fast < slow, "main.py should finish while board.py is still delayed");

        assert!(state.artifacts.is_test("test_board.py"));
        assert!(state.artifacts.is_test("test_main.py"));
        assert_eq!(state.test_file_map["board.py"], vec!["test_board.py".to_string()]);
        assert_eq!(state.test_file_map["main.py"], vec!["test_main.py".to_string()]);
        assert!(dir.path().join("test_board.py").exists());
        assert!(dir.path().join("test_main.py").exists());
    }

    #[tokio::test]
    async fn test_bug_fixing_repairs_class_owner_on_attribute_error() {
        let dir = tempfile::tempdir().unwrap();
        let failure = ProcessOutcome::exited(
            1,
            "",
            "Traceback (most recent call last):\n  File \"main.py\", line 3, in <module>\n    Helper().go()\nAttributeError: 'Helper' object has no attribute 'go'",
        );
        let runner = Arc::new(ScriptedRunner::new().on_sequence("main.py", vec![failure]));
        let chat = Arc::new(
            ScriptedChat::new()
                .reply("TestErrorSummary", "<INFO> Helper lacks a go method")
                .reply(
                    "TestModification",
                    "FILENAME: helper.py\n```python\nclass Helper:\n    def run(self):\n        return 1\n    def go(self):\n        return self.run()\n```\n",
                ),
        );
        let ctx = context(chat.clone(), runner.clone());
        let items = vec![simple("TestErrorSummary"), simple("TestModification")];
        let composed = ComposedPhase::new(ComposedKind::BugFixing, "BugFixing", 1, items.clone());
        let book = book(&composed, &items);

        let mut state = state(Some(dir.path()));
        state.artifacts.insert(
            "main.py",
            "from helper import Helper\nif __name__ == '__main__':\n    Helper().go()".to_string(),
            false,
        );
        state.artifacts.insert(
            "helper.py",
            "class Helper:\n    def run(self):\n        return 1".to_string(),
            false,
        );
        state.rebuild_graph();

        composed.execute(&ctx, &book, &mut state).await.unwrap();

        assert!(state.artifacts.get("helper.py").unwrap().contains("def go(self):"));
        assert_eq!(state.env.error_summary, "Helper lacks a go method");
        assert_eq!(state.diagnostics.attribute_error, 1);
        assert_eq!(state.diagnostics.class_lookup, 1);
        assert!(std::fs::read_to_string(dir.path().join("helper.py"))
            .unwrap()
            .contains("def go(self):"));
        assert_eq!(runner.history().len(), 1);
        assert!(state.env.testing_commands.is_none());
    }

    #[tokio::test]
    async fn test_bug_fixing_resumes_queue_until_clean() {
        let dir = tempfile::tempdir().unwrap();
        let suite_failure = ProcessOutcome::exited(
            1,
            "______ test_size ______\n    assert Board().size() == 9\nE   assert 3 == 9\nFAILED test_board.py::test_size - assert 3 == 9",
            "",
        );
        let runner = Arc::new(ScriptedRunner::new().on_sequence("test_board.py", vec![suite_failure]));
        let chat = Arc::new(
            ScriptedChat::new()
                .reply("TestErrorSummary", "<INFO> size returns 3")
                .reply(
                    "TestModification",
                    "FILENAME: board.py\n```python\nclass Board:\n    def size(self):\n        return 9\n```\n",
                ),
        );
        let ctx = context(chat.clone(), runner.clone());
        let items = vec![simple("TestErrorSummary"), simple("TestModification")];
        let composed = ComposedPhase::new(ComposedKind::BugFixing, "BugFixing", 1, items.clone());
        let book = book(&composed, &items);

        let mut state = state(Some(dir.path()));
        state.artifacts.insert(
            "board.py",
            "class Board:\n    def size(self):\n        return 3".to_string(),
            false,
        );
        state.artifacts.insert(
            "main.py",
            "from board import Board\nif __name__ == '__main__':\n    print(Board().size())".to_string(),
            false,
        );
        state.artifacts.insert(
            "test_board.py",
            "from board import Board\ndef test_size():\n    assert Board().size() == 9".to_string(),
            true,
        );
        state.record_tests("board.py", ["test_board.py".to_string()]);
        state.rebuild_graph();

        composed.execute(&ctx, &book, &mut state).await.unwrap();

        let history = runner.history();
        assert_eq!(history.len(), 2);
        assert!(history[0].contains("test_board.py"));
        assert!(history[1].contains("main.py"));

        let calls = chat.calls();
        assert_eq!(count(&calls, "TestErrorSummary"), 1);
        assert_eq!(count(&calls, "TestModification"), 1);
        assert!(!state.env.exist_bugs);
        assert!(state.artifacts.get("board.py").unwrap().contains("return 9"));
        assert!(state.env.testing_commands.is_none());
    }
}
