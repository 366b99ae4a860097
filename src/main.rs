//! Crewforge - Agile 多角色协作软件生成引擎
//!
//! 入口：初始化日志、加载应用配置与公司配置、组装对话与进程协作者，并运行整条链路。
//!
//! 用法：`crewforge [任务描述]`；未给出时使用 `[project] task`。
//! 配置文件路径可通过环境变量 `CREW_CONFIG` 指定。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use crewforge::chat::RolePlayChat;
use crewforge::testing::{ShellInstaller, TokioProcessRunner};
use crewforge::{llm, load_config, observability, ChatChain, CompanyConfig, EngineContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖
    observability::init();

    let config_path = std::env::var("CREW_CONFIG").ok().map(PathBuf::from);
    let app = load_config(config_path).context("Failed to load config")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let task = if args.is_empty() {
        app.project.task.clone()
    } else {
        args.join(" ")
    };
    if task.trim().is_empty() {
        bail!("No task given: pass it as arguments or set [project] task");
    }

    let company = CompanyConfig::load(&app.project.company_dir).with_context(|| {
        format!(
            "Failed to load company config from {}",
            app.project.company_dir.display()
        )
    })?;

    let chat = Arc::new(RolePlayChat::new(llm::create_client(&app.llm)));
    let installer = Arc::new(ShellInstaller::new(app.testing.install_command.clone()));
    let ctx = EngineContext::new(chat, Arc::new(TokioProcessRunner), installer);

    let mut chain = ChatChain::new(&app, company, ctx).context("Invalid chain configuration")?;
    let directory = chain.run(&task).await.context("Chain run failed")?;
    tracing::info!(directory = %directory.display(), "done");

    Ok(())
}
