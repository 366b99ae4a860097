//! 依赖图：项目内 import 关系、测试顺序与祖先查询

pub mod dependency;

pub use dependency::DependencyGraph;
