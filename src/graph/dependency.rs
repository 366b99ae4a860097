//! 项目内 import 依赖图
//!
//! 邻接表：文件 -> 它 import 的项目内文件；反向表：文件 -> import 它的文件。
//! 外部库的 import 被丢弃。每次产物落盘后整体重建，不做增量维护。

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::artifacts::syntax::{imported_modules, is_python_file};
use crate::artifacts::{is_test_filename, ArtifactStore};

/// 依赖图
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 邻接表：文件 -> 它依赖的文件（保持 import 出现顺序）
    pub adjacency: BTreeMap<String, Vec<String>>,
    /// 反向表：文件 -> 依赖它的文件
    pub dependents: BTreeMap<String, BTreeSet<String>>,
    test_nodes: BTreeSet<String>,
}

fn module_stem(filename: &str) -> &str {
    filename.strip_suffix(".py").unwrap_or(filename)
}

impl DependencyGraph {
    /// 从仓库中的 Python 文件构建
    pub fn build(store: &ArtifactStore) -> Self {
        let modules: BTreeMap<&str, &str> = store
            .files()
            .keys()
            .filter(|name| is_python_file(name))
            .map(|name| (module_stem(name), name.as_str()))
            .collect();

        let mut edges = Vec::new();
        for (name, code) in store.files() {
            if !is_python_file(name) {
                continue;
            }
            let mut deps = Vec::new();
            for module in imported_modules(code) {
                let target = modules
                    .get(module.as_str())
                    .or_else(|| module.rsplit('.').next().and_then(|last| modules.get(last)));
                if let Some(target) = target {
                    let target = target.to_string();
                    if target != *name && !deps.contains(&target) {
                        deps.push(target);
                    }
                }
            }
            edges.push((name.clone(), deps));
        }

        let tests = store.test_files().map(str::to_string).collect();
        Self::from_edges(edges, tests)
    }

    /// 直接由边构造；test_nodes 之外还会按命名约定识别测试文件
    pub fn from_edges(
        edges: impl IntoIterator<Item = (String, Vec<String>)>,
        test_nodes: BTreeSet<String>,
    ) -> Self {
        let mut graph = Self {
            test_nodes,
            ..Default::default()
        };
        for (from, deps) in edges {
            for dep in &deps {
                graph.adjacency.entry(dep.clone()).or_default();
                graph
                    .dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(from.clone());
            }
            graph.adjacency.entry(from).or_default().extend(deps);
        }
        graph
    }

    pub fn is_test(&self, name: &str) -> bool {
        self.test_nodes.contains(name) || is_test_filename(name)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.adjacency.keys().map(String::as_str)
    }

    /// 文件直接 import 的项目内文件
    pub fn imports_of(&self, name: &str) -> &[String] {
        self.adjacency.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 直接 import 该文件的文件
    pub fn importers_of(&self, name: &str) -> Vec<String> {
        self.dependents
            .get(name)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 邻居：依赖与被依赖
    pub fn neighbors(&self, name: &str) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.imports_of(name).iter().cloned().collect();
        out.extend(self.importers_of(name));
        out
    }

    /// 深度优先后序：文件总排在它的依赖之后
    pub fn topological_order(&self) -> Vec<String> {
        let mut visited = BTreeSet::new();
        let mut order = Vec::new();
        for node in self.adjacency.keys() {
            self.visit(node, &mut visited, &mut order);
        }
        order
    }

    fn visit(&self, node: &str, visited: &mut BTreeSet<String>, order: &mut Vec<String>) {
        if !visited.insert(node.to_string()) {
            return;
        }
        for dep in self.imports_of(node) {
            self.visit(dep, visited, order);
        }
        order.push(node.to_string());
    }

    /// 测试执行顺序：按拓扑序遍历非测试文件，展开为各自关联的测试（去重保序）
    pub fn test_order(&self, test_file_map: &BTreeMap<String, Vec<String>>) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for file in self.topological_order() {
            if self.is_test(&file) {
                continue;
            }
            for test in test_file_map.get(&file).into_iter().flatten() {
                if seen.insert(test.clone()) {
                    out.push(test.clone());
                }
            }
        }
        out
    }

    /// 反向可达：所有（传递地）import 了 changed 中任一文件的文件，包含 changed 自身
    pub fn ancestors<'a>(&self, changed: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for file in changed {
            if result.insert(file.to_string()) {
                queue.push_back(file.to_string());
            }
        }
        while let Some(file) = queue.pop_front() {
            if let Some(parents) = self.dependents.get(&file) {
                for parent in parents {
                    if result.insert(parent.clone()) {
                        queue.push_back(parent.clone());
                    }
                }
            }
        }
        result
    }

    /// 没有被任何非测试文件 import 的非测试文件（入口候选）
    pub fn sources_without_dependents(&self) -> Vec<String> {
        self.adjacency
            .keys()
            .filter(|node| !self.is_test(node))
            .filter(|node| {
                self.dependents
                    .get(*node)
                    .map(|importers| importers.iter().all(|i| self.is_test(i)))
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }
}
