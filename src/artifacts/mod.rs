//! 产物层：代码仓库、文本抽取级联、相似度、Python 静态分析、落盘与文档

pub mod documents;
pub mod extract;
pub mod persist;
pub mod similarity;
pub mod store;
pub mod syntax;

pub use documents::DocumentStore;
pub use extract::{extract, Candidates, ExtractContext};
pub use persist::FlushReport;
pub use store::{
    is_test_filename, ArtifactStore, DiffRecord, RenderView, StoreThresholds, UpdateReport,
};
