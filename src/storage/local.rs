use super::OperatorStore;
use crate::error::Result;
use opendal::services::Fs;
use std::path::Path;

impl OperatorStore {
    /// 本地目录，对象名即相对路径
    pub fn local(root: &Path, read_chunk: u64) -> Result<Self> {
        if !root.exists() {
            std::fs::create_dir_all(root)?;
        }
        let builder = Fs::default().root(&root.to_string_lossy());
        let name = format!("local:{}", root.display());
        Self::from_builder(builder, name, read_chunk)
    }
}
