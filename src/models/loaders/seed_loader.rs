use crate::models::section::{GenerationBlueprint, Section};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 一门课程的章节种子文件
#[derive(Debug, Clone, Deserialize)]
pub struct CourseSeed {
    pub course_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sections: Vec<SectionSeed>,
    #[serde(skip)]
    pub file_path: Option<String>,
}

/// 章节种子
///
/// 没有 `title` 的章节视为尚未生成出题蓝图
#[derive(Debug, Clone, Deserialize)]
pub struct SectionSeed {
    pub id: String,
    pub target_count: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub topic_tags: Vec<String>,
    #[serde(default)]
    pub source_file_id: Option<String>,
    #[serde(default)]
    pub source_label: Option<String>,
}

impl SectionSeed {
    /// 转换为章节聚合
    pub fn to_section(&self, course_id: &str) -> Section {
        let blueprint = self.title.as_ref().map(|title| GenerationBlueprint {
            title: title.clone(),
            summary: self.summary.clone(),
            key_points: self.key_points.clone(),
            topic_tags: self.topic_tags.clone(),
            source_file_id: self.source_file_id.clone(),
            source_label: self.source_label.clone(),
        });
        Section::new(course_id, &self.id, blueprint)
    }
}

/// 从 TOML 文件加载课程种子
pub async fn load_seed_file(toml_file_path: &Path) -> Result<CourseSeed> {
    let content = fs::read_to_string(toml_file_path)
        .await
        .with_context(|| format!("无法读取TOML文件: {}", toml_file_path.display()))?;

    let mut seed: CourseSeed = toml::from_str(&content)
        .with_context(|| format!("无法解析TOML文件: {}", toml_file_path.display()))?;

    seed.file_path = Some(toml_file_path.to_string_lossy().to_string());

    Ok(seed)
}

/// 从文件夹中加载所有课程种子
///
/// 单个文件解析失败只记录警告，不影响其他文件
pub async fn load_all_seed_files(folder_path: &str) -> Result<Vec<CourseSeed>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut seeds = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            tracing::info!(
                "正在加载: {}",
                path.file_name().unwrap_or_default().to_string_lossy()
            );

            match load_seed_file(&path).await {
                Ok(seed) => {
                    tracing::info!("成功加载 {} 个章节", seed.sections.len());
                    seeds.push(seed);
                }
                Err(e) => {
                    tracing::warn!("加载文件失败 {}: {}", path.display(), e);
                }
            }
        }
    }

    Ok(seeds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
course_id = "bio-101"
name = "Cell Biology"

[[sections]]
id = "membranes"
target_count = 12
title = "Cell membranes"
summary = "Lipid bilayer structure and transport"
key_points = ["Fluid mosaic model", "Passive vs active transport"]
topic_tags = ["membranes"]
source_file_id = "file-7"
source_label = "Chapter 3"

[[sections]]
id = "draft"
target_count = 5
"#;

    #[test]
    fn test_parse_seed() {
        let seed: CourseSeed = toml::from_str(SAMPLE).unwrap();
        assert_eq!(seed.course_id, "bio-101");
        assert_eq!(seed.sections.len(), 2);

        let section = seed.sections[0].to_section(&seed.course_id);
        let blueprint = section.blueprint.expect("应当有蓝图");
        assert_eq!(blueprint.title, "Cell membranes");
        assert_eq!(blueprint.key_points.len(), 2);
        assert_eq!(section.course_id, "bio-101");

        let draft = seed.sections[1].to_section(&seed.course_id);
        assert!(draft.blueprint.is_none());
    }

    #[tokio::test]
    async fn test_load_folder_skips_broken_files() {
        let dir = std::env::temp_dir().join(format!("seed-test-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join("bio.toml"), SAMPLE).await.unwrap();
        fs::write(dir.join("broken.toml"), "course_id = ").await.unwrap();
        fs::write(dir.join("notes.txt"), "ignored").await.unwrap();

        let seeds = load_all_seed_files(dir.to_str().unwrap()).await.unwrap();
        assert_eq!(seeds.len(), 1);
        assert!(seeds[0].file_path.as_deref().unwrap().ends_with("bio.toml"));

        fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_folder_is_error() {
        let result = load_all_seed_files("/definitely/not/here").await;
        assert!(result.is_err());
    }
}
