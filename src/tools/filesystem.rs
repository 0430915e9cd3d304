//! 本地文件工具
//!
//! - list_directory：列出目录下的子目录与文件，pattern 为逗号分隔的 glob（如 `*.png,*.jpg`）
//! - collect_images：遍历目录，把图片复制（或移动）到 `<source>/collected_images`
//!
//! 相对路径以 base_dir（默认工作目录）为基准解析；绝对路径原样使用。

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use glob::Pattern;
use serde_json::Value;
use walkdir::WalkDir;

use crate::tools::Tool;

const MAX_LISTED_DIRS: usize = 10;
const MAX_LISTED_FILES: usize = 20;
const COLLECT_DIR_NAME: &str = "collected_images";
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "bmp", "webp", "heic"];

fn resolve(base: &Path, path: &str) -> PathBuf {
    let path = path.trim();
    if path.is_empty() || path == "." {
        return base.to_path_buf();
    }
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base.join(path.trim_start_matches("./"))
    }
}

fn compile_patterns(pattern: &str) -> Result<Vec<Pattern>, String> {
    pattern
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| Pattern::new(&p.to_lowercase()).map_err(|e| format!("Invalid pattern {}: {}", p, e)))
        .collect()
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// 目录列表工具
pub struct ListDirectoryTool {
    base_dir: PathBuf,
}

impl ListDirectoryTool {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn list(&self, path: &str, pattern: &str) -> Result<String, String> {
        let dir = resolve(&self.base_dir, path);
        let patterns = compile_patterns(pattern)?;
        let read = std::fs::read_dir(&dir)
            .map_err(|e| format!("Failed to list {}: {}", dir.display(), e))?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in read.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let Ok(meta) = entry.metadata() else {
                continue;
            };
            if meta.is_dir() {
                dirs.push(name);
            } else {
                let lowered = name.to_lowercase();
                if patterns.is_empty() || patterns.iter().any(|p| p.matches(&lowered)) {
                    files.push((name, meta.len()));
                }
            }
        }
        dirs.sort();
        files.sort();

        let mut out = format!("Directory: {}\n\nDirectories ({}):", dir.display(), dirs.len());
        for d in dirs.iter().take(MAX_LISTED_DIRS) {
            out.push_str(&format!("\n  {}/", d));
        }
        out.push_str(&format!("\n\nFiles ({}):", files.len()));
        for (name, size) in files.iter().take(MAX_LISTED_FILES) {
            out.push_str(&format!("\n  {} ({} bytes)", name, size));
        }
        if files.len() > MAX_LISTED_FILES {
            out.push_str(&format!("\n  ... and {} more", files.len() - MAX_LISTED_FILES));
        }
        Ok(out)
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List a directory. Args: {\"path\": \"dir, default '.'\", \"pattern\": \"comma separated globs, default '*'\"}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let pattern = args.get("pattern").and_then(|v| v.as_str()).unwrap_or("*");
        tracing::info!(path = %path, pattern = %pattern, "list_directory tool execute");
        self.list(path, pattern)
    }
}

/// 图片归集工具
pub struct CollectImagesTool {
    base_dir: PathBuf,
}

impl CollectImagesTool {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
        }
    }

    fn collect(&self, source: &str, recursive: bool, move_files: bool) -> Result<String, String> {
        let source = resolve(&self.base_dir, source);
        if !source.is_dir() {
            return Err(format!("Not a directory: {}", source.display()));
        }
        let dest = source.join(COLLECT_DIR_NAME);

        let walker = WalkDir::new(&source)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 })
            .into_iter()
            .filter_entry(|e| e.file_name() != COLLECT_DIR_NAME);

        let mut collected = Vec::new();
        let mut total_size = 0u64;
        for entry in walker.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !entry.file_type().is_file() || !is_image(path) {
                continue;
            }
            std::fs::create_dir_all(&dest)
                .map_err(|e| format!("Failed to create {}: {}", dest.display(), e))?;
            let target = unique_target(&dest, path);
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let result = if move_files {
                std::fs::rename(path, &target).or_else(|_| {
                    std::fs::copy(path, &target).and_then(|_| std::fs::remove_file(path))
                })
            } else {
                std::fs::copy(path, &target).map(|_| ())
            };
            match result {
                Ok(()) => {
                    total_size += size;
                    collected.push(target.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default());
                }
                Err(e) => tracing::warn!(file = %path.display(), "Failed to collect image: {}", e),
            }
        }

        let action = if move_files { "Moved" } else { "Copied" };
        let mut out = format!(
            "{} {} images to {} (total {} bytes)",
            action,
            collected.len(),
            dest.display(),
            total_size
        );
        for name in collected.iter().take(MAX_LISTED_FILES) {
            out.push_str(&format!("\n  {}", name));
        }
        Ok(out)
    }
}

/// 目标已存在时追加 `_1`、`_2` …
fn unique_target(dest: &Path, source: &Path) -> PathBuf {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    let candidate = dest.join(&name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "image".to_string());
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (1..)
        .map(|i| dest.join(format!("{}_{}{}", stem, i, ext)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[async_trait]
impl Tool for CollectImagesTool {
    fn name(&self) -> &str {
        "collect_images"
    }

    fn description(&self) -> &str {
        "Gather image files into a collected_images folder. Args: {\"source_dir\": \"dir\", \"recursive\": true, \"move\": false}"
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let source = args
            .get("source_dir")
            .and_then(|v| v.as_str())
            .unwrap_or(".")
            .to_string();
        let recursive = args.get("recursive").and_then(|v| v.as_bool()).unwrap_or(true);
        let move_files = args.get("move").and_then(|v| v.as_bool()).unwrap_or(false);
        tracing::info!(source = %source, recursive, move_files, "collect_images tool execute");
        let base = self.base_dir.clone();
        tokio::task::spawn_blocking(move || {
            CollectImagesTool { base_dir: base }.collect(&source, recursive, move_files)
        })
        .await
        .map_err(|e| format!("collect_images task failed: {}", e))?
    }
}
