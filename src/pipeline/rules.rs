//! 规划规则表：有序的（谓词, 计划构建器）对，先匹配者胜
//!
//! 谓词作用于小写化后的输入；构建器拿到原文与小写文本，参数提取失败时退回默认值而不是放弃匹配。
//! 更具体的规则排在更通用的规则之前（如「图片 + 归集」先于「列目录」先于「生成图片」）。

use std::path::PathBuf;

use regex::Regex;

use crate::config::PlannerSection;
use crate::pipeline::step::{Action, Step};

/// 规则的输入
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    /// 去首尾空白后的原文
    pub text: &'a str,
    /// 小写化文本
    pub lowered: &'a str,
}

type Predicate = Box<dyn Fn(&RuleInput<'_>) -> bool + Send + Sync>;
type Builder = Box<dyn Fn(&RuleInput<'_>) -> Vec<Step> + Send + Sync>;

/// 一条规则；build 返回空计划表示交给聊天合成
pub struct Rule {
    pub name: &'static str,
    predicate: Predicate,
    build: Builder,
}

impl Rule {
    pub fn new(
        name: &'static str,
        predicate: impl Fn(&RuleInput<'_>) -> bool + Send + Sync + 'static,
        build: impl Fn(&RuleInput<'_>) -> Vec<Step> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            predicate: Box::new(predicate),
            build: Box::new(build),
        }
    }

    pub fn matches(&self, input: &RuleInput<'_>) -> bool {
        (self.predicate)(input)
    }

    pub fn build(&self, input: &RuleInput<'_>) -> Vec<Step> {
        (self.build)(input)
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).finish()
    }
}

const JIRA_WORDS: &[&str] = &["jira", "ticket", "チケット", "課題"];
const SHEETS_WORDS: &[&str] = &["spreadsheet", "sheet", "excel", "スプレッド", "シート"];
const ROBOT_WORDS: &[&str] = &["robot", "lerobot", "gr00t", "ロボット"];
const IMAGE_NOUNS: &[&str] = &["image", "photo", "picture", "画像", "写真"];
const COLLECT_WORDS: &[&str] = &["collect", "gather", "organize", "まとめ", "集め", "整理"];
const MOVE_WORDS: &[&str] = &["move", "移動"];
const DESKTOP_WORDS: &[&str] = &["desktop", "デスクトップ"];
const FILE_WORDS: &[&str] = &["file", "ファイル"];
const LIST_WORDS: &[&str] = &["list files", "file list", "directory", "ファイル一覧", "一覧"];
const GENERATE_IMAGE_WORDS: &[&str] = &[
    "image", "picture", "drawing", "photo", "paint", "sketch", "画像", "イラスト", "写真", "描いて",
];
const SEARCH_WORDS: &[&str] = &[
    "search", "weather", "news", "price", "who is", "what is", "検索", "天気", "株価", "ニュース",
    "調べ",
];

const FOLLOWUP_PATTERN: &str = r"who is (he|she|it|that|this)\b|who's (he|she|it|that|this)\b|who (he|she|it|that|this) is\b|tell me about (him|her|it)\b|how old is (he|she|it)\b|what is (he|she|it)\b|彼は|彼女は|それは";

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// 提到桌面时的目录：配置优先，其次 $HOME/Desktop
pub fn desktop_dir(config: &PlannerSection) -> PathBuf {
    if let Some(dir) = &config.desktop_dir {
        return dir.clone();
    }
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join("Desktop"))
        .unwrap_or_else(|| PathBuf::from("Desktop"))
}

/// 取原文中第一个像路径的片段（/、./、../、~/ 开头或 Windows 盘符），URL 除外
pub fn explicit_path(text: &str) -> Option<String> {
    text.split_whitespace()
        .map(|t| t.trim_matches(|c| c == '"' || c == '\'' || c == '「' || c == '」'))
        .find(|t| {
            if t.contains("://") {
                return false;
            }
            let bytes = t.as_bytes();
            let drive = bytes.len() >= 3
                && bytes[0].is_ascii_alphabetic()
                && bytes[1] == b':'
                && (bytes[2] == b'/' || bytes[2] == b'\\');
            drive
                || t.starts_with('/')
                || t.starts_with("./")
                || t.starts_with("../")
                || t.starts_with("~/")
        })
        .map(|t| t.replace('\\', "/"))
}

/// 提交 jira 摘要：第一个冒号（含全角）之后的原文
fn summary_after_colon(text: &str) -> Option<&str> {
    text.split_once(':')
        .or_else(|| text.split_once('：'))
        .map(|(_, rest)| rest.trim())
}

/// 默认规则表（优先级从高到低）
pub fn default_rules(config: &PlannerSection) -> Result<Vec<Rule>, regex::Error> {
    let followup = Regex::new(FOLLOWUP_PATTERN)?;
    let ls_word = Regex::new(r"\bls\b")?;
    let project_key = config.jira_project_key.clone();
    let desktop = desktop_dir(config).to_string_lossy().to_string();
    let collect_desktop = desktop.clone();

    Ok(vec![
        Rule::new(
            "contextual_followup",
            move |i| followup.is_match(i.lowered),
            |_| Vec::new(),
        ),
        Rule::new(
            "jira_create_issue",
            |i| contains_any(i.lowered, JIRA_WORDS),
            move |i| {
                vec![Step::new(
                    Action::jira_issue(&project_key, summary_after_colon(i.text), i.text),
                    "Create a Jira issue",
                )]
            },
        ),
        Rule::new(
            "sheets_create",
            |i| contains_any(i.lowered, SHEETS_WORDS),
            |_| {
                let title = format!("Export {}", chrono::Local::now().format("%Y-%m-%d"));
                vec![Step::new(Action::SheetsCreate { title }, "Create a spreadsheet")]
            },
        ),
        Rule::new(
            "robot_action",
            |i| contains_any(i.lowered, ROBOT_WORDS),
            |i| {
                vec![Step::new(
                    Action::RobotAction {
                        task: i.text.to_string(),
                    },
                    "Run a robot task",
                )]
            },
        ),
        Rule::new(
            "collect_images",
            |i| contains_any(i.lowered, IMAGE_NOUNS) && contains_any(i.lowered, COLLECT_WORDS),
            move |i| {
                let source_dir = if contains_any(i.lowered, DESKTOP_WORDS) {
                    collect_desktop.clone()
                } else {
                    ".".to_string()
                };
                let description = format!("Collect images from {}", source_dir);
                vec![Step::new(
                    Action::CollectImages {
                        source_dir,
                        recursive: true,
                        move_files: contains_any(i.lowered, MOVE_WORDS),
                    },
                    description,
                )]
            },
        ),
        Rule::new(
            "list_directory",
            move |i| {
                contains_any(i.lowered, LIST_WORDS)
                    || ls_word.is_match(i.lowered)
                    || (contains_any(i.lowered, DESKTOP_WORDS)
                        && contains_any(i.lowered, FILE_WORDS)
                        && !contains_any(i.lowered, COLLECT_WORDS))
            },
            move |i| {
                let path = if contains_any(i.lowered, DESKTOP_WORDS) {
                    Some(desktop.clone())
                } else {
                    explicit_path(i.text)
                };
                let action =
                    Action::list_directory(path.as_deref(), contains_any(i.lowered, IMAGE_NOUNS));
                let description = match &action {
                    Action::ListDirectory { path, pattern } => {
                        format!("List files in {} (pattern: {})", path, pattern)
                    }
                    _ => "List files".to_string(),
                };
                vec![Step::new(action, description)]
            },
        ),
        Rule::new(
            "generate_image",
            |i| contains_any(i.lowered, GENERATE_IMAGE_WORDS),
            |i| {
                vec![Step::new(
                    Action::GenerateImage {
                        prompt: i.text.to_string(),
                    },
                    "Generate an image",
                )]
            },
        ),
        Rule::new(
            "web_search",
            |i| contains_any(i.lowered, SEARCH_WORDS),
            |i| {
                vec![Step::new(
                    Action::WebSearch {
                        query: i.text.to_string(),
                    },
                    "Search the web",
                )]
            },
        ),
    ])
}
