//! 计划步骤：每个工具一个 Action 变体，参数带显式默认值

use serde_json::{json, Value};

/// 图片扩展名（list_directory 过滤与 collect_images 共用）
pub const IMAGE_PATTERNS: &str = "*.png,*.jpg,*.jpeg,*.gif,*.bmp,*.webp";

pub const DEFAULT_JIRA_SUMMARY: &str = "New task from Waggle";

/// 一次工具调用请求
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    JiraCreateIssue {
        project_key: String,
        summary: String,
        description: String,
        issue_type: String,
    },
    SheetsCreate {
        title: String,
    },
    RobotAction {
        task: String,
    },
    CollectImages {
        source_dir: String,
        recursive: bool,
        move_files: bool,
    },
    GenerateImage {
        prompt: String,
    },
    ListDirectory {
        path: String,
        pattern: String,
    },
    WebSearch {
        query: String,
    },
    Echo {
        text: String,
    },
    /// 由嵌入方注册的其他工具
    Other {
        tool: String,
        params: Value,
    },
}

impl Action {
    pub fn tool_id(&self) -> &str {
        match self {
            Action::JiraCreateIssue { .. } => "jira_create_issue",
            Action::SheetsCreate { .. } => "sheets_create",
            Action::RobotAction { .. } => "robot_action",
            Action::CollectImages { .. } => "collect_images",
            Action::GenerateImage { .. } => "generate_image",
            Action::ListDirectory { .. } => "list_directory",
            Action::WebSearch { .. } => "web_search",
            Action::Echo { .. } => "echo",
            Action::Other { tool, .. } => tool,
        }
    }

    /// 传给工具的 JSON 参数
    pub fn params(&self) -> Value {
        match self {
            Action::JiraCreateIssue {
                project_key,
                summary,
                description,
                issue_type,
            } => json!({
                "project_key": project_key,
                "summary": summary,
                "description": description,
                "issue_type": issue_type,
            }),
            Action::SheetsCreate { title } => json!({ "title": title }),
            Action::RobotAction { task } => json!({ "task": task }),
            Action::CollectImages {
                source_dir,
                recursive,
                move_files,
            } => json!({
                "source_dir": source_dir,
                "recursive": recursive,
                "move": move_files,
            }),
            Action::GenerateImage { prompt } => json!({ "prompt": prompt }),
            Action::ListDirectory { path, pattern } => json!({ "path": path, "pattern": pattern }),
            Action::WebSearch { query } => json!({ "query": query }),
            Action::Echo { text } => json!({ "text": text }),
            Action::Other { params, .. } => params.clone(),
        }
    }

    pub fn jira_issue(project_key: &str, summary: Option<&str>, request: &str) -> Self {
        let summary = summary
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_JIRA_SUMMARY);
        Action::JiraCreateIssue {
            project_key: project_key.to_string(),
            summary: summary.to_string(),
            description: format!("Created via Waggle: {}", request),
            issue_type: "Task".to_string(),
        }
    }

    pub fn list_directory(path: Option<&str>, images_only: bool) -> Self {
        Action::ListDirectory {
            path: path.filter(|p| !p.is_empty()).unwrap_or(".").to_string(),
            pattern: if images_only { IMAGE_PATTERNS } else { "*" }.to_string(),
        }
    }
}

/// 计划中的一步；规划后不可变
#[derive(Clone, Debug, PartialEq)]
pub struct Step {
    pub action: Action,
    pub description: String,
}

impl Step {
    pub fn new(action: Action, description: impl Into<String>) -> Self {
        Self {
            action,
            description: description.into(),
        }
    }

    pub fn tool_id(&self) -> &str {
        self.action.tool_id()
    }

    pub fn params(&self) -> Value {
        self.action.params()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jira_defaults() {
        let action = Action::jira_issue("KAN", Some("  "), "open a jira ticket");
        assert_eq!(action.tool_id(), "jira_create_issue");
        let params = action.params();
        assert_eq!(params["summary"], DEFAULT_JIRA_SUMMARY);
        assert_eq!(params["issue_type"], "Task");
        assert_eq!(params["project_key"], "KAN");
    }

    #[test]
    fn test_list_directory_defaults() {
        let params = Action::list_directory(None, true).params();
        assert_eq!(params["path"], ".");
        assert_eq!(params["pattern"], IMAGE_PATTERNS);
        assert_eq!(Action::list_directory(Some("/tmp"), false).params()["pattern"], "*");
    }

    #[test]
    fn test_other_tool_passthrough() {
        let action = Action::Other {
            tool: "custom".into(),
            params: json!({"k": 1}),
        };
        assert_eq!(action.tool_id(), "custom");
        assert_eq!(action.params()["k"], 1);
    }
}
