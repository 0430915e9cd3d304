//! Planner：缓存短路 → 规则匹配 → 交给聊天
//!
//! 1. 取最新 user 输入并规范化（trim + 小写），空输入直接报 EmptyInput
//! 2. 查回忆缓存，命中则以缓存回答结束（置信度 0.98）
//! 3. 否则按序评估规则表，第一个命中的规则生成计划
//! 4. 无规则命中（或命中的规则给出空计划）→ Chat

use std::sync::Arc;

use crate::config::PlannerSection;
use crate::core::AgentError;
use crate::memory::RecallCache;
use crate::pipeline::rules::{default_rules, Rule, RuleInput};
use crate::pipeline::step::Step;

/// 规划结果
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    /// 缓存命中，直接作为最终回复
    Recalled { response: String, confidence: f32 },
    /// 非空计划
    Plan(Vec<Step>),
    /// 空计划：交给聊天合成
    Chat,
}

pub struct Planner {
    recall: Arc<RecallCache>,
    rules: Vec<Rule>,
}

impl Planner {
    pub fn new(recall: Arc<RecallCache>, rules: Vec<Rule>) -> Self {
        Self { recall, rules }
    }

    pub fn with_default_rules(
        recall: Arc<RecallCache>,
        config: &PlannerSection,
    ) -> Result<Self, AgentError> {
        Ok(Self::new(recall, default_rules(config)?))
    }

    /// 在默认规则之前插入自定义规则
    pub fn with_rule_first(mut self, rule: Rule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name).collect()
    }

    pub fn plan(&self, utterance: &str) -> Result<PlanOutcome, AgentError> {
        let text = utterance.trim();
        if text.is_empty() {
            return Err(AgentError::EmptyInput);
        }

        let recall = self.recall.lookup(text);
        if let (true, Some(response)) = (recall.hit, recall.response) {
            tracing::info!(confidence = recall.confidence, "Planner short-circuited by recall cache");
            return Ok(PlanOutcome::Recalled {
                response,
                confidence: recall.confidence,
            });
        }

        let lowered = text.to_lowercase();
        let input = RuleInput {
            text,
            lowered: &lowered,
        };
        for rule in &self.rules {
            if rule.matches(&input) {
                let steps = rule.build(&input);
                tracing::info!(rule = rule.name, steps = steps.len(), "Planner rule matched");
                return Ok(if steps.is_empty() {
                    PlanOutcome::Chat
                } else {
                    PlanOutcome::Plan(steps)
                });
            }
        }

        tracing::debug!("No planner rule matched, deferring to chat");
        Ok(PlanOutcome::Chat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::recall::HIT_CONFIDENCE;
    use crate::pipeline::step::Action;

    fn planner() -> (Arc<RecallCache>, Planner) {
        let recall = Arc::new(RecallCache::in_memory());
        let planner =
            Planner::with_default_rules(Arc::clone(&recall), &PlannerSection::default()).unwrap();
        (recall, planner)
    }

    #[test]
    fn test_empty_input_is_error() {
        let (_, planner) = planner();
        assert!(matches!(planner.plan("   "), Err(AgentError::EmptyInput)));
    }

    #[test]
    fn test_cache_hit_short_circuits_rules() {
        let (recall, planner) = planner();
        recall.learn("search the news", "cached news", true);
        assert_eq!(
            planner.plan("  Search the NEWS ").unwrap(),
            PlanOutcome::Recalled {
                response: "cached news".into(),
                confidence: HIT_CONFIDENCE,
            }
        );
    }

    #[test]
    fn test_rule_produces_plan() {
        let (_, planner) = planner();
        match planner.plan("what is the price of gold").unwrap() {
            PlanOutcome::Plan(steps) => {
                assert_eq!(steps.len(), 1);
                assert_eq!(steps[0].tool_id(), "web_search");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_followup_and_unmatched_defer_to_chat() {
        let (_, planner) = planner();
        assert_eq!(planner.plan("who is she").unwrap(), PlanOutcome::Chat);
        assert_eq!(planner.plan("2+2").unwrap(), PlanOutcome::Chat);
    }

    #[test]
    fn test_custom_rule_takes_priority() {
        let (_, planner) = planner();
        let planner = planner.with_rule_first(Rule::new(
            "echo_prefix",
            |i| i.lowered.starts_with("echo "),
            |i| {
                vec![Step::new(
                    Action::Echo {
                        text: i.text[5..].to_string(),
                    },
                    "echo",
                )]
            },
        ));
        assert_eq!(planner.rule_names()[0], "echo_prefix");
        match planner.plan("echo search this").unwrap() {
            PlanOutcome::Plan(steps) => assert_eq!(steps[0].params()["text"], "search this"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
