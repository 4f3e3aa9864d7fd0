//! Decision：每一轮推理的结构化输出
//!
//! next_action 选择要填写的字段组；`action()` 把扁平字段收敛成带标签的 Action，
//! 缺少必要字段、或工具字段与能力字段同时出现时返回 DecisionParse（可恢复，写成 error 条目后继续）。

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::capability::CapabilityKind;
use crate::core::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    UseTool,
    UseSkill,
    CallChain,
    Think,
    RespondToUser,
    Finish,
}

impl NextAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            NextAction::UseTool => "use_tool",
            NextAction::UseSkill => "use_skill",
            NextAction::CallChain => "call_chain",
            NextAction::Think => "think",
            NextAction::RespondToUser => "respond_to_user",
            NextAction::Finish => "finish",
        }
    }
}

/// 模型每轮返回的决定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Decision {
    /// 本轮推理（记录为 thought 条目）
    pub reasoning: String,
    pub next_action: NextAction,
    /// use_tool 时必填
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_parameters: Option<Value>,
    /// skill / chain；缺省时由 next_action 推断
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_kind: Option<CapabilityKind>,
    /// use_skill 时为技能 id；call_chain 时为步骤 JSON 数组
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_parameters: Option<Value>,
    /// respond_to_user / finish 时给用户的文本，缺省使用 reasoning
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_answer: Option<String>,
    /// 非空时整体替换当前目标
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_goals: Option<Vec<String>>,
}

/// 收敛后的动作
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    UseTool { name: String, args: Value },
    Delegate {
        kind: CapabilityKind,
        command: String,
        args: Value,
    },
    Think,
    Respond(String),
    Finish(String),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::UseTool { .. } => "use_tool",
            Action::Delegate {
                kind: CapabilityKind::Chain,
                ..
            } => "call_chain",
            Action::Delegate { .. } => "use_skill",
            Action::Think => "think",
            Action::Respond(_) => "respond_to_user",
            Action::Finish(_) => "finish",
        }
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

impl Decision {
    /// Decision 的 JSON Schema（传给模型调用层）
    pub fn schema() -> Value {
        serde_json::to_value(schema_for!(Decision)).unwrap_or(Value::Null)
    }

    pub fn from_value(value: Value) -> Result<Self, AgentError> {
        serde_json::from_value(value.clone())
            .map_err(|e| AgentError::DecisionParse(format!("{e}: {value}")))
    }

    pub fn action(&self) -> Result<Action, AgentError> {
        let object_or_empty = |v: &Option<Value>| match v {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(v) => v.clone(),
        };
        match self.next_action {
            NextAction::UseTool | NextAction::UseSkill | NextAction::CallChain
                if non_empty(&self.tool_name).is_some()
                    && non_empty(&self.capability_command).is_some() =>
            {
                Err(AgentError::DecisionParse(format!(
                    "{} must fill either tool_name or capability_command, not both",
                    self.next_action.as_str()
                )))
            }
            NextAction::UseTool => {
                let name = non_empty(&self.tool_name).ok_or_else(|| {
                    AgentError::DecisionParse("use_tool requires tool_name".to_string())
                })?;
                Ok(Action::UseTool {
                    name: name.to_string(),
                    args: object_or_empty(&self.tool_parameters),
                })
            }
            NextAction::UseSkill | NextAction::CallChain => {
                let expected = if self.next_action == NextAction::UseSkill {
                    CapabilityKind::Skill
                } else {
                    CapabilityKind::Chain
                };
                let kind = self.capability_kind.unwrap_or(expected);
                if kind != expected {
                    return Err(AgentError::DecisionParse(format!(
                        "{} conflicts with capability_kind {}",
                        self.next_action.as_str(),
                        kind.as_str()
                    )));
                }
                let command = non_empty(&self.capability_command).ok_or_else(|| {
                    AgentError::DecisionParse(format!(
                        "{} requires capability_command",
                        self.next_action.as_str()
                    ))
                })?;
                Ok(Action::Delegate {
                    kind,
                    command: command.to_string(),
                    args: object_or_empty(&self.capability_parameters),
                })
            }
            NextAction::Think => Ok(Action::Think),
            NextAction::RespondToUser => Ok(Action::Respond(self.answer_text())),
            NextAction::Finish => Ok(Action::Finish(self.answer_text())),
        }
    }

    fn answer_text(&self) -> String {
        non_empty(&self.final_answer)
            .map(String::from)
            .unwrap_or_else(|| self.reasoning.clone())
    }
}
