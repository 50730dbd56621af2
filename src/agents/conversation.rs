//! Conversation: chat-driven refinement of a finished report.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::llm::LlmClient;
use crate::reliability::AgentError;
use crate::security::{ActionType, PrivilegeModel};

use super::Agent;

const CATEGORIES: [&str; 8] = [
    "Housing",
    "Food",
    "Transportation",
    "Utilities",
    "Entertainment",
    "Shopping",
    "Healthcare",
    "Income",
];

/// Categories eligible for automatic reduction when chasing a savings target.
const NON_ESSENTIAL: [&str; 4] = ["Entertainment", "Shopping", "Food", "Transportation"];

/// Routes user messages by keyword. Refinement commands (save a target
/// percentage, ignore a charge, what-if simulations, budget adjustments)
/// recompute metrics from the session context and return them as
/// `updated_metrics` for the orchestrator to merge into the report; plain
/// budget, savings, and anomaly questions are answered read-only; "done"
/// ends refinement; anything else goes to the model.
pub struct ConversationAgent {
    privileges: PrivilegeModel,
    llm: Arc<dyn LlmClient>,
}

impl ConversationAgent {
    pub fn new(privileges: PrivilegeModel, llm: Arc<dyn LlmClient>) -> ConversationAgent {
        ConversationAgent { privileges, llm }
    }

    fn extract_percentage(message: &str) -> Option<f64> {
        let idx = message.find('%')?;
        let digits: String = message[..idx]
            .chars()
            .rev()
            .skip_while(|c| c.is_whitespace())
            .take_while(|c| c.is_ascii_digit())
            .collect();
        digits.chars().rev().collect::<String>().parse().ok()
    }

    fn extract_amount(message: &str) -> Option<f64> {
        let mut token = String::new();
        for c in message.chars() {
            if c.is_ascii_digit() || (c == '.' && !token.is_empty() && !token.contains('.')) {
                token.push(c);
            } else if !token.is_empty() {
                break;
            }
        }
        token.trim_end_matches('.').parse().ok()
    }

    /// First known category mentioned in the (lowercased) message.
    fn extract_category(message: &str) -> Option<&'static str> {
        CATEGORIES
            .iter()
            .copied()
            .find(|c| message.contains(c.to_lowercase().as_str()))
    }

    /// "Save N% of income": trims non-essential budget lines until the
    /// target savings rate is reachable, or reports how close it got.
    fn save_command(message: &str, input: &Value) -> Value {
        let target_pct = match Self::extract_percentage(message) {
            Some(pct) => pct,
            None => {
                return json!({
                    "response": "Please specify a percentage to save, e.g. 'Save 20% of income'.",
                    "action": "clarify",
                    "updated_metrics": {},
                })
            }
        };

        let income = input.get("total_income").and_then(Value::as_f64).unwrap_or(0.0);
        let expense = input.get("total_expense").and_then(Value::as_f64).unwrap_or(0.0);
        let current_rate = input.get("savings_rate").and_then(Value::as_f64).unwrap_or(0.0);
        if income <= 0.0 {
            return json!({
                "response": "No income data available for this session.",
                "action": "error",
                "updated_metrics": {},
            });
        }

        let target_savings = income * target_pct / 100.0;
        let current_savings = income - expense;
        let adjustment = target_savings - current_savings;
        if adjustment <= 0.0 {
            return json!({
                "response": format!(
                    "You already save {current_rate:.1}%, above the {target_pct:.0}% target."
                ),
                "action": "info",
                "updated_metrics": {},
            });
        }

        // Trim up to 30% off each non-essential line until the gap closes.
        let mut remaining = adjustment;
        let mut changes = Vec::new();
        let suggestions = input
            .get("budget_suggestions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for suggestion in &suggestions {
            if remaining <= 0.0 {
                break;
            }
            let category = suggestion.get("category").and_then(Value::as_str).unwrap_or("");
            if !NON_ESSENTIAL.contains(&category) {
                continue;
            }
            let budget = suggestion
                .get("suggested_budget")
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            let reduction = (budget * 0.3).min(remaining);
            remaining -= reduction;
            changes.push(json!({
                "category": category,
                "previous": budget,
                "new": (budget - reduction).max(0.0),
                "reduction": reduction,
            }));
        }

        let applied = adjustment - remaining;
        let new_rate = (income - (expense - applied)) / income * 100.0;
        json!({
            "response": format!(
                "Adjusted your budget toward a {target_pct:.0}% target: projected \
                 savings rate is now {new_rate:.1}% (was {current_rate:.1}%)."
            ),
            "action": "adjust_savings",
            "budget_changes": changes,
            "updated_metrics": {
                "savings_rate": new_rate,
                "target_savings": target_pct,
            },
        })
    }

    /// "Ignore the $X charge": excludes the closest category total and
    /// recomputes expenses and the savings rate without it.
    fn ignore_command(message: &str, input: &Value) -> Value {
        let requested = match Self::extract_amount(message) {
            Some(amount) => amount,
            None => {
                return json!({
                    "response": "Which charge should I ignore? Give the amount, e.g. 'Ignore the $500 charge'.",
                    "action": "clarify",
                    "updated_metrics": {},
                })
            }
        };

        let income = input.get("total_income").and_then(Value::as_f64).unwrap_or(0.0);
        let expense = input.get("total_expense").and_then(Value::as_f64).unwrap_or(0.0);
        let breakdown = input
            .get("category_breakdown")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        for (category, amount) in &breakdown {
            let amount = amount.as_f64().unwrap_or(0.0);
            if (amount - requested).abs() < 10.0 {
                let new_expense = expense - amount;
                let new_rate = if income > 0.0 {
                    (income - new_expense) / income * 100.0
                } else {
                    0.0
                };
                return json!({
                    "response": format!(
                        "Excluded the ${amount:.2} {category} charge: expenses are now \
                         ${new_expense:.2}, savings rate {new_rate:.1}%."
                    ),
                    "action": "exclude_transaction",
                    "excluded_category": category,
                    "excluded_amount": amount,
                    "updated_metrics": {
                        "total_expense": new_expense,
                        "savings_rate": new_rate,
                    },
                });
            }
        }

        json!({
            "response": format!("No charge close to ${requested:.2} was found."),
            "action": "error",
            "updated_metrics": {},
        })
    }

    /// What-if simulation over the session totals. The result is marked as
    /// a simulation so merged metrics are recognizable as hypothetical.
    fn what_if_command(message: &str, input: &Value) -> Value {
        let mut income = input.get("total_income").and_then(Value::as_f64).unwrap_or(0.0);
        let mut expense = input.get("total_expense").and_then(Value::as_f64).unwrap_or(0.0);

        let percentage = Self::extract_percentage(message);
        let amount = Self::extract_amount(message);

        let (sim_type, params) = if message.contains("income") && percentage.is_some() {
            let pct = percentage.unwrap_or(0.0);
            income *= 1.0 - pct / 100.0;
            ("reduce_income", json!({"percentage": pct}))
        } else if message.contains("less") && amount.is_some() {
            let amount = amount.unwrap_or(0.0);
            expense = (expense - amount).max(0.0);
            (
                "reduce_category",
                json!({"category": Self::extract_category(message), "amount": amount}),
            )
        } else if message.contains("increase") && amount.is_some() {
            let amount = amount.unwrap_or(0.0);
            expense += amount;
            (
                "increase_category",
                json!({"category": Self::extract_category(message), "amount": amount}),
            )
        } else {
            return json!({
                "response": "Try scenarios like 'What if I spend $200 less on housing?', \
                             'What if my income drops 15%?', or 'What if I increase food by $100?'.",
                "action": "clarify",
                "updated_metrics": {},
            });
        };

        let rate = if income > 0.0 {
            (income - expense) / income * 100.0
        } else {
            0.0
        };
        json!({
            "response": format!(
                "Simulation: income ${income:.2}, expenses ${expense:.2}, \
                 savings rate {rate:.1}%."
            ),
            "action": "what_if",
            "simulation": {
                "type": sim_type,
                "params": params,
                "results": {
                    "income": income,
                    "expenses": expense,
                    "savings_rate": rate,
                },
            },
            "updated_metrics": {
                "is_simulation": true,
                "total_income": income,
                "total_expense": expense,
                "savings_rate": rate,
            },
        })
    }

    /// "Reduce <category> by N%": scales one budget line down.
    fn reduce_command(message: &str, input: &Value) -> Value {
        let category = match Self::extract_category(message) {
            Some(category) => category,
            None => {
                return json!({
                    "response": "Which category should I reduce? For example 'Reduce Food by 20%'.",
                    "action": "clarify",
                    "updated_metrics": {},
                })
            }
        };
        let pct = match Self::extract_percentage(message) {
            Some(pct) => pct,
            None => {
                return json!({
                    "response": format!("By how much? For example 'Reduce {category} by 20%'."),
                    "action": "clarify",
                    "updated_metrics": {},
                })
            }
        };

        match Self::suggested_budget(input, category) {
            Some(previous) => {
                let new = previous * (1.0 - pct / 100.0);
                json!({
                    "response": format!(
                        "Reduced your {category} budget by {pct:.0}%, from ${previous:.2} to ${new:.2}."
                    ),
                    "action": "adjust_budget",
                    "budget_changes": [{
                        "category": category,
                        "previous": previous,
                        "new": new,
                        "reduction_pct": pct,
                    }],
                    "updated_metrics": {
                        (format!("{}_budget", category.to_lowercase())): new,
                    },
                })
            }
            None => json!({
                "response": format!("{category} has no budget suggestion in this session."),
                "action": "error",
                "updated_metrics": {},
            }),
        }
    }

    /// "Increase <category> by $X": raises one budget line.
    fn increase_command(message: &str, input: &Value) -> Value {
        let category = match Self::extract_category(message) {
            Some(category) => category,
            None => {
                return json!({
                    "response": "Which category should I increase? For example 'Increase Food by $100'.",
                    "action": "clarify",
                    "updated_metrics": {},
                })
            }
        };
        let amount = match Self::extract_amount(message) {
            Some(amount) => amount,
            None => {
                return json!({
                    "response": format!("By how much? For example 'Increase {category} by $100'."),
                    "action": "clarify",
                    "updated_metrics": {},
                })
            }
        };

        match Self::suggested_budget(input, category) {
            Some(previous) => {
                let new = previous + amount;
                json!({
                    "response": format!(
                        "Increased your {category} budget by ${amount:.2} to ${new:.2}."
                    ),
                    "action": "adjust_budget",
                    "budget_changes": [{
                        "category": category,
                        "previous": previous,
                        "new": new,
                        "increase": amount,
                    }],
                    "updated_metrics": {
                        (format!("{}_budget", category.to_lowercase())): new,
                    },
                })
            }
            None => json!({
                "response": format!("{category} has no budget suggestion in this session."),
                "action": "error",
                "updated_metrics": {},
            }),
        }
    }

    fn suggested_budget(input: &Value, category: &str) -> Option<f64> {
        input
            .get("budget_suggestions")
            .and_then(Value::as_array)?
            .iter()
            .find(|s| s.get("category").and_then(Value::as_str) == Some(category))?
            .get("suggested_budget")
            .and_then(Value::as_f64)
    }

    fn budget_answer(input: &Value) -> String {
        let suggestions = input
            .get("budget_suggestions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if suggestions.is_empty() {
            return "No budget suggestions are available for this session.".to_string();
        }
        let lines: Vec<String> = suggestions
            .iter()
            .filter_map(|s| {
                let category = s.get("category").and_then(Value::as_str)?;
                let amount = s.get("suggested_budget").and_then(Value::as_f64)?;
                Some(format!("{category}: ${amount:.2}"))
            })
            .collect();
        format!("Suggested budget: {}", lines.join(", "))
    }

    fn savings_answer(input: &Value) -> String {
        let rate = input.get("savings_rate").and_then(Value::as_f64).unwrap_or(0.0);
        let net = input.get("net_savings").and_then(Value::as_f64).unwrap_or(0.0);
        format!("You saved ${net:.2} this period, a {rate:.1}% savings rate.")
    }

    fn anomaly_answer(input: &Value) -> String {
        let anomalies = input
            .get("anomalies")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if anomalies.is_empty() {
            return "No anomalous transactions were flagged.".to_string();
        }
        let reasons: Vec<&str> = anomalies
            .iter()
            .filter_map(|a| a.get("reason").and_then(Value::as_str))
            .collect();
        format!("{} flagged transaction(s): {}", anomalies.len(), reasons.join("; "))
    }

    fn answer(response: String) -> Value {
        json!({
            "response": response,
            "action": "continue",
            "updated_metrics": {},
        })
    }
}

#[async_trait]
impl Agent for ConversationAgent {
    fn name(&self) -> &'static str {
        "conversation"
    }

    async fn execute(&self, session_id: &str, input: &Value) -> Result<Value, AgentError> {
        self.privileges.validate(self.name(), ActionType::CallLlm)?;

        let message = input
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_lowercase();

        let mut output = if message.contains("done")
            || message.contains("complete")
            || message.contains("finish")
        {
            json!({
                "response": "Refinement complete.",
                "action": "complete",
                "updated_metrics": {},
            })
        } else if message.contains("save") && message.contains('%') {
            Self::save_command(&message, input)
        } else if message.contains("ignore") {
            Self::ignore_command(&message, input)
        } else if message.contains("what if") || message.contains("simulate") {
            Self::what_if_command(&message, input)
        } else if message.contains("reduce") || message.contains("cut") || message.contains("lower")
        {
            Self::reduce_command(&message, input)
        } else if message.contains("increase") {
            Self::increase_command(&message, input)
        } else if message.contains("budget") {
            Self::answer(Self::budget_answer(input))
        } else if message.contains("saving") || message.contains("save") {
            Self::answer(Self::savings_answer(input))
        } else if message.contains("anomal") || message.contains("risk") {
            Self::answer(Self::anomaly_answer(input))
        } else {
            let context = input.get("compressed_context").and_then(Value::as_str);
            Self::answer(self.llm.chat(&message, context).await?)
        };

        if let Value::Object(map) = &mut output {
            map.entry("updated_metrics").or_insert_with(|| Value::Object(Map::new()));
        }

        let action = output.get("action").and_then(Value::as_str).unwrap_or("");
        debug!(session_id, action, "conversation turn");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    fn agent() -> ConversationAgent {
        ConversationAgent::new(PrivilegeModel::new(), Arc::new(MockLlm::new()))
    }

    fn session_context() -> Value {
        json!({
            "total_income": 5000.0,
            "total_expense": 1650.0,
            "net_savings": 3350.0,
            "savings_rate": 67.0,
            "category_breakdown": {"Housing": 1500.0, "Food": 150.0},
            "budget_suggestions": [
                {"category": "Food", "current_spend": 150.0, "suggested_budget": 900.0},
                {"category": "Entertainment", "current_spend": 0.0, "suggested_budget": 200.0},
            ],
        })
    }

    #[tokio::test]
    async fn test_budget_question() {
        let output = agent()
            .execute(
                "s1",
                &json!({
                    "message": "show me my budget",
                    "budget_suggestions": [
                        {"category": "Food", "suggested_budget": 900.0},
                    ],
                }),
            )
            .await
            .unwrap();
        assert_eq!(output["action"], json!("continue"));
        assert!(output["response"].as_str().unwrap().contains("Food: $900.00"));
    }

    #[tokio::test]
    async fn test_savings_question() {
        let output = agent()
            .execute(
                "s1",
                &json!({"message": "how are my savings?", "savings_rate": 67.0, "net_savings": 3350.0}),
            )
            .await
            .unwrap();
        assert!(output["response"].as_str().unwrap().contains("67.0%"));
    }

    #[tokio::test]
    async fn test_done_completes() {
        let output = agent()
            .execute("s1", &json!({"message": "ok I'm done"}))
            .await
            .unwrap();
        assert_eq!(output["action"], json!("complete"));
    }

    #[tokio::test]
    async fn test_freeform_goes_to_llm() {
        let output = agent()
            .execute("s1", &json!({"message": "tell me a fact"}))
            .await
            .unwrap();
        assert_eq!(output["response"], json!("tell me a fact"));
        assert_eq!(output["action"], json!("continue"));
    }

    #[tokio::test]
    async fn test_save_command_adjusts_budget() {
        let mut input = session_context();
        input["message"] = json!("Save 80% of income");
        let output = agent().execute("s1", &input).await.unwrap();

        assert_eq!(output["action"], json!("adjust_savings"));
        assert_eq!(output["updated_metrics"]["target_savings"], json!(80.0));
        // Target savings is $4000 against $3350 current, a $650 gap. Food
        // gives up 30% of $900 and Entertainment 30% of $200, so $330 of
        // the gap is applied: (5000 - 1320) / 5000 = 73.6%.
        let rate = output["updated_metrics"]["savings_rate"].as_f64().unwrap();
        assert!((rate - 73.6).abs() < 1e-9);
        assert_eq!(output["budget_changes"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_save_command_already_met() {
        let mut input = session_context();
        input["message"] = json!("save 20% of income");
        let output = agent().execute("s1", &input).await.unwrap();
        assert_eq!(output["action"], json!("info"));
        assert_eq!(output["updated_metrics"], json!({}));
    }

    #[tokio::test]
    async fn test_ignore_command_excludes_charge() {
        let mut input = session_context();
        input["message"] = json!("Ignore the $150 charge");
        let output = agent().execute("s1", &input).await.unwrap();

        assert_eq!(output["action"], json!("exclude_transaction"));
        assert_eq!(output["excluded_category"], json!("Food"));
        assert_eq!(output["updated_metrics"]["total_expense"], json!(1500.0));
        let rate = output["updated_metrics"]["savings_rate"].as_f64().unwrap();
        assert!((rate - 70.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_ignore_command_unknown_amount() {
        let mut input = session_context();
        input["message"] = json!("ignore the $999 charge");
        let output = agent().execute("s1", &input).await.unwrap();
        assert_eq!(output["action"], json!("error"));
    }

    #[tokio::test]
    async fn test_what_if_simulation() {
        let mut input = session_context();
        input["message"] = json!("What if I spend $200 less on housing?");
        let output = agent().execute("s1", &input).await.unwrap();

        assert_eq!(output["action"], json!("what_if"));
        assert_eq!(output["simulation"]["type"], json!("reduce_category"));
        assert_eq!(output["updated_metrics"]["is_simulation"], json!(true));
        assert_eq!(output["updated_metrics"]["total_expense"], json!(1450.0));
        let rate = output["updated_metrics"]["savings_rate"].as_f64().unwrap();
        assert!((rate - 71.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_what_if_income_drop() {
        let mut input = session_context();
        input["message"] = json!("What if my income drops 20%?");
        let output = agent().execute("s1", &input).await.unwrap();

        assert_eq!(output["simulation"]["type"], json!("reduce_income"));
        assert_eq!(output["updated_metrics"]["total_income"], json!(4000.0));
    }

    #[tokio::test]
    async fn test_reduce_command_scales_line() {
        let mut input = session_context();
        input["message"] = json!("Reduce food by 20%");
        let output = agent().execute("s1", &input).await.unwrap();

        assert_eq!(output["action"], json!("adjust_budget"));
        let budget = output["updated_metrics"]["food_budget"].as_f64().unwrap();
        assert!((budget - 720.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_increase_command_raises_line() {
        let mut input = session_context();
        input["message"] = json!("Increase food by $100");
        let output = agent().execute("s1", &input).await.unwrap();

        assert_eq!(output["action"], json!("adjust_budget"));
        assert_eq!(output["updated_metrics"]["food_budget"], json!(1000.0));
    }

    #[tokio::test]
    async fn test_reduce_without_category_asks_back() {
        let mut input = session_context();
        input["message"] = json!("reduce my spending by 10%");
        let output = agent().execute("s1", &input).await.unwrap();
        assert_eq!(output["action"], json!("clarify"));
        assert_eq!(output["updated_metrics"], json!({}));
    }
}
