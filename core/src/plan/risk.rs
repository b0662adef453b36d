use regex::Regex;

use crate::task::Task;

/// Why a task counts as high-risk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    pub task_id: String,
    pub reason: String,
    pub question: String,
}

/// Rules flagging destructive, monetary and production tasks.
#[derive(Debug, Clone)]
pub struct RiskRules {
    destructive: Regex,
    deploy: Regex,
    monetary_tags: Vec<String>,
    production_tags: Vec<String>,
}

impl Default for RiskRules {
    fn default() -> Self {
        Self {
            destructive: Regex::new(r"(?i)(?:^|[^a-z])(delete|remove|drop|truncate)(?:[^a-z]|$)")
                .expect("static destructive pattern"),
            deploy: Regex::new(r"(?i)\bdeploy").expect("static deploy pattern"),
            monetary_tags: vec!["monetary".into(), "payment".into(), "billing".into()],
            production_tags: vec!["production".into(), "prod".into()],
        }
    }
}

impl RiskRules {
    pub fn assess(&self, task: &Task) -> Option<RiskAssessment> {
        let reason = if let Some(caps) = self.destructive.captures(&task.action) {
            format!("destructive action '{}'", caps[1].to_lowercase())
        } else if self.monetary_tags.iter().any(|t| task.has_tag(t)) {
            "monetary operation".to_string()
        } else if self.deploy.is_match(&task.action)
            && self.production_tags.iter().any(|t| task.has_tag(t))
        {
            "production deployment".to_string()
        } else {
            return None;
        };

        Some(RiskAssessment {
            task_id: task.id.clone(),
            question: format!("Task '{}' is a {reason}. Proceed?", task.name),
            reason,
        })
    }

    pub fn is_high_risk(&self, task: &Task) -> bool {
        self.assess(task).is_some()
    }
}
