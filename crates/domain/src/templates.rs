use std::collections::HashMap;

use crate::DomainResult;
use crate::error::DomainError;

/// Every template a cycle can need. Checked once at startup so a missing
/// template fails fast instead of surfacing mid-propagation.
pub const REQUIRED_TEMPLATES: &[&str] = &[
    "ban_message",
    "ban_note",
    "courtesy_title",
    "courtesy_body",
    "collision_title",
    "collision_body",
    "unban_overridden_title",
    "unban_overridden_body",
    "ban_overridden_title",
    "ban_overridden_body",
    "override_refused_title",
    "override_refused_body",
    "lifted_title",
    "lifted_body",
    "unban_request_ack_title",
    "unban_request_ack_body",
];

#[derive(Debug)]
pub struct MessageTemplates {
    templates: HashMap<String, String>,
}

impl MessageTemplates {
    pub fn load(templates: HashMap<String, String>) -> DomainResult<Self> {
        for name in REQUIRED_TEMPLATES {
            if !templates
                .get(*name)
                .is_some_and(|body| !body.trim().is_empty())
            {
                return Err(DomainError::Configuration(format!(
                    "missing message template: {name}"
                )));
            }
        }
        Ok(Self { templates })
    }

    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> DomainResult<String> {
        let mut out = self
            .templates
            .get(name)
            .ok_or_else(|| {
                DomainError::Configuration(format!("missing message template: {name}"))
            })?
            .clone();
        for (key, value) in vars {
            out = out.replace(&format!("{{{key}}}"), value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_set() -> HashMap<String, String> {
        REQUIRED_TEMPLATES
            .iter()
            .map(|name| (name.to_string(), format!("{name} for {{handle}}")))
            .collect()
    }

    #[test]
    fn load_rejects_a_missing_template() {
        let mut templates = full_set();
        templates.remove("ban_note");
        let err = MessageTemplates::load(templates).unwrap_err();
        assert!(matches!(err, DomainError::Configuration(_)));
    }

    #[test]
    fn load_rejects_a_blank_template() {
        let mut templates = full_set();
        templates.insert("ban_note".to_string(), "   ".to_string());
        assert!(MessageTemplates::load(templates).is_err());
    }

    #[test]
    fn render_substitutes_placeholders() {
        let templates = MessageTemplates::load(full_set()).unwrap();
        let out = templates
            .render("ban_note", &[("handle", "scam_guy")])
            .unwrap();
        assert_eq!(out, "ban_note for scam_guy");
    }
}
