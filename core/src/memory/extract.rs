use regex::Regex;

use super::helpers::{one_line, sentences};
use super::types::{Message, Role};

const MAX_FACTS_PER_TURN: usize = 5;

/// Pulls key facts and user preferences out of turn messages.
#[derive(Debug, Clone)]
pub struct FactExtractor {
    fact: Regex,
    preference: Regex,
}

impl Default for FactExtractor {
    fn default() -> Self {
        Self {
            fact: Regex::new(
                r"(?i)\b(must|decided|deadline|requires?|requirement|important|note|version|uses?|using)\b",
            )
            .expect("static fact pattern"),
            preference: Regex::new(
                r"(?i)\b(i prefer|i like|i want|i'd rather|please (?:always|never|use)|always use|never use|do not use|don't use)\b",
            )
            .expect("static preference pattern"),
        }
    }
}

impl FactExtractor {
    /// Sentences worth remembering after the turn itself has aged out.
    pub fn key_facts(&self, messages: &[Message]) -> Vec<String> {
        let mut facts: Vec<String> = Vec::new();
        for message in messages.iter().filter(|m| m.role != Role::System) {
            for sentence in sentences(&message.content) {
                if self.preference.is_match(sentence) || !self.fact.is_match(sentence) {
                    continue;
                }
                let fact = one_line(sentence);
                if !facts.contains(&fact) {
                    facts.push(fact);
                }
                if facts.len() == MAX_FACTS_PER_TURN {
                    return facts;
                }
            }
        }
        facts
    }

    /// Preferences stated by the user.
    pub fn preferences(&self, messages: &[Message]) -> Vec<String> {
        messages
            .iter()
            .filter(|m| m.role == Role::User)
            .flat_map(|m| sentences(&m.content))
            .filter(|s| self.preference.is_match(s))
            .map(one_line)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facts_and_preferences_are_separated() {
        let extractor = FactExtractor::default();
        let messages = vec![
            Message::user("I prefer small commits. The service must stay on port 8080. hello"),
            Message::assistant("We decided to use Postgres 15. Done!"),
        ];

        assert_eq!(
            extractor.key_facts(&messages),
            vec![
                "The service must stay on port 8080".to_string(),
                "We decided to use Postgres 15".to_string(),
            ]
        );
        assert_eq!(
            extractor.preferences(&messages),
            vec!["I prefer small commits".to_string()]
        );
    }

    #[test]
    fn assistant_preferences_are_ignored() {
        let extractor = FactExtractor::default();
        let messages = vec![Message::assistant("I prefer tabs")];
        assert!(extractor.preferences(&messages).is_empty());
    }
}
