//! Generic field-collection loop shared by registration, habit
//! creation, and profile editing.

use crate::flows::fields::{self, FieldDef};
use crate::flows::task::Collected;

/// Outcome of feeding one answer into a field flow.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldStep {
    /// The answer failed validation; ask the same field again.
    Reprompt(String),
    /// Answer accepted; ask the next field.
    Next(String),
    /// Answer accepted and all fields are collected.
    Complete,
}

/// A parsed reply at a yes/no confirmation step.
///
/// Only the exact uppercase YES confirms. An explicit no cancels;
/// anything else means the question is asked again with the task
/// still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmReply {
    Yes,
    No,
    Unclear,
}

pub fn parse_confirm(input: &str) -> ConfirmReply {
    let trimmed = input.trim();
    if trimmed == "YES" {
        ConfirmReply::Yes
    } else if trimmed.eq_ignore_ascii_case("no") {
        ConfirmReply::No
    } else {
        ConfirmReply::Unclear
    }
}

/// A static list of fields asked one per turn.
#[derive(Debug, Clone, Copy)]
pub struct FieldFlow {
    fields: &'static [FieldDef],
}

impl FieldFlow {
    pub fn new(fields: &'static [FieldDef]) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The prompt for the field at `index`, with progress counter.
    pub fn prompt_at(&self, index: usize) -> String {
        let field = &self.fields[index];
        format!("({}/{}) {}", index + 1, self.len(), field.prompt)
    }

    pub fn first_prompt(&self) -> String {
        self.prompt_at(0)
    }

    /// Validate and store one answer, advancing `index` on success.
    pub fn handle(
        &self,
        index: &mut usize,
        collected: &mut Collected,
        input: &str,
    ) -> FieldStep {
        if *index >= self.len() {
            return FieldStep::Complete;
        }
        let field = &self.fields[*index];
        if let Err(message) = fields::validate(field, input) {
            return FieldStep::Reprompt(format!("{message}\n\n{}", self.prompt_at(*index)));
        }
        let value = fields::parse(field, input);
        collected.insert(field.name.to_string(), value.to_json());
        *index += 1;
        if *index < self.len() {
            FieldStep::Next(self.prompt_at(*index))
        } else {
            FieldStep::Complete
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::fields::TRAINER_REGISTRATION_FIELDS;

    #[test]
    fn walks_all_fields_in_order() {
        let flow = FieldFlow::new(TRAINER_REGISTRATION_FIELDS);
        let mut index = 0;
        let mut collected = Collected::new();

        assert!(flow.first_prompt().starts_with("(1/4)"));

        let step = flow.handle(&mut index, &mut collected, "Thandi M");
        assert!(matches!(step, FieldStep::Next(ref p) if p.starts_with("(2/4)")));

        flow.handle(&mut index, &mut collected, "thandi@example.com");
        flow.handle(&mut index, &mut collected, "skip");
        let step = flow.handle(&mut index, &mut collected, "yoga");
        assert_eq!(step, FieldStep::Complete);

        assert_eq!(collected["name"], "Thandi M");
        assert_eq!(collected["business_name"], serde_json::Value::Null);
        assert_eq!(collected["specialization"], "yoga");
    }

    #[test]
    fn reprompt_keeps_index_and_repeats_question() {
        let flow = FieldFlow::new(TRAINER_REGISTRATION_FIELDS);
        let mut index = 0;
        let mut collected = Collected::new();

        let step = flow.handle(&mut index, &mut collected, "x");
        match step {
            FieldStep::Reprompt(message) => {
                assert!(message.contains("at least 2"));
                assert!(message.contains("(1/4)"));
            }
            other => panic!("expected reprompt, got {other:?}"),
        }
        assert_eq!(index, 0);
        assert!(collected.is_empty());
    }

    #[test]
    fn confirm_accepts_only_exact_yes() {
        assert_eq!(parse_confirm("YES"), ConfirmReply::Yes);
        assert_eq!(parse_confirm("  YES  "), ConfirmReply::Yes);
        assert_eq!(parse_confirm("yes"), ConfirmReply::Unclear);
        assert_eq!(parse_confirm("Yes"), ConfirmReply::Unclear);
        assert_eq!(parse_confirm("NO"), ConfirmReply::No);
        assert_eq!(parse_confirm("no"), ConfirmReply::No);
        assert_eq!(parse_confirm("maybe"), ConfirmReply::Unclear);
        assert_eq!(parse_confirm(""), ConfirmReply::Unclear);
    }

    #[test]
    fn out_of_range_index_is_complete() {
        let flow = FieldFlow::new(TRAINER_REGISTRATION_FIELDS);
        let mut index = flow.len();
        let mut collected = Collected::new();
        assert_eq!(
            flow.handle(&mut index, &mut collected, "anything"),
            FieldStep::Complete
        );
    }
}
