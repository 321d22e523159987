//! Field definitions and per-type validation for field-driven flows.
//!
//! Each multi-step flow that just collects values (registration, habit
//! creation, profile edit) is configured as a static list of
//! [`FieldDef`]s; the engine asks one field per turn.

use std::sync::LazyLock;

use regex::Regex;

/// Inputs that skip an optional field, case-insensitive.
const SKIP_WORDS: &[&str] = &["skip", "no", "none", ""];

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email regex")
});

/// One selectable option of a choice field.
#[derive(Debug, Clone, Copy)]
pub struct ChoiceOption {
    pub value: &'static str,
    pub label: &'static str,
}

/// Type-specific validation rules.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Email,
    Phone,
    Choice {
        options: &'static [ChoiceOption],
    },
    Text {
        min_length: Option<usize>,
        max_length: Option<usize>,
        pattern: Option<&'static str>,
        pattern_message: Option<&'static str>,
    },
}

/// A plain text field with no length bounds.
pub const FREE_TEXT: FieldKind = FieldKind::Text {
    min_length: None,
    max_length: None,
    pattern: None,
    pattern_message: None,
};

/// One field of a field-driven flow. Loaded from static configuration;
/// immutable at runtime.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// Key in the collected-data map (and profile column name).
    pub name: &'static str,
    /// Human label used in error messages.
    pub label: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Question asked for this field.
    pub prompt: &'static str,
}

/// A parsed field value. Skipped optional fields parse to `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Null => serde_json::Value::Null,
            FieldValue::Number(n) => serde_json::json!(n),
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Whether the input skips an optional field.
fn is_skip(raw: &str) -> bool {
    let lowered = raw.trim().to_lowercase();
    SKIP_WORDS.contains(&lowered.as_str())
}

/// Strip everything except digits and `+` from a phone number.
fn strip_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}

/// Validate a raw answer against a field. `Ok(())` guarantees that
/// [`parse`] succeeds for the same input.
pub fn validate(field: &FieldDef, raw: &str) -> Result<(), String> {
    let trimmed = raw.trim();

    if is_skip(trimmed) {
        if field.required {
            return Err(format!("{} is required.", field.label));
        }
        return Ok(());
    }

    match &field.kind {
        FieldKind::Number { min, max } => {
            let value: f64 = trimmed
                .parse()
                .map_err(|_| format!("Please enter a number for {}.", field.label))?;
            if let Some(min) = min {
                if value < *min {
                    return Err(format!("{} must be at least {min}.", field.label));
                }
            }
            if let Some(max) = max {
                if value > *max {
                    return Err(format!("{} must be at most {max}.", field.label));
                }
            }
            Ok(())
        }
        FieldKind::Email => {
            if EMAIL_RE.is_match(trimmed) {
                Ok(())
            } else {
                Err(format!(
                    "Please enter a valid email address for {}.",
                    field.label
                ))
            }
        }
        FieldKind::Phone => {
            let stripped = strip_phone(trimmed);
            if stripped.len() >= 10 {
                Ok(())
            } else {
                Err(format!(
                    "{} must be a phone number with at least 10 digits.",
                    field.label
                ))
            }
        }
        FieldKind::Choice { options } => {
            // An empty options list makes the field a no-op.
            if options.is_empty() {
                return Ok(());
            }
            let lowered = trimmed.to_lowercase();
            let matched = options
                .iter()
                .any(|o| o.value.to_lowercase() == lowered || o.label.to_lowercase() == lowered);
            if matched {
                Ok(())
            } else {
                let labels: Vec<&str> = options.iter().map(|o| o.label).collect();
                Err(format!(
                    "Please choose one of: {} for {}.",
                    labels.join(", "),
                    field.label
                ))
            }
        }
        FieldKind::Text {
            min_length,
            max_length,
            pattern,
            pattern_message,
        } => {
            if let Some(min) = min_length {
                if trimmed.chars().count() < *min {
                    return Err(format!(
                        "{} must be at least {min} characters.",
                        field.label
                    ));
                }
            }
            if let Some(max) = max_length {
                if trimmed.chars().count() > *max {
                    return Err(format!("{} must be at most {max} characters.", field.label));
                }
            }
            if let Some(pattern) = pattern {
                let re = Regex::new(pattern)
                    .map_err(|_| format!("{} could not be checked.", field.label))?;
                if !re.is_match(trimmed) {
                    return Err(pattern_message
                        .map(String::from)
                        .unwrap_or_else(|| format!("{} has an invalid format.", field.label)));
                }
            }
            Ok(())
        }
    }
}

/// Parse a validated answer into a typed value.
pub fn parse(field: &FieldDef, raw: &str) -> FieldValue {
    let trimmed = raw.trim();
    if is_skip(trimmed) {
        return FieldValue::Null;
    }
    match &field.kind {
        FieldKind::Number { .. } => trimmed
            .parse()
            .map(FieldValue::Number)
            .unwrap_or(FieldValue::Null),
        FieldKind::Email => FieldValue::Text(trimmed.to_string()),
        FieldKind::Phone => FieldValue::Text(strip_phone(trimmed)),
        FieldKind::Choice { options } => {
            if options.is_empty() {
                return FieldValue::Null;
            }
            let lowered = trimmed.to_lowercase();
            options
                .iter()
                .find(|o| o.value.to_lowercase() == lowered || o.label.to_lowercase() == lowered)
                .map(|o| FieldValue::Text(o.value.to_string()))
                .unwrap_or(FieldValue::Null)
        }
        FieldKind::Text { .. } => FieldValue::Text(trimmed.to_string()),
    }
}

// ── Static field sets ───────────────────────────────────────────────

const SPECIALIZATIONS: &[ChoiceOption] = &[
    ChoiceOption {
        value: "strength",
        label: "Strength",
    },
    ChoiceOption {
        value: "cardio",
        label: "Cardio",
    },
    ChoiceOption {
        value: "yoga",
        label: "Yoga",
    },
    ChoiceOption {
        value: "general",
        label: "General fitness",
    },
];

const FREQUENCIES: &[ChoiceOption] = &[
    ChoiceOption {
        value: "daily",
        label: "Daily",
    },
    ChoiceOption {
        value: "weekly",
        label: "Weekly",
    },
];

/// Registration questions for trainers.
pub const TRAINER_REGISTRATION_FIELDS: &[FieldDef] = &[
    FieldDef {
        name: "name",
        label: "Your name",
        kind: FieldKind::Text {
            min_length: Some(2),
            max_length: Some(100),
            pattern: None,
            pattern_message: None,
        },
        required: true,
        prompt: "What is your full name?",
    },
    FieldDef {
        name: "email",
        label: "Email",
        kind: FieldKind::Email,
        required: false,
        prompt: "What is your email address? (or reply 'skip')",
    },
    FieldDef {
        name: "business_name",
        label: "Business name",
        kind: FieldKind::Text {
            min_length: None,
            max_length: Some(100),
            pattern: None,
            pattern_message: None,
        },
        required: false,
        prompt: "What is your business called? (or reply 'skip')",
    },
    FieldDef {
        name: "specialization",
        label: "Specialization",
        kind: FieldKind::Choice {
            options: SPECIALIZATIONS,
        },
        required: false,
        prompt: "What do you specialize in? Strength, Cardio, Yoga or General fitness (or reply 'skip')",
    },
];

/// Registration questions for clients.
pub const CLIENT_REGISTRATION_FIELDS: &[FieldDef] = &[
    FieldDef {
        name: "name",
        label: "Your name",
        kind: FieldKind::Text {
            min_length: Some(2),
            max_length: Some(100),
            pattern: None,
            pattern_message: None,
        },
        required: true,
        prompt: "What is your full name?",
    },
    FieldDef {
        name: "email",
        label: "Email",
        kind: FieldKind::Email,
        required: false,
        prompt: "What is your email address? (or reply 'skip')",
    },
    FieldDef {
        name: "fitness_goal",
        label: "Fitness goal",
        kind: FieldKind::Text {
            min_length: None,
            max_length: Some(200),
            pattern: None,
            pattern_message: None,
        },
        required: false,
        prompt: "What is your main fitness goal? (or reply 'skip')",
    },
];

/// Habit creation questions.
pub const HABIT_CREATE_FIELDS: &[FieldDef] = &[
    FieldDef {
        name: "habit_name",
        label: "Habit name",
        kind: FieldKind::Text {
            min_length: Some(2),
            max_length: Some(80),
            pattern: None,
            pattern_message: None,
        },
        required: true,
        prompt: "What should the habit be called?",
    },
    FieldDef {
        name: "description",
        label: "Description",
        kind: FieldKind::Text {
            min_length: None,
            max_length: Some(300),
            pattern: None,
            pattern_message: None,
        },
        required: false,
        prompt: "Add a short description. (or reply 'skip')",
    },
    FieldDef {
        name: "target_value",
        label: "Daily target",
        kind: FieldKind::Number {
            min: Some(0.1),
            max: Some(100000.0),
        },
        required: true,
        prompt: "What is the numeric target? e.g. 8",
    },
    FieldDef {
        name: "unit",
        label: "Unit",
        kind: FieldKind::Text {
            min_length: Some(1),
            max_length: Some(20),
            pattern: None,
            pattern_message: None,
        },
        required: true,
        prompt: "What unit is it measured in? e.g. glasses, km, minutes",
    },
    FieldDef {
        name: "frequency",
        label: "Frequency",
        kind: FieldKind::Choice {
            options: FREQUENCIES,
        },
        required: true,
        prompt: "How often? Daily or Weekly",
    },
];

/// Profile edit questions for trainers: every field optional, skip
/// keeps the current value.
pub const TRAINER_PROFILE_FIELDS: &[FieldDef] = &[
    FieldDef {
        name: "name",
        label: "Your name",
        kind: FieldKind::Text {
            min_length: Some(2),
            max_length: Some(100),
            pattern: None,
            pattern_message: None,
        },
        required: false,
        prompt: "New name? (or 'skip' to keep the current one)",
    },
    FieldDef {
        name: "email",
        label: "Email",
        kind: FieldKind::Email,
        required: false,
        prompt: "New email? (or 'skip')",
    },
    FieldDef {
        name: "business_name",
        label: "Business name",
        kind: FieldKind::Text {
            min_length: None,
            max_length: Some(100),
            pattern: None,
            pattern_message: None,
        },
        required: false,
        prompt: "New business name? (or 'skip')",
    },
    FieldDef {
        name: "specialization",
        label: "Specialization",
        kind: FieldKind::Choice {
            options: SPECIALIZATIONS,
        },
        required: false,
        prompt: "New specialization? Strength, Cardio, Yoga or General fitness (or 'skip')",
    },
];

/// Profile edit questions for clients.
pub const CLIENT_PROFILE_FIELDS: &[FieldDef] = &[
    FieldDef {
        name: "name",
        label: "Your name",
        kind: FieldKind::Text {
            min_length: Some(2),
            max_length: Some(100),
            pattern: None,
            pattern_message: None,
        },
        required: false,
        prompt: "New name? (or 'skip' to keep the current one)",
    },
    FieldDef {
        name: "email",
        label: "Email",
        kind: FieldKind::Email,
        required: false,
        prompt: "New email? (or 'skip')",
    },
    FieldDef {
        name: "fitness_goal",
        label: "Fitness goal",
        kind: FieldKind::Text {
            min_length: None,
            max_length: Some(200),
            pattern: None,
            pattern_message: None,
        },
        required: false,
        prompt: "New fitness goal? (or 'skip')",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    fn number_field(min: Option<f64>, max: Option<f64>, required: bool) -> FieldDef {
        FieldDef {
            name: "days",
            label: "Days",
            kind: FieldKind::Number { min, max },
            required,
            prompt: "How many days?",
        }
    }

    fn email_field() -> FieldDef {
        FieldDef {
            name: "email",
            label: "Email",
            kind: FieldKind::Email,
            required: true,
            prompt: "Email?",
        }
    }

    #[test]
    fn required_field_rejects_empty() {
        let field = number_field(None, None, true);
        let err = validate(&field, "").unwrap_err();
        assert!(err.contains("required"));
    }

    #[test]
    fn optional_field_skip_words_parse_to_null() {
        let field = FieldDef {
            required: false,
            ..email_field()
        };
        for input in ["skip", "No", "NONE", "", "  skip  "] {
            assert!(validate(&field, input).is_ok(), "input {input:?}");
            assert_eq!(parse(&field, input), FieldValue::Null, "input {input:?}");
        }
    }

    #[test]
    fn number_bounds() {
        let field = number_field(Some(1.0), Some(365.0), true);
        assert!(validate(&field, "0").is_err());
        assert!(validate(&field, "366").is_err());
        assert!(validate(&field, "30").is_ok());
        assert_eq!(parse(&field, "30"), FieldValue::Number(30.0));
    }

    #[test]
    fn number_rejects_garbage() {
        let field = number_field(None, None, true);
        let err = validate(&field, "ten").unwrap_err();
        assert!(err.contains("number"));
    }

    #[test]
    fn email_validation() {
        let field = email_field();
        assert!(validate(&field, "a@b.co").is_ok());
        let err = validate(&field, "not-an-email").unwrap_err();
        assert!(err.contains("valid email"));
    }

    #[test]
    fn phone_strips_and_checks_length() {
        let field = FieldDef {
            name: "phone",
            label: "Phone",
            kind: FieldKind::Phone,
            required: true,
            prompt: "Phone?",
        };
        assert!(validate(&field, "+27 82 123-4567").is_ok());
        assert_eq!(
            parse(&field, "+27 82 123-4567"),
            FieldValue::Text("+27821234567".into())
        );
        assert!(validate(&field, "12345").is_err());
    }

    #[test]
    fn choice_matches_value_or_label_case_insensitive() {
        let field = FieldDef {
            name: "frequency",
            label: "Frequency",
            kind: FieldKind::Choice {
                options: FREQUENCIES,
            },
            required: true,
            prompt: "How often?",
        };
        assert!(validate(&field, "daily").is_ok());
        assert!(validate(&field, "Weekly").is_ok());
        assert_eq!(parse(&field, "DAILY"), FieldValue::Text("daily".into()));

        let err = validate(&field, "hourly").unwrap_err();
        assert!(err.contains("Daily"));
        assert!(err.contains("Weekly"));
    }

    #[test]
    fn empty_choice_options_always_valid() {
        let field = FieldDef {
            name: "anything",
            label: "Anything",
            kind: FieldKind::Choice { options: &[] },
            required: true,
            prompt: "?",
        };
        assert!(validate(&field, "whatever").is_ok());
        assert_eq!(parse(&field, "whatever"), FieldValue::Null);
    }

    #[test]
    fn text_length_bounds() {
        let field = FieldDef {
            name: "name",
            label: "Name",
            kind: FieldKind::Text {
                min_length: Some(2),
                max_length: Some(5),
                pattern: None,
                pattern_message: None,
            },
            required: true,
            prompt: "Name?",
        };
        assert!(validate(&field, "x").is_err());
        assert!(validate(&field, "abcdef").is_err());
        assert!(validate(&field, "abc").is_ok());
    }

    #[test]
    fn text_pattern_with_custom_message() {
        let field = FieldDef {
            name: "code",
            label: "Code",
            kind: FieldKind::Text {
                min_length: None,
                max_length: None,
                pattern: Some(r"^[A-Z]{3}\d{3}$"),
                pattern_message: Some("Codes look like ABC123."),
            },
            required: true,
            prompt: "Code?",
        };
        assert!(validate(&field, "ABC123").is_ok());
        assert_eq!(validate(&field, "abc").unwrap_err(), "Codes look like ABC123.");
    }

    #[test]
    fn validate_ok_implies_parse_succeeds() {
        // The validator/parser agreement property across all kinds.
        let cases: Vec<(FieldDef, &str)> = vec![
            (number_field(Some(0.0), None, true), "42.5"),
            (email_field(), "user@example.com"),
            (
                FieldDef {
                    name: "phone",
                    label: "Phone",
                    kind: FieldKind::Phone,
                    required: true,
                    prompt: "?",
                },
                "0821234567",
            ),
            (
                FieldDef {
                    name: "frequency",
                    label: "Frequency",
                    kind: FieldKind::Choice {
                        options: FREQUENCIES,
                    },
                    required: true,
                    prompt: "?",
                },
                "weekly",
            ),
        ];
        for (field, input) in cases {
            validate(&field, input).unwrap();
            assert_ne!(
                parse(&field, input),
                FieldValue::Null,
                "parse must yield a value for {input:?}"
            );
        }
    }

    #[test]
    fn static_field_sets_are_consistent() {
        for fields in [
            TRAINER_REGISTRATION_FIELDS,
            CLIENT_REGISTRATION_FIELDS,
            HABIT_CREATE_FIELDS,
            TRAINER_PROFILE_FIELDS,
            CLIENT_PROFILE_FIELDS,
        ] {
            assert!(!fields.is_empty());
            let mut names: Vec<&str> = fields.iter().map(|f| f.name).collect();
            names.sort_unstable();
            names.dedup();
            assert_eq!(names.len(), fields.len(), "duplicate field names");
        }
    }
}
