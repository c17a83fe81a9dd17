use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::model::ids::{ConceptId, KnowledgeAreaId, QuestionId};

//
// ─── ERRORS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuestionError {
    #[error("question prompt is empty")]
    EmptyPrompt,

    #[error("question has no answer options")]
    NoOptions,

    #[error("duplicate option letter: {0}")]
    DuplicateOption(OptionLetter),

    #[error("invalid option letter: {0:?}")]
    InvalidLetter(String),
}

//
// ─── OPTION LETTER ────────────────────────────────────────────────────────────
//

/// Key of an answer option. Always a single uppercase ASCII letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OptionLetter(char);

impl OptionLetter {
    /// Builds a letter, normalizing lowercase input.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::InvalidLetter` for anything other than `A`-`Z`.
    pub fn new(letter: char) -> Result<Self, QuestionError> {
        let upper = letter.to_ascii_uppercase();
        if upper.is_ascii_uppercase() {
            Ok(Self(upper))
        } else {
            Err(QuestionError::InvalidLetter(letter.to_string()))
        }
    }

    #[must_use]
    pub fn as_char(self) -> char {
        self.0
    }
}

impl fmt::Display for OptionLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OptionLetter {
    type Err = QuestionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::new(c),
            _ => Err(QuestionError::InvalidLetter(s.to_owned())),
        }
    }
}

impl TryFrom<String> for OptionLetter {
    type Error = QuestionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OptionLetter> for String {
    fn from(value: OptionLetter) -> Self {
        value.0.to_string()
    }
}

//
// ─── QUESTION ─────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerOption {
    pub letter: OptionLetter,
    pub text: String,
}

/// A question served for the current round of a session.
///
/// Options keep server order; letters are unique within a question.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    id: QuestionId,
    prompt: String,
    options: Vec<AnswerOption>,
    knowledge_area_id: KnowledgeAreaId,
    knowledge_area_name: String,
    difficulty: f64,
    concepts_tested: Vec<ConceptId>,
}

impl Question {
    /// Validate and build a question.
    ///
    /// # Errors
    ///
    /// Returns `QuestionError::EmptyPrompt` if the prompt is blank,
    /// `QuestionError::NoOptions` if no options are given, and
    /// `QuestionError::DuplicateOption` if two options share a letter.
    pub fn new(
        id: QuestionId,
        prompt: impl Into<String>,
        options: Vec<AnswerOption>,
        knowledge_area_id: KnowledgeAreaId,
        knowledge_area_name: impl Into<String>,
        difficulty: f64,
        concepts_tested: Vec<ConceptId>,
    ) -> Result<Self, QuestionError> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(QuestionError::EmptyPrompt);
        }
        if options.is_empty() {
            return Err(QuestionError::NoOptions);
        }
        for (idx, option) in options.iter().enumerate() {
            if options[..idx].iter().any(|o| o.letter == option.letter) {
                return Err(QuestionError::DuplicateOption(option.letter));
            }
        }

        Ok(Self {
            id,
            prompt,
            options,
            knowledge_area_id,
            knowledge_area_name: knowledge_area_name.into(),
            difficulty,
            concepts_tested,
        })
    }

    #[must_use]
    pub fn id(&self) -> &QuestionId {
        &self.id
    }

    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    #[must_use]
    pub fn options(&self) -> &[AnswerOption] {
        &self.options
    }

    #[must_use]
    pub fn option(&self, letter: OptionLetter) -> Option<&AnswerOption> {
        self.options.iter().find(|o| o.letter == letter)
    }

    #[must_use]
    pub fn has_option(&self, letter: OptionLetter) -> bool {
        self.option(letter).is_some()
    }

    #[must_use]
    pub fn knowledge_area_id(&self) -> &KnowledgeAreaId {
        &self.knowledge_area_id
    }

    #[must_use]
    pub fn knowledge_area_name(&self) -> &str {
        &self.knowledge_area_name
    }

    #[must_use]
    pub fn difficulty(&self) -> f64 {
        self.difficulty
    }

    /// Concepts exercised by this question, in server order.
    #[must_use]
    pub fn concepts_tested(&self) -> &[ConceptId] {
        &self.concepts_tested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(letter: char, text: &str) -> AnswerOption {
        AnswerOption {
            letter: OptionLetter::new(letter).unwrap(),
            text: text.to_owned(),
        }
    }

    fn build(options: Vec<AnswerOption>) -> Result<Question, QuestionError> {
        Question::new(
            QuestionId::new("q-1"),
            "What is 2 + 2?",
            options,
            KnowledgeAreaId::new("ka-math"),
            "Arithmetic",
            0.4,
            vec![ConceptId::new("addition")],
        )
    }

    #[test]
    fn letters_normalize_to_uppercase() {
        assert_eq!(OptionLetter::new('b').unwrap().as_char(), 'B');
        assert_eq!("c".parse::<OptionLetter>().unwrap().to_string(), "C");
    }

    #[test]
    fn non_letters_are_rejected() {
        assert!(OptionLetter::new('1').is_err());
        assert!("AB".parse::<OptionLetter>().is_err());
        assert!("".parse::<OptionLetter>().is_err());
    }

    #[test]
    fn question_rejects_duplicate_letters() {
        let err = build(vec![option('A', "3"), option('a', "4")]).unwrap_err();
        assert_eq!(
            err,
            QuestionError::DuplicateOption(OptionLetter::new('A').unwrap())
        );
    }

    #[test]
    fn question_requires_options() {
        assert_eq!(build(Vec::new()).unwrap_err(), QuestionError::NoOptions);
    }

    #[test]
    fn question_looks_up_options_by_letter() {
        let question = build(vec![option('A', "3"), option('B', "4")]).unwrap();
        let b = OptionLetter::new('B').unwrap();
        assert_eq!(question.option(b).map(|o| o.text.as_str()), Some("4"));
        assert!(!question.has_option(OptionLetter::new('C').unwrap()));
        assert_eq!(question.concepts_tested().len(), 1);
    }
}
