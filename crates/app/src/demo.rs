//! Built-in question bank for `--offline` runs.

use assess_core::model::{
    AnswerOption, ConceptId, KnowledgeAreaId, OptionLetter, Question, QuestionError, QuestionId,
};
use services::BankQuestion;

struct Item {
    id: &'static str,
    area: (&'static str, &'static str),
    concept: &'static str,
    prompt: &'static str,
    options: [&'static str; 4],
    correct: char,
    explanation: &'static str,
}

const ITEMS: &[Item] = &[
    Item {
        id: "alg-1",
        area: ("algebra", "Algebra"),
        concept: "linear-equations",
        prompt: "Solve for x: 3x + 5 = 20",
        options: ["x = 3", "x = 5", "x = 15", "x = 25/3"],
        correct: 'B',
        explanation: "Subtract 5 from both sides, then divide by 3.",
    },
    Item {
        id: "alg-2",
        area: ("algebra", "Algebra"),
        concept: "factoring",
        prompt: "Which is a factor of x^2 - 9?",
        options: ["x - 9", "x + 9", "x - 3", "x^2 + 3"],
        correct: 'C',
        explanation: "x^2 - 9 is a difference of squares: (x - 3)(x + 3).",
    },
    Item {
        id: "geo-1",
        area: ("geometry", "Geometry"),
        concept: "angles",
        prompt: "The interior angles of a triangle sum to",
        options: ["90 degrees", "180 degrees", "270 degrees", "360 degrees"],
        correct: 'B',
        explanation: "Any triangle's interior angles sum to a straight angle.",
    },
    Item {
        id: "geo-2",
        area: ("geometry", "Geometry"),
        concept: "area",
        prompt: "Area of a circle with radius 2?",
        options: ["2 pi", "4 pi", "8 pi", "16 pi"],
        correct: 'B',
        explanation: "A = pi r^2 = 4 pi.",
    },
    Item {
        id: "prob-1",
        area: ("probability", "Probability"),
        concept: "independent-events",
        prompt: "Two fair coins are flipped. P(both heads)?",
        options: ["1/2", "1/3", "1/4", "3/4"],
        correct: 'C',
        explanation: "Independent events multiply: 1/2 * 1/2.",
    },
];

/// # Errors
///
/// Returns `QuestionError` if the built-in items are malformed.
pub fn bank() -> Result<Vec<BankQuestion>, QuestionError> {
    ITEMS.iter().map(build).collect()
}

fn build(item: &Item) -> Result<BankQuestion, QuestionError> {
    let options = ('A'..='D')
        .zip(item.options)
        .map(|(letter, text)| {
            Ok(AnswerOption {
                letter: OptionLetter::new(letter)?,
                text: text.to_owned(),
            })
        })
        .collect::<Result<Vec<_>, QuestionError>>()?;
    let question = Question::new(
        QuestionId::new(item.id),
        item.prompt,
        options,
        KnowledgeAreaId::new(item.area.0),
        item.area.1,
        0.5,
        vec![ConceptId::new(item.concept)],
    )?;
    Ok(BankQuestion {
        question,
        correct: OptionLetter::new(item.correct)?,
        explanation: Some(item.explanation.to_owned()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_bank_is_valid() {
        let bank = bank().unwrap();
        assert_eq!(bank.len(), ITEMS.len());
        assert!(bank.iter().all(|b| b.question.has_option(b.correct)));
    }
}
