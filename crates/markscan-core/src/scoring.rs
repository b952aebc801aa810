//! Answer keys and scoring.
//!
//! Marks are compared against the key per subject. `Empty` and `Multi` both
//! count as empty; anything else is correct or wrong. The net score is
//! `correct - wrong / penalty_divisor`.

use crate::bubble::{MarkOutcome, RegionReading, parse_marks};
use crate::config::ScanConfig;
use crate::error::ScanError;
use std::collections::BTreeMap;

/// One correct answer of the key.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnswerKeyEntry {
    /// Subject (region) name.
    pub subject: String,
    /// Zero-based question index.
    pub question: usize,
    /// Correct option.
    pub answer: char,
}

impl AnswerKeyEntry {
    /// Convenience constructor.
    pub fn new(subject: impl Into<String>, question: usize, answer: char) -> Self {
        Self {
            subject: subject.into(),
            question,
            answer,
        }
    }
}

/// Correct answers keyed by subject and question index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnswerKey {
    subjects: BTreeMap<String, BTreeMap<usize, char>>,
}

impl AnswerKey {
    /// An empty key.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a key from entries, rejecting duplicates and reserved options.
    pub fn from_entries<I>(entries: I) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = AnswerKeyEntry>,
    {
        let mut key = Self::new();
        for entry in entries {
            key.insert(entry)?;
        }
        Ok(key)
    }

    /// Build a key for one subject from a string of options, e.g. `"BACCD"`.
    ///
    /// Position `i` is question `i`. Commas and whitespace are ignored and a
    /// `-` leaves that question out of the key.
    pub fn from_answer_strings(subject: &str, answers: &str) -> Result<Self, ScanError> {
        Self::new().with_answer_string(subject, answers)
    }

    /// Add the answers of another subject, see [`Self::from_answer_strings`].
    pub fn with_answer_string(mut self, subject: &str, answers: &str) -> Result<Self, ScanError> {
        let options = answers.chars().filter(|c| *c != ',' && !c.is_whitespace());
        for (question, answer) in options.enumerate() {
            if answer != '-' {
                self.insert(AnswerKeyEntry::new(subject, question, answer))?;
            }
        }
        Ok(self)
    }

    /// Load a key from a JSON list of entries.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, ScanError> {
        let entries: Vec<AnswerKeyEntry> = serde_json::from_str(json).map_err(|e| ScanError::Parse {
            what: "answer key",
            message: e.to_string(),
        })?;
        Self::from_entries(entries)
    }

    /// Serialize the key as a JSON list of entries.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> Result<String, ScanError> {
        serde_json::to_string_pretty(&self.entries().collect::<Vec<_>>()).map_err(|e| ScanError::Parse {
            what: "answer key",
            message: e.to_string(),
        })
    }

    /// Insert one entry.
    pub fn insert(&mut self, entry: AnswerKeyEntry) -> Result<(), ScanError> {
        if matches!(entry.answer, '-' | 'X' | ',') || entry.answer.is_whitespace() || entry.answer.is_control() {
            return Err(ScanError::InvalidKeyOption {
                subject: entry.subject,
                question: entry.question,
                option: entry.answer,
            });
        }
        let questions = self.subjects.entry(entry.subject.clone()).or_default();
        if questions.contains_key(&entry.question) {
            return Err(ScanError::DuplicateKeyEntry {
                subject: entry.subject,
                question: entry.question,
            });
        }
        questions.insert(entry.question, entry.answer);
        Ok(())
    }

    /// Correct option of a question, if the key has one.
    #[must_use]
    pub fn correct_answer(&self, subject: &str, question: usize) -> Option<char> {
        self.subjects.get(subject)?.get(&question).copied()
    }

    /// True when `answer` is the keyed option of the question.
    #[must_use]
    pub fn is_correct(&self, subject: &str, question: usize, answer: char) -> bool {
        self.correct_answer(subject, question) == Some(answer)
    }

    /// Number of keyed questions of a subject.
    #[must_use]
    pub fn question_count(&self, subject: &str) -> usize {
        self.subjects.get(subject).map_or(0, BTreeMap::len)
    }

    /// Subject names, sorted.
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.subjects.keys().map(String::as_str)
    }

    /// All entries, sorted by subject then question.
    pub fn entries(&self) -> impl Iterator<Item = AnswerKeyEntry> + '_ {
        self.subjects.iter().flat_map(|(subject, questions)| {
            questions
                .iter()
                .map(move |(&question, &answer)| AnswerKeyEntry::new(subject.clone(), question, answer))
        })
    }

    /// True when the key has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

/// Outcome of one keyed question.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuestionDetail {
    /// Zero-based question index.
    pub question: usize,
    /// What was read from the sheet (`Empty` when the question was not read at all).
    pub mark: MarkOutcome,
    /// Keyed option.
    pub correct_answer: char,
    /// True when the mark selects the keyed option.
    pub is_correct: bool,
    /// Fill confidence of the mark, 0 when unknown.
    pub confidence: f64,
}

/// Score of one subject.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubjectScore {
    /// Subject name.
    pub subject: String,
    /// Correct answers.
    pub correct: usize,
    /// Wrong answers.
    pub wrong: usize,
    /// Empty or ambiguous answers.
    pub empty: usize,
    /// `correct - wrong / penalty_divisor`.
    pub net: f64,
    /// Per-question breakdown, in question order.
    pub details: Vec<QuestionDetail>,
}

impl SubjectScore {
    /// Number of keyed questions.
    #[must_use]
    pub fn total(&self) -> usize {
        self.correct + self.wrong + self.empty
    }
}

/// Scores of every keyed subject plus the aggregate.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScoreReport {
    /// Per-subject scores, sorted by subject name.
    pub subjects: Vec<SubjectScore>,
    /// Sum of correct answers.
    pub correct: usize,
    /// Sum of wrong answers.
    pub wrong: usize,
    /// Sum of empty answers.
    pub empty: usize,
    /// Net computed from the summed counts.
    pub net: f64,
}

impl ScoreReport {
    /// Number of keyed questions across all subjects.
    #[must_use]
    pub fn total_questions(&self) -> usize {
        self.correct + self.wrong + self.empty
    }

    /// Correct answers as a percentage of all keyed questions.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percentage(&self) -> f64 {
        let total = self.total_questions();
        if total == 0 {
            return 0.0;
        }
        self.correct as f64 * 100.0 / total as f64
    }

    /// Score of one subject.
    #[must_use]
    pub fn subject(&self, name: &str) -> Option<&SubjectScore> {
        self.subjects.iter().find(|s| s.subject == name)
    }
}

/// Default penalty divisor: four wrong answers cancel one correct answer.
pub const DEFAULT_PENALTY_DIVISOR: f64 = 4.0;

/// Compares extracted marks with an [`AnswerKey`].
///
/// ```
/// use markscan_core::bubble::parse_marks;
/// use markscan_core::scoring::{AnswerKey, AnswerScorer};
/// use std::collections::BTreeMap;
///
/// let key = AnswerKey::from_answer_strings("mathematics", "ABC").unwrap();
/// let scorer = AnswerScorer::new(key);
/// let marks = BTreeMap::from([("mathematics".to_string(), parse_marks("A,C,-"))]);
/// let report = scorer.score_marks(&marks);
/// assert_eq!((report.correct, report.wrong, report.empty), (1, 1, 1));
/// assert!((report.net - 0.75).abs() < 1e-12);
/// ```
#[derive(Clone, Debug)]
pub struct AnswerScorer {
    key: AnswerKey,
    penalty_divisor: f64,
}

impl AnswerScorer {
    /// Scorer with the default penalty divisor.
    #[must_use]
    pub fn new(key: AnswerKey) -> Self {
        Self {
            key,
            penalty_divisor: DEFAULT_PENALTY_DIVISOR,
        }
    }

    /// Scorer using the penalty divisor of `config`.
    #[must_use]
    pub fn from_config(key: AnswerKey, config: &ScanConfig) -> Self {
        Self::new(key).with_penalty_divisor(config.penalty_divisor)
    }

    /// Override the penalty divisor. Non-finite or non-positive values keep the default.
    #[must_use]
    pub fn with_penalty_divisor(mut self, divisor: f64) -> Self {
        self.penalty_divisor = if divisor.is_finite() && divisor > 0.0 {
            divisor
        } else {
            DEFAULT_PENALTY_DIVISOR
        };
        self
    }

    /// The key being scored against.
    #[must_use]
    pub fn key(&self) -> &AnswerKey {
        &self.key
    }

    /// The penalty divisor in use.
    #[must_use]
    pub fn penalty_divisor(&self) -> f64 {
        self.penalty_divisor
    }

    /// Score region readings. Regions without key entries are ignored.
    #[must_use]
    pub fn score(&self, readings: &[RegionReading]) -> ScoreReport {
        self.score_with(|subject| {
            readings.iter().find(|r| r.name == subject).map(|r| {
                r.readings
                    .iter()
                    .map(|b| (b.outcome, b.confidence))
                    .collect()
            })
        })
    }

    /// Score marks keyed by subject name.
    #[must_use]
    pub fn score_marks(&self, marks: &BTreeMap<String, Vec<MarkOutcome>>) -> ScoreReport {
        self.score_with(|subject| {
            marks
                .get(subject)
                .map(|m| m.iter().map(|&outcome| (outcome, 0.0)).collect())
        })
    }

    /// Score comma-separated mark strings keyed by subject name.
    #[must_use]
    pub fn score_mark_strings(&self, strings: &BTreeMap<String, String>) -> ScoreReport {
        let marks = strings
            .iter()
            .map(|(subject, s)| (subject.clone(), parse_marks(s)))
            .collect();
        self.score_marks(&marks)
    }

    /// Score a single subject.
    #[must_use]
    pub fn score_subject(&self, subject: &str, marks: &[MarkOutcome]) -> SubjectScore {
        let marks: Vec<_> = marks.iter().map(|&m| (m, 0.0)).collect();
        self.subject_score(subject, Some(&marks))
    }

    fn score_with<F>(&self, lookup: F) -> ScoreReport
    where
        F: Fn(&str) -> Option<Vec<(MarkOutcome, f64)>>,
    {
        let subjects: Vec<SubjectScore> = self
            .key
            .subjects()
            .map(|subject| {
                let marks = lookup(subject);
                if marks.is_none() {
                    tracing::debug!(subject, "no marks for keyed subject, counted as empty");
                }
                self.subject_score(subject, marks.as_deref())
            })
            .collect();

        let correct = subjects.iter().map(|s| s.correct).sum();
        let wrong = subjects.iter().map(|s| s.wrong).sum();
        let empty = subjects.iter().map(|s| s.empty).sum();
        ScoreReport {
            net: self.net(correct, wrong),
            subjects,
            correct,
            wrong,
            empty,
        }
    }

    fn subject_score(&self, subject: &str, marks: Option<&[(MarkOutcome, f64)]>) -> SubjectScore {
        let mut score = SubjectScore {
            subject: subject.to_string(),
            correct: 0,
            wrong: 0,
            empty: 0,
            net: 0.0,
            details: Vec::with_capacity(self.key.question_count(subject)),
        };
        let Some(questions) = self.key.subjects.get(subject) else {
            return score;
        };
        for (&question, &correct_answer) in questions {
            let (mark, confidence) = marks
                .and_then(|m| m.get(question))
                .copied()
                .unwrap_or((MarkOutcome::Empty, 0.0));
            let is_correct = mark.selected() == Some(correct_answer);
            match mark {
                MarkOutcome::Empty | MarkOutcome::Multi => score.empty += 1,
                MarkOutcome::Selected(_) if is_correct => score.correct += 1,
                MarkOutcome::Selected(_) => score.wrong += 1,
            }
            score.details.push(QuestionDetail {
                question,
                mark,
                correct_answer,
                is_correct,
                confidence,
            });
        }
        score.net = self.net(score.correct, score.wrong);
        score
    }

    #[allow(clippy::cast_precision_loss)]
    fn net(&self, correct: usize, wrong: usize) -> f64 {
        correct as f64 - wrong as f64 / self.penalty_divisor
    }
}
