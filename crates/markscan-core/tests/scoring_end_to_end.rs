#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use markscan_core::config::SheetLayout;
use markscan_core::scoring::{AnswerKey, AnswerScorer};
use markscan_core::test_utils::{SheetSpec, render_sheet};
use markscan_core::{MarkOutcome, Scanner};

fn sample_key() -> AnswerKey {
    AnswerKey::from_answer_strings("mathematics", "ACADD")
        .unwrap()
        .with_answer_string("science", "BCACE")
        .unwrap()
}

#[test]
fn test_rendered_sheet_scores() {
    let spec = SheetSpec::default();
    let sheet = render_sheet(&spec, &spec.sample_answers());
    let scanner = Scanner::new(spec.config(), spec.layout()).unwrap();
    let readings = scanner.read_sheet(&sheet.view());

    let report = AnswerScorer::new(sample_key()).score(&readings);
    let math = report.subject("mathematics").unwrap();
    assert_eq!((math.correct, math.wrong, math.empty), (3, 0, 2));
    assert_eq!(math.details[3].mark, MarkOutcome::Multi);
    assert!(math.details[0].confidence > 0.28);

    let science = report.subject("science").unwrap();
    assert_eq!((science.correct, science.wrong, science.empty), (2, 2, 1));

    // The digit column has no key entries
    assert!(report.subject("class_digit").is_none());
    assert_eq!((report.correct, report.wrong, report.empty), (5, 2, 3));
    assert!((report.net - 4.5).abs() < 1e-12);
    assert!((report.percentage() - 50.0).abs() < 1e-12);
}

#[test]
fn test_scores_agree_with_mark_strings() {
    let spec = SheetSpec::default();
    let sheet = render_sheet(&spec, &spec.sample_answers());
    let scanner = Scanner::new(spec.config(), spec.layout()).unwrap();
    let readings = scanner.read_sheet(&sheet.view());
    let strings = readings.iter().map(|r| (r.name.clone(), r.mark_string())).collect();

    let scorer = AnswerScorer::new(sample_key());
    let from_readings = scorer.score(&readings);
    let from_strings = scorer.score_mark_strings(&strings);
    assert_eq!(from_readings.correct, from_strings.correct);
    assert_eq!(from_readings.wrong, from_strings.wrong);
    assert_eq!(from_readings.empty, from_strings.empty);
    assert!((from_readings.net - from_strings.net).abs() < 1e-12);
}

#[test]
fn test_higher_threshold_drops_marks() {
    let spec = SheetSpec::default();
    let sheet = render_sheet(&spec, &spec.sample_answers());
    let mut scanner = Scanner::new(spec.config(), spec.layout()).unwrap();
    scanner.set_fill_threshold(1.0);
    let readings = scanner.read_sheet(&sheet.view());
    for r in &readings {
        assert!(r.marks().iter().all(|m| *m == MarkOutcome::Empty), "{}", r.mark_string());
    }
}

#[cfg(feature = "serde")]
#[test]
fn test_json_layout_and_key() {
    let spec = SheetSpec::default();
    let json = spec.layout().to_json().unwrap();
    let layout = SheetLayout::from_json(&json).unwrap();
    assert_eq!(layout, spec.layout());

    let key = AnswerKey::from_json(
        r#"[
            {"subject": "mathematics", "question": 0, "answer": "A"},
            {"subject": "mathematics", "question": 1, "answer": "B"}
        ]"#,
    )
    .unwrap();
    let sheet = render_sheet(&spec, &spec.sample_answers());
    let scanner = Scanner::new(spec.config(), layout).unwrap();
    let report = AnswerScorer::new(key).score(&scanner.read_sheet(&sheet.view()));
    assert_eq!((report.correct, report.wrong, report.empty), (1, 1, 0));
}
