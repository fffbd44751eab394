//! Prompt templates sent to the text capability, and parsing of its analysis answers.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::MAX_EXERCISES;
use crate::remote::capability::truncate;
use crate::session::SolvedExercise;

lazy_static! {
    static ref EXERCISE_COUNT: Regex =
        Regex::new(r"(?i)(?:عدد التمارين|exercise count|exercises)[^\d\n]{0,6}(\d+)").unwrap();
}

/// Languages offered by the OCR translate menu, as (code, English name)
pub const TRANSLATION_LANGUAGES: &[(&str, &str)] = &[
    ("ar", "Arabic"),
    ("en", "English"),
    ("fr", "French"),
    ("es", "Spanish"),
    ("de", "German"),
    ("it", "Italian"),
    ("tr", "Turkish"),
    ("ru", "Russian"),
    ("zh", "Chinese"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("hi", "Hindi"),
];

pub fn language_name(code: &str) -> Option<&'static str> {
    TRANSLATION_LANGUAGES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| *name)
}

fn answer_language(language: &str) -> &'static str {
    match language {
        "en" => "English",
        _ => "Modern Standard Arabic",
    }
}

const FORMATTING_RULES: &str = "Formatting rules: write every equation in plain readable form, \
never use raw LaTeX commands such as \\frac, \\sqrt or \\cdot, write (a/b) and √x instead, \
number the steps (1. 2. 3.) and make the final result stand out.";

/// Summary of an exercise analysis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseAnalysis {
    pub exercise_count: u32,
    pub has_questions: bool,
}

/// Read the exercise count and the questions flag out of an analysis answer
///
/// A missing count means a single exercise; counts above [`MAX_EXERCISES`] are clamped.
pub fn parse_analysis(analysis: &str) -> ExerciseAnalysis {
    let exercise_count = EXERCISE_COUNT
        .captures(analysis)
        .and_then(|c| c[1].parse::<u32>().ok())
        .filter(|n| *n > 0)
        .map_or(1, |n| n.min(MAX_EXERCISES));

    let head = truncate(analysis, 100).to_lowercase();
    let has_questions = head.contains("نعم") || head.contains("yes");

    ExerciseAnalysis {
        exercise_count,
        has_questions,
    }
}

pub fn detection_prompt(text: &str, language: &str) -> String {
    format!(
        "Analyse the following text carefully, keeping its original formatting:\n\n{text}\n\n\
Instructions:\n\
1. Keep the text exactly as written.\n\
2. Describe any data, charts or tables it refers to.\n\
3. Count the exercises or questions precisely.\n\
4. Name the subject (mathematics, physics, chemistry, languages, history, geography, biology...).\n\
5. Mention any cross references between exercises.\n\n\
Answer in {lang} using exactly this layout:\n\n\
Has questions: yes/no\n\n\
Exercise count: N\n\n\
Subject: ...\n\n\
Data and figures: ... or none\n\n\
Exercise list:\n1. ...\n2. ...",
        lang = answer_language(language)
    )
}

pub fn extract_exercise_prompt(index: u32, analysis: &str, original_text: &str) -> String {
    format!(
        "From the analysis below, extract exercise #{index} only.\n\n{analysis}\n\n\
Original text:\n{original}\n\n\
Give the full exercise statement with its data, figures and any references it depends on.",
        original = truncate(original_text, 1000)
    )
}

pub fn solve_exercise_prompt(index: u32, extraction: &str, original_text: &str, language: &str) -> String {
    format!(
        "You are an expert teacher in every school subject. Solve exercise #{index} below in detail.\n\n\
{extraction}\n\n\
Original text for reference (with data and figures):\n{original}...\n\n\
Instructions:\n\
1. Identify the subject.\n\
2. State the given data and figures, if any.\n\
3. State exactly what is asked.\n\
4. Solve step by step.\n\
5. Make the final answer stand out and check it when possible.\n\n\
{FORMATTING_RULES}\n\n\
This is a standalone exercise, focus on it only. Answer in {lang}.",
        original = truncate(original_text, 1000),
        lang = answer_language(language)
    )
}

pub fn clarify_exercise_prompt(index: u32, exercise: &str, language: &str) -> String {
    format!(
        "Give a simpler, more detailed explanation of exercise #{index}.\n\n\
Exercise:\n{exercise}\n\n\
Explain the given data, what is asked, the key steps of the solution and any important remarks. \
Add a similar example when useful.\n\n{FORMATTING_RULES}\n\nAnswer in {lang}.",
        lang = answer_language(language)
    )
}

pub fn resolve_exercise_prompt(index: u32, exercise: &str, language: &str) -> String {
    format!(
        "Solve exercise #{index} again using a different method or a simpler explanation.\n\n\
Exercise:\n{exercise}\n\n\
Give an alternative method if one exists, a clearer explanation, tips for understanding and a \
more detailed step by step solution.\n\n{FORMATTING_RULES}\n\nAnswer in {lang}.",
        lang = answer_language(language)
    )
}

pub fn freeform_prompt(instruction: &str, text: &str, language: &str) -> String {
    format!(
        "Here is a text extracted from a student's document:\n\n{text}\n\n\
The student asks: {instruction}\n\n\
Carry out the request step by step.\n\n{FORMATTING_RULES}\n\nAnswer in {lang}.",
        lang = answer_language(language)
    )
}

pub fn explain_text_prompt(text: &str, language: &str) -> String {
    format!(
        "Explain the following text clearly for a student. Identify the subject, the main ideas and \
any exercises it contains, and explain each one.\n\n{text}\n\nAnswer in {lang}.",
        lang = answer_language(language)
    )
}

pub fn summarize_prompt(text: &str, language: &str) -> String {
    format!(
        "Summarize the following text in a few clear bullet points.\n\n{text}\n\nAnswer in {lang}.",
        lang = answer_language(language)
    )
}

pub fn translate_prompt(text: &str, language_code: &str) -> String {
    let target = language_name(language_code).unwrap_or("English");
    format!("Translate the following text to {target}. Reply with the translation only.\n\n{text}")
}

pub fn equation_prompt(equation: &str, language: &str) -> String {
    format!(
        "Solve the following equation step by step and give the final solution set.\n\n\
Equation: {equation}\n\n{FORMATTING_RULES}\n\nAnswer in {lang}.",
        lang = answer_language(language)
    )
}

pub fn code_prompt(request: &str) -> String {
    format!("{request}\n\nReply with working code and a short explanation.")
}

/// Search query built from extracted text
pub fn search_query(text: &str) -> String {
    truncate(text.trim(), 200)
}

/// The show-all summary of solved exercises
pub fn exercise_summary(solved: &[SolvedExercise]) -> String {
    let mut out = String::new();
    for exercise in solved {
        out.push_str("━━━━━━━━━━━━━━━━━━━━\n");
        out.push_str(&format!("🔢 #{}\n\n", exercise.index));
        out.push_str(&format!("📋 {}...\n\n", truncate(&exercise.extraction, 200)));
        out.push_str(&format!("✅ {}...\n\n", truncate(&exercise.solution, 300)));
    }
    out.push_str("━━━━━━━━━━━━━━━━━━━━");
    out
}
