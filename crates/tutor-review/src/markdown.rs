//! Markdown rendering for session reviews.
//!
//! [`MarkdownGenerator`] turns a [`Review`] into a document a learner can keep:
//!
//! - A summary table with level, language and correction count
//! - The overall assessment and strengths
//! - One section per weak category with example corrections
//! - Suggested focus areas
//!
//! # Example
//!
//! ```rust
//! use tutor_review::{MarkdownGenerator, Review};
//!
//! let review = Review::builder()
//!     .session_id("abc")
//!     .level("A2")
//!     .language("es")
//!     .build()
//!     .unwrap();
//!
//! let markdown = MarkdownGenerator::new(&review).generate();
//! assert!(markdown.contains("# Session Review"));
//! ```

use std::fmt::Write;

use crate::{CategorySummary, Review};

/// Generates Markdown documents from reviews.
pub struct MarkdownGenerator<'a> {
    review: &'a Review,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given review.
    #[must_use]
    pub const fn new(review: &'a Review) -> Self {
        Self { review }
    }

    /// Generates the complete Markdown document.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_assessment(&mut output);
        self.write_categories(&mut output);
        self.write_focus_areas(&mut output);
        self.write_footer(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(output, "# Session Review\n");
    }

    fn write_summary(&self, output: &mut String) {
        let review = self.review;
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Level | {} |", escape_markdown(&review.level));
        let _ = writeln!(
            output,
            "| Language | {} |",
            escape_markdown(&review.language)
        );
        let _ = writeln!(output, "| Corrections | {} |", review.total_errors);
        let _ = writeln!(output);
    }

    fn write_assessment(&self, output: &mut String) {
        let _ = writeln!(output, "## Assessment\n");
        let _ = writeln!(
            output,
            "{}\n",
            escape_markdown(&self.review.overall_assessment)
        );

        if !self.review.strengths.is_empty() {
            let _ = writeln!(output, "### Strengths\n");
            for strength in &self.review.strengths {
                let _ = writeln!(output, "- {}", escape_markdown(strength));
            }
            let _ = writeln!(output);
        }
    }

    fn write_categories(&self, output: &mut String) {
        let _ = writeln!(output, "## Corrections by Category\n");

        if self.review.weak_categories.is_empty() {
            let _ = writeln!(output, "*No corrections needed.*\n");
            return;
        }

        for summary in &self.review.weak_categories {
            Self::write_category(output, summary);
        }
    }

    /// Writes one category section with its example table.
    fn write_category(output: &mut String, summary: &CategorySummary) {
        let _ = writeln!(
            output,
            "### {} ({})\n",
            summary.category.label(),
            summary.count
        );
        let _ = writeln!(output, "| Turn | You wrote | Correction |");
        let _ = writeln!(output, "|------|-----------|------------|");
        for example in &summary.examples {
            let _ = writeln!(
                output,
                "| {} | {} | {} |",
                example.turn_index,
                escape_markdown(&example.error_text),
                escape_markdown(&example.correction)
            );
        }
        let _ = writeln!(output);
    }

    fn write_focus_areas(&self, output: &mut String) {
        if self.review.focus_areas.is_empty() {
            return;
        }

        let _ = writeln!(output, "## Focus Areas\n");
        for (i, area) in self.review.focus_areas.iter().enumerate() {
            let _ = writeln!(output, "{}. {}", i + 1, escape_markdown(area));
        }
        let _ = writeln!(output);

        if let Some(encouragement) = &self.review.encouragement {
            let _ = writeln!(output, "> {}\n", escape_markdown(encouragement));
        }
    }

    fn write_footer(&self, output: &mut String) {
        let _ = writeln!(output, "---");
        let _ = writeln!(
            output,
            "*Generated at {}*",
            self.review.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
}

/// Escapes special Markdown characters in text.
///
/// Newlines become `<br>` so table cells stay on one row.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}
