//! Prompts for character-sheet extraction and optimization.
//!
//! Callers can override both via [`crate::config::ConversionConfigBuilder::instructions`]
//! and [`crate::config::ConversionConfigBuilder::optimizer_prompt`]; the
//! constants here are the defaults.

/// Instruction text sent alongside every page image.
pub const EXTRACTION_INSTRUCTIONS: &str = "The high resolution image is a page of a DnD Beyond pdf character sheet. \
Take great care to render all the information on the page using an optimal structure for human interpretation. \
Use markdown style tables for optimal human readability on a letter sized and oriented screen. \
Pay exhaustive attention to optimal design and alignment of tables and columns. \
Only render alphanumeric and formatting characters like | or * but never employ special characters like \u{2610}. \
Always ONLY render the character sheet content and NEVER append or prepend descriptive text, ticks, apostrophes, or quotation marks.";

/// System role for the optimization pass.
pub const OPTIMIZER_SYSTEM_PROMPT: &str = "You are a character sheet optimizer.";

/// Formatting prompt placed before the aggregated document text.
pub const OPTIMIZER_PROMPT: &str = r#"The text below is a complete character sheet transcribed page by page into markdown tables. Pages are separated by lines containing only ---.

Reorganise it into a single coherent character sheet:
- Merge tables that were split across pages and remove duplicated rows
- Keep every value exactly as written; never invent, round, or drop numbers
- Group related sections (abilities, saves, skills, attacks, spells, equipment, features) under clear headings
- Use markdown tables wherever the data is tabular

Output ONLY the character sheet. NEVER add commentary, code fences, ticks, apostrophes, or quotation marks around the output.

"#;

/// Build the user message for the optimization pass.
pub fn optimization_user_message(prompt: &str, aggregated: &str) -> String {
    format!("{prompt}{aggregated}")
}
