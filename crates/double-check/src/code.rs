//! Playwright code fragments mirroring a verified selector.

use crate::synthesize::Strategy;

/// Escape a string for inclusion in a single-quoted script literal.
pub fn escape_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// The locator base: `page`, chained through one `frameLocator` per entry of
/// the frame selector chain.
pub fn locator_base(frame_chain: &[String]) -> String {
    let mut base = String::from("page");
    for frame_selector in frame_chain {
        base.push_str(&format!(".frameLocator('{}')", escape_literal(frame_selector)));
    }
    base
}

/// The literal script expression reproducing the accepted candidate.
pub fn locator_expression(frame_chain: &[String], strategy: &Strategy) -> String {
    let base = locator_base(frame_chain);
    match strategy {
        Strategy::TestId { test_id } => {
            format!("{base}.getByTestId('{}')", escape_literal(test_id))
        }
        Strategy::Role { role, name } => format!(
            "{base}.getByRole('{}', {{ name: '{}', exact: true }})",
            escape_literal(role),
            escape_literal(name)
        ),
        Strategy::Placeholder { placeholder } => {
            format!("{base}.getByPlaceholder('{}')", escape_literal(placeholder))
        }
        Strategy::Text { text } => format!(
            "{base}.getByText('{}', {{ exact: true }})",
            escape_literal(text)
        ),
        Strategy::XPath { xpath } => {
            format!("{base}.locator('xpath={}')", escape_literal(xpath))
        }
    }
}
