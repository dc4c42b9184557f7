use std::fmt;

/// Label of the storefront's checkout button. Clicking it ends the session.
pub const END_BUTTON: &str = "Buy Now";

/// A single storefront action, parsed from the `name[argument]` grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Search(String),
    Click(String),
    End,
    /// Anything that does not match the grammar. Executing it is a no-op.
    Invalid(String),
}

impl Action {
    /// Parse a raw action string. Total: malformed input degrades to
    /// `Invalid`, never an error.
    ///
    /// Grammar: `search[<text>]`, `click[<text>]`, bare `end`. Case-sensitive,
    /// single bracket pair, no nesting.
    pub fn parse(raw: &str) -> Action {
        if raw == "end" {
            return Action::End;
        }
        let Some(open) = raw.find('[') else {
            return Action::Invalid(raw.to_string());
        };
        if !raw.ends_with(']') {
            return Action::Invalid(raw.to_string());
        }
        let name = &raw[..open];
        let arg = &raw[open + 1..raw.len() - 1];
        if arg.contains('[') || arg.contains(']') {
            return Action::Invalid(raw.to_string());
        }
        match name {
            "search" => Action::Search(arg.to_string()),
            "click" => Action::Click(arg.to_string()),
            _ => Action::Invalid(raw.to_string()),
        }
    }

    /// Entry recorded in the decision history, in the vocabulary the
    /// decision service uses for its own directives.
    pub fn history_entry(&self) -> Option<String> {
        match self {
            Action::Search(query) => Some(format!("SEARCH {query}")),
            Action::Click(target) => Some(format!("CLICK {target}")),
            Action::End | Action::Invalid(_) => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Search(query) => write!(f, "search[{query}]"),
            Action::Click(target) => write!(f, "click[{target}]"),
            Action::End => write!(f, "end"),
            Action::Invalid(raw) => write!(f, "{raw}"),
        }
    }
}
