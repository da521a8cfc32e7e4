//! REPL command parsing
//!
//! Handles parsing of colon-prefixed commands like :help, :filter, :next.
//! A line without a colon is taken as search text.

use vecscope_client::FilterOperator;
use vecscope_common::SortDirection;

/// A REPL command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Exit the REPL
    Quit,
    /// Show help
    Help,
    /// Add a filter: attribute, operator, raw value
    Filter {
        attribute: String,
        operator: FilterOperator,
        value: String,
    },
    /// Remove a filter by id
    RemoveFilter(u64),
    /// Remove every filter
    ClearFilters,
    /// List active filters
    Filters,
    /// Set the search text (empty clears it)
    Search(String),
    /// Change the sort attribute and direction
    Sort(String, SortDirection),
    Next,
    Previous,
    Page(usize),
    /// Append the next page to the current rows
    More,
    /// Change rows per page
    PageSize(usize),
    /// Show discovered attributes; `true` resamples the namespace
    Attributes(bool),
    /// Reload bypassing the cache
    Refresh,
    /// Show past queries
    History,
    /// Restore the Nth history entry (1-based)
    Restore(usize),
    /// Show the current namespace
    Namespace,
    /// Switch namespace
    Use(String),
    /// Delete documents by id
    Delete(Vec<String>),
    /// Cache statistics
    Stats,
    /// Drop cached pages and schemas
    ClearCache,
    /// Unknown command
    Unknown(String),
}

impl Command {
    /// Parse a command string (without the leading colon).
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        let (name, rest) = match input.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (input, ""),
        };
        let unknown = || Command::Unknown(input.to_string());

        match name {
            "q" | "quit" | "exit" => Command::Quit,
            "h" | "help" | "?" => Command::Help,
            "f" | "filter" => parse_filter(rest).unwrap_or_else(unknown),
            "rm" | "unfilter" => rest.parse().map(Command::RemoveFilter).unwrap_or_else(|_| unknown()),
            "c" | "clear" => Command::ClearFilters,
            "fl" | "filters" => Command::Filters,
            "s" | "search" => Command::Search(rest.to_string()),
            "sort" => parse_sort(rest).unwrap_or_else(unknown),
            "n" | "next" => Command::Next,
            "p" | "prev" => Command::Previous,
            "page" => rest.parse().map(Command::Page).unwrap_or_else(|_| unknown()),
            "m" | "more" => Command::More,
            "size" => match rest.parse() {
                Ok(n) if n > 0 => Command::PageSize(n),
                _ => unknown(),
            },
            "a" | "attrs" => Command::Attributes(false),
            "a!" | "attrs!" => Command::Attributes(true),
            "r" | "refresh" => Command::Refresh,
            "hist" | "history" => Command::History,
            "restore" => rest.parse().map(Command::Restore).unwrap_or_else(|_| unknown()),
            "ns" | "namespace" if rest.is_empty() => Command::Namespace,
            "ns" | "namespace" | "use" if !rest.is_empty() => Command::Use(rest.to_string()),
            "del" | "delete" if !rest.is_empty() => {
                Command::Delete(rest.split_whitespace().map(String::from).collect())
            }
            "stats" => Command::Stats,
            "cache" if rest == "clear" => Command::ClearCache,
            _ => unknown(),
        }
    }
}

/// `<attribute> <operator> <value...>`
fn parse_filter(rest: &str) -> Option<Command> {
    let mut parts = rest.splitn(3, char::is_whitespace);
    let attribute = parts.next().filter(|s| !s.is_empty())?;
    let operator = FilterOperator::parse(parts.next()?)?;
    let value = parts.next().unwrap_or("").trim();
    Some(Command::Filter {
        attribute: attribute.to_string(),
        operator,
        value: value.to_string(),
    })
}

/// `<attribute> [asc|desc]`
fn parse_sort(rest: &str) -> Option<Command> {
    let mut parts = rest.split_whitespace();
    let attribute = parts.next()?;
    let direction = match parts.next() {
        None | Some("asc") => SortDirection::Asc,
        Some("desc") => SortDirection::Desc,
        Some(_) => return None,
    };
    Some(Command::Sort(attribute.to_string(), direction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("q"), Command::Quit);
        assert_eq!(Command::parse("help"), Command::Help);
        assert_eq!(Command::parse("n"), Command::Next);
        assert_eq!(Command::parse("p"), Command::Previous);
        assert_eq!(Command::parse("page 4"), Command::Page(4));
        assert_eq!(Command::parse("size 25"), Command::PageSize(25));
        assert_eq!(Command::parse("rm 3"), Command::RemoveFilter(3));
        assert_eq!(Command::parse("c"), Command::ClearFilters);
        assert_eq!(Command::parse("a!"), Command::Attributes(true));
        assert_eq!(Command::parse("ns"), Command::Namespace);
        assert_eq!(Command::parse("use articles"), Command::Use("articles".into()));
        assert_eq!(Command::parse("restore 2"), Command::Restore(2));
        assert_eq!(Command::parse("cache clear"), Command::ClearCache);
        assert_eq!(Command::parse("cache"), Command::Unknown("cache".into()));
        assert_eq!(Command::parse("unknown"), Command::Unknown("unknown".into()));
    }

    #[test]
    fn test_parse_filter() {
        assert_eq!(
            Command::parse("f score >= 4.5"),
            Command::Filter {
                attribute: "score".into(),
                operator: FilterOperator::GreaterOrEqual,
                value: "4.5".into(),
            }
        );
        assert_eq!(
            Command::parse("filter title matches *rust  book*"),
            Command::Filter {
                attribute: "title".into(),
                operator: FilterOperator::Matches,
                value: "*rust  book*".into(),
            }
        );
        assert_eq!(Command::parse("f score"), Command::Unknown("f score".into()));
        assert_eq!(Command::parse("f score ?? 1"), Command::Unknown("f score ?? 1".into()));
    }

    #[test]
    fn test_parse_sort_and_search() {
        assert_eq!(Command::parse("sort n desc"), Command::Sort("n".into(), SortDirection::Desc));
        assert_eq!(Command::parse("sort id"), Command::Sort("id".into(), SortDirection::Asc));
        assert_eq!(Command::parse("sort id sideways"), Command::Unknown("sort id sideways".into()));
        assert_eq!(Command::parse("s"), Command::Search(String::new()));
        assert_eq!(Command::parse("s 42"), Command::Search("42".into()));
    }

    #[test]
    fn test_parse_invalid_numbers() {
        assert_eq!(Command::parse("page x"), Command::Unknown("page x".into()));
        assert_eq!(Command::parse("size 0"), Command::Unknown("size 0".into()));
        assert_eq!(Command::parse("del"), Command::Unknown("del".into()));
        assert_eq!(Command::parse("del 1 2"), Command::Delete(vec!["1".into(), "2".into()]));
    }
}
